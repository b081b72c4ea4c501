//! Incremental ingestion of dated snapshot directories.
//!
//! [`Ingestor::extend`] only ever appends: it parses each candidate directory
//! name into an hour-resolution timestamp, drops dates the raw store already
//! holds, reads the remaining snapshots through a [`SnapshotReader`] and merges
//! one new column per snapshot. Running it twice on the same directories is a
//! no-op the second time.
use crate::core::{MeasurementRow, SnapshotReader, StructureSource, TaskId};
use crate::error::{AppResult, PipelineError};
use crate::geometry::GeometryIndex;
use crate::series::{RawColumns, RawSeriesStore, TimeSeriesArchive};
use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use ndarray::s;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default snapshot directory name format, e.g. `20230514_120000`.
pub const SNAPSHOT_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Drops minutes and seconds.
pub fn truncate_to_hour(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date().and_time(NaiveTime::default()) + Duration::hours(i64::from(dt.hour()))
}

/// Parses a file or directory name with `format` and truncates it to the hour.
pub fn parse_timestamp(name: &str, format: &str) -> AppResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(name, format)
        .map(truncate_to_hour)
        .map_err(|_| PipelineError::UnparsableName {
            name: name.to_string(),
            format: format.to_string(),
        })
}

/// Immediate subdirectories of `root`, sorted by name.
pub fn list_snapshot_dirs(root: &Path) -> AppResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Outcome of one `extend` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Dates appended to the raw store, ascending.
    pub new_dates: Vec<NaiveDateTime>,
    /// Candidates whose date was already stored.
    pub already_present: usize,
    /// Candidates mapping to the same hour as an earlier candidate.
    pub duplicates: Vec<PathBuf>,
    /// Candidates whose name is not a timestamp.
    pub unparsable: Vec<PathBuf>,
    /// Snapshots recorded with empty columns because they could not be read.
    pub unreadable: Vec<PathBuf>,
    /// Rows whose channel id is not part of the geometry.
    pub ghost_measurements: usize,
}

impl IngestReport {
    pub fn is_noop(&self) -> bool {
        self.new_dates.is_empty()
    }
}

/// Appends new snapshots to an archive's raw store.
pub struct Ingestor<'a> {
    reader: &'a dyn SnapshotReader,
    structure: Option<&'a dyn StructureSource>,
    task_ids: Vec<TaskId>,
    snapshot_format: String,
}

impl<'a> Ingestor<'a> {
    pub fn new(reader: &'a dyn SnapshotReader, task_ids: Vec<TaskId>) -> Self {
        Self {
            reader,
            structure: None,
            task_ids,
            snapshot_format: SNAPSHOT_FORMAT.to_string(),
        }
    }

    /// Structural metadata used to build the geometry on first ingestion.
    pub fn with_structure(mut self, structure: &'a dyn StructureSource) -> Self {
        self.structure = Some(structure);
        self
    }

    pub fn with_snapshot_format(mut self, format: impl Into<String>) -> Self {
        self.snapshot_format = format.into();
        self
    }

    /// Ingests every snapshot directory found directly under `root`.
    pub fn extend_from_root(&self, archive: &mut TimeSeriesArchive, root: &Path) -> AppResult<IngestReport> {
        let dirs = list_snapshot_dirs(root)?;
        self.extend(archive, &dirs)
    }

    /// Ingests exactly one snapshot directory (watcher path).
    pub fn extend_single(&self, archive: &mut TimeSeriesArchive, dir: &Path) -> AppResult<IngestReport> {
        self.extend(archive, &[dir.to_path_buf()])
    }

    /// Appends every candidate whose date is not stored yet.
    #[tracing::instrument(skip_all, fields(candidates = candidate_dirs.len()))]
    pub fn extend(&self, archive: &mut TimeSeriesArchive, candidate_dirs: &[PathBuf]) -> AppResult<IngestReport> {
        if archive.raw.is_none() && self.structure.is_none() {
            return Err(PipelineError::StructureMissing);
        }

        let mut report = IngestReport::default();
        let mut parsed: Vec<(NaiveDateTime, PathBuf)> = Vec::new();
        for dir in candidate_dirs {
            let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match parse_timestamp(name, &self.snapshot_format) {
                Ok(date) => parsed.push((date, dir.clone())),
                Err(e) => {
                    warn!(snapshot = %dir.display(), "skipping snapshot: {e}");
                    report.unparsable.push(dir.clone());
                }
            }
        }
        parsed.sort();

        let mut fresh: Vec<(NaiveDateTime, PathBuf)> = Vec::new();
        for (date, dir) in parsed {
            let stored = archive.raw.as_ref().is_some_and(|raw| raw.contains_date(&date));
            if stored {
                report.already_present += 1;
            } else if fresh.last().is_some_and(|(last, _)| *last == date) {
                warn!(snapshot = %dir.display(), %date, "snapshot falls in an hour already being ingested");
                report.duplicates.push(dir);
            } else {
                fresh.push((date, dir));
            }
        }

        if fresh.is_empty() {
            info!("No new data available");
            return Ok(report);
        }

        let mut raw = match archive.raw.take() {
            Some(raw) => raw,
            None => {
                let structure = self.structure.ok_or(PipelineError::StructureMissing)?;
                let geometry = GeometryIndex::from_source(structure, &self.task_ids)?;
                info!(channels = geometry.len(), windows = geometry.ip_windows(), "geometry built");
                RawSeriesStore::new(geometry)
            }
        };

        let geometry = raw.geometry();
        let mut columns = RawColumns::empty(geometry.len(), fresh.len(), geometry.ip_windows());
        for (column, (date, dir)) in fresh.iter().enumerate() {
            debug!(snapshot = %dir.display(), %date, "reading snapshot");
            let rows = match self.reader.read_snapshot(dir, &self.task_ids) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(snapshot = %dir.display(), "unreadable snapshot, recording empty column: {e}");
                    report.unreadable.push(dir.clone());
                    Vec::new()
                }
            };
            report.ghost_measurements += fill_column(&mut columns, column, geometry, &rows, dir);
        }

        let dates: Vec<NaiveDateTime> = fresh.into_iter().map(|(date, _)| date).collect();
        let appended = raw.append(dates.clone(), columns);
        archive.raw = Some(raw);
        appended?;

        info!(
            new_dates = dates.len(),
            ghosts = report.ghost_measurements,
            "raw series extended"
        );
        report.new_dates = dates;
        Ok(report)
    }
}

/// Writes one snapshot's rows into date column `column`; returns the ghost count.
fn fill_column(
    columns: &mut RawColumns,
    column: usize,
    geometry: &GeometryIndex,
    rows: &[MeasurementRow],
    snapshot: &Path,
) -> usize {
    let windows = geometry.ip_windows();
    let mut ghosts = 0;
    for row in rows {
        let Some(index) = geometry.index_of(row.channel_id) else {
            warn!(channel_id = row.channel_id, snapshot = %snapshot.display(), "ghost measurement");
            ghosts += 1;
            continue;
        };
        columns.voltage[[index, column]] = row.voltage;
        columns.current[[index, column]] = row.current;
        columns.resistance[[index, column]] = row.resistance;
        columns.apres[[index, column]] = row.apres;
        columns.chargeability[[index, column]] = row.chargeability;

        if row.decay.len() != windows {
            debug!(
                channel_id = row.channel_id,
                found = row.decay.len(),
                expected = windows,
                "decay window count differs"
            );
        }
        let n = row.decay.len().min(windows);
        let mut decay = columns.decay.slice_mut(s![index, column, ..n]);
        for (dst, src) in decay.iter_mut().zip(&row.decay) {
            *dst = *src;
        }
    }
    ghosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Electrodes;
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, HashMap};
    use tracing_test::traced_test;

    /// Two tasks, channels 101..103 and 201..202, one IP window.
    struct FakeStructure;

    impl StructureSource for FakeStructure {
        fn read_task_members(&self, _: &[TaskId]) -> AppResult<BTreeMap<TaskId, Vec<u32>>> {
            Ok(BTreeMap::from([(1, vec![101, 102, 103]), (2, vec![201, 202])]))
        }

        fn read_channel_geometry(&self, _: &[TaskId]) -> AppResult<BTreeMap<u32, Electrodes>> {
            Ok([101, 102, 103, 201, 202]
                .into_iter()
                .enumerate()
                .map(|(i, id)| {
                    let a = i as f64;
                    (id, Electrodes::new(a, a + 3.0, a + 1.0, a + 2.0))
                })
                .collect())
        }

        fn read_geometry_index(&self, _: &[TaskId]) -> AppResult<BTreeMap<u32, usize>> {
            Ok([101, 102, 103, 201, 202]
                .into_iter()
                .enumerate()
                .map(|(i, id)| (id, i))
                .collect())
        }

        fn read_ip_window_count(&self, _: &[TaskId]) -> AppResult<usize> {
            Ok(1)
        }
    }

    /// Snapshots keyed by directory name; unknown names are unreadable.
    #[derive(Default)]
    struct FakeReader {
        snapshots: HashMap<String, Vec<MeasurementRow>>,
    }

    impl FakeReader {
        fn with(mut self, name: &str, channels: &[(u32, f64)]) -> Self {
            let rows = channels
                .iter()
                .map(|&(channel_id, resistance)| MeasurementRow {
                    channel_id,
                    voltage: resistance * 0.1,
                    current: 0.1,
                    resistance,
                    apres: resistance * 6.28,
                    chargeability: 2.0,
                    decay: vec![1.5],
                })
                .collect();
            self.snapshots.insert(name.to_string(), rows);
            self
        }
    }

    impl SnapshotReader for FakeReader {
        fn read_snapshot(&self, snapshot: &Path, _: &[TaskId]) -> AppResult<Vec<MeasurementRow>> {
            let name = snapshot.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            self.snapshots.get(name).cloned().ok_or_else(|| {
                PipelineError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, name.to_string()))
            })
        }
    }

    fn all_channels(value: f64) -> Vec<(u32, f64)> {
        [101, 102, 103, 201, 202].into_iter().map(|c| (c, value)).collect()
    }

    fn dirs(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("snapshots").join(n)).collect()
    }

    fn hour(day: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 5, day).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn extends_in_date_order_and_is_idempotent() {
        let reader = FakeReader::default()
            .with("20230502_060000", &all_channels(20.0))
            .with("20230501_060000", &all_channels(10.0));
        let ingestor = Ingestor::new(&reader, vec![1, 2]).with_structure(&FakeStructure);
        let mut archive = TimeSeriesArchive::default();
        let candidates = dirs(&["20230502_060000", "20230501_060000"]);

        let report = ingestor.extend(&mut archive, &candidates).unwrap();
        assert_eq!(report.new_dates, vec![hour(1, 6), hour(2, 6)]);
        let raw = archive.raw().unwrap();
        assert!(raw.is_consistent());
        assert_eq!(raw.resistance().dim(), (5, 2));
        assert_eq!(raw.resistance()[[0, 0]], 10.0);
        assert_eq!(raw.resistance()[[4, 1]], 20.0);
        assert_eq!(raw.decay()[[2, 1, 0]], 1.5);

        let before = archive.clone();
        let again = ingestor.extend(&mut archive, &candidates).unwrap();
        assert!(again.is_noop());
        assert_eq!(again.already_present, 2);
        assert_eq!(archive, before);
    }

    #[test]
    fn later_snapshots_append_without_structure() {
        let reader = FakeReader::default()
            .with("20230501_060000", &all_channels(10.0))
            .with("20230501_090000", &all_channels(11.0));
        let mut archive = TimeSeriesArchive::default();
        Ingestor::new(&reader, vec![1, 2])
            .with_structure(&FakeStructure)
            .extend(&mut archive, &dirs(&["20230501_060000"]))
            .unwrap();

        let report = Ingestor::new(&reader, vec![1, 2])
            .extend_single(&mut archive, &PathBuf::from("20230501_090000"))
            .unwrap();
        assert_eq!(report.new_dates, vec![hour(1, 9)]);
        assert_eq!(archive.raw().unwrap().dates(), &[hour(1, 6), hour(1, 9)]);
    }

    #[test]
    fn first_ingestion_needs_structure() {
        let reader = FakeReader::default().with("20230501_060000", &all_channels(10.0));
        let mut archive = TimeSeriesArchive::default();
        let err = Ingestor::new(&reader, vec![1, 2])
            .extend(&mut archive, &dirs(&["20230501_060000"]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::StructureMissing));
        assert!(err.is_fatal());
        assert!(archive.raw.is_none());
    }

    #[test]
    #[traced_test]
    fn ghost_measurements_are_counted_and_logged() {
        let mut channels = all_channels(10.0);
        channels.push((999, 55.0));
        let reader = FakeReader::default().with("20230501_060000", &channels);
        let mut archive = TimeSeriesArchive::default();
        let report = Ingestor::new(&reader, vec![1, 2])
            .with_structure(&FakeStructure)
            .extend(&mut archive, &dirs(&["20230501_060000"]))
            .unwrap();

        assert_eq!(report.ghost_measurements, 1);
        assert_eq!(archive.raw().unwrap().resistance().dim(), (5, 1));
        assert!(logs_contain("ghost measurement"));
    }

    #[test]
    fn unreadable_and_unparsable_snapshots() {
        let reader = FakeReader::default().with("20230501_060000", &[(101, 10.0)]);
        let mut archive = TimeSeriesArchive::default();
        let report = Ingestor::new(&reader, vec![1, 2])
            .with_structure(&FakeStructure)
            .extend(
                &mut archive,
                &dirs(&["20230501_060000", "20230501_070000", "lost+found"]),
            )
            .unwrap();

        assert_eq!(report.new_dates, vec![hour(1, 6), hour(1, 7)]);
        assert_eq!(report.unreadable, dirs(&["20230501_070000"]));
        assert_eq!(report.unparsable, dirs(&["lost+found"]));
        let resistance = archive.raw().unwrap().resistance();
        assert_eq!(resistance[[0, 0]], 10.0);
        // Channels missing from a snapshot, and the whole unreadable snapshot, stay NaN.
        assert!(resistance[[1, 0]].is_nan());
        assert!(resistance.column(1).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn snapshots_in_the_same_hour_keep_the_first() {
        let reader = FakeReader::default()
            .with("20230501_060000", &all_channels(10.0))
            .with("20230501_064500", &all_channels(99.0));
        let mut archive = TimeSeriesArchive::default();
        let report = Ingestor::new(&reader, vec![1, 2])
            .with_structure(&FakeStructure)
            .extend(&mut archive, &dirs(&["20230501_064500", "20230501_060000"]))
            .unwrap();

        assert_eq!(report.new_dates, vec![hour(1, 6)]);
        assert_eq!(report.duplicates, dirs(&["20230501_064500"]));
        assert_eq!(archive.raw().unwrap().resistance()[[0, 0]], 10.0);
    }

    #[test]
    fn parses_and_truncates_snapshot_names() {
        let dt = parse_timestamp("20230514_124530", SNAPSHOT_FORMAT).unwrap();
        let expected = NaiveDate::from_ymd_opt(2023, 5, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(dt, expected);
    }

    #[test]
    fn rejects_unparsable_names() {
        let err = parse_timestamp("backup", SNAPSHOT_FORMAT).unwrap_err();
        assert!(matches!(err, PipelineError::UnparsableName { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn result_names_use_their_own_format() {
        let dt = parse_timestamp("2023_05_14_12_00_00", "%Y_%m_%d_%H_%M_%S").unwrap();
        assert_eq!(dt.hour(), 12);
    }
}
