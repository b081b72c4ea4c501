//! The time-series data model and its persistence.
//!
//! A [`TimeSeriesArchive`] owns the three growing stores:
//!
//! - **`raw`**: one column per ingested snapshot ([`RawSeriesStore`]).
//! - **`filtered`**: regularized products on their own date axis ([`FilteredSeriesStore`]).
//! - **`inverted`**: per-task solver results in solver space ([`InvertedSeriesStore`]).
//!
//! The archive is the unit of persistence: every pipeline stage loads it, runs
//! to completion and saves it before the next stage reads it.
//!
//! ## Functionality
//!
//! - **`save_archive`**: encodes the archive with `bincode` into a temporary
//!   sibling file and renames it over the target, so a crash never leaves a
//!   half-written archive behind.
//! - **`load_archive`**: decodes an archive previously written by `save_archive`.
//! - **`load_or_default`**: like `load_archive`, but a missing file yields an
//!   empty archive.

pub mod filtered;
pub mod inverted;
pub mod raw;

pub use filtered::FilteredSeriesStore;
pub use inverted::{InvertedSeriesStore, ModelGrid};
pub use raw::{RawColumns, RawSeriesStore};

use crate::core::TaskId;
use crate::error::{AppResult, PipelineError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Aggregate of the raw, filtered and inverted stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesArchive {
    /// Absent until the first ingestion builds the geometry.
    pub raw: Option<RawSeriesStore>,
    pub filtered: FilteredSeriesStore,
    pub inverted: BTreeMap<TaskId, InvertedSeriesStore>,
}

impl TimeSeriesArchive {
    pub fn raw(&self) -> AppResult<&RawSeriesStore> {
        self.raw.as_ref().ok_or(PipelineError::NotInitialized)
    }

    /// The inverted store of a task, created empty on first access.
    pub fn inverted_mut(&mut self, task_id: TaskId) -> &mut InvertedSeriesStore {
        self.inverted
            .entry(task_id)
            .or_insert_with(|| InvertedSeriesStore::new(task_id))
    }

    /// Counts and date ranges of every store.
    pub fn summary(&self) -> ArchiveSummary {
        let span = |dates: &[NaiveDateTime]| (dates.first().copied(), dates.last().copied());
        let (raw_first, raw_last) = self.raw.as_ref().map_or((None, None), |r| span(r.dates()));
        let (filtered_first, filtered_last) = span(self.filtered.dates());
        ArchiveSummary {
            channels: self.raw.as_ref().map_or(0, |r| r.geometry().len()),
            raw_dates: self.raw.as_ref().map_or(0, RawSeriesStore::num_dates),
            raw_first,
            raw_last,
            filtered_dates: self.filtered.dates().len(),
            filtered_first,
            filtered_last,
            inverted: self
                .inverted
                .iter()
                .map(|(&task, store)| TaskSummary {
                    task,
                    dates: store.dates().len(),
                    cells: store.grid().cells(),
                })
                .collect(),
        }
    }
}

/// Human-readable overview of an archive (printed by `inspect`).
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub channels: usize,
    pub raw_dates: usize,
    pub raw_first: Option<NaiveDateTime>,
    pub raw_last: Option<NaiveDateTime>,
    pub filtered_dates: usize,
    pub filtered_first: Option<NaiveDateTime>,
    pub filtered_last: Option<NaiveDateTime>,
    pub inverted: Vec<TaskSummary>,
}

/// Inverted-store overview of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub task: TaskId,
    pub dates: usize,
    pub cells: Option<usize>,
}

/// Saves the archive to `path`, replacing any previous file atomically.
pub fn save_archive(archive: &TimeSeriesArchive, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(fs::File::create(&tmp)?);
        bincode::serialize_into(&mut writer, archive)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), "archive saved");
    Ok(())
}

/// Loads an archive written by [`save_archive`].
pub fn load_archive(path: &Path) -> AppResult<TimeSeriesArchive> {
    let reader = BufReader::new(fs::File::open(path)?);
    let archive = bincode::deserialize_from(reader)?;
    Ok(archive)
}

/// Loads the archive at `path`, or returns an empty one if the file does not exist.
pub fn load_or_default(path: &Path) -> AppResult<TimeSeriesArchive> {
    if path.exists() {
        load_archive(path)
    } else {
        tracing::info!(path = %path.display(), "no archive yet, starting empty");
        Ok(TimeSeriesArchive::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InversionResult;
    use crate::geometry::tests::sample_index;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_empty_archive() {
        let dir = tempdir().unwrap();
        let archive = load_or_default(&dir.path().join("none.bin")).unwrap();
        assert!(archive.raw.is_none());
        assert!(matches!(archive.raw(), Err(PipelineError::NotInitialized)));
    }

    #[test]
    fn save_and_load_preserves_inverted_and_geometry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("archive.bin");

        let mut archive = TimeSeriesArchive {
            raw: Some(RawSeriesStore::new(sample_index())),
            ..Default::default()
        };
        let date = chrono::NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        archive
            .inverted_mut(2)
            .append(
                date,
                InversionResult {
                    x: vec![0.5, 1.5],
                    depth: vec![0.2, 0.2],
                    resistivity: vec![55.0, 60.0],
                    chargeability: vec![3.0, 4.0],
                },
            )
            .unwrap();

        save_archive(&archive, &path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        let loaded = load_archive(&path).unwrap();
        assert_eq!(loaded.inverted, archive.inverted);
        assert_eq!(
            loaded.raw.as_ref().unwrap().geometry(),
            archive.raw.as_ref().unwrap().geometry()
        );

        let summary = loaded.summary();
        assert_eq!(summary.channels, 6);
        assert_eq!(summary.inverted[0].cells, Some(2));
    }
}
