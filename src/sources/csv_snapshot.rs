//! Snapshot reader for per-snapshot CSV measurement tables.
use crate::core::{ChannelId, MeasurementRow, SnapshotReader, TaskId};
use crate::error::{AppResult, PipelineError};
use csv::StringRecord;
use std::path::Path;

/// Default measurement table name inside a snapshot directory.
pub const SNAPSHOT_FILE: &str = "measurements.csv";

const REQUIRED: [&str; 7] = [
    "task",
    "channel",
    "voltage",
    "current",
    "resistance",
    "apres",
    "chargeability",
];

/// Reads `<snapshot>/<file_name>` with header
/// `task,channel,voltage,current,resistance,apres,chargeability,ip1..ipK`.
///
/// Empty numeric cells become NaN. Decay columns are every header starting
/// with `ip`, in file order.
#[derive(Debug, Clone)]
pub struct CsvSnapshotReader {
    file_name: String,
}

impl Default for CsvSnapshotReader {
    fn default() -> Self {
        Self::new(SNAPSHOT_FILE)
    }
}

impl CsvSnapshotReader {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Artifact whose appearance marks a snapshot as available.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl SnapshotReader for CsvSnapshotReader {
    fn read_snapshot(&self, snapshot: &Path, task_ids: &[TaskId]) -> AppResult<Vec<MeasurementRow>> {
        let path = snapshot.join(&self.file_name);
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(&path)?;
        let headers = reader.headers()?.clone();

        let mut positions = [0usize; 7];
        for (slot, name) in positions.iter_mut().zip(REQUIRED) {
            *slot = headers.iter().position(|h| h == name).ok_or_else(|| {
                PipelineError::Parse {
                    path: path.clone(),
                    message: format!("missing column '{name}'"),
                }
            })?;
        }
        let decay_columns: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.starts_with("ip"))
            .map(|(i, _)| i)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let task: TaskId = parse_int(&record, positions[0], &path)?;
            if !task_ids.contains(&task) {
                continue;
            }
            let value = |i: usize| parse_float(&record, positions[i]);
            rows.push(MeasurementRow {
                channel_id: parse_int::<ChannelId>(&record, positions[1], &path)?,
                voltage: value(2),
                current: value(3),
                resistance: value(4),
                apres: value(5),
                chargeability: value(6),
                decay: decay_columns.iter().map(|&i| parse_float(&record, i)).collect(),
            });
        }
        Ok(rows)
    }
}

fn parse_int<T: std::str::FromStr>(record: &StringRecord, index: usize, path: &Path) -> AppResult<T> {
    let field = record.get(index).unwrap_or_default();
    field.parse().map_err(|_| PipelineError::Parse {
        path: path.to_path_buf(),
        message: format!("'{field}' is not an integer id"),
    })
}

fn parse_float(record: &StringRecord, index: usize) -> f64 {
    record
        .get(index)
        .and_then(|f| f.parse().ok())
        .unwrap_or(f64::NAN)
}
