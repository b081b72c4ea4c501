//! Tabular CSV export of the three stores for external analysis tools.
use crate::core::{ChannelId, TaskId};
use crate::error::AppResult;
use crate::geometry::GeometryIndex;
use crate::series::TimeSeriesArchive;
use chrono::NaiveDateTime;
use ndarray::Array2;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const RAW_CSV: &str = "data_raw.csv";
pub const FILTERED_CSV: &str = "data_filtered.csv";
pub const INVERTED_CSV: &str = "data_inverted.csv";

const DATE_FORMAT: &str = "%Y-%m-%d %H:00:00";

#[derive(Debug, Serialize)]
struct ChannelRecord {
    dt: String,
    dpid: ChannelId,
    tid: TaskId,
    fx: f64,
    fz: f64,
    apres: Option<f64>,
    charg: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CellRecord {
    dt: String,
    tid: TaskId,
    x: f64,
    z: f64,
    resistivity: Option<f64>,
    chargeability: Option<f64>,
}

/// Rows written per file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvReport {
    pub raw_rows: usize,
    pub filtered_rows: usize,
    pub inverted_rows: usize,
}

/// Writes `data_raw.csv`, `data_filtered.csv` and `data_inverted.csv`.
///
/// Files are rewritten from scratch on every call. Missing values are empty
/// cells.
pub struct CsvWriter {
    dir: PathBuf,
}

impl CsvWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[tracing::instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn write_all(&self, archive: &TimeSeriesArchive) -> AppResult<CsvReport> {
        fs::create_dir_all(&self.dir)?;
        let mut report = CsvReport::default();
        if let Some(raw) = &archive.raw {
            report.raw_rows = write_channels(
                &self.dir.join(RAW_CSV),
                raw.geometry(),
                raw.dates(),
                raw.apres(),
                raw.chargeability(),
            )?;
            report.filtered_rows = write_channels(
                &self.dir.join(FILTERED_CSV),
                raw.geometry(),
                archive.filtered.dates(),
                archive.filtered.apres(),
                archive.filtered.chargeability(),
            )?;
        }
        report.inverted_rows = write_inverted(&self.dir.join(INVERTED_CSV), archive)?;
        info!(
            raw = report.raw_rows,
            filtered = report.filtered_rows,
            inverted = report.inverted_rows,
            "csv tables written"
        );
        Ok(report)
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn write_channels(
    path: &Path,
    geometry: &GeometryIndex,
    dates: &[NaiveDateTime],
    apres: &Array2<f64>,
    charg: &Array2<f64>,
) -> AppResult<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut rows = 0;
    for (col, date) in dates.iter().enumerate() {
        let dt = date.format(DATE_FORMAT).to_string();
        for row in 0..geometry.len() {
            let Some(dpid) = geometry.channel_at(row) else {
                continue;
            };
            let Some(tid) = geometry.task_of(dpid) else {
                continue;
            };
            writer.serialize(ChannelRecord {
                dt: dt.clone(),
                dpid,
                tid,
                fx: geometry.focus_x()[row],
                fz: geometry.focus_z()[row],
                apres: apres.get([row, col]).copied().and_then(finite),
                charg: charg.get([row, col]).copied().and_then(finite),
            })?;
            rows += 1;
        }
    }
    writer.flush()?;
    Ok(rows)
}

fn write_inverted(path: &Path, archive: &TimeSeriesArchive) -> AppResult<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut rows = 0;
    for (&tid, store) in &archive.inverted {
        for (col, date) in store.dates().iter().enumerate() {
            let dt = date.format(DATE_FORMAT).to_string();
            for (cell, (&x, &z)) in store.x().iter().zip(store.depth()).enumerate() {
                writer.serialize(CellRecord {
                    dt: dt.clone(),
                    tid,
                    x,
                    z,
                    resistivity: store.resistivity().get([cell, col]).copied().and_then(finite),
                    chargeability: store.chargeability().get([cell, col]).copied().and_then(finite),
                })?;
                rows += 1;
            }
        }
    }
    writer.flush()?;
    Ok(rows)
}
