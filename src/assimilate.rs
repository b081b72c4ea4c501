//! Reassimilation of solver results into the per-task inverted stores.
use crate::core::{InversionResult, ResultReader};
use crate::error::{AppResult, PipelineError};
use crate::export::{RESULT_EXTENSION, RESULT_FORMAT};
use crate::ingest::parse_timestamp;
use crate::series::InvertedSeriesStore;
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Header lines before the value-count line of an `.xyz` result.
const XYZ_HEADER_LINES: usize = 5;

/// Reads the solver's `.xyz` model output.
///
/// After five header lines and a value-count line, every row holds
/// whitespace-separated `x depth resistivity ... chargeability` values, with
/// chargeability in the last column. A line starting with `/` ends the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct XyzResultReader;

impl XyzResultReader {
    /// Parses the model table; a table without any cell is an error.
    pub fn parse(text: &str) -> Result<InversionResult, String> {
        let mut result = InversionResult::default();
        for (n, line) in text.lines().enumerate().skip(XYZ_HEADER_LINES + 1) {
            if line.starts_with('/') {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            let values = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("line {}: {e}", n + 1))?;
            let (&[x, depth, resistivity, ..], Some(&chargeability)) = (values.as_slice(), values.last()) else {
                return Err(format!("line {} has {} columns, expected at least 3", n + 1, values.len()));
            };
            result.x.push(x);
            result.depth.push(depth);
            result.resistivity.push(resistivity);
            result.chargeability.push(chargeability);
        }
        if result.cells() == 0 {
            return Err("no model cells before the end of the table".to_string());
        }
        Ok(result)
    }
}

impl ResultReader for XyzResultReader {
    fn read_result(&self, path: &Path) -> AppResult<InversionResult> {
        Self::parse(&fs::read_to_string(path)?).map_err(|message| PipelineError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }
}

/// Outcome of one assimilation call for one task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssimilationReport {
    pub new_dates: Vec<NaiveDateTime>,
    pub already_present: usize,
    pub unparsable: Vec<PathBuf>,
    /// Result files that could not be read; their dates are not advanced.
    pub unreadable: Vec<PathBuf>,
}

/// Merges new solver results into an [`InvertedSeriesStore`].
pub struct ResultAssimilator<'a> {
    reader: &'a dyn ResultReader,
    result_format: String,
}

impl<'a> ResultAssimilator<'a> {
    pub fn new(reader: &'a dyn ResultReader) -> Self {
        Self {
            reader,
            result_format: RESULT_FORMAT.to_string(),
        }
    }

    pub fn with_result_format(mut self, format: impl Into<String>) -> Self {
        self.result_format = format.into();
        self
    }

    /// Result files directly inside `dir`, sorted. A missing directory has none.
    pub fn list_results(dir: &Path) -> AppResult<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == RESULT_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn assimilate_dir(&self, store: &mut InvertedSeriesStore, dir: &Path) -> AppResult<AssimilationReport> {
        let files = Self::list_results(dir)?;
        self.assimilate(store, &files)
    }

    /// Appends every result whose date the store does not hold yet.
    ///
    /// All new results are validated against the store's model grid before
    /// any is kept: on a shape mismatch the call fails and `store` is left
    /// exactly as it was.
    #[tracing::instrument(skip_all, fields(task_id = store.task_id(), files = result_files.len()))]
    pub fn assimilate(
        &self,
        store: &mut InvertedSeriesStore,
        result_files: &[PathBuf],
    ) -> AppResult<AssimilationReport> {
        let mut report = AssimilationReport::default();
        let mut parsed: Vec<(NaiveDateTime, &PathBuf)> = Vec::new();
        for file in result_files {
            let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            match parse_timestamp(stem, &self.result_format) {
                Ok(date) => parsed.push((date, file)),
                Err(e) => {
                    warn!(file = %file.display(), "skipping result: {e}");
                    report.unparsable.push(file.clone());
                }
            }
        }
        parsed.sort();
        parsed.dedup_by_key(|(date, _)| *date);

        let mut staged = store.clone();
        for (date, file) in parsed {
            if staged.contains_date(&date) {
                report.already_present += 1;
                continue;
            }
            let result = match self.reader.read_result(file) {
                Ok(result) => result,
                Err(e) => {
                    warn!(file = %file.display(), task_id = store.task_id(), "unreadable result: {e}");
                    report.unreadable.push(file.clone());
                    continue;
                }
            };
            match staged.append(date, result) {
                Ok(()) => report.new_dates.push(date),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(file = %file.display(), task_id = store.task_id(), "rejected result: {e}");
                    report.unreadable.push(file.clone());
                }
            }
        }

        if report.new_dates.is_empty() {
            info!(task_id = store.task_id(), "No new results available");
        } else {
            *store = staged;
            info!(
                task_id = store.task_id(),
                new_dates = report.new_dates.len(),
                "results assimilated"
            );
        }
        Ok(report)
    }
}
