//! Export of raw per-task slices into the solver's batch input format.
//!
//! Each exported date becomes one `.dat` file under
//! `<inversion_root>/<family>/task_<id>/`, named after the date. The solver
//! writes its result next to it with the same stem and an `.xyz` extension;
//! the presence of that result is what marks a date as already exported.
//! Every run that writes at least one new file also writes a `batch.bth`
//! manifest listing those files for the solver.
use crate::config::ExportConfig;
use crate::core::{ChannelId, TaskId};
use crate::error::{AppResult, PipelineError};
use crate::geometry::Electrodes;
use crate::series::RawSeriesStore;
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File stem format shared by export files and solver results.
pub const RESULT_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";
pub const MANIFEST_FILE: &str = "batch.bth";
pub const DATA_EXTENSION: &str = "dat";
pub const RESULT_EXTENSION: &str = "xyz";
pub const INVERSION_EXTENSION: &str = "inv";

/// The two kinds of export batches, each with its own directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFamily {
    /// One timepoint per file.
    Individual,
    /// A timepoint and a fixed baseline per file.
    Timelapse,
}

impl ExportFamily {
    pub const ALL: [ExportFamily; 2] = [ExportFamily::Individual, ExportFamily::Timelapse];

    pub fn dir_name(self) -> &'static str {
        match self {
            ExportFamily::Individual => "individual",
            ExportFamily::Timelapse => "timelapse",
        }
    }
}

impl std::fmt::Display for ExportFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One channel line of an export file.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub channel_id: ChannelId,
    pub electrodes: Electrodes,
    pub resistance: f64,
    pub chargeability: f64,
    pub baseline: Option<(f64, f64)>,
}

/// Everything needed to write one export file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub task_id: TaskId,
    pub date: NaiveDateTime,
    pub baseline_date: Option<NaiveDateTime>,
    /// Channels in task membership order.
    pub channels: Vec<ChannelRecord>,
}

/// Outcome of exporting one family of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub family: ExportFamily,
    pub task_id: TaskId,
    pub written: Vec<PathBuf>,
    /// Dates whose result file already exists.
    pub skipped: usize,
    /// Written only when `written` is not empty.
    pub manifest: Option<PathBuf>,
}

/// Outcome of exporting several tasks; one failing task does not stop the others.
#[derive(Debug, Default)]
pub struct ExportSummary {
    pub batches: Vec<BatchReport>,
    pub failures: Vec<(ExportFamily, TaskId, PipelineError)>,
}

pub struct ExportFormatter {
    settings: ExportConfig,
    inversion_root: PathBuf,
    params_file: PathBuf,
}

impl ExportFormatter {
    pub fn new(settings: ExportConfig, inversion_root: impl Into<PathBuf>, params_file: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            inversion_root: inversion_root.into(),
            params_file: params_file.into(),
        }
    }

    pub fn task_dir(&self, family: ExportFamily, task_id: TaskId) -> PathBuf {
        self.inversion_root
            .join(family.dir_name())
            .join(format!("task_{task_id}"))
    }

    pub fn data_path(&self, family: ExportFamily, task_id: TaskId, date: NaiveDateTime) -> PathBuf {
        self.task_dir(family, task_id)
            .join(date.format(RESULT_FORMAT).to_string())
            .with_extension(DATA_EXTENSION)
    }

    /// Builds the record for `task_id` at `date_index`, optionally paired
    /// with the values at `baseline_index`.
    pub fn export(
        &self,
        raw: &RawSeriesStore,
        task_id: TaskId,
        date_index: usize,
        baseline_index: Option<usize>,
    ) -> AppResult<ExportRecord> {
        let geometry = raw.geometry();
        let members = geometry.members(task_id).ok_or(PipelineError::UnknownTask(task_id))?;
        let len = raw.num_dates();
        for index in std::iter::once(date_index).chain(baseline_index) {
            if index >= len {
                return Err(PipelineError::DateIndexOutOfRange { index, len });
            }
        }

        let mut channels = Vec::with_capacity(members.len());
        for &channel_id in members {
            let (Some(row), Some(electrodes)) = (geometry.index_of(channel_id), geometry.electrodes(channel_id))
            else {
                return Err(PipelineError::InvalidStructure(format!(
                    "task {task_id} member {channel_id} is missing from the geometry"
                )));
            };
            let value = |column: usize| (raw.resistance()[[row, column]], raw.chargeability()[[row, column]]);
            let (resistance, chargeability) = value(date_index);
            channels.push(ChannelRecord {
                channel_id,
                electrodes: *electrodes,
                resistance,
                chargeability,
                baseline: baseline_index.map(value),
            });
        }

        Ok(ExportRecord {
            task_id,
            date: raw.dates()[date_index],
            baseline_date: baseline_index.map(|i| raw.dates()[i]),
            channels,
        })
    }

    /// Renders a record in the solver's general-array text format.
    pub fn render(&self, record: &ExportRecord, file_name: &str) -> String {
        let ip = self.settings.include_chargeability;
        let timelapse = record.baseline_date.is_some();
        let mut out = String::new();
        let mut line = |text: &str| {
            out.push_str(text);
            out.push('\n');
        };

        line(file_name);
        line(&self.settings.spacing.to_string());
        line("11");
        line("0");
        line("Type of measurement (0=app.resistivity,1=resistance)");
        line("1");
        if timelapse {
            line("Type of geometric factor (0=Horizontal distance,1=Linear distance)\r");
            line("0\r");
        }
        line(&record.channels.len().to_string());
        line("2");
        if ip {
            line("1");
            line("Chargeability");
            line("mV/V");
            line(&format!("{} {}", self.settings.ip_delay, self.settings.pulse_length));
        } else {
            line("0");
        }
        if timelapse {
            for text in [
                "Time sequence data ",
                "Number of time sections ",
                "2 ",
                "Time unit ",
                "Day ",
                "Second time section interval ",
                "1 ",
            ] {
                line(text);
            }
        }

        for channel in &record.channels {
            let e = &channel.electrodes;
            let mut text = format!("4 {} 0 {} 0 {} 0 {} 0 {}", e.a, e.b, e.m, e.n, channel.resistance);
            match (channel.baseline, ip) {
                (Some((base_res, base_charg)), true) => {
                    text.push_str(&format!(" {base_res} {} {base_charg}", channel.chargeability));
                }
                (Some((base_res, _)), false) => text.push_str(&format!(" {base_res}")),
                (None, true) => text.push_str(&format!(" {}", channel.chargeability)),
                (None, false) => {}
            }
            line(&text);
        }

        if timelapse {
            for _ in 0..4 {
                line("0\r");
            }
        }
        out
    }

    /// Writes every not-yet-inverted date of one task and family.
    #[tracing::instrument(skip(self, raw, family), fields(family = %family))]
    pub fn export_task(&self, raw: &RawSeriesStore, family: ExportFamily, task_id: TaskId) -> AppResult<BatchReport> {
        let dir = self.task_dir(family, task_id);
        fs::create_dir_all(&dir)?;

        let timelapse = &self.settings.timelapse;
        let (first, baseline) = match family {
            ExportFamily::Individual => (0, None),
            ExportFamily::Timelapse => (timelapse.first_index, Some(timelapse.baseline_index)),
        };

        let mut report = BatchReport {
            family,
            task_id,
            written: Vec::new(),
            skipped: 0,
            manifest: None,
        };
        for date_index in first..raw.num_dates() {
            let path = self.data_path(family, task_id, raw.dates()[date_index]);
            if path.with_extension(RESULT_EXTENSION).is_file() {
                report.skipped += 1;
                continue;
            }
            let record = self.export(raw, task_id, date_index, baseline)?;
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            fs::write(&path, self.render(&record, file_name))?;
            debug!(path = %path.display(), "export file written");
            report.written.push(path);
        }

        let params = self.stage_params(&dir)?;
        if !report.written.is_empty() {
            let manifest = dir.join(MANIFEST_FILE);
            write_manifest(&manifest, &report.written, &params)?;
            report.manifest = Some(manifest);
        }
        info!(
            task_id,
            written = report.written.len(),
            skipped = report.skipped,
            "export finished"
        );
        Ok(report)
    }

    /// Exports every enabled family for every task, collecting failures
    /// instead of stopping at the first one.
    pub fn export_all(&self, raw: &RawSeriesStore, task_ids: &[TaskId]) -> ExportSummary {
        let mut summary = ExportSummary::default();
        for family in self.families() {
            for &task_id in task_ids {
                match self.export_task(raw, family, task_id) {
                    Ok(report) => summary.batches.push(report),
                    Err(e) => {
                        warn!(%family, task_id, "export failed: {e}");
                        summary.failures.push((family, task_id, e));
                    }
                }
            }
        }
        summary
    }

    pub fn families(&self) -> Vec<ExportFamily> {
        ExportFamily::ALL
            .into_iter()
            .filter(|f| *f == ExportFamily::Individual || self.settings.timelapse.enabled)
            .collect()
    }

    /// Copies the solver parameter file into `dir` unless it is already there.
    fn stage_params(&self, dir: &Path) -> AppResult<PathBuf> {
        let name = self.params_file.file_name().ok_or_else(|| {
            PipelineError::Configuration(format!(
                "inversion parameter path '{}' has no file name",
                self.params_file.display()
            ))
        })?;
        let staged = dir.join(name);
        if !staged.is_file() {
            if self.params_file.is_file() {
                fs::copy(&self.params_file, &staged)?;
            } else {
                warn!(params = %self.params_file.display(), "inversion parameter file not found, not staged");
            }
        }
        Ok(staged)
    }
}

/// Writes the solver batch manifest for `files`.
pub fn write_manifest(path: &Path, files: &[PathBuf], params: &Path) -> AppResult<()> {
    let mut out = format!("{}\nINVERSION PARAMETERS FILES USED \n", files.len());
    for (i, file) in files.iter().enumerate() {
        out.push_str(&format!(
            "DATA FILE {i} \n{}\n{}\n{}\n",
            file.display(),
            file.with_extension(INVERSION_EXTENSION).display(),
            params.display()
        ));
    }
    fs::write(path, out)?;
    Ok(())
}
