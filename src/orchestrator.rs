//! Stage sequencing: ingest, filter, export, invert, assimilate, tabulate.
//!
//! Every stage loads nothing on its own: [`Orchestrator::run_cycle`] loads the
//! archive once, runs the stages in order and saves the archive after each
//! stage that changed it, so a crash can always resume from the last
//! completed stage. Each stage is idempotent under its own already-present
//! check, which makes re-running a whole cycle safe.
//!
//! Recoverable errors are logged, collected in the [`CycleReport`] and the
//! cycle moves on; fatal ones ([`PipelineError::is_fatal`]) end the run.
use crate::assimilate::{AssimilationReport, ResultAssimilator, XyzResultReader};
use crate::config::PipelineConfig;
use crate::core::{InversionSolver, ResultReader, SnapshotReader, StructureSource, TaskId};
use crate::data::registry::FilterChain;
use crate::data::storage::{CsvReport, CsvWriter};
use crate::error::{AppResult, PipelineError};
use crate::export::{BatchReport, ExportFamily, ExportFormatter, ExportSummary, MANIFEST_FILE};
use crate::ingest::{IngestReport, Ingestor};
use crate::series::{load_or_default, save_archive, TimeSeriesArchive};
use crate::solver::{invert_batch, CommandSolver};
use crate::sources::{CsvSnapshotReader, StructureFile};
use crate::watch::{wait_until_stable, SnapshotWatcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one cycle did, stage by stage.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub ingest: Option<IngestReport>,
    pub filtered_dates: Option<usize>,
    pub exports: Vec<BatchReport>,
    /// Manifests the solver processed successfully.
    pub inverted: Vec<PathBuf>,
    /// Manifests left on disk after a solver failure.
    pub failed_batches: Vec<PathBuf>,
    pub assimilated: BTreeMap<TaskId, AssimilationReport>,
    pub csv: Option<CsvReport>,
    /// Recoverable errors, in the order they occurred.
    pub errors: Vec<String>,
}

impl CycleReport {
    /// Export files written in this cycle, over all tasks and families.
    pub fn exported_files(&self) -> usize {
        self.exports.iter().map(|b| b.written.len()).sum()
    }

    fn record(&mut self, stage: &str, err: PipelineError) -> AppResult<()> {
        if err.is_fatal() {
            error!(stage, "fatal error, stopping: {err}");
            return Err(err);
        }
        warn!(stage, "stage failed, continuing: {err}");
        self.errors.push(format!("{stage}: {err}"));
        Ok(())
    }
}

/// Runs the pipeline with an injected configuration and collaborators.
pub struct Orchestrator {
    config: PipelineConfig,
    snapshot_reader: Box<dyn SnapshotReader + Send + Sync>,
    structure: Option<Box<dyn StructureSource + Send + Sync>>,
    result_reader: Box<dyn ResultReader + Send + Sync>,
    solver: Option<Arc<dyn InversionSolver>>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        snapshot_reader: Box<dyn SnapshotReader + Send + Sync>,
        result_reader: Box<dyn ResultReader + Send + Sync>,
    ) -> Self {
        Self {
            config,
            snapshot_reader,
            structure: None,
            result_reader,
            solver: None,
        }
    }

    /// Wires the file-based collaborators named by the configuration.
    ///
    /// A configured structure file that does not exist yet is not an error
    /// here; ingestion fails later only if the archive has no geometry either.
    pub fn from_config(config: PipelineConfig) -> AppResult<Self> {
        let reader = CsvSnapshotReader::new(config.survey.snapshot_file.clone());
        let structure = match &config.paths.structure_file {
            Some(path) if path.is_file() => Some(StructureFile::load(path)?),
            Some(path) => {
                warn!(path = %path.display(), "structure file not found");
                None
            }
            None => None,
        };
        let solver = CommandSolver::from_config(&config.solver);

        let mut orchestrator = Self::new(config, Box::new(reader), Box::new(XyzResultReader));
        if let Some(structure) = structure {
            orchestrator = orchestrator.with_structure(Box::new(structure));
        }
        if let Some(solver) = solver {
            orchestrator = orchestrator.with_solver(Arc::new(solver));
        }
        Ok(orchestrator)
    }

    pub fn with_structure(mut self, structure: Box<dyn StructureSource + Send + Sync>) -> Self {
        self.structure = Some(structure);
        self
    }

    pub fn with_solver(mut self, solver: Arc<dyn InversionSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn load(&self) -> AppResult<TimeSeriesArchive> {
        load_or_default(&self.config.paths.archive_file)
    }

    pub fn save(&self, archive: &TimeSeriesArchive) -> AppResult<()> {
        save_archive(archive, &self.config.paths.archive_file)
    }

    fn task_ids(&self) -> &[TaskId] {
        &self.config.survey.task_ids
    }

    fn formatter(&self) -> ExportFormatter {
        ExportFormatter::new(
            self.config.export.clone(),
            &self.config.paths.inversion_root,
            &self.config.paths.inversion_params,
        )
    }

    /// Ingests `snapshot`, or every snapshot under the data root when `None`.
    pub fn ingest(&self, archive: &mut TimeSeriesArchive, snapshot: Option<&Path>) -> AppResult<IngestReport> {
        let mut ingestor = Ingestor::new(self.snapshot_reader.as_ref(), self.task_ids().to_vec())
            .with_snapshot_format(self.config.survey.snapshot_format.clone());
        if let Some(structure) = &self.structure {
            ingestor = ingestor.with_structure(structure.as_ref());
        }
        match snapshot {
            Some(dir) => ingestor.extend_single(archive, dir),
            None => ingestor.extend_from_root(archive, &self.config.paths.data_root),
        }
    }

    pub fn filter(&self, archive: &mut TimeSeriesArchive) -> AppResult<usize> {
        FilterChain::from_config(&self.config.filter)?.run(archive)
    }

    /// Exports every task; a task that fails is reported in the summary.
    pub fn export(&self, archive: &TimeSeriesArchive) -> AppResult<ExportSummary> {
        Ok(self.formatter().export_all(archive.raw()?, self.task_ids()))
    }

    /// Runs the solver on every pending manifest.
    ///
    /// Returns the manifests inverted successfully and those that failed.
    pub async fn invert(&self) -> (Vec<PathBuf>, Vec<(PathBuf, PipelineError)>) {
        let (mut done, mut failed) = (Vec::new(), Vec::new());
        let Some(solver) = &self.solver else {
            debug!("no solver configured, skipping inversion");
            return (done, failed);
        };
        let formatter = self.formatter();
        for family in formatter.families() {
            for &task_id in self.task_ids() {
                let manifest = formatter.task_dir(family, task_id).join(MANIFEST_FILE);
                if !manifest.is_file() {
                    continue;
                }
                match invert_batch(solver.as_ref(), &manifest).await {
                    Ok(()) => done.push(manifest),
                    Err(e) => {
                        warn!(task_id, batch = %manifest.display(), "solver failed, manifest kept: {e}");
                        failed.push((manifest, e));
                    }
                }
            }
        }
        (done, failed)
    }

    /// Absorbs new individual-family results of one task.
    pub fn assimilate(&self, archive: &mut TimeSeriesArchive, task_id: TaskId) -> AppResult<AssimilationReport> {
        let dir = self.formatter().task_dir(ExportFamily::Individual, task_id);
        ResultAssimilator::new(self.result_reader.as_ref())
            .with_result_format(self.config.survey.result_format.clone())
            .assimilate_dir(archive.inverted_mut(task_id), &dir)
    }

    pub fn write_csv(&self, archive: &TimeSeriesArchive) -> AppResult<CsvReport> {
        CsvWriter::new(&self.config.paths.csv_dir).write_all(archive)
    }

    /// Full cycle over every snapshot under the data root.
    pub async fn run_cycle(&self) -> AppResult<CycleReport> {
        self.run_cycle_for(None).await
    }

    /// Full cycle, ingesting only `snapshot` when given.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle_for(&self, snapshot: Option<&Path>) -> AppResult<CycleReport> {
        let mut report = CycleReport::default();
        let mut archive = self.load()?;

        match self.ingest(&mut archive, snapshot) {
            Ok(ingest) => {
                if !ingest.is_noop() {
                    self.save(&archive)?;
                }
                report.ingest = Some(ingest);
            }
            Err(e) => report.record("ingest", e)?,
        }

        if archive.raw.is_some() {
            match self.filter(&mut archive) {
                Ok(count) => {
                    self.save(&archive)?;
                    report.filtered_dates = Some(count);
                }
                Err(e) => report.record("filter", e)?,
            }

            match self.export(&archive) {
                Ok(summary) => {
                    report.exports = summary.batches;
                    for (_, _, e) in summary.failures {
                        report.record("export", e)?;
                    }
                }
                Err(e) => report.record("export", e)?,
            }
        } else {
            info!("no raw data yet, skipping filter and export");
        }

        let (done, failed) = self.invert().await;
        report.inverted = done;
        for (manifest, e) in failed {
            report.failed_batches.push(manifest);
            report.record("invert", e)?;
        }

        let mut assimilated_any = false;
        for &task_id in self.task_ids() {
            match self.assimilate(&mut archive, task_id) {
                Ok(task_report) => {
                    assimilated_any |= !task_report.new_dates.is_empty();
                    report.assimilated.insert(task_id, task_report);
                }
                Err(e) => report.record("assimilate", e)?,
            }
        }
        if assimilated_any {
            self.save(&archive)?;
        }

        match self.write_csv(&archive) {
            Ok(csv) => report.csv = Some(csv),
            Err(e) => report.record("csv", e)?,
        }

        info!(
            exported = report.exported_files(),
            inverted = report.inverted.len(),
            errors = report.errors.len(),
            "cycle complete"
        );
        Ok(report)
    }

    /// Runs a cycle for every snapshot artifact that appears under the data
    /// root, until the watcher shuts down or a fatal error occurs.
    pub async fn watch(&self) -> AppResult<()> {
        let watch = &self.config.watch;
        let mut watcher = SnapshotWatcher::new(&self.config.paths.data_root, watch.extension.clone())?;
        while let Some(artifact) = watcher.next_artifact().await {
            if let Err(e) = wait_until_stable(&artifact, watch.poll_interval, watch.stable_samples).await {
                warn!(artifact = %artifact.display(), "artifact vanished before it was stable: {e}");
                continue;
            }
            let Some(snapshot) = watcher.snapshot_dir_of(&artifact) else {
                debug!(artifact = %artifact.display(), "artifact is not inside a snapshot directory");
                continue;
            };
            match self.run_cycle_for(Some(&snapshot)).await {
                Ok(report) => info!(
                    snapshot = %snapshot.display(),
                    new_dates = report.ingest.map_or(0, |r| r.new_dates.len()),
                    "snapshot processed"
                ),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(snapshot = %snapshot.display(), "cycle failed: {e}"),
            }
        }
        Ok(())
    }
}
