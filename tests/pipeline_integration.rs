//! End-to-end pipeline tests
//!
//! Each test builds a survey on disk (structure file, snapshot directories,
//! solver parameter file) inside a temporary directory and drives the
//! [`Orchestrator`] through full cycles. The external solver is replaced by
//! [`FakeSolver`], which writes an `.xyz` result next to every data file named
//! in the batch manifest.

use async_trait::async_trait;
use geo_timeseries::config::{PipelineConfig, SurveyConfig};
use geo_timeseries::core::InversionSolver;
use geo_timeseries::data::interpolate::InterpolationKind;
use geo_timeseries::data::storage::{FILTERED_CSV, INVERTED_CSV, RAW_CSV};
use geo_timeseries::export::{ExportFamily, MANIFEST_FILE};
use geo_timeseries::series::load_archive;
use geo_timeseries::{AppResult, Orchestrator, PipelineError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const STRUCTURE: &str = r#"
ip_windows = [0.02, 0.04, 0.08]

[[channels]]
id = 11
task = 1
a = 0.0
b = 3.0
m = 1.0
n = 2.0

[[channels]]
id = 12
task = 1
a = 1.0
b = 4.0
m = 2.0
n = 3.0

[[channels]]
id = 13
task = 1
a = 2.0
b = 5.0
m = 3.0
n = 4.0

[[channels]]
id = 21
task = 2
a = 0.0
b = 6.0
m = 2.0
n = 4.0

[[channels]]
id = 22
task = 2
a = 1.0
b = 7.0
m = 3.0
n = 5.0
"#;

const CELLS: usize = 6;

struct Fixture {
    dir: TempDir,
    config: PipelineConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("structure.toml"), STRUCTURE).unwrap();
        fs::write(root.join("params.ini"), "ITERATIONS=5\n").unwrap();
        fs::create_dir_all(root.join("snapshots")).unwrap();

        let mut config = PipelineConfig::default();
        config.paths.data_root = root.join("snapshots");
        config.paths.structure_file = Some(root.join("structure.toml"));
        config.paths.archive_file = root.join("archive.bin");
        config.paths.inversion_root = root.join("inversion");
        config.paths.csv_dir = root.join("csv");
        config.paths.inversion_params = root.join("params.ini");
        config.survey = SurveyConfig {
            task_ids: vec![1, 2],
            ..SurveyConfig::default()
        };
        config.filter.kind = InterpolationKind::Linear;
        config.export.timelapse.first_index = 2;
        config.export.timelapse.baseline_index = 0;

        let fixture = Self { dir, config };
        for name in ["20230501_060000", "20230501_090000", "20230501_120000"] {
            fixture.add_snapshot(name);
        }
        fixture
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a complete snapshot of every channel and returns its directory.
    fn add_snapshot(&self, name: &str) -> PathBuf {
        let dir = self.config.paths.data_root.join(name);
        fs::create_dir_all(&dir).unwrap();
        let hour: f64 = name[9..11].parse().unwrap();
        let mut csv = String::from("task,channel,voltage,current,resistance,apres,chargeability,ip1,ip2\n");
        for (task, channel) in [(1, 11), (1, 12), (1, 13), (2, 21), (2, 22)] {
            let resistance = f64::from(channel) + hour;
            csv.push_str(&format!(
                "{task},{channel},{},0.1,{resistance},{},3.5,2.0,1.0\n",
                resistance * 0.1,
                resistance * 6.0
            ));
        }
        fs::write(dir.join("measurements.csv"), csv).unwrap();
        dir
    }

    fn task_dir(&self, family: ExportFamily, task: u32) -> PathBuf {
        self.config
            .paths
            .inversion_root
            .join(family.dir_name())
            .join(format!("task_{task}"))
    }

    fn orchestrator(&self, solver: Arc<dyn InversionSolver>) -> Orchestrator {
        Orchestrator::from_config(self.config.clone()).unwrap().with_solver(solver)
    }
}

/// Writes `CELLS` model cells for every data file of a batch.
#[derive(Default)]
struct FakeSolver {
    batches: AtomicUsize,
    cells: Option<usize>,
}

impl FakeSolver {
    fn data_files(manifest: &Path) -> Vec<PathBuf> {
        let text = fs::read_to_string(manifest).unwrap();
        let mut lines = text.lines();
        let mut files = Vec::new();
        while let Some(line) = lines.next() {
            if line.starts_with("DATA FILE") {
                files.push(PathBuf::from(lines.next().unwrap()));
            }
        }
        files
    }
}

#[async_trait]
impl InversionSolver for FakeSolver {
    async fn run_batch(&self, manifest: &Path) -> AppResult<()> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let cells = self.cells.unwrap_or(CELLS);
        for data in Self::data_files(manifest) {
            let mut xyz = String::from("model\nline 2\nline 3\nline 4\nline 5\n");
            xyz.push_str(&format!("{cells}\n"));
            for cell in 0..cells {
                xyz.push_str(&format!("{}.5 0.25 {}.0 0.01 4.0\n", cell, 100 + cell));
            }
            xyz.push_str("/ end of model\n");
            fs::write(data.with_extension("xyz"), xyz)?;
        }
        Ok(())
    }
}

struct FailingSolver;

#[async_trait]
impl InversionSolver for FailingSolver {
    async fn run_batch(&self, manifest: &Path) -> AppResult<()> {
        Err(PipelineError::Solver {
            batch: manifest.to_path_buf(),
            message: "licence server unreachable".to_string(),
        })
    }
}

#[tokio::test]
async fn full_cycle_fills_every_store() {
    let fixture = Fixture::new();
    let solver = Arc::new(FakeSolver::default());
    let orchestrator = fixture.orchestrator(solver.clone());

    let report = orchestrator.run_cycle().await.unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.ingest.as_ref().unwrap().new_dates.len(), 3);
    assert_eq!(report.filtered_dates, Some(3));
    // 3 individual dates and 1 timelapse date, for each of 2 tasks.
    assert_eq!(report.exported_files(), 8);
    assert_eq!(report.inverted.len(), 4);
    assert_eq!(solver.batches.load(Ordering::SeqCst), 4);
    assert_eq!(report.assimilated[&1].new_dates.len(), 3);
    assert_eq!(report.assimilated[&2].new_dates.len(), 3);

    for family in ExportFamily::ALL {
        for task in [1, 2] {
            assert!(!fixture.task_dir(family, task).join(MANIFEST_FILE).exists());
            assert!(fixture.task_dir(family, task).join("params.ini").is_file());
        }
    }

    let archive = load_archive(&fixture.config.paths.archive_file).unwrap();
    let raw = archive.raw().unwrap();
    assert_eq!(raw.resistance().dim(), (5, 3));
    assert_eq!(raw.decay().dim(), (5, 3, 2));
    assert_eq!(raw.resistance()[[0, 1]], 11.0 + 9.0);
    assert_eq!(archive.filtered.dates().len(), 3);
    let inverted = &archive.inverted[&1];
    assert_eq!(inverted.resistivity().dim(), (CELLS, 3));
    assert_eq!(inverted.x()[1], 1.5);

    let csv = report.csv.unwrap();
    assert_eq!(csv.raw_rows, 15);
    for name in [RAW_CSV, FILTERED_CSV, INVERTED_CSV] {
        assert!(fixture.config.paths.csv_dir.join(name).is_file());
    }
}

#[tokio::test]
async fn repeated_cycle_changes_nothing() {
    let fixture = Fixture::new();
    let solver = Arc::new(FakeSolver::default());
    let orchestrator = fixture.orchestrator(solver.clone());
    orchestrator.run_cycle().await.unwrap();
    let before = load_archive(&fixture.config.paths.archive_file).unwrap();

    let report = orchestrator.run_cycle().await.unwrap();
    assert!(report.ingest.as_ref().unwrap().is_noop());
    assert_eq!(report.exported_files(), 0);
    assert!(report.inverted.is_empty());
    assert_eq!(solver.batches.load(Ordering::SeqCst), 4);
    assert!(report.assimilated.values().all(|r| r.new_dates.is_empty()));

    let after = load_archive(&fixture.config.paths.archive_file).unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn new_snapshot_exports_only_its_date() {
    let fixture = Fixture::new();
    let solver = Arc::new(FakeSolver::default());
    let orchestrator = fixture.orchestrator(solver.clone());
    orchestrator.run_cycle().await.unwrap();

    let snapshot = fixture.add_snapshot("20230501_150000");
    let report = orchestrator.run_cycle_for(Some(&snapshot)).await.unwrap();
    assert_eq!(report.ingest.as_ref().unwrap().new_dates.len(), 1);
    // One individual and one timelapse file per task.
    assert_eq!(report.exported_files(), 4);
    assert!(report.exports.iter().all(|b| b.written.len() == 1));
    assert_eq!(report.assimilated[&1].new_dates.len(), 1);

    let archive = load_archive(&fixture.config.paths.archive_file).unwrap();
    assert_eq!(archive.raw().unwrap().num_dates(), 4);
    assert_eq!(archive.inverted[&2].dates().len(), 4);
}

#[tokio::test]
async fn solver_failure_keeps_manifests_and_continues() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(Arc::new(FailingSolver));

    let report = orchestrator.run_cycle().await.unwrap();
    assert_eq!(report.failed_batches.len(), 4);
    assert_eq!(report.errors.len(), 4);
    assert!(report.errors[0].contains("licence server unreachable"));
    assert!(fixture
        .task_dir(ExportFamily::Individual, 1)
        .join(MANIFEST_FILE)
        .is_file());
    // Later stages still ran.
    assert!(report.csv.is_some());
    assert!(report.assimilated.values().all(|r| r.new_dates.is_empty()));
}

#[tokio::test]
async fn missing_structure_stops_the_run() {
    let mut fixture = Fixture::new();
    fixture.config.paths.structure_file = Some(fixture.root().join("absent.toml"));
    let orchestrator = fixture.orchestrator(Arc::new(FakeSolver::default()));

    let err = orchestrator.run_cycle().await.unwrap_err();
    assert!(matches!(err, PipelineError::StructureMissing));
    assert!(!fixture.config.paths.archive_file.exists());
}

#[tokio::test]
async fn result_with_other_grid_stops_the_run() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(Arc::new(FakeSolver::default()));
    orchestrator.run_cycle().await.unwrap();

    // A stray result on a different model grid for a date not stored yet.
    let solver = FakeSolver {
        cells: Some(CELLS + 2),
        ..FakeSolver::default()
    };
    let stray = fixture
        .task_dir(ExportFamily::Individual, 1)
        .join("2023_05_02_00_00_00.dat");
    let manifest = fixture.root().join("stray.bth");
    fs::write(&manifest, format!("1\nX\nDATA FILE 0 \n{}\n", stray.display())).unwrap();
    solver.run_batch(&manifest).await.unwrap();

    let err = orchestrator.run_cycle().await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ShapeMismatch {
            task_id: 1,
            expected: CELLS,
            found
        } if found == CELLS + 2
    ));
    let archive = load_archive(&fixture.config.paths.archive_file).unwrap();
    assert_eq!(archive.inverted[&1].dates().len(), 3);
}

#[tokio::test]
async fn unknown_task_does_not_block_other_exports() {
    let mut fixture = Fixture::new();
    fixture.config.survey.task_ids = vec![3, 1, 2];
    let orchestrator = fixture.orchestrator(Arc::new(FakeSolver::default()));

    let report = orchestrator.run_cycle().await.unwrap();
    assert_eq!(report.exported_files(), 8);
    assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
    assert!(report.errors.iter().all(|e| e.starts_with("export:") && e.contains('3')));
    assert_eq!(report.assimilated[&1].new_dates.len(), 3);
    assert_eq!(report.assimilated[&2].new_dates.len(), 3);
}
