//! Pipeline configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `GEO_TS_`, nested keys separated by `__`
//!
//! Every section has defaults, so a file only needs the values that differ.
//! `survey.task_ids` has no sensible default and must always be given.
//!
//! # Example
//! ```no_run
//! use geo_timeseries::config::PipelineConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load("config/pipeline.toml")?;
//! println!("Tasks: {:?}", config.survey.task_ids);
//! # Ok(())
//! # }
//! ```
//!
//! `GEO_TS_FILTER__MEDIAN_WINDOW=9` overrides `[filter] median_window`.

use crate::core::TaskId;
use crate::data::interpolate::InterpolationKind;
use crate::error::{AppResult, PipelineError};
use crate::validation;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "GEO_TS_";

/// Names accepted in `filter.chain`.
pub const FILTER_NAMES: [&str; 3] = ["fill", "median", "lowpass"];

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub application: ApplicationConfig,
    pub paths: PathsConfig,
    pub survey: SurveyConfig,
    pub filter: FilterConfig,
    pub export: ExportConfig,
    pub solver: SolverConfig,
    pub watch: WatchConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "geo-timeseries".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Locations of every input and output of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root holding one directory per snapshot; also the watched directory.
    pub data_root: PathBuf,
    /// Structural metadata; only needed until the archive holds a geometry.
    pub structure_file: Option<PathBuf>,
    pub archive_file: PathBuf,
    /// Root of the `individual/` and `timelapse/` export trees.
    pub inversion_root: PathBuf,
    pub csv_dir: PathBuf,
    /// Solver parameter file copied next to every export batch.
    pub inversion_params: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data/snapshots"),
            structure_file: None,
            archive_file: PathBuf::from("data/archive.bin"),
            inversion_root: PathBuf::from("data/inversion"),
            csv_dir: PathBuf::from("data/csv"),
            inversion_params: PathBuf::from("config/inversion_params.ini"),
        }
    }
}

/// Which survey lines to process and how artifacts are named
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub task_ids: Vec<TaskId>,
    pub snapshot_format: String,
    pub result_format: String,
    /// Measurement table inside each snapshot directory.
    pub snapshot_file: String,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            task_ids: Vec::new(),
            snapshot_format: crate::ingest::SNAPSHOT_FORMAT.to_string(),
            result_format: crate::export::RESULT_FORMAT.to_string(),
            snapshot_file: crate::sources::csv_snapshot::SNAPSHOT_FILE.to_string(),
        }
    }
}

/// Filter pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Spacing of the regularized date axis
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Resolution raw dates are rounded to before regularization
    #[serde(with = "humantime_serde")]
    pub resolution: Duration,
    pub kind: InterpolationKind,
    pub median_window: usize,
    pub lowpass: LowPassConfig,
    /// Strategies in application order; must start with `fill`.
    pub chain: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3 * 3600),
            resolution: Duration::from_secs(3600),
            kind: InterpolationKind::Cubic,
            median_window: 7,
            lowpass: LowPassConfig::default(),
            chain: vec!["fill".to_string()],
        }
    }
}

/// Butterworth low-pass design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowPassConfig {
    pub order: usize,
    pub sample_rate_hz: f64,
    pub cutoff_hz: f64,
    /// Samples at each end taken from the reverse pass only
    pub edge_width: usize,
}

impl Default for LowPassConfig {
    fn default() -> Self {
        Self {
            order: 2,
            sample_rate_hz: 1.0 / 3600.0,
            cutoff_hz: 3.667 / 30.0 / 3600.0,
            edge_width: 20,
        }
    }
}

/// Solver batch file layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Unit electrode spacing written in the header
    pub spacing: f64,
    pub include_chargeability: bool,
    /// IP delay in seconds
    pub ip_delay: f64,
    /// Pulse length in seconds
    pub pulse_length: f64,
    pub timelapse: TimelapseConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            spacing: 1.0,
            include_chargeability: true,
            ip_delay: 0.020,
            pulse_length: 4.0,
            timelapse: TimelapseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelapseConfig {
    pub enabled: bool,
    /// First raw date index exported against the baseline
    pub first_index: usize,
    pub baseline_index: usize,
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            first_index: 5,
            baseline_index: 0,
        }
    }
}

/// External inversion solver invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Solver executable; the invert stage is skipped when unset.
    pub program: Option<PathBuf>,
    /// Arguments placed before the manifest path
    pub args: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Extra attempts after a failed or timed-out run
    pub retries: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout: Duration::from_secs(2 * 3600),
            retries: 1,
        }
    }
}

/// Snapshot trigger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Extension of the artifact whose creation signals a new snapshot
    pub extension: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Consecutive equal size readings required before ingesting
    pub stable_samples: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extension: "csv".to_string(),
            poll_interval: Duration::from_millis(10),
            stable_samples: 2,
        }
    }
}

impl PipelineConfig {
    /// Load and validate configuration from `path` and the environment
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::load_from(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path without validating it
    ///
    /// Environment variables override the file, e.g.
    /// `GEO_TS_APPLICATION__LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(PipelineError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let paths = &self.paths;
        for (field, path) in [
            ("paths.data_root", &paths.data_root),
            ("paths.archive_file", &paths.archive_file),
            ("paths.inversion_root", &paths.inversion_root),
            ("paths.csv_dir", &paths.csv_dir),
            ("paths.inversion_params", &paths.inversion_params),
        ] {
            check(field, validation::is_valid_path(path))?;
        }
        if let Some(structure) = &paths.structure_file {
            check("paths.structure_file", validation::is_valid_path(structure))?;
        }

        check("survey.task_ids", validation::are_unique(&self.survey.task_ids))?;
        check(
            "survey.snapshot_format",
            validation::is_valid_time_format(&self.survey.snapshot_format),
        )?;
        check(
            "survey.result_format",
            validation::is_valid_time_format(&self.survey.result_format),
        )?;
        check("survey.snapshot_file", validation::is_not_empty(&self.survey.snapshot_file))?;

        let filter = &self.filter;
        check("filter.interval", validation::is_positive_duration(filter.interval))?;
        check("filter.resolution", validation::is_positive_duration(filter.resolution))?;
        check("filter.median_window", validation::is_odd_window(filter.median_window))?;
        check("filter.lowpass.order", validation::is_in_range(filter.lowpass.order, 1..=16))?;
        let nyquist = filter.lowpass.sample_rate_hz / 2.0;
        if !(filter.lowpass.cutoff_hz > 0.0 && filter.lowpass.cutoff_hz < nyquist) {
            return Err(PipelineError::Configuration(format!(
                "filter.lowpass.cutoff_hz {} must lie in (0, {nyquist})",
                filter.lowpass.cutoff_hz
            )));
        }
        if let Some(unknown) = filter.chain.iter().find(|n| !FILTER_NAMES.contains(&n.as_str())) {
            return Err(PipelineError::Configuration(format!(
                "Unknown filter '{unknown}'. Must be one of: {}",
                FILTER_NAMES.join(", ")
            )));
        }
        if filter.chain.first().map(String::as_str) != Some("fill")
            || filter.chain.iter().filter(|n| *n == "fill").count() != 1
        {
            return Err(PipelineError::Configuration(
                "filter.chain must start with exactly one 'fill'".into(),
            ));
        }

        let timelapse = &self.export.timelapse;
        if timelapse.enabled && timelapse.baseline_index >= timelapse.first_index {
            return Err(PipelineError::Configuration(format!(
                "export.timelapse.baseline_index {} must be below first_index {}",
                timelapse.baseline_index, timelapse.first_index
            )));
        }
        check("export.spacing", validation::is_in_range(self.export.spacing, f64::MIN_POSITIVE..=f64::MAX))?;

        check("solver.timeout", validation::is_positive_duration(self.solver.timeout))?;
        check("watch.extension", validation::is_not_empty(&self.watch.extension))?;
        check("watch.stable_samples", validation::is_in_range(self.watch.stable_samples, 1..=usize::MAX))?;

        Ok(())
    }
}

fn check(field: &str, result: Result<(), &'static str>) -> AppResult<()> {
    result.map_err(|msg| PipelineError::Configuration(format!("{field}: {msg}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    fn valid() -> PipelineConfig {
        PipelineConfig {
            survey: SurveyConfig {
                task_ids: vec![1, 2],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_valid_once_tasks_are_set() {
        assert!(PipelineConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_filter_settings() {
        let mut config = valid();
        config.filter.median_window = 6;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.filter.lowpass.cutoff_hz = config.filter.lowpass.sample_rate_hz;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.filter.chain = vec!["median".into(), "fill".into()];
        assert!(config.validate().is_err());

        let mut config = valid();
        config.filter.chain = vec!["fill".into(), "boxcar".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_tasks_and_baseline_after_first() {
        let mut config = valid();
        config.survey.task_ids = vec![3, 3];
        assert!(config.validate().is_err());

        let mut config = valid();
        config.export.timelapse.baseline_index = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_file_with_env_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            r#"
[survey]
task_ids = [4, 7]

[filter]
interval = "2h"
kind = "linear"
chain = ["fill", "median"]
"#,
        )
        .unwrap();

        std::env::set_var("GEO_TS_FILTER__MEDIAN_WINDOW", "9");
        let loaded = PipelineConfig::load(&path);
        std::env::remove_var("GEO_TS_FILTER__MEDIAN_WINDOW");
        let config = loaded.unwrap();

        assert_eq!(config.survey.task_ids, vec![4, 7]);
        assert_eq!(config.filter.interval, Duration::from_secs(7200));
        assert_eq!(config.filter.kind, InterpolationKind::Linear);
        assert_eq!(config.filter.median_window, 9);
        assert_eq!(config.watch.poll_interval, Duration::from_millis(10));
        assert_eq!(config.export.timelapse.first_index, 5);
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults_and_env() {
        std::env::set_var("GEO_TS_SURVEY__TASK_IDS", "[1]");
        let loaded = PipelineConfig::load("does/not/exist.toml");
        std::env::remove_var("GEO_TS_SURVEY__TASK_IDS");
        assert_eq!(loaded.unwrap().survey.task_ids, vec![1]);
    }
}
