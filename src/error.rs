//! Custom error types for the application.
//!
//! This module defines the primary error type, `PipelineError`, for the whole
//! ingestion/filter/export/assimilation pipeline. Using the `thiserror` crate, it
//! provides a centralized and consistent way to handle everything from I/O and
//! configuration issues to survey-specific conditions such as a missing structure
//! or a solver-space shape mismatch.
//!
//! ## Error Hierarchy
//!
//! - **Fatal**: `StructureMissing`, `InvalidStructure`, `ShapeMismatch`, `Config`,
//!   `Configuration`. The orchestrator stops the run when it sees one of these.
//! - **Recoverable**: everything else. A single snapshot, result file, task or
//!   batch is skipped, a warning is logged and the run continues.
//!
//! By using `#[from]`, `PipelineError` can be created from the underlying error
//! types, so the `?` operator works throughout the crate.

use crate::core::TaskId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive persistence error: {0}")]
    Persistence(String),

    #[error("Cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Inconsistent series update: {0}")]
    Inconsistent(String),

    #[error("Array shape error: {0}")]
    ArrayShape(#[from] ndarray::ShapeError),

    #[error("No structural metadata available and no stored geometry to reuse")]
    StructureMissing,

    #[error("Invalid structural metadata: {0}")]
    InvalidStructure(String),

    #[error("Cannot parse '{name}' as a timestamp with format '{format}'")]
    UnparsableName { name: String, format: String },

    #[error("Task {task_id}: result has {found} model cells, store is fixed at {expected}")]
    ShapeMismatch {
        task_id: TaskId,
        expected: usize,
        found: usize,
    },

    #[error("Unknown task id {0}")]
    UnknownTask(TaskId),

    #[error("Date index {index} out of range for {len} stored dates")]
    DateIndexOutOfRange { index: usize, len: usize },

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Solver failed on batch {batch}: {message}")]
    Solver { batch: PathBuf, message: String },

    #[error("Solver timed out after {timeout:?} on batch {batch}")]
    SolverTimeout { batch: PathBuf, timeout: Duration },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Raw series store is not initialized")]
    NotInitialized,
}

impl From<figment::Error> for PipelineError {
    fn from(value: figment::Error) -> Self {
        PipelineError::Config(Box::new(value))
    }
}

impl From<bincode::Error> for PipelineError {
    fn from(value: bincode::Error) -> Self {
        PipelineError::Persistence(value.to_string())
    }
}

impl PipelineError {
    /// Whether this error must stop the overall run rather than a single entry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::StructureMissing
                | PipelineError::InvalidStructure(_)
                | PipelineError::ShapeMismatch { .. }
                | PipelineError::Config(_)
                | PipelineError::Configuration(_)
        )
    }
}
