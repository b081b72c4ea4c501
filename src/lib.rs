//! # Geoelectrical Time-Series Core Library
//!
//! This crate maintains a growing time series of geoelectrical (resistivity and
//! induced polarization) measurements from a permanently installed survey. New
//! dated snapshots are ingested incrementally, regularized onto a fixed time
//! grid, exported per survey line to an external inversion solver, and the
//! solver's results are folded back into per-line result series. The library is
//! shared by the `geo-timeseries` CLI (`main.rs`) and the integration tests.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered `PipelineConfig` (TOML file plus `GEO_TS_` environment
//!   overrides) and its validation.
//! - **`core`**: Shared identifiers, the measurement and result row types, and the
//!   collaborator traits (`SnapshotReader`, `StructureSource`, `ResultReader`,
//!   `InversionSolver`).
//! - **`geometry`**: The immutable `GeometryIndex` built from structural metadata,
//!   with electrode positions, geometric factors and pseudosection focus points.
//! - **`series`**: The raw, filtered and inverted stores and archive persistence.
//! - **`ingest`**: Incremental ingestion of dated snapshot directories.
//! - **`data`**: Filter strategies (regularize-and-fill, median, low-pass), their
//!   registry and the CSV tabulation of every store.
//! - **`export`**: Solver input files and batch manifests per survey line.
//! - **`solver`**: Running the external solver on a batch manifest.
//! - **`assimilate`**: Folding solver result files back into the inverted stores.
//! - **`orchestrator`**: Stage sequencing with persistence between stages.
//! - **`watch`**: File-system trigger for newly arriving snapshots.
//! - **`sources`**: File-based `SnapshotReader` and `StructureSource` implementations.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The `PipelineError` enum and its fatal/recoverable split.
//! - **`validation`**: Small predicates used by configuration validation.

pub mod assimilate;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod export;
pub mod geometry;
pub mod ingest;
pub mod logging;
pub mod orchestrator;
pub mod series;
pub mod solver;
pub mod sources;
pub mod validation;
pub mod watch;

pub use error::{AppResult, PipelineError};
pub use orchestrator::{CycleReport, Orchestrator};
