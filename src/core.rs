//! Core traits and data types shared by every pipeline stage.
//!
//! The pipeline talks to four external collaborators through the traits in this
//! module: the per-snapshot measurement reader, the structural-metadata source,
//! the solver result reader and the inversion solver itself. Concrete
//! implementations live in [`crate::sources`], [`crate::assimilate`] and
//! [`crate::solver`].
use crate::error::AppResult;
use crate::geometry::Electrodes;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Identifier of one electrode-quadrupole measurement configuration (DPID).
pub type ChannelId = u32;

/// Identifier of one survey line.
pub type TaskId = u32;

/// One measurement row of a snapshot, as yielded by a [`SnapshotReader`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub channel_id: ChannelId,
    pub voltage: f64,
    pub current: f64,
    pub resistance: f64,
    pub apres: f64,
    pub chargeability: f64,
    /// IP decay curve, one value per window.
    pub decay: Vec<f64>,
}

/// One solver result for one date, in solver space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InversionResult {
    pub x: Vec<f64>,
    pub depth: Vec<f64>,
    pub resistivity: Vec<f64>,
    pub chargeability: Vec<f64>,
}

impl InversionResult {
    /// Number of model cells, taken from the `x` vector.
    pub fn cells(&self) -> usize {
        self.x.len()
    }
}

/// Reads the measurement rows of one snapshot directory.
///
/// An unreadable snapshot is not fatal: implementations return an error and the
/// ingestor records the date with empty columns.
pub trait SnapshotReader {
    fn read_snapshot(&self, snapshot: &Path, task_ids: &[TaskId]) -> AppResult<Vec<MeasurementRow>>;
}

/// Pure lookups against the survey's structural metadata.
pub trait StructureSource {
    /// Task id -> ordered channel ids of that survey line.
    fn read_task_members(&self, task_ids: &[TaskId]) -> AppResult<BTreeMap<TaskId, Vec<ChannelId>>>;

    /// Channel id -> electrode positions.
    fn read_channel_geometry(&self, task_ids: &[TaskId]) -> AppResult<BTreeMap<ChannelId, Electrodes>>;

    /// Channel id -> dense array index.
    fn read_geometry_index(&self, task_ids: &[TaskId]) -> AppResult<BTreeMap<ChannelId, usize>>;

    /// Number of IP decay windows recorded per measurement.
    fn read_ip_window_count(&self, task_ids: &[TaskId]) -> AppResult<usize>;
}

/// Parses one solver output file.
pub trait ResultReader {
    fn read_result(&self, path: &Path) -> AppResult<InversionResult>;
}

/// Runs the external inversion solver on one batch manifest.
#[async_trait]
pub trait InversionSolver: Send + Sync {
    /// Blocks until the batch described by `manifest` has been processed.
    async fn run_batch(&self, manifest: &Path) -> AppResult<()>;
}
