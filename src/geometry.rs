//! Instrument geometry: electrode layouts and the channel lookup tables.
//!
//! [`GeometryIndex`] is built once per survey from the structural metadata and
//! maps between the three identifier spaces used by the pipeline: channel ids
//! (DPIDs), dense array rows, and survey-line (task) membership.
use crate::core::{ChannelId, StructureSource, TaskId};
use crate::error::{AppResult, PipelineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Fraction of the quadrupole span used as the representative depth.
const PSEUDO_DEPTH_FACTOR: f64 = 0.17;

/// Positions of the A, B (current) and M, N (potential) electrodes along the line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Electrodes {
    pub a: f64,
    pub b: f64,
    pub m: f64,
    pub n: f64,
}

impl Electrodes {
    pub fn new(a: f64, b: f64, m: f64, n: f64) -> Self {
        Self { a, b, m, n }
    }

    /// Distance between the outermost electrodes.
    pub fn span(&self) -> f64 {
        let positions = [self.a, self.b, self.m, self.n];
        let max = positions.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = positions.iter().copied().fold(f64::INFINITY, f64::min);
        max - min
    }
}

/// Geometric factor of a surface four-electrode array.
///
/// `K = 2π / (1/AM − 1/BM − 1/AN + 1/BN)`, so that `ρa = K · R`.
pub fn geometric_factor(e: &Electrodes) -> f64 {
    let am = (e.a - e.m).abs();
    let bm = (e.b - e.m).abs();
    let an = (e.a - e.n).abs();
    let bn = (e.b - e.n).abs();
    2.0 * PI / (1.0 / am - 1.0 / bm - 1.0 / an + 1.0 / bn)
}

/// Representative `(x, depth)` location of a quadrupole: the mean electrode
/// position and a fixed fraction of the array span.
pub fn focus_point(e: &Electrodes) -> (f64, f64) {
    let x = (e.a + e.b + e.m + e.n) / 4.0;
    (x, PSEUDO_DEPTH_FACTOR * e.span())
}

/// Lookup tables between channel ids, array rows and survey lines.
///
/// Immutable once built: later ingestion only appends date columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryIndex {
    channel_to_index: BTreeMap<ChannelId, usize>,
    index_to_channel: Vec<ChannelId>,
    task_members: BTreeMap<TaskId, Vec<ChannelId>>,
    channel_to_task: BTreeMap<ChannelId, TaskId>,
    channel_geometry: BTreeMap<ChannelId, Electrodes>,
    geometric_factor: BTreeMap<ChannelId, f64>,
    focus_point: BTreeMap<ChannelId, (f64, f64)>,
    focus_x: Vec<f64>,
    focus_z: Vec<f64>,
    ip_windows: usize,
}

impl GeometryIndex {
    /// Reads all structural lookups for `task_ids` and builds the index.
    pub fn from_source(source: &dyn StructureSource, task_ids: &[TaskId]) -> AppResult<Self> {
        let members = source.read_task_members(task_ids)?;
        let geometry = source.read_channel_geometry(task_ids)?;
        let index = source.read_geometry_index(task_ids)?;
        let ip_windows = source.read_ip_window_count(task_ids)?;
        Self::build(members, geometry, index, ip_windows)
    }

    /// Builds every mapping in one pass and checks they are mutually consistent.
    pub fn build(
        task_members: BTreeMap<TaskId, Vec<ChannelId>>,
        channel_geometry: BTreeMap<ChannelId, Electrodes>,
        channel_to_index: BTreeMap<ChannelId, usize>,
        ip_windows: usize,
    ) -> AppResult<Self> {
        if channel_to_index.is_empty() {
            return Err(PipelineError::InvalidStructure(
                "geometry index contains no channels".into(),
            ));
        }

        let count = channel_to_index.len();
        let mut slots: Vec<Option<ChannelId>> = vec![None; count];
        for (&channel, &index) in &channel_to_index {
            let slot = slots.get_mut(index).ok_or_else(|| {
                PipelineError::InvalidStructure(format!(
                    "array index {index} of channel {channel} is not dense (0..{count})"
                ))
            })?;
            if let Some(other) = slot {
                return Err(PipelineError::InvalidStructure(format!(
                    "channels {other} and {channel} share array index {index}"
                )));
            }
            *slot = Some(channel);
        }
        // Every slot is filled: `count` distinct in-range indices.
        let index_to_channel: Vec<ChannelId> = slots.into_iter().flatten().collect();

        let mut channel_to_task = BTreeMap::new();
        for (&task, channels) in &task_members {
            for &channel in channels {
                if !channel_to_index.contains_key(&channel) {
                    return Err(PipelineError::InvalidStructure(format!(
                        "channel {channel} of task {task} has no array index"
                    )));
                }
                if let Some(previous) = channel_to_task.insert(channel, task) {
                    return Err(PipelineError::InvalidStructure(format!(
                        "channel {channel} belongs to tasks {previous} and {task}"
                    )));
                }
            }
        }

        let mut geometric = BTreeMap::new();
        let mut focus = BTreeMap::new();
        let mut focus_x = vec![f64::NAN; count];
        let mut focus_z = vec![f64::NAN; count];
        for (&channel, &index) in &channel_to_index {
            if !channel_to_task.contains_key(&channel) {
                return Err(PipelineError::InvalidStructure(format!(
                    "channel {channel} is not a member of any task"
                )));
            }
            let electrodes = channel_geometry.get(&channel).ok_or_else(|| {
                PipelineError::InvalidStructure(format!("channel {channel} has no electrode geometry"))
            })?;
            let point = focus_point(electrodes);
            geometric.insert(channel, geometric_factor(electrodes));
            focus.insert(channel, point);
            focus_x[index] = point.0;
            focus_z[index] = point.1;
        }

        Ok(Self {
            channel_to_index,
            index_to_channel,
            task_members,
            channel_to_task,
            channel_geometry,
            geometric_factor: geometric,
            focus_point: focus,
            focus_x,
            focus_z,
            ip_windows,
        })
    }

    /// Number of channels, i.e. rows of every raw array.
    pub fn len(&self) -> usize {
        self.index_to_channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_channel.is_empty()
    }

    pub fn ip_windows(&self) -> usize {
        self.ip_windows
    }

    pub fn index_of(&self, channel: ChannelId) -> Option<usize> {
        self.channel_to_index.get(&channel).copied()
    }

    pub fn channel_at(&self, index: usize) -> Option<ChannelId> {
        self.index_to_channel.get(index).copied()
    }

    pub fn task_of(&self, channel: ChannelId) -> Option<TaskId> {
        self.channel_to_task.get(&channel).copied()
    }

    /// Channels of a survey line, in structural membership order.
    pub fn members(&self, task: TaskId) -> Option<&[ChannelId]> {
        self.task_members.get(&task).map(Vec::as_slice)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.task_members.keys().copied()
    }

    pub fn electrodes(&self, channel: ChannelId) -> Option<&Electrodes> {
        self.channel_geometry.get(&channel)
    }

    pub fn geometric_factor(&self, channel: ChannelId) -> Option<f64> {
        self.geometric_factor.get(&channel).copied()
    }

    pub fn focus_point(&self, channel: ChannelId) -> Option<(f64, f64)> {
        self.focus_point.get(&channel).copied()
    }

    /// Focus x coordinate per array row.
    pub fn focus_x(&self) -> &[f64] {
        &self.focus_x
    }

    /// Focus depth per array row.
    pub fn focus_z(&self) -> &[f64] {
        &self.focus_z
    }

    /// Sorted array rows of a survey line.
    pub fn task_indices(&self, task: TaskId) -> AppResult<Vec<usize>> {
        let members = self.members(task).ok_or(PipelineError::UnknownTask(task))?;
        let mut indices: Vec<usize> = members
            .iter()
            .filter_map(|&channel| self.index_of(channel))
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }
}
