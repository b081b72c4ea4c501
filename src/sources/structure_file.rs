//! Structural survey metadata stored as a TOML document.
//!
//! ```toml
//! ip_windows = [0.02, 0.04, 0.08, 0.16]   # delay followed by K window widths
//!
//! [[channels]]
//! id = 101
//! task = 1
//! a = 0.0
//! b = 3.0
//! m = 1.0
//! n = 2.0
//! ```
//!
//! The dense array index of a channel is its position among the selected
//! channels, in file order.
use crate::core::{ChannelId, StructureSource, TaskId};
use crate::error::{AppResult, PipelineError};
use crate::geometry::Electrodes;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelEntry {
    pub id: ChannelId,
    pub task: TaskId,
    pub a: f64,
    pub b: f64,
    pub m: f64,
    pub n: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructureFile {
    /// Acquisition delay followed by the IP window widths.
    #[serde(default)]
    pub ip_windows: Vec<f64>,
    pub channels: Vec<ChannelEntry>,
}

impl StructureFile {
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> AppResult<Self> {
        toml::from_str(text).map_err(|e| PipelineError::InvalidStructure(e.to_string()))
    }

    fn selected<'a>(&'a self, task_ids: &'a [TaskId]) -> impl Iterator<Item = &'a ChannelEntry> + 'a {
        self.channels.iter().filter(move |c| task_ids.contains(&c.task))
    }
}

impl StructureSource for StructureFile {
    fn read_task_members(&self, task_ids: &[TaskId]) -> AppResult<BTreeMap<TaskId, Vec<ChannelId>>> {
        let mut members: BTreeMap<TaskId, Vec<ChannelId>> = BTreeMap::new();
        for channel in self.selected(task_ids) {
            members.entry(channel.task).or_default().push(channel.id);
        }
        Ok(members)
    }

    fn read_channel_geometry(&self, task_ids: &[TaskId]) -> AppResult<BTreeMap<ChannelId, Electrodes>> {
        Ok(self
            .selected(task_ids)
            .map(|c| (c.id, Electrodes::new(c.a, c.b, c.m, c.n)))
            .collect())
    }

    fn read_geometry_index(&self, task_ids: &[TaskId]) -> AppResult<BTreeMap<ChannelId, usize>> {
        let mut index = BTreeMap::new();
        for (i, channel) in self.selected(task_ids).enumerate() {
            if index.insert(channel.id, i).is_some() {
                return Err(PipelineError::InvalidStructure(format!(
                    "channel {} listed more than once",
                    channel.id
                )));
            }
        }
        Ok(index)
    }

    fn read_ip_window_count(&self, _task_ids: &[TaskId]) -> AppResult<usize> {
        Ok(self.ip_windows.len().saturating_sub(1))
    }
}
