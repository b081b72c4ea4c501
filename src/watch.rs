//! New-snapshot trigger.
//!
//! [`SnapshotWatcher`] watches the snapshot root for files with the configured
//! extension and yields each one as it appears. Before ingesting, callers wait
//! for the artifact to finish copying with [`wait_until_stable`], which polls
//! its size until it stops changing.
use crate::error::{AppResult, PipelineError};
use notify::{
    event::{CreateKind, ModifyKind},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct SnapshotWatcher {
    root: PathBuf,
    extension: String,
    /// Held to keep the OS watch alive
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
}

impl SnapshotWatcher {
    /// Starts watching `root` recursively for `*.{extension}` artifacts.
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> AppResult<Self> {
        let root = root.into();
        let (tx, rx) = mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res| {
            // Use blocking send since we're in sync callback
            let _ = tx.blocking_send(res);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "watching for new snapshots");

        Ok(Self {
            root,
            extension: extension.into(),
            _watcher: watcher,
            rx,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Waits for the next created or modified artifact.
    ///
    /// Returns `None` once the watcher has shut down.
    pub async fn next_artifact(&mut self) -> Option<PathBuf> {
        while let Some(event_result) = self.rx.recv().await {
            match event_result {
                Ok(event) => {
                    if let Some(path) = self.matching_paths(&event).into_iter().next() {
                        debug!(path = %path.display(), kind = ?event.kind, "artifact event");
                        return Some(path);
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            }
        }
        None
    }

    fn matching_paths(&self, event: &Event) -> Vec<PathBuf> {
        let relevant = matches!(
            event.kind,
            EventKind::Create(CreateKind::File | CreateKind::Any)
                | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any)
        );
        if !relevant {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .filter(|p| p.extension().is_some_and(|ext| *ext == *self.extension))
            .cloned()
            .collect()
    }

    /// The snapshot directory directly under the root that holds `artifact`.
    pub fn snapshot_dir_of(&self, artifact: &Path) -> Option<PathBuf> {
        let relative = artifact.strip_prefix(&self.root).ok()?;
        let first = relative.components().next()?;
        let dir = self.root.join(first);
        (dir != artifact).then_some(dir)
    }
}

/// Polls the size of `path` until `stable_samples` consecutive readings agree.
///
/// Returns the final size. Fails if the file disappears while waiting.
pub async fn wait_until_stable(path: &Path, poll_interval: Duration, stable_samples: usize) -> AppResult<u64> {
    let mut last = tokio::fs::metadata(path).await?.len();
    let mut stable = 1;
    while stable < stable_samples.max(1) {
        tokio::time::sleep(poll_interval).await;
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))))?
            .len();
        if size == last {
            stable += 1;
        } else {
            debug!(path = %path.display(), size, "artifact still growing");
            last = size;
            stable = 1;
        }
    }
    Ok(last)
}
