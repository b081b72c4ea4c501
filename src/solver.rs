//! External inversion solver invocation.
use crate::config::SolverConfig;
use crate::core::InversionSolver;
use crate::error::{AppResult, PipelineError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Runs `program args... <manifest>` inside the manifest's directory.
///
/// Each attempt is bounded by `timeout`; a failed or expired attempt is
/// retried up to `retries` more times before the batch is reported failed.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    retries: u32,
}

impl CommandSolver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let defaults = SolverConfig::default();
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: defaults.timeout,
            retries: defaults.retries,
        }
    }

    /// `None` when no solver program is configured.
    pub fn from_config(config: &SolverConfig) -> Option<Self> {
        config.program.as_ref().map(|program| Self {
            program: program.clone(),
            args: config.args.clone(),
            timeout: config.timeout,
            retries: config.retries,
        })
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    async fn attempt(&self, manifest: &Path) -> AppResult<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(manifest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = manifest.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output.map_err(|e| PipelineError::Solver {
                batch: manifest.to_path_buf(),
                message: format!("cannot start {}: {e}", self.program.display()),
            })?,
            Err(_) => {
                return Err(PipelineError::SolverTimeout {
                    batch: manifest.to_path_buf(),
                    timeout: self.timeout,
                })
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PipelineError::Solver {
                batch: manifest.to_path_buf(),
                message: format!("{} ({})", output.status, stderr.trim()),
            })
        }
    }
}

#[async_trait]
impl InversionSolver for CommandSolver {
    async fn run_batch(&self, manifest: &Path) -> AppResult<()> {
        let mut attempt = 0;
        loop {
            match self.attempt(manifest).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(batch = %manifest.display(), attempt, "solver attempt failed, retrying: {e}");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Runs one batch and removes its manifest only once the solver succeeded.
#[tracing::instrument(skip(solver))]
pub async fn invert_batch(solver: &dyn InversionSolver, manifest: &Path) -> AppResult<()> {
    solver.run_batch(manifest).await?;
    tokio::fs::remove_file(manifest).await?;
    info!("batch inverted");
    Ok(())
}
