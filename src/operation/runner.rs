//! Process-isolated runner for the external application

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ApplicationSettings;
use crate::error::OperationError;

/// Longest stderr excerpt carried in a failure message
const STDERR_TAIL_CHARS: usize = 400;

/// One blocking external operation on a local artifact, bounded in time
#[async_trait]
pub trait BoundedOperation: Send + Sync {
    /// Mutate `artifact` in place, giving up after `timeout`
    async fn run_with_timeout(&self, artifact: &Path, timeout: Duration) -> Result<(), OperationError>;
}

/// Visibility flags passed to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    pub show_ui: bool,
    pub suppress_alerts: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            show_ui: false,
            suppress_alerts: true,
        }
    }
}

/// The configured external application
#[derive(Debug, Clone)]
pub struct ExternalApplication {
    program: String,
    args: Vec<String>,
    headless_args: Vec<String>,
    quiet_args: Vec<String>,
    options: RunnerOptions,
}

impl ExternalApplication {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            headless_args: Vec::new(),
            quiet_args: Vec::new(),
            options: RunnerOptions::default(),
        }
    }

    pub fn from_settings(settings: &ApplicationSettings) -> Self {
        let mut app = Self::new(settings.program.clone(), settings.args.clone());
        app.headless_args = settings.headless_args.clone();
        app.quiet_args = settings.quiet_args.clone();
        app.with_options(RunnerOptions {
            show_ui: settings.show_ui,
            suppress_alerts: settings.suppress_alerts,
        })
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Arguments for one run, placeholders substituted
    pub fn command_args(&self, artifact: &Path) -> Result<Vec<String>, OperationError> {
        let url = Url::from_file_path(artifact)
            .map_err(|_| OperationError::Failed(format!("cannot build a file URL for {}", artifact.display())))?;
        let dir = artifact.parent().unwrap_or_else(|| Path::new("."));

        let artifact_str = artifact.to_string_lossy();
        let dir_str = dir.to_string_lossy();

        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{artifact_url}", url.as_str())
                    .replace("{artifact_dir}", &dir_str)
                    .replace("{artifact}", &artifact_str)
            })
            .collect();

        if !self.options.show_ui {
            args.extend(self.headless_args.iter().cloned());
        }
        if self.options.suppress_alerts {
            args.extend(self.quiet_args.iter().cloned());
        }
        Ok(args)
    }
}

#[async_trait]
impl BoundedOperation for ExternalApplication {
    async fn run_with_timeout(&self, artifact: &Path, timeout: Duration) -> Result<(), OperationError> {
        let artifact = absolute(artifact)?;
        if !artifact.is_file() {
            return Err(OperationError::Failed(format!(
                "artifact {} does not exist",
                artifact.display()
            )));
        }

        let args = self.command_args(&artifact)?;
        debug!(program = %self.program, ?args, "Starting external application");

        let child = Command::new(&self.program)
            .args(&args)
            .env("REFRESH_WORKER_ARTIFACT", &artifact)
            .env("REFRESH_WORKER_SHOW_UI", self.options.show_ui.to_string())
            .env("REFRESH_WORKER_SUPPRESS_ALERTS", self.options.suppress_alerts.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| OperationError::Failed(format!("failed to start '{}': {}", self.program, e)))?;

        let pid = child.id();
        let started = Instant::now();

        // Dropping the wait future on timeout leaves the child running
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| OperationError::Failed(format!("failed to wait for application: {}", e)))?,
            Err(_) => {
                warn!(?pid, timeout_secs = timeout.as_secs(), "External application timed out, abandoning it");
                return Err(OperationError::Timeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(OperationError::Failed(format!(
                "application exited with {}{}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        if !artifact.is_file() {
            return Err(OperationError::Failed(format!(
                "artifact {} is missing after the application finished",
                artifact.display()
            )));
        }

        flush(&artifact).await?;

        info!(
            ?pid,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "External application finished"
        );
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf, OperationError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| OperationError::Failed(format!("cannot resolve {}: {}", path.display(), e)))
}

/// fsync the artifact so the refreshed content is on disk before upload
async fn flush(artifact: &Path) -> Result<(), OperationError> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(artifact)
        .await
        .map_err(|e| OperationError::Failed(format!("cannot open {} for flushing: {}", artifact.display(), e)))?;
    file.sync_all()
        .await
        .map_err(|e| OperationError::Failed(format!("cannot flush {}: {}", artifact.display(), e)))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    let skip = text.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    format!(": {}", text.chars().skip(skip).collect::<String>())
}
