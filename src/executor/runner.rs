//! Task executor
//!
//! Runs one task through fetch → bounded operation → publish and, on any
//! infrastructure failure, performs the cleanup sequence before handing the
//! original error back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{ArchiveSettings, WorkerConfig};
use crate::error::{OperationError, TaskError};
use crate::operation::{BoundedOperation, ProcessReaper};
use crate::remote::{RemoteSession, SessionCache};
use crate::types::{PostProcessing, RefreshTarget, TaskDescriptor};

use super::publish::archive_target;
use super::{LocalArtifact, TaskStage};

// ─────────────────────────────────────────────────────────────────
// Task Handler
// ─────────────────────────────────────────────────────────────────

/// Executes one dequeued task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &TaskDescriptor) -> Result<(), TaskError>;
}

// ─────────────────────────────────────────────────────────────────
// Executor Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the task executor
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Local directory receiving artifacts
    pub work_dir: PathBuf,

    /// How long a download may take to appear locally
    pub fetch_wait: Duration,

    pub poll_interval: Duration,

    /// Bound on one run of the external application
    pub operation_timeout: Duration,

    /// Pause after killing the external application
    pub kill_settle: Duration,

    /// Site for legacy references without one
    pub default_site: Option<String>,

    pub archive: ArchiveSettings,
}

impl ExecutorSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir(),
            fetch_wait: config.fetch.wait(),
            poll_interval: config.fetch.poll_interval(),
            operation_timeout: config.application.timeout(),
            kill_settle: config.application.kill_settle(),
            default_site: config.remote.default_site.clone(),
            archive: config.archive.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Executor
// ─────────────────────────────────────────────────────────────────

pub struct TaskExecutor {
    settings: ExecutorSettings,
    sessions: Arc<SessionCache>,
    operation: Arc<dyn BoundedOperation>,
    reaper: Arc<dyn ProcessReaper>,
    today: fn() -> NaiveDate,
}

impl TaskExecutor {
    pub fn new(
        settings: ExecutorSettings,
        sessions: Arc<SessionCache>,
        operation: Arc<dyn BoundedOperation>,
        reaper: Arc<dyn ProcessReaper>,
    ) -> Self {
        Self {
            settings,
            sessions,
            operation,
            reaper,
            today: || Local::now().date_naive(),
        }
    }

    /// Override the date used to name archive copies
    #[cfg(test)]
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Everything up to and including publishing; the artifact, once
    /// created, is left in `artifact` for the caller to discard
    async fn process(
        &self,
        target: &RefreshTarget,
        stage: &mut TaskStage,
        artifact: &mut Option<LocalArtifact>,
    ) -> Result<(), TaskError> {
        let session = self
            .sessions
            .session(&target.site)
            .await
            .map_err(|e| TaskError::AuthenticationFailed {
                site: target.site.clone(),
                message: e.to_string(),
            })?;

        *stage = TaskStage::Fetching;
        let local = artifact.insert(self.prepare_artifact(target).await?);
        self.fetch(session.as_ref(), local).await?;

        *stage = TaskStage::Processing;
        self.refresh(local.path()).await?;

        *stage = TaskStage::Publishing;
        self.publish(session.as_ref(), target, local.path()).await?;

        *stage = TaskStage::Done;
        Ok(())
    }

    async fn prepare_artifact(&self, target: &RefreshTarget) -> Result<LocalArtifact, TaskError> {
        let dir = self.settings.work_dir.join(target.path.local_dir());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TaskError::FetchFailed {
                remote_path: target.path.to_string(),
                message: format!("cannot create {}: {}", dir.display(), e),
            })?;
        Ok(LocalArtifact::new(dir.join(&target.path.filename), target.path.to_string()))
    }

    async fn fetch(&self, session: &dyn RemoteSession, artifact: &LocalArtifact) -> Result<(), TaskError> {
        session
            .fetch(artifact.remote_path(), artifact.path())
            .await
            .map_err(|e| TaskError::FetchFailed {
                remote_path: artifact.remote_path().to_string(),
                message: e.to_string(),
            })?;

        if !wait_for_file(artifact.path(), self.settings.fetch_wait, self.settings.poll_interval).await {
            return Err(TaskError::FetchTimeout {
                path: artifact.path().to_path_buf(),
                wait_secs: self.settings.fetch_wait.as_secs(),
            });
        }
        debug!(path = %artifact.path().display(), "Artifact available locally");
        Ok(())
    }

    async fn refresh(&self, path: &Path) -> Result<(), TaskError> {
        self.operation
            .run_with_timeout(path, self.settings.operation_timeout)
            .await
            .map_err(|e| match e {
                OperationError::Timeout { timeout_secs } => TaskError::ProcessingTimeout { timeout_secs },
                OperationError::Failed(message) => TaskError::ProcessingFailed(message),
            })
    }

    async fn publish(
        &self,
        session: &dyn RemoteSession,
        target: &RefreshTarget,
        path: &Path,
    ) -> Result<(), TaskError> {
        let folder = target.path.folder();
        let uploaded = session
            .upload(&folder, path, &target.path.filename)
            .await
            .map_err(|e| TaskError::PublishFailed {
                remote_folder: folder.clone(),
                message: e.to_string(),
            })?;
        info!(remote = %uploaded, "Published refreshed file");

        if target.post_processing == PostProcessing::MonthlyFolder {
            let archive = archive_target((self.today)(), &self.settings.archive, target.path.extension());
            let archive_folder = archive.remote_folder();
            let publish_failed = |e: crate::error::Error| TaskError::PublishFailed {
                remote_folder: archive_folder.clone(),
                message: e.to_string(),
            };

            session.ensure_folder(&archive_folder).await.map_err(publish_failed)?;
            let copy = session
                .upload(&archive_folder, path, &archive.filename)
                .await
                .map_err(publish_failed)?;
            info!(remote = %copy, "Published monthly archive copy");
        }
        Ok(())
    }

    /// Best-effort cleanup after an infrastructure failure
    async fn cleanup(&self, site: Option<&str>, artifact: Option<&mut LocalArtifact>) {
        if let Some(site) = site {
            self.sessions.release(site);
        }

        let reaper = self.reaper.clone();
        match tokio::task::spawn_blocking(move || reaper.kill_all()).await {
            Ok(killed) => info!(killed, "Terminated external application processes"),
            Err(e) => warn!(error = %e, "Process cleanup did not complete"),
        }

        tokio::time::sleep(self.settings.kill_settle).await;

        if let Some(artifact) = artifact {
            if let Err(e) = artifact.discard() {
                warn!(path = %artifact.path().display(), error = %e, "Failed to delete local artifact");
            }
        }
    }
}

#[async_trait]
impl TaskHandler for TaskExecutor {
    async fn execute(&self, task: &TaskDescriptor) -> Result<(), TaskError> {
        let span = info_span!("task", id = %task.id, reference = %task.reference);
        self.run_task(task).instrument(span).await
    }
}

impl TaskExecutor {
    async fn run_task(&self, task: &TaskDescriptor) -> Result<(), TaskError> {
        let started = Instant::now();
        let target = task.resolve(self.settings.default_site.as_deref())?;

        let mut stage = TaskStage::Resolving;
        let mut artifact: Option<LocalArtifact> = None;
        let result = self.process(&target, &mut stage, &mut artifact).await;

        match result {
            Ok(()) => {
                if let Some(artifact) = artifact.as_mut() {
                    if let Err(e) = artifact.discard() {
                        warn!(path = %artifact.path().display(), error = %e, "Failed to delete local artifact");
                    }
                }
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Task completed");
                Ok(())
            }
            Err(err) => {
                error!(
                    id = %task.id,
                    reference = %task.reference,
                    stage = %stage,
                    error = %err,
                    "Task failed, cleaning up"
                );
                self.cleanup(Some(&target.site), artifact.as_mut()).await;
                debug!(stage = %TaskStage::Failed, "Cleanup finished");
                Err(err)
            }
        }
    }
}

/// Poll until `path` exists or `wait` has elapsed
async fn wait_for_file(path: &Path, wait: Duration, interval: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        if tokio::fs::metadata(path).await.is_ok() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
