//! Host environment reset
//!
//! A reset returns the host to a known state before each attempt: stale
//! artifacts removed, remote sessions dropped, lingering application
//! processes killed, and the work directory recreated.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::operation::ProcessReaper;
use crate::remote::SessionCache;

/// Environment operations driven by the retry controller
#[async_trait]
pub trait Environment: Send + Sync {
    /// Clean up, close all, kill all, then reopen
    async fn reset(&self) -> Result<()>;

    /// Drop every remote session and handle
    async fn close_all(&self) -> Result<()>;

    /// Terminate every instance of the external application
    async fn kill_all(&self) -> Result<()>;
}

pub struct HostEnvironment {
    work_dir: PathBuf,
    sessions: Arc<SessionCache>,
    reaper: Arc<dyn ProcessReaper>,
    settle: Duration,
}

impl HostEnvironment {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        sessions: Arc<SessionCache>,
        reaper: Arc<dyn ProcessReaper>,
        settle: Duration,
    ) -> Result<Self> {
        let work_dir = work_dir.into();
        check_work_dir(&work_dir)?;
        Ok(Self {
            work_dir,
            sessions,
            reaper,
            settle,
        })
    }

    /// Remove everything inside the work directory
    pub async fn clean_up(&self) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.work_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::IoRead {
                    path: self.work_dir.clone(),
                    source: e,
                })
            }
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|e| Error::IoWrite { path, source: e })?;
            removed += 1;
        }

        if removed > 0 {
            debug!(removed, dir = %self.work_dir.display(), "Removed stale artifacts");
        }
        Ok(())
    }

    /// Make sure the work directory exists
    pub async fn open_all(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| Error::IoWrite {
                path: self.work_dir.clone(),
                source: e,
            })
    }
}

#[async_trait]
impl Environment for HostEnvironment {
    async fn reset(&self) -> Result<()> {
        info!("Resetting environment");
        self.clean_up().await?;
        self.close_all().await?;
        self.kill_all().await?;
        self.open_all().await
    }

    async fn close_all(&self) -> Result<()> {
        let closed = self.sessions.close_all();
        if closed > 0 {
            debug!(closed, "Closed remote sessions");
        }
        Ok(())
    }

    async fn kill_all(&self) -> Result<()> {
        let reaper = self.reaper.clone();
        let killed = tokio::task::spawn_blocking(move || reaper.kill_all())
            .await
            .map_err(|e| Error::Internal(format!("process cleanup failed: {}", e)))?;
        if killed > 0 {
            info!(killed, "Killed lingering external application processes");
            tokio::time::sleep(self.settle).await;

            let reaper = self.reaper.clone();
            let survivors = tokio::task::spawn_blocking(move || reaper.running())
                .await
                .map_err(|e| Error::Internal(format!("process scan failed: {}", e)))?;
            if survivors > 0 {
                warn!(survivors, "External application processes still running after kill");
            }
        }
        Ok(())
    }
}

// The work directory is wiped on every reset
fn check_work_dir(path: &Path) -> Result<()> {
    let is_home = dirs::home_dir().map_or(false, |home| home == path);
    if path.parent().is_none() || path.as_os_str().is_empty() || is_home {
        return Err(Error::config_field_invalid(
            "storage.work_dir",
            format!("'{}' cannot be used as the work directory", path.display()),
        ));
    }
    Ok(())
}
