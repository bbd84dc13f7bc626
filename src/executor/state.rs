//! Per-task execution state
//!
//! Tracks the stage a task is in and owns its local artifact.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

// ─────────────────────────────────────────────────────────────────
// Task Stage
// ─────────────────────────────────────────────────────────────────

/// Stage of one task inside the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    /// Validating the payload and obtaining a remote session
    Resolving,
    /// Downloading the file and waiting for it locally
    Fetching,
    /// Running the external application
    Processing,
    /// Uploading the result (and the archive copy)
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStage::Resolving => "resolving",
            TaskStage::Fetching => "fetching",
            TaskStage::Processing => "processing",
            TaskStage::Publishing => "publishing",
            TaskStage::Done => "done",
            TaskStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────
// Local Artifact
// ─────────────────────────────────────────────────────────────────

/// A downloaded file owned by one task
///
/// Call [`LocalArtifact::discard`] on every exit path; dropping an artifact
/// that was not discarded removes the file as a backstop.
#[derive(Debug)]
pub struct LocalArtifact {
    path: PathBuf,
    remote_path: String,
    discarded: bool,
}

impl LocalArtifact {
    pub fn new(path: PathBuf, remote_path: impl Into<String>) -> Self {
        Self {
            path,
            remote_path: remote_path.into(),
            discarded: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    #[cfg(test)]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Delete the file if present
    pub fn discard(&mut self) -> io::Result<()> {
        self.discarded = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LocalArtifact {
    fn drop(&mut self) {
        if self.discarded {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove local artifact");
            }
        }
    }
}
