//! Work queue adapter
//!
//! - [`QueueSource`]: dequeue / mark done / mark failed / bulk enqueue
//! - [`UpstreamSource`]: the table periodically copied into the queue
//! - [`seed_from_upstream`]: the once-per-interval copy itself
//!
//! [`SqliteQueue`] backs both traits in production; the in-memory queue in
//! `memory` has the same semantics and backs the unit tests.

#[cfg(test)]
mod memory;
mod seed;
mod sqlite;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{TaskDescriptor, TaskPayload};

#[cfg(test)]
pub use memory::{MemoryQueue, MemoryUpstream};
pub use seed::seed_from_upstream;
pub use sqlite::SqliteQueue;

// ─────────────────────────────────────────────────────────────────
// Queue Elements
// ─────────────────────────────────────────────────────────────────

/// Lifecycle of a queue element: `New → InProgress → Done | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementStatus {
    New,
    InProgress,
    Done,
    Failed,
}

impl ElementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementStatus::New => "New",
            ElementStatus::InProgress => "InProgress",
            ElementStatus::Done => "Done",
            ElementStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for ElementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "New" => Ok(ElementStatus::New),
            "InProgress" => Ok(ElementStatus::InProgress),
            "Done" => Ok(ElementStatus::Done),
            "Failed" => Ok(ElementStatus::Failed),
            other => Err(Error::queue(format!("Unknown element status '{}'", other))),
        }
    }
}

/// A queue element as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueElement {
    pub id: Uuid,
    pub queue_name: String,
    pub reference: String,
    pub data: Option<String>,
    pub status: ElementStatus,

    /// Failure reason, set by `mark_failed`
    pub message: Option<String>,

    /// Host that enqueued the element
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl QueueElement {
    pub fn descriptor(&self) -> TaskDescriptor {
        TaskDescriptor::new(self.id, self.reference.clone(), self.data.clone())
    }
}

/// An element about to be enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewElement {
    pub reference: String,
    pub data: Option<String>,
}

impl NewElement {
    pub fn new(reference: impl Into<String>, data: Option<String>) -> Self {
        Self {
            reference: reference.into(),
            data,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Upstream Rows
// ─────────────────────────────────────────────────────────────────

/// One row of the upstream table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRow {
    pub site: Option<String>,
    pub folder_path: String,
    pub custom_function: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl UpstreamRow {
    /// Queue element for this row: the folder path as reference, the row as JSON data
    pub fn to_element(&self) -> Result<NewElement> {
        let payload = TaskPayload {
            site: self.site.clone(),
            folder_path: Some(self.folder_path.clone()),
            custom_function: self.custom_function.clone(),
        };
        Ok(NewElement::new(
            self.folder_path.clone(),
            Some(serde_json::to_string(&payload)?),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────

/// The work queue consumed by the controller
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Claim the oldest new element of the queue, if any
    async fn dequeue(&self, queue_name: &str) -> Result<Option<TaskDescriptor>>;

    async fn mark_done(&self, id: Uuid) -> Result<()>;

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()>;

    /// Returns the number of elements added
    async fn bulk_enqueue(&self, queue_name: &str, items: Vec<NewElement>) -> Result<usize>;
}

/// Source table the queue is seeded from
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Rows whose timestamp is older than `threshold` or unset
    async fn due_rows(&self, threshold: DateTime<Utc>) -> Result<Vec<UpstreamRow>>;

    /// Stamp every due row with `now`; returns the number of rows touched
    async fn stamp(&self, threshold: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize>;
}

/// Host name recorded as `created_by`
pub(crate) fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
