//! In-memory queue and upstream table

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::TaskDescriptor;

use super::{host_name, ElementStatus, NewElement, QueueElement, QueueSource, UpstreamRow, UpstreamSource};

/// Queue kept in a vector, oldest first
#[derive(Debug, Default)]
pub struct MemoryQueue {
    elements: Mutex<Vec<QueueElement>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every element, in enqueue order
    pub fn elements(&self) -> Vec<QueueElement> {
        self.elements.lock().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<QueueElement> {
        self.elements.lock().iter().find(|e| e.id == id).cloned()
    }

    pub fn count_with_status(&self, status: ElementStatus) -> usize {
        self.elements.lock().iter().filter(|e| e.status == status).count()
    }

    fn finish(&self, id: Uuid, status: ElementStatus, message: Option<&str>) -> Result<()> {
        let mut elements = self.elements.lock();
        let element = elements
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::QueueElementNotFound { id: id.to_string() })?;
        element.status = status;
        element.message = message.map(String::from);
        element.ended_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl QueueSource for MemoryQueue {
    async fn dequeue(&self, queue_name: &str) -> Result<Option<TaskDescriptor>> {
        let mut elements = self.elements.lock();
        let next = elements
            .iter_mut()
            .find(|e| e.queue_name == queue_name && e.status == ElementStatus::New);

        Ok(next.map(|element| {
            element.status = ElementStatus::InProgress;
            element.started_at = Some(Utc::now());
            element.descriptor()
        }))
    }

    async fn mark_done(&self, id: Uuid) -> Result<()> {
        self.finish(id, ElementStatus::Done, None)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        self.finish(id, ElementStatus::Failed, Some(reason))
    }

    async fn bulk_enqueue(&self, queue_name: &str, items: Vec<NewElement>) -> Result<usize> {
        let created_by = host_name();
        let now = Utc::now();
        let count = items.len();

        let mut elements = self.elements.lock();
        elements.extend(items.into_iter().map(|item| QueueElement {
            id: Uuid::new_v4(),
            queue_name: queue_name.to_string(),
            reference: item.reference,
            data: item.data,
            status: ElementStatus::New,
            message: None,
            created_by: created_by.clone(),
            created_at: now,
            started_at: None,
            ended_at: None,
        }));

        Ok(count)
    }
}

/// Upstream table kept in a vector
#[derive(Debug, Default)]
pub struct MemoryUpstream {
    rows: Mutex<Vec<UpstreamRow>>,
}

impl MemoryUpstream {
    pub fn new(rows: Vec<UpstreamRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    pub fn rows(&self) -> Vec<UpstreamRow> {
        self.rows.lock().clone()
    }
}

fn is_due(row: &UpstreamRow, threshold: DateTime<Utc>) -> bool {
    row.timestamp.map_or(true, |ts| ts < threshold)
}

#[async_trait]
impl UpstreamSource for MemoryUpstream {
    async fn due_rows(&self, threshold: DateTime<Utc>) -> Result<Vec<UpstreamRow>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|r| is_due(r, threshold))
            .cloned()
            .collect())
    }

    async fn stamp(&self, threshold: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let mut touched = 0;
        for row in self.rows.lock().iter_mut().filter(|r| is_due(r, threshold)) {
            row.timestamp = Some(now);
            touched += 1;
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dequeue_is_fifo_per_queue() {
        let queue = MemoryQueue::new();
        queue
            .bulk_enqueue("A", vec![NewElement::new("a1", None), NewElement::new("a2", None)])
            .await
            .unwrap();
        queue.bulk_enqueue("B", vec![NewElement::new("b1", None)]).await.unwrap();

        let first = queue.dequeue("A").await.unwrap().unwrap();
        assert_eq!(first.reference, "a1");
        let second = queue.dequeue("A").await.unwrap().unwrap();
        assert_eq!(second.reference, "a2");
        assert!(queue.dequeue("A").await.unwrap().is_none());

        assert_eq!(queue.get(first.id).unwrap().status, ElementStatus::InProgress);
        assert_eq!(queue.count_with_status(ElementStatus::New), 1);
    }

    #[tokio::test]
    async fn test_mark_failed_records_reason() {
        let queue = MemoryQueue::new();
        queue.bulk_enqueue("A", vec![NewElement::new("a1", None)]).await.unwrap();
        let task = queue.dequeue("A").await.unwrap().unwrap();

        queue.mark_failed(task.id, "FolderPath is missing").await.unwrap();

        let element = queue.get(task.id).unwrap();
        assert_eq!(element.status, ElementStatus::Failed);
        assert_eq!(element.message.as_deref(), Some("FolderPath is missing"));
        assert!(element.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_unknown_element() {
        let queue = MemoryQueue::new();
        let err = queue.mark_done(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::QueueElementNotFound { .. }));
    }
}
