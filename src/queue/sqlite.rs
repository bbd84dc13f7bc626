//! SQLite-backed queue and upstream table

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::TaskDescriptor;

use super::{host_name, ElementStatus, NewElement, QueueElement, QueueSource, UpstreamRow, UpstreamSource};

const ELEMENT_COLUMNS: &str =
    "id, queue_name, reference, data, status, message, created_by, created_at, started_at, ended_at";

/// Queue elements and the upstream table in one SQLite database
#[derive(Clone)]
pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
    upstream_table: String,
}

impl SqliteQueue {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: &Path, upstream_table: &str) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        debug!(path = %path.display(), "Opened queue database");
        Self::with_connection(conn, upstream_table)
    }

    #[cfg(test)]
    pub fn open_in_memory(upstream_table: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, upstream_table)
    }

    fn with_connection(conn: Connection, upstream_table: &str) -> Result<Self> {
        if !is_identifier(upstream_table) {
            return Err(Error::queue(format!("Invalid upstream table name '{}'", upstream_table)));
        }
        let queue = Self {
            conn: Arc::new(Mutex::new(conn)),
            upstream_table: upstream_table.to_string(),
        };
        queue.ensure_schema()?;
        Ok(queue)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS queue_elements (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                queue_name TEXT NOT NULL,
                reference TEXT NOT NULL,
                data TEXT,
                status TEXT NOT NULL,
                message TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_queue_elements_claim
                ON queue_elements (queue_name, status, seq);
            CREATE TABLE IF NOT EXISTS "{table}" (
                SharePointSite TEXT,
                FolderPath TEXT NOT NULL,
                CustomFunction TEXT,
                TimeStamp TEXT
            );
            "#,
            table = self.upstream_table
        ))?;
        Ok(())
    }

    /// Run a blocking closure against the connection off the async runtime
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Internal(format!("queue worker thread failed: {}", e)))?
    }

    /// Every element of a queue, in enqueue order
    #[cfg(test)]
    pub async fn elements(&self, queue_name: &str) -> Result<Vec<QueueElement>> {
        let queue_name = queue_name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM queue_elements WHERE queue_name = ?1 ORDER BY seq",
                ELEMENT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![queue_name], element_from_row)?;
            let mut elements = Vec::new();
            for row in rows {
                elements.push(row??);
            }
            Ok(elements)
        })
        .await
    }

    #[cfg(test)]
    pub async fn insert_upstream(&self, row: UpstreamRow) -> Result<()> {
        let table = self.upstream_table.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    r#"INSERT INTO "{}" (SharePointSite, FolderPath, CustomFunction, TimeStamp)
                       VALUES (?1, ?2, ?3, ?4)"#,
                    table
                ),
                params![
                    row.site,
                    row.folder_path,
                    row.custom_function,
                    row.timestamp.map(format_ts)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn finish(&self, id: Uuid, status: ElementStatus, message: Option<String>) -> Result<()> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE queue_elements SET status = ?1, message = ?2, ended_at = ?3 WHERE id = ?4",
                params![status.as_str(), message, format_ts(Utc::now()), id.to_string()],
            )?;
            if updated == 0 {
                return Err(Error::QueueElementNotFound { id: id.to_string() });
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl QueueSource for SqliteQueue {
    async fn dequeue(&self, queue_name: &str) -> Result<Option<TaskDescriptor>> {
        let queue_name = queue_name.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let next = tx
                .query_row(
                    &format!(
                        "SELECT {} FROM queue_elements
                         WHERE queue_name = ?1 AND status = ?2
                         ORDER BY seq LIMIT 1",
                        ELEMENT_COLUMNS
                    ),
                    params![queue_name, ElementStatus::New.as_str()],
                    element_from_row,
                )
                .optional()?;

            let Some(element) = next else {
                return Ok(None);
            };
            let element = element?;

            tx.execute(
                "UPDATE queue_elements SET status = ?1, started_at = ?2 WHERE id = ?3",
                params![
                    ElementStatus::InProgress.as_str(),
                    format_ts(Utc::now()),
                    element.id.to_string()
                ],
            )?;
            tx.commit()?;

            Ok(Some(element.descriptor()))
        })
        .await
    }

    async fn mark_done(&self, id: Uuid) -> Result<()> {
        self.finish(id, ElementStatus::Done, None).await
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        self.finish(id, ElementStatus::Failed, Some(reason.to_string())).await
    }

    async fn bulk_enqueue(&self, queue_name: &str, items: Vec<NewElement>) -> Result<usize> {
        let queue_name = queue_name.to_string();
        let created_by = host_name();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = format_ts(Utc::now());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO queue_elements (id, queue_name, reference, data, status, created_by, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for item in &items {
                    stmt.execute(params![
                        Uuid::new_v4().to_string(),
                        queue_name,
                        item.reference,
                        item.data,
                        ElementStatus::New.as_str(),
                        created_by,
                        now
                    ])?;
                }
            }
            tx.commit()?;
            Ok(items.len())
        })
        .await
    }
}

#[async_trait]
impl UpstreamSource for SqliteQueue {
    async fn due_rows(&self, threshold: DateTime<Utc>) -> Result<Vec<UpstreamRow>> {
        let table = self.upstream_table.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                r#"SELECT SharePointSite, FolderPath, CustomFunction, TimeStamp FROM "{}"
                   WHERE TimeStamp IS NULL OR TimeStamp < ?1
                   ORDER BY rowid"#,
                table
            ))?;
            let rows = stmt.query_map(params![format_ts(threshold)], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?;

            let mut due = Vec::new();
            for row in rows {
                let (site, folder_path, custom_function, timestamp) = row?;
                due.push(UpstreamRow {
                    site,
                    folder_path,
                    custom_function,
                    timestamp: timestamp.as_deref().map(parse_ts).transpose()?,
                });
            }
            Ok(due)
        })
        .await
    }

    async fn stamp(&self, threshold: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let table = self.upstream_table.clone();
        self.with_conn(move |conn| {
            let touched = conn.execute(
                &format!(
                    r#"UPDATE "{}" SET TimeStamp = ?1 WHERE TimeStamp IS NULL OR TimeStamp < ?2"#,
                    table
                ),
                params![format_ts(now), format_ts(threshold)],
            )?;
            Ok(touched)
        })
        .await
    }
}

// Fixed-width UTC timestamps compare correctly as strings
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::queue(format!("Invalid timestamp '{}': {}", value, e)))
}

fn element_from_row(row: &Row<'_>) -> rusqlite::Result<Result<QueueElement>> {
    let id: String = row.get(0)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let started_at: Option<String> = row.get(8)?;
    let ended_at: Option<String> = row.get(9)?;
    let queue_name: String = row.get(1)?;
    let reference: String = row.get(2)?;
    let data: Option<String> = row.get(3)?;
    let message: Option<String> = row.get(5)?;
    let created_by: String = row.get(6)?;

    let build = || -> Result<QueueElement> {
        Ok(QueueElement {
            id: Uuid::parse_str(&id)
                .map_err(|e| Error::queue(format!("Corrupt element id '{}': {}", id, e)))?,
            queue_name,
            reference,
            data,
            status: status.parse()?,
            message,
            created_by,
            created_at: parse_ts(&created_at)?,
            started_at: started_at.as_deref().map(parse_ts).transpose()?,
            ended_at: ended_at.as_deref().map(parse_ts).transpose()?,
        })
    };
    Ok(build())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    const TABLE: &str = "QueueExcelRefresher";

    #[tokio::test]
    async fn test_enqueue_and_dequeue_in_order() {
        let queue = SqliteQueue::open_in_memory(TABLE).unwrap();
        let added = queue
            .bulk_enqueue(
                "ExcelRefresher",
                vec![
                    NewElement::new("first", Some("{}".into())),
                    NewElement::new("second", None),
                ],
            )
            .await
            .unwrap();
        assert_eq!(added, 2);

        let first = queue.dequeue("ExcelRefresher").await.unwrap().unwrap();
        assert_eq!(first.reference, "first");
        assert_eq!(first.data.as_deref(), Some("{}"));

        let second = queue.dequeue("ExcelRefresher").await.unwrap().unwrap();
        assert_eq!(second.reference, "second");
        assert!(second.data.is_none());

        assert!(queue.dequeue("ExcelRefresher").await.unwrap().is_none());
        assert!(queue.dequeue("Other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_done_and_failed() {
        let queue = SqliteQueue::open_in_memory(TABLE).unwrap();
        queue
            .bulk_enqueue("Q", vec![NewElement::new("a", None), NewElement::new("b", None)])
            .await
            .unwrap();

        let a = queue.dequeue("Q").await.unwrap().unwrap();
        let b = queue.dequeue("Q").await.unwrap().unwrap();
        queue.mark_done(a.id).await.unwrap();
        queue.mark_failed(b.id, "Refresh did not complete").await.unwrap();

        let elements = queue.elements("Q").await.unwrap();
        assert_eq!(elements[0].status, ElementStatus::Done);
        assert!(elements[0].started_at.is_some());
        assert!(elements[0].ended_at.is_some());
        assert_eq!(elements[1].status, ElementStatus::Failed);
        assert_eq!(elements[1].message.as_deref(), Some("Refresh did not complete"));
        assert!(!elements[1].created_by.is_empty());
    }

    #[tokio::test]
    async fn test_mark_unknown_element() {
        let queue = SqliteQueue::open_in_memory(TABLE).unwrap();
        let err = queue.mark_failed(Uuid::new_v4(), "x").await.unwrap_err();
        assert!(matches!(err, Error::QueueElementNotFound { .. }));
    }

    #[tokio::test]
    async fn test_upstream_due_rows_and_stamp() {
        let queue = SqliteQueue::open_in_memory(TABLE).unwrap();
        let now = Utc::now();
        let threshold = now - Duration::hours(24);

        for (path, ts) in [
            ("Docs/never.xlsx", None),
            ("Docs/stale.xlsx", Some(now - Duration::hours(30))),
            ("Docs/fresh.xlsx", Some(now - Duration::hours(2))),
        ] {
            queue
                .insert_upstream(UpstreamRow {
                    site: Some("https://contoso.sharepoint.com/Teams/plan".into()),
                    folder_path: path.into(),
                    custom_function: None,
                    timestamp: ts,
                })
                .await
                .unwrap();
        }

        let due = queue.due_rows(threshold).await.unwrap();
        let paths: Vec<_> = due.iter().map(|r| r.folder_path.as_str()).collect();
        assert_eq!(paths, vec!["Docs/never.xlsx", "Docs/stale.xlsx"]);

        assert_eq!(queue.stamp(threshold, now).await.unwrap(), 2);
        assert!(queue.due_rows(threshold).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("queue.db");

        {
            let queue = SqliteQueue::open(&path, TABLE).unwrap();
            queue.bulk_enqueue("Q", vec![NewElement::new("kept", None)]).await.unwrap();
        }

        let queue = SqliteQueue::open(&path, TABLE).unwrap();
        let task = queue.dequeue("Q").await.unwrap().unwrap();
        assert_eq!(task.reference, "kept");
    }

    #[test]
    fn test_rejects_bad_table_name() {
        assert!(SqliteQueue::open_in_memory("x\"; DROP TABLE y; --").is_err());
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let a = format_ts(Utc::now());
        let b = format_ts(Utc::now() - Duration::days(400));
        assert_eq!(a.len(), b.len());
        assert!(a.ends_with('Z'));
        assert_eq!(parse_ts(&a).unwrap().to_rfc3339_opts(SecondsFormat::Micros, true), a);
    }
}
