//! Seeding the queue from the upstream table

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::Result;

use super::{QueueSource, UpstreamSource};

/// Enqueue one element per upstream row not stamped within `interval`
///
/// Rows are stamped with `now` after enqueueing, so a second call inside the
/// interval adds nothing. This is deduplication, not a lock: two workers
/// seeding at the same moment may both enqueue the same rows.
pub async fn seed_from_upstream(
    queue: &dyn QueueSource,
    upstream: &dyn UpstreamSource,
    queue_name: &str,
    now: DateTime<Utc>,
    interval: Duration,
) -> Result<usize> {
    let threshold = now - interval;
    let rows = upstream.due_rows(threshold).await?;
    if rows.is_empty() {
        info!(queue = queue_name, "No upstream rows due for refresh");
        return Ok(0);
    }

    let items = rows
        .iter()
        .map(|row| row.to_element())
        .collect::<Result<Vec<_>>>()?;
    let added = queue.bulk_enqueue(queue_name, items).await?;
    let stamped = upstream.stamp(threshold, now).await?;

    info!(queue = queue_name, added, stamped, "Seeded queue from upstream table");
    Ok(added)
}
