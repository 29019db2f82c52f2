//! Processing pass: pushes a batch's pending items through a [`Publisher`].
use crate::config::Processing;
use crate::db;
use crate::error::{EngineError, EngineResult, PublishError};
use crate::model::{Batch, ItemStatus};
use crate::publisher::Publisher;
use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Publish calls allowed in flight at once.
    pub concurrency: usize,
    pub publish_timeout: Duration,
    /// Items stuck in `processing` longer than this are failed as interrupted
    /// at the start of the next pass.
    pub stale_after: Duration,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::new(4, Duration::from_secs(30))
    }
}

impl ProcessOptions {
    pub fn new(concurrency: usize, publish_timeout: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            publish_timeout,
            stale_after: publish_timeout.saturating_mul(2),
        }
    }
}

impl From<&Processing> for ProcessOptions {
    fn from(p: &Processing) -> Self {
        Self::new(p.concurrency, p.publish_timeout())
    }
}

pub const INTERRUPTED_MESSAGE: &str = "processing interrupted before the marketplace answered";

/// Run every pending item of `batch_id` once and settle the batch status.
///
/// Publish failures are recorded on their items and never abort siblings.
/// A store failure is returned after the in-flight items have finished; items
/// keep whatever state was last written.
#[instrument(skip_all, fields(batch_id = batch_id))]
pub async fn process_batch(
    pool: &db::Pool,
    publisher: &dyn Publisher,
    batch_id: i64,
    opts: ProcessOptions,
) -> EngineResult<Batch> {
    let batch = db::get_batch(pool, batch_id)
        .await?
        .ok_or(EngineError::NotFound(batch_id))?;

    let recovered = fail_stalled_items(pool, batch_id, opts.stale_after).await?;
    let pending = db::pending_item_ids(pool, batch_id).await?;
    if pending.is_empty() {
        if recovered > 0 {
            return settle(pool, batch_id).await;
        }
        debug!("no pending items; nothing to do");
        return reconcile(pool, batch).await;
    }

    db::mark_batch_processing(pool, batch_id).await?;
    info!(items = pending.len(), concurrency = opts.concurrency, "processing batch");

    let results: Vec<Result<Option<ItemStatus>>> = stream::iter(pending)
        .map(|item_id| process_item(pool, publisher, item_id, opts.publish_timeout))
        .buffer_unordered(opts.concurrency.max(1))
        .collect()
        .await;

    let mut store_err = None;
    for res in results {
        if let Err(err) = res {
            error!(?err, "item transition could not be stored");
            if store_err.is_none() {
                store_err = Some(err);
            }
        }
    }

    let settled = settle(pool, batch_id).await;
    match store_err {
        Some(err) => Err(EngineError::Store(err)),
        None => settled,
    }
}

/// One unit of work: claim, publish, record. Returns the terminal status, or
/// None when the item was not ours to resolve.
async fn process_item(
    pool: &db::Pool,
    publisher: &dyn Publisher,
    item_id: i64,
    timeout: Duration,
) -> Result<Option<ItemStatus>> {
    if !db::update_item(pool, item_id, ItemStatus::Pending, ItemStatus::Processing, None).await? {
        debug!(item_id, "item no longer pending; skipped");
        return Ok(None);
    }
    let Some(item) = db::get_item(pool, item_id).await? else {
        warn!(item_id, "item vanished after claim");
        return Ok(None);
    };

    let outcome = match tokio::time::timeout(timeout, publisher.publish(&item)).await {
        Ok(res) => res,
        Err(_) => Err(PublishError::Timeout(timeout)),
    };
    let (status, message) = match outcome {
        Ok(()) => (ItemStatus::Success, None),
        Err(err) => (ItemStatus::Failed, Some(err.to_string())),
    };

    if !db::update_item(pool, item_id, ItemStatus::Processing, status, message.as_deref()).await? {
        warn!(item_id, "item left processing while publishing; result dropped");
        return Ok(None);
    }
    match &message {
        None => info!(item_id, marketplace = %item.marketplace, "item published"),
        Some(reason) => warn!(item_id, marketplace = %item.marketplace, %reason, "item failed"),
    }
    Ok(Some(status))
}

/// Recompute counters from item rows and store the derived batch status.
pub(crate) async fn settle(pool: &db::Pool, batch_id: i64) -> EngineResult<Batch> {
    let batch = db::update_batch(pool, batch_id)
        .await?
        .ok_or(EngineError::NotFound(batch_id))?;
    info!(
        batch_id,
        status = batch.status.as_str(),
        success = batch.success_count,
        failed = batch.failed_count,
        total = batch.total_items,
        "batch settled"
    );
    Ok(batch)
}

/// Settle a batch whose items are all resolved but whose stored row says
/// otherwise, e.g. a pass died between its last item write and settling.
/// Batches with unresolved items are returned as stored.
pub(crate) async fn reconcile(pool: &db::Pool, batch: Batch) -> EngineResult<Batch> {
    let counts = db::count_items(pool, batch.id).await?;
    if counts.unresolved() > 0 {
        return Ok(batch);
    }
    if batch.status == counts.settled_status()
        && batch.success_count == counts.success
        && batch.failed_count == counts.failed
    {
        return Ok(batch);
    }
    warn!(
        batch_id = batch.id,
        stored = batch.status.as_str(),
        "stored batch status out of date"
    );
    settle(pool, batch.id).await
}

async fn fail_stalled_items(pool: &db::Pool, batch_id: i64, stale_after: Duration) -> Result<usize> {
    let Some(cutoff) = chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|d| Utc::now().checked_sub_signed(d))
    else {
        return Ok(0);
    };
    let mut failed = 0;
    for item in db::get_batch_items(pool, batch_id).await? {
        if item.status != ItemStatus::Processing || item.updated_at > cutoff {
            continue;
        }
        if db::update_item(
            pool,
            item.id,
            ItemStatus::Processing,
            ItemStatus::Failed,
            Some(INTERRUPTED_MESSAGE),
        )
        .await?
        {
            warn!(item_id = item.id, "stalled item marked failed");
            failed += 1;
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_window_saturates() {
        let opts = ProcessOptions::new(0, Duration::MAX);
        assert_eq!(opts.concurrency, 1);
        assert_eq!(opts.stale_after, Duration::MAX);

        let opts = ProcessOptions::new(4, Duration::from_millis(1500));
        assert_eq!(opts.stale_after, Duration::from_secs(3));
    }
}
