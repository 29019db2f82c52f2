use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::model::Batch;
use crate::processor::{self, process_batch, ProcessOptions};
use crate::publisher::Publisher;
use tracing::{info, instrument};

/// Re-run failed items of a batch.
///
/// `item_ids = None` targets every failed item; otherwise only the listed ids
/// that are currently failed in this batch. Anything else, successes
/// included, is left alone. When nothing qualifies no item is touched and
/// the batch is returned as stored.
#[instrument(skip_all, fields(batch_id = batch_id))]
pub async fn retry_items(
    pool: &db::Pool,
    publisher: &dyn Publisher,
    batch_id: i64,
    item_ids: Option<&[i64]>,
    opts: ProcessOptions,
) -> EngineResult<Batch> {
    let batch = db::get_batch(pool, batch_id)
        .await?
        .ok_or(EngineError::NotFound(batch_id))?;

    let reset = db::reset_failed_items(pool, batch_id, item_ids).await?;
    if reset.is_empty() {
        info!("no failed items to retry");
        return processor::reconcile(pool, batch).await;
    }
    info!(items = reset.len(), "retrying failed items");
    process_batch(pool, publisher, batch_id, opts).await
}
