//! Consumer-facing batch operations.
//!
//! [`BatchEngine`] bundles the store, a publisher and processing options so
//! callers (CLI, a UI backend) get typed results without touching item state
//! directly.
use crate::db::{self, DeleteOutcome, NewItemRow};
use crate::error::{EngineError, EngineResult};
use crate::model::{Batch, BatchItem, BatchProgress, BatchStatus, NewBatch};
use crate::processor::{self, ProcessOptions};
use crate::publisher::Publisher;
use crate::retry;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

static MARKETPLACE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").expect("valid marketplace regex"));

#[derive(Clone)]
pub struct BatchEngine {
    pool: db::Pool,
    publisher: Arc<dyn Publisher>,
    opts: ProcessOptions,
}

impl BatchEngine {
    pub fn new(pool: db::Pool, publisher: Arc<dyn Publisher>, opts: ProcessOptions) -> Self {
        Self {
            pool,
            publisher,
            opts,
        }
    }

    /// Create a batch with one pending item per product × marketplace.
    #[instrument(skip_all, fields(name = %req.name))]
    pub async fn create_batch(&self, req: &NewBatch) -> EngineResult<Batch> {
        validate(req)?;
        let name = req.name.trim();

        let mut rows = Vec::with_capacity(req.products.len() * req.marketplaces.len());
        for product in &req.products {
            for marketplace in &req.marketplaces {
                rows.push(NewItemRow {
                    product_id: product.product_id.clone(),
                    product_name: product.name.clone(),
                    marketplace: marketplace.clone(),
                    fields: product.snapshot_for(marketplace),
                });
            }
        }

        let batch = db::create_batch(&self.pool, name, req.owner.trim(), &req.marketplaces, &rows).await?;
        info!(batch_id = batch.id, total_items = batch.total_items, "batch created");
        Ok(batch)
    }

    pub async fn process_batch(&self, batch_id: i64) -> EngineResult<Batch> {
        processor::process_batch(&self.pool, self.publisher.as_ref(), batch_id, self.opts).await
    }

    pub async fn retry_items(&self, batch_id: i64, item_ids: Option<&[i64]>) -> EngineResult<Batch> {
        retry::retry_items(&self.pool, self.publisher.as_ref(), batch_id, item_ids, self.opts).await
    }

    /// Delete a batch and its items. A batch still marked `processing` is
    /// rejected unless all of its items turn out to be resolved.
    #[instrument(skip_all, fields(batch_id = batch_id))]
    pub async fn delete_batch(&self, batch_id: i64) -> EngineResult<()> {
        let mut outcome = db::delete_batch(&self.pool, batch_id).await?;
        if outcome == DeleteOutcome::Processing {
            if let Some(batch) = db::get_batch(&self.pool, batch_id).await? {
                let batch = processor::reconcile(&self.pool, batch).await?;
                if batch.status != BatchStatus::Processing {
                    outcome = db::delete_batch(&self.pool, batch_id).await?;
                }
            }
        }
        match outcome {
            DeleteOutcome::Deleted => {
                info!("batch deleted");
                Ok(())
            }
            DeleteOutcome::NotFound => Err(EngineError::NotFound(batch_id)),
            DeleteOutcome::Processing => Err(EngineError::Busy(batch_id)),
        }
    }

    pub async fn get_batch(&self, batch_id: i64) -> EngineResult<Batch> {
        db::get_batch(&self.pool, batch_id)
            .await?
            .ok_or(EngineError::NotFound(batch_id))
    }

    pub async fn batch_items(&self, batch_id: i64) -> EngineResult<Vec<BatchItem>> {
        self.get_batch(batch_id).await?;
        Ok(db::get_batch_items(&self.pool, batch_id).await?)
    }

    /// Stored batch plus live item counts, for progress views mid-run.
    pub async fn batch_progress(&self, batch_id: i64) -> EngineResult<BatchProgress> {
        let batch = self.get_batch(batch_id).await?;
        let counts = db::count_items(&self.pool, batch_id).await?;
        Ok(BatchProgress { batch, counts })
    }

    pub async fn list_batches(&self, owner: Option<&str>, limit: i64) -> EngineResult<Vec<Batch>> {
        if limit <= 0 {
            return Err(EngineError::Validation(format!("limit must be positive, got {}", limit)));
        }
        Ok(db::list_batches(&self.pool, owner, limit).await?)
    }
}

fn validate(req: &NewBatch) -> EngineResult<()> {
    let invalid = |msg: String| Err(EngineError::Validation(msg));

    if req.name.trim().is_empty() {
        return invalid("name must be non-empty".into());
    }
    if req.owner.trim().is_empty() {
        return invalid("owner must be non-empty".into());
    }
    if req.products.is_empty() {
        return invalid("at least one product is required".into());
    }
    if req.marketplaces.is_empty() {
        return invalid("at least one marketplace is required".into());
    }

    let mut seen = HashSet::new();
    for m in &req.marketplaces {
        if !MARKETPLACE_ID.is_match(m) {
            return invalid(format!("invalid marketplace id {:?}", m));
        }
        if !seen.insert(m.as_str()) {
            return invalid(format!("marketplace {} listed twice", m));
        }
    }

    let mut seen = HashSet::new();
    for p in &req.products {
        if p.product_id.trim().is_empty() {
            return invalid("product id must be non-empty".into());
        }
        if !seen.insert(p.product_id.as_str()) {
            return invalid(format!("product {} listed twice", p.product_id));
        }
    }
    Ok(())
}
