use super::model::{batch_from_row, item_from_row, NewItemRow};
use crate::model::{Batch, BatchCounts, BatchItem, BatchStatus, ItemStatus};
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let opts = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        // WAL with full sync so item transitions survive a crash mid-pass.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure the parent
/// directory exists. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert a batch and all of its items in one transaction. Nothing is
/// visible to readers until the commit.
#[instrument(skip_all, fields(name = %name, items = items.len()))]
pub async fn create_batch(
    pool: &Pool,
    name: &str,
    owner: &str,
    marketplaces: &[String],
    items: &[NewItemRow],
) -> Result<Batch> {
    let now = Utc::now();
    let marketplaces_json = serde_json::to_string(marketplaces)?;

    let mut tx = pool.begin().await?;
    let batch_id: i64 = sqlx::query(
        "INSERT INTO batches (name, owner, status, total_items, success_count, failed_count, selected_marketplaces, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 0, 0, ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(owner)
    .bind(BatchStatus::Pending.as_str())
    .bind(items.len() as i64)
    .bind(&marketplaces_json)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    for item in items {
        sqlx::query(
            "INSERT INTO batch_items (batch_id, product_id, product_name, marketplace, sku, stock_quantity, sale_price, margin, status, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(&item.product_id)
        .bind(&item.product_name)
        .bind(&item.marketplace)
        .bind(&item.fields.sku)
        .bind(item.fields.stock_quantity)
        .bind(item.fields.sale_price)
        .bind(item.fields.margin)
        .bind(ItemStatus::Pending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
        .bind(batch_id)
        .fetch_one(&mut *tx)
        .await?;
    let batch = batch_from_row(&row)?;
    tx.commit().await.context("failed to commit batch")?;
    Ok(batch)
}

#[instrument(skip_all)]
pub async fn get_batch(pool: &Pool, batch_id: i64) -> Result<Option<Batch>> {
    let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(batch_from_row).transpose()
}

/// Batches newest first, optionally restricted to one owner.
#[instrument(skip_all)]
pub async fn list_batches(pool: &Pool, owner: Option<&str>, limit: i64) -> Result<Vec<Batch>> {
    let rows = sqlx::query(
        "SELECT * FROM batches WHERE (? IS NULL OR owner = ?) ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(owner)
    .bind(owner)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(batch_from_row).collect()
}

#[instrument(skip_all)]
pub async fn get_batch_items(pool: &Pool, batch_id: i64) -> Result<Vec<BatchItem>> {
    let rows = sqlx::query("SELECT * FROM batch_items WHERE batch_id = ? ORDER BY id ASC")
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(item_from_row).collect()
}

pub async fn get_item(pool: &Pool, item_id: i64) -> Result<Option<BatchItem>> {
    let row = sqlx::query("SELECT * FROM batch_items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(item_from_row).transpose()
}

pub async fn pending_item_ids(pool: &Pool, batch_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM batch_items WHERE batch_id = ? AND status = ? ORDER BY id ASC",
    )
    .bind(batch_id)
    .bind(ItemStatus::Pending.as_str())
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Move an item from `from` to `to`, guarded on the stored status still being
/// `from`. Returns false when the guard did not hold (the item moved on, or
/// the row is gone). `error` is stored only for `Failed`.
#[instrument(skip_all, fields(item_id = item_id, from = from.as_str(), to = to.as_str()))]
pub async fn update_item(
    pool: &Pool,
    item_id: i64,
    from: ItemStatus,
    to: ItemStatus,
    error: Option<&str>,
) -> Result<bool> {
    if !from.can_transition_to(to) {
        bail!(
            "invalid item transition {} -> {}",
            from.as_str(),
            to.as_str()
        );
    }
    let error = if to == ItemStatus::Failed {
        Some(error.unwrap_or("publish failed"))
    } else {
        None
    };
    let res = sqlx::query(
        "UPDATE batch_items SET status = ?, error_message = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(error)
    .bind(Utc::now())
    .bind(item_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Reset failed items of a batch back to pending and clear their errors.
/// With `item_ids`, only those ids that are currently failed in this batch are
/// touched. When anything is reset the batch is marked `processing` in the
/// same transaction. Returns the ids that were reset.
#[instrument(skip_all, fields(batch_id = batch_id))]
pub async fn reset_failed_items(
    pool: &Pool,
    batch_id: i64,
    item_ids: Option<&[i64]>,
) -> Result<Vec<i64>> {
    if matches!(item_ids, Some(ids) if ids.is_empty()) {
        return Ok(Vec::new());
    }

    let mut tx = pool.begin().await?;
    let mut select: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT id FROM batch_items WHERE batch_id = ");
    select.push_bind(batch_id);
    select.push(" AND status = ");
    select.push_bind(ItemStatus::Failed.as_str());
    if let Some(ids) = item_ids {
        select.push(" AND id IN (");
        {
            let mut sep = select.separated(", ");
            for id in ids {
                sep.push_bind(*id);
            }
        }
        select.push(")");
    }
    select.push(" ORDER BY id ASC");
    let targets: Vec<i64> = select
        .build_query_scalar::<i64>()
        .fetch_all(&mut *tx)
        .await?;

    let now = Utc::now();
    let mut reset = Vec::with_capacity(targets.len());
    for id in targets {
        let res = sqlx::query(
            "UPDATE batch_items SET status = ?, error_message = NULL, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ItemStatus::Pending.as_str())
        .bind(now)
        .bind(id)
        .bind(ItemStatus::Failed.as_str())
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 1 {
            reset.push(id);
        }
    }
    if !reset.is_empty() {
        // Never leave a settled status sitting over pending items.
        sqlx::query("UPDATE batches SET status = ?, updated_at = ? WHERE id = ?")
            .bind(BatchStatus::Processing.as_str())
            .bind(now)
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(reset)
}

/// Count a batch's items per status.
pub async fn count_items(pool: &Pool, batch_id: i64) -> Result<BatchCounts> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM batch_items WHERE batch_id = ? GROUP BY status",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;

    let mut counts = BatchCounts::default();
    for row in rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        let status = ItemStatus::parse_state(&status)
            .ok_or_else(|| anyhow!("batch {} has item with unknown status {}", batch_id, status))?;
        counts.add(status, n);
    }
    Ok(counts)
}

/// Recompute a batch's counters and status from its item rows and store them.
///
/// Counting and writing happen in a single statement, so the stored row always
/// matches the items as they were at that instant, whatever other passes are
/// doing. Returns None when the batch is gone.
#[instrument(skip_all, fields(batch_id = batch_id))]
pub async fn update_batch(pool: &Pool, batch_id: i64) -> Result<Option<Batch>> {
    let row = sqlx::query(
        "UPDATE batches SET \
           success_count = (SELECT COUNT(*) FROM batch_items WHERE batch_id = batches.id AND status = ?1), \
           failed_count = (SELECT COUNT(*) FROM batch_items WHERE batch_id = batches.id AND status = ?2), \
           status = CASE \
             WHEN EXISTS (SELECT 1 FROM batch_items WHERE batch_id = batches.id AND status IN (?3, ?4)) THEN \
               CASE WHEN EXISTS (SELECT 1 FROM batch_items WHERE batch_id = batches.id AND status != ?3) \
                 THEN ?5 ELSE ?6 END \
             WHEN EXISTS (SELECT 1 FROM batch_items WHERE batch_id = batches.id AND status = ?2) THEN ?7 \
             ELSE ?8 END, \
           updated_at = ?9 \
         WHERE id = ?10 RETURNING *",
    )
    .bind(ItemStatus::Success.as_str())
    .bind(ItemStatus::Failed.as_str())
    .bind(ItemStatus::Pending.as_str())
    .bind(ItemStatus::Processing.as_str())
    .bind(BatchStatus::Processing.as_str())
    .bind(BatchStatus::Pending.as_str())
    .bind(BatchStatus::Failed.as_str())
    .bind(BatchStatus::Completed.as_str())
    .bind(Utc::now())
    .bind(batch_id)
    .fetch_optional(pool)
    .await
    .context("failed to settle batch")?;
    let Some(row) = row else {
        warn!(batch_id, "batch vanished before its status could be stored");
        return Ok(None);
    };
    batch_from_row(&row).map(Some)
}

pub async fn mark_batch_processing(pool: &Pool, batch_id: i64) -> Result<bool> {
    let res = sqlx::query("UPDATE batches SET status = ?, updated_at = ? WHERE id = ?")
        .bind(BatchStatus::Processing.as_str())
        .bind(Utc::now())
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() == 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    Processing,
}

/// Remove a batch and its items in one transaction. Batches that are being
/// processed are left alone.
#[instrument(skip_all, fields(batch_id = batch_id))]
pub async fn delete_batch(pool: &Pool, batch_id: i64) -> Result<DeleteOutcome> {
    let mut tx = pool.begin().await?;
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM batches WHERE id = ?")
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(status) = status else {
        return Ok(DeleteOutcome::NotFound);
    };
    if status == BatchStatus::Processing.as_str() {
        return Ok(DeleteOutcome::Processing);
    }

    sqlx::query("DELETE FROM batch_items WHERE batch_id = ?")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM batches WHERE id = ? AND status != ?")
        .bind(batch_id)
        .bind(BatchStatus::Processing.as_str())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(DeleteOutcome::Deleted)
}
