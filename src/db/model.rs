//! Row mapping for batch tables.
//!
//! Keep these conversions focused on column decoding. Status derivation and
//! transition rules live in `crate::model`.

use crate::model::{Batch, BatchItem, BatchStatus, ItemStatus, ListingFields};
use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    let id: i64 = row.get("id");
    let status_str: String = row.get("status");
    let status = BatchStatus::parse_state(&status_str)
        .ok_or_else(|| anyhow!("batch {} has unknown status {}", id, status_str))?;
    let marketplaces: String = row.get("selected_marketplaces");
    let selected_marketplaces: Vec<String> = serde_json::from_str(&marketplaces)
        .map_err(|e| anyhow!("batch {} has malformed marketplaces: {}", id, e))?;

    Ok(Batch {
        id,
        name: row.get("name"),
        owner: row.get("owner"),
        status,
        total_items: row.get("total_items"),
        success_count: row.get("success_count"),
        failed_count: row.get("failed_count"),
        selected_marketplaces,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn item_from_row(row: &SqliteRow) -> Result<BatchItem> {
    let id: i64 = row.get("id");
    let status_str: String = row.get("status");
    let status = ItemStatus::parse_state(&status_str)
        .ok_or_else(|| anyhow!("item {} has unknown status {}", id, status_str))?;

    Ok(BatchItem {
        id,
        batch_id: row.get("batch_id"),
        product_id: row.get("product_id"),
        product_name: row.get("product_name"),
        marketplace: row.get("marketplace"),
        fields: ListingFields {
            sku: row.get("sku"),
            stock_quantity: row.get("stock_quantity"),
            sale_price: row.get("sale_price"),
            margin: row.get("margin"),
        },
        status,
        error_message: row
            .try_get::<Option<String>, _>("error_message")
            .ok()
            .flatten()
            .filter(|s| !s.is_empty()),
        updated_at: row.try_get("updated_at")?,
    })
}

/// Item row to insert when a batch is created.
#[derive(Debug, Clone)]
pub struct NewItemRow {
    pub product_id: String,
    pub product_name: String,
    pub marketplace: String,
    pub fields: ListingFields,
}
