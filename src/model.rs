use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "processing" => Some(ItemStatus::Processing),
            "success" => Some(ItemStatus::Success),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }

    /// Whether `self -> next` is an edge of the item state machine.
    /// `Failed -> Pending` is reserved for explicit retries.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Pending, ItemStatus::Processing)
                | (ItemStatus::Processing, ItemStatus::Success)
                | (ItemStatus::Processing, ItemStatus::Failed)
                | (ItemStatus::Failed, ItemStatus::Pending)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BatchStatus::Pending),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Listing fields copied onto every item when the batch is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingFields {
    pub sku: String,
    pub stock_quantity: i64,
    pub sale_price: f64,
    pub margin: f64,
}

/// Per-marketplace adjustments; absent fields fall back to the product's base values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListingOverride {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub stock_quantity: Option<i64>,
    #[serde(default)]
    pub sale_price: Option<f64>,
    #[serde(default)]
    pub margin: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductInput {
    pub product_id: String,
    pub name: String,
    pub base: ListingFields,
    #[serde(default)]
    pub overrides: HashMap<String, ListingOverride>,
}

impl ProductInput {
    /// Resolve the snapshot to list on `marketplace`.
    pub fn snapshot_for(&self, marketplace: &str) -> ListingFields {
        let Some(ov) = self.overrides.get(marketplace) else {
            return self.base.clone();
        };
        ListingFields {
            sku: ov.sku.clone().unwrap_or_else(|| self.base.sku.clone()),
            stock_quantity: ov.stock_quantity.unwrap_or(self.base.stock_quantity),
            sale_price: ov.sale_price.unwrap_or(self.base.sale_price),
            margin: ov.margin.unwrap_or(self.base.margin),
        }
    }
}

/// Request to create a batch: every product is listed on every marketplace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewBatch {
    pub name: String,
    pub owner: String,
    pub products: Vec<ProductInput>,
    pub marketplaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub id: i64,
    pub name: String,
    pub owner: String,
    pub status: BatchStatus,
    pub total_items: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub selected_marketplaces: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItem {
    pub id: i64,
    pub batch_id: i64,
    pub product_id: String,
    pub product_name: String,
    pub marketplace: String,
    pub fields: ListingFields,
    pub status: ItemStatus,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Item counts of one batch, read straight from item rows.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchCounts {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub success: i64,
    pub failed: i64,
}

impl BatchCounts {
    pub fn add(&mut self, status: ItemStatus, n: i64) {
        match status {
            ItemStatus::Pending => self.pending += n,
            ItemStatus::Processing => self.processing += n,
            ItemStatus::Success => self.success += n,
            ItemStatus::Failed => self.failed += n,
        }
        self.total += n;
    }

    pub fn unresolved(&self) -> i64 {
        self.pending + self.processing
    }

    /// Batch status implied by these counts once a processing pass has settled.
    pub fn settled_status(&self) -> BatchStatus {
        if self.unresolved() > 0 {
            if self.processing == 0 && self.success == 0 && self.failed == 0 {
                return BatchStatus::Pending;
            }
            return BatchStatus::Processing;
        }
        if self.failed == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        }
    }
}

/// Progress snapshot handed to history/progress views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchProgress {
    pub batch: Batch,
    pub counts: BatchCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> ProductInput {
        let mut overrides = HashMap::new();
        overrides.insert(
            "amazon".to_string(),
            ListingOverride {
                sale_price: Some(21.5),
                ..Default::default()
            },
        );
        ProductInput {
            product_id: "p-1".into(),
            name: "Kettle".into(),
            base: ListingFields {
                sku: "KT-1".into(),
                stock_quantity: 12,
                sale_price: 19.99,
                margin: 0.3,
            },
            overrides,
        }
    }

    #[test]
    fn snapshot_falls_back_to_base() {
        let p = product();
        assert_eq!(p.snapshot_for("ebay"), p.base);

        let amazon = p.snapshot_for("amazon");
        assert_eq!(amazon.sale_price, 21.5);
        assert_eq!(amazon.sku, "KT-1");
        assert_eq!(amazon.stock_quantity, 12);
    }

    #[test]
    fn item_transitions() {
        use ItemStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Success));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Success.can_transition_to(Pending));
        assert!(!Success.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Success));
    }

    #[test]
    fn settled_status_from_counts() {
        let mut c = BatchCounts::default();
        c.add(ItemStatus::Pending, 3);
        assert_eq!(c.settled_status(), BatchStatus::Pending);

        let mut c = BatchCounts::default();
        c.add(ItemStatus::Success, 2);
        c.add(ItemStatus::Processing, 1);
        assert_eq!(c.settled_status(), BatchStatus::Processing);

        let mut c = BatchCounts::default();
        c.add(ItemStatus::Success, 4);
        c.add(ItemStatus::Failed, 2);
        assert_eq!(c.settled_status(), BatchStatus::Failed);
        assert_eq!(c.success + c.failed, c.total);

        let mut c = BatchCounts::default();
        c.add(ItemStatus::Success, 6);
        assert_eq!(c.settled_status(), BatchStatus::Completed);
    }

    #[test]
    fn status_strings() {
        for s in ["pending", "processing", "success", "failed"] {
            assert_eq!(ItemStatus::parse_state(s).unwrap().as_str(), s);
        }
        assert_eq!(BatchStatus::parse_state("completed"), Some(BatchStatus::Completed));
        assert_eq!(BatchStatus::parse_state("done"), None);
    }
}
