use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::PublishError;
use crate::model::BatchItem;

/// Publishes one listing to its target marketplace.
///
/// Called once per item per processing attempt. Implementations report a
/// failure through `PublishError`; the processor records it on the item.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, item: &BatchItem) -> Result<(), PublishError>;
}

/// Publisher that posts each listing as JSON to a listings gateway:
/// `POST {base_url}/v1/marketplaces/{marketplace}/listings`.
#[derive(Clone)]
pub struct HttpPublisher {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for HttpPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPublisher")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpPublisher {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.publisher.base_url)
            .with_context(|| format!("invalid publisher.base_url {}", cfg.publisher.base_url))?;
        Self::with_base_url(cfg.publisher.token.clone(), base_url)
    }

    pub fn with_base_url(token: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("listing-batch/0.1")
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn build_request(&self, item: &BatchItem) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("v1/marketplaces/{}/listings", item.marketplace))
            .context("invalid publisher base URL")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&listing_body(item))
            .build()
            .context("failed to build listing request")
    }
}

pub fn listing_body(item: &BatchItem) -> Value {
    json!({
        "batch_id": item.batch_id,
        "item_id": item.id,
        "product_id": item.product_id,
        "name": item.product_name,
        "sku": item.fields.sku,
        "stock_quantity": item.fields.stock_quantity,
        "sale_price": item.fields.sale_price,
        "margin": item.fields.margin,
    })
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, item: &BatchItem) -> Result<(), PublishError> {
        let request = self
            .build_request(item)
            .map_err(|e| PublishError::Transport(format!("{:#}", e)))?;
        debug!(url = %request.url(), item_id = item.id, "publishing listing");

        let res = self
            .http
            .execute(request)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(item_id = item.id, marketplace = %item.marketplace, "rate limited: {}", body);
            return Err(PublishError::RateLimited(body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!(item_id = item.id, marketplace = %item.marketplace, "listing published");
        Ok(())
    }
}

/// Accepts every listing without contacting a marketplace.
#[derive(Debug, Clone, Default)]
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, item: &BatchItem) -> Result<(), PublishError> {
        info!(
            item_id = item.id,
            marketplace = %item.marketplace,
            sku = %item.fields.sku,
            "dry run: listing accepted"
        );
        Ok(())
    }
}
