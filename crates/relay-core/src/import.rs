//! Product import: pull a product from the source system by SKU and create or
//! update it on the commerce platform, images included.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::app_config::AppConfig;
use crate::config::SourceConfig;
use crate::handler::{SyncContext, SyncError, SyncHandler, WorkItem};
use crate::media::{IngestMode, MediaError, MediaPipeline, MediaRef, Product};
use crate::platform::PlatformApi;

/// A product as the source system describes it. Only the fields the relay
/// acts on are typed; the rest is forwarded as-is.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceProduct {
    pub sku: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "anexos")]
    pub images: Vec<MediaRef>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SourceProduct {
    fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.sku.as_str())
            .to_string()
    }

    /// Copy the source's values over `product`, leaving pictures alone.
    fn apply_to(&self, product: &mut Product) {
        product.sku = Some(self.sku.clone());
        product.name = self.display_name();
        product
            .fields
            .extend(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

#[async_trait]
pub trait ProductSource: Send + Sync {
    /// `Ok(None)` when the source has no product under `sku`.
    async fn fetch(&self, api_token: &str, sku: &str) -> Result<Option<SourceProduct>, SyncError>;
}

pub struct HttpProductSource {
    client: Client,
    base_url: String,
}

impl HttpProductSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SyncError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| SyncError::Source("source.base_url is not configured".into()))?
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Source(format!("http client: {e}")))?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl ProductSource for HttpProductSource {
    async fn fetch(&self, api_token: &str, sku: &str) -> Result<Option<SourceProduct>, SyncError> {
        let url = format!("{}/products/{}.json", self.base_url, sku);
        let resp = self
            .client
            .get(&url)
            .query(&[("token", api_token)])
            .send()
            .await
            .map_err(|e| SyncError::Source(format!("GET {url}: {e}")))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => resp
                .json::<SourceProduct>()
                .await
                .map(Some)
                .map_err(|e| SyncError::Source(format!("GET {url}: {e}"))),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(SyncError::Source(format!("GET {url} returned {status}: {body}")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProductImport
// ---------------------------------------------------------------------------

/// Handler for `importation/skus`.
pub struct ProductImport {
    source: Arc<dyn ProductSource>,
    platform: Arc<dyn PlatformApi>,
    media: Arc<MediaPipeline>,
}

impl ProductImport {
    pub fn new(
        source: Arc<dyn ProductSource>,
        platform: Arc<dyn PlatformApi>,
        media: Arc<MediaPipeline>,
    ) -> Self {
        Self {
            source,
            platform,
            media,
        }
    }

    async fn find_by_sku(&self, store_id: &str, sku: &str) -> Result<Option<Product>, SyncError> {
        let found = self
            .platform
            .get(
                store_id,
                &format!("/products.json?sku={}&fields=_id", urlencoding::encode(sku)),
            )
            .await?;
        let Some(id) = found
            .get("result")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .and_then(|p| p.get("_id"))
            .and_then(Value::as_str)
        else {
            return Ok(None);
        };

        let doc = self
            .platform
            .get(store_id, &format!("/products/{id}.json"))
            .await?;
        serde_json::from_value(doc)
            .map(Some)
            .map_err(|e| SyncError::Source(format!("platform product {id}: {e}")))
    }
}

/// Product as a write body: no `_id`, everything else as stored.
fn write_body(product: &Product) -> Value {
    let mut body = serde_json::json!(product);
    if let Value::Object(map) = &mut body {
        map.remove("_id");
    }
    body
}

#[async_trait]
impl SyncHandler for ProductImport {
    async fn handle(
        &self,
        ctx: &SyncContext,
        work: &WorkItem,
        app: &mut AppConfig,
    ) -> Result<(), SyncError> {
        let sku = work.id.as_str();
        let token = app.api_token.as_deref().unwrap_or_default();
        let Some(source) = self.source.fetch(token, sku).await? else {
            tracing::warn!(store = %ctx.store_id, sku, "sku not found on source, skipping");
            return Ok(());
        };

        match self.find_by_sku(&ctx.store_id, sku).await? {
            Some(mut product) => {
                let id = product.id.clone().ok_or(MediaError::MissingEntityId)?;
                source.apply_to(&mut product);
                self.media
                    .ingest(ctx, &mut product, &source.images, IngestMode::Update)
                    .await?;
                self.platform
                    .update(&ctx.store_id, &format!("/products/{id}.json"), &write_body(&product))
                    .await?;
                tracing::info!(store = %ctx.store_id, sku, product = %id, "product updated");
            }
            None if work.allow_create => {
                let mut product = Product::default();
                source.apply_to(&mut product);
                self.media
                    .ingest(ctx, &mut product, &source.images, IngestMode::Create)
                    .await?;
                let created = self
                    .platform
                    .create(&ctx.store_id, "/products.json", &write_body(&product))
                    .await?;
                let created_id = created.get("_id").and_then(Value::as_str).unwrap_or("?");
                tracing::info!(store = %ctx.store_id, sku, product = created_id, "product created");
            }
            None => {
                tracing::debug!(store = %ctx.store_id, sku, "product missing and creation not allowed");
            }
        }
        Ok(())
    }
}
