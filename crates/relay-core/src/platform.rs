//! Commerce platform API client.
//!
//! Every request carries the per-store `X-Store-ID`, `X-My-ID` and
//! `X-Access-Token` headers. Only `get`, `create` and `update` are needed by
//! the handlers, plus reading and saving this application's per-store settings.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::app_config::{AppConfig, Namespace};
use crate::config::PlatformConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAuth {
    pub my_id: String,
    pub access_token: String,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("no credentials configured for store {0}")]
    UnknownStore(String),

    #[error("platform client not configured: {0}")]
    NotConfigured(String),

    #[error("{method} {url} returned {status}: {body}")]
    Api {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl PlatformError {
    /// HTTP status returned by the platform, when it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn auth(&self, store_id: &str) -> Result<StoreAuth, PlatformError>;

    async fn get(&self, store_id: &str, path: &str) -> Result<Value, PlatformError>;

    async fn create(&self, store_id: &str, path: &str, body: &Value) -> Result<Value, PlatformError>;

    async fn update(&self, store_id: &str, path: &str, body: &Value) -> Result<Value, PlatformError>;

    async fn app_config(&self, store_id: &str) -> Result<AppConfig, PlatformError>;

    /// Persist the listed queue namespaces of `app`, leaving every other
    /// namespace and setting as the platform holds it.
    async fn save_app_config(
        &self,
        store_id: &str,
        app: &AppConfig,
        namespaces: &[Namespace],
    ) -> Result<(), PlatformError>;
}

// ---------------------------------------------------------------------------
// HttpPlatform
// ---------------------------------------------------------------------------

pub struct HttpPlatform {
    client: Client,
    base_url: String,
    application_id: String,
    stores: HashMap<String, StoreAuth>,
}

impl HttpPlatform {
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PlatformError::NotConfigured(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            application_id: config.application_id.clone(),
            stores: config.stores.clone(),
        })
    }

    fn credentials(&self, store_id: &str) -> Result<&StoreAuth, PlatformError> {
        self.stores
            .get(store_id)
            .ok_or_else(|| PlatformError::UnknownStore(store_id.to_string()))
    }

    fn application_path(&self, suffix: &str) -> Result<String, PlatformError> {
        if self.application_id.is_empty() {
            return Err(PlatformError::NotConfigured(
                "platform.application_id is empty".into(),
            ));
        }
        Ok(format!("/applications/{}{suffix}", self.application_id))
    }

    async fn request(
        &self,
        method: Method,
        store_id: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, PlatformError> {
        let auth = self.credentials(store_id)?;
        let url = format!("{}{}", self.base_url, path);

        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("X-Store-ID", store_id)
            .header("X-My-ID", &auth.my_id)
            .header("X-Access-Token", &auth.access_token);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|source| PlatformError::Transport {
            url: url.clone(),
            source,
        })?;
        let status = resp.status();
        let text = resp.text().await.map_err(|source| PlatformError::Transport {
            url: url.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(PlatformError::Api {
                method: method.to_string(),
                url,
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| PlatformError::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl PlatformApi for HttpPlatform {
    async fn auth(&self, store_id: &str) -> Result<StoreAuth, PlatformError> {
        self.credentials(store_id).cloned()
    }

    async fn get(&self, store_id: &str, path: &str) -> Result<Value, PlatformError> {
        self.request(Method::GET, store_id, path, None).await
    }

    async fn create(&self, store_id: &str, path: &str, body: &Value) -> Result<Value, PlatformError> {
        self.request(Method::POST, store_id, path, Some(body)).await
    }

    async fn update(&self, store_id: &str, path: &str, body: &Value) -> Result<Value, PlatformError> {
        self.request(Method::PATCH, store_id, path, Some(body)).await
    }

    async fn app_config(&self, store_id: &str) -> Result<AppConfig, PlatformError> {
        let path = self.application_path(".json")?;
        let doc = self.get(store_id, &path).await?;

        // Public data first, hidden data wins on conflicts.
        let mut merged = Map::new();
        for field in ["data", "hidden_data"] {
            if let Some(Value::Object(obj)) = doc.get(field) {
                merged.extend(obj.clone());
            }
        }
        serde_json::from_value(Value::Object(merged)).map_err(|e| PlatformError::Decode {
            url: path,
            reason: e.to_string(),
        })
    }

    async fn save_app_config(
        &self,
        store_id: &str,
        app: &AppConfig,
        namespaces: &[Namespace],
    ) -> Result<(), PlatformError> {
        let path = self.application_path("/data.json")?;
        let mut queues = Map::new();
        for ns in namespaces {
            let key = ns.to_string();
            // Emptied namespaces are written as {} so stale ids disappear.
            let value = app
                .extra
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            queues.insert(key, value);
        }
        self.update(store_id, &path, &Value::Object(queues)).await?;
        Ok(())
    }
}
