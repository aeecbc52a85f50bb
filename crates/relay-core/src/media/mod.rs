//! Image ingestion for synchronized products.
//!
//! ```text
//! MediaRef (source URL)
//!     │  reconcile against product.pictures by file name
//!     ▼
//! MediaStorage::upload  ← fetch bytes, multipart POST, one retry
//!     │
//!     ▼
//! Picture placed by input position, variation links remapped
//! ```

pub mod ingest;
pub mod reconcile;
pub mod storage;

pub use ingest::{IngestMode, MediaPipeline};
pub use storage::{MediaStorage, StorageClient};

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::platform::PlatformError;

/// Size every picture is expected to carry; reconciliation compares its URL.
pub const PRIMARY_SIZE: &str = "normal";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("storage upload failed for {url}: {reason}")]
    Upload { url: String, reason: String },

    #[error("unexpected storage API response for {url} (status {status}): {body}")]
    UnexpectedResponse {
        url: String,
        status: u16,
        body: String,
    },

    #[error("product has no id to write pictures back to")]
    MissingEntityId,

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// A 24-hex-digit identifier in the platform's object id format.
pub fn object_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Pictures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureSize {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// An ingested media record: one URL per size name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Picture {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub sizes: BTreeMap<String, PictureSize>,
}

impl Picture {
    /// Record pointing straight at the source, used when uploads keep failing.
    pub fn fallback(url: &str, alt: &str) -> Self {
        let mut sizes = BTreeMap::new();
        sizes.insert(
            PRIMARY_SIZE.to_string(),
            PictureSize {
                url: url.to_string(),
                alt: Some(alt.to_string()),
            },
        );
        Self { id: None, sizes }
    }

    pub fn primary_url(&self) -> Option<&str> {
        self.sizes.get(PRIMARY_SIZE).map(|s| s.url.as_str())
    }
}

/// A reference to external media, as delivered by the source system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(default, alias = "anexo")]
    pub url: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
        }
    }

    /// The URL, when it is absolute.
    pub fn source_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| u.starts_with("http"))
    }
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

/// How a variation points at a picture: an input index before ingestion,
/// the record id after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PictureLink {
    Index(usize),
    Id(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_id: Option<PictureLink>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// The slice of a platform product the media pipeline reads and writes.
/// Every other field passes through untouched in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pictures: Vec<Picture>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<Variation>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_ids_are_24_hex_digits_and_distinct() {
        let a = object_id();
        let b = object_id();
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn picture_reads_platform_shape() {
        let picture: Picture = serde_json::from_value(json!({
            "_id": "abc",
            "normal": { "url": "https://x/img1.jpg", "alt": "Shoe" },
            "zoom": { "url": "https://x/img1-zoom.jpg" }
        }))
        .unwrap();
        assert_eq!(picture.id.as_deref(), Some("abc"));
        assert_eq!(picture.primary_url(), Some("https://x/img1.jpg"));
        assert_eq!(picture.sizes.len(), 2);
    }

    #[test]
    fn fallback_has_no_id_and_only_normal_size() {
        let value = serde_json::to_value(Picture::fallback("https://x/a.png", "Shoe")).unwrap();
        assert_eq!(
            value,
            json!({ "normal": { "url": "https://x/a.png", "alt": "Shoe" } })
        );
    }

    #[test]
    fn media_ref_accepts_both_source_field_names() {
        let a: MediaRef = serde_json::from_value(json!({ "anexo": "https://x/a.png" })).unwrap();
        let b: MediaRef = serde_json::from_value(json!({ "url": "https://x/b.png" })).unwrap();
        assert_eq!(a.source_url(), Some("https://x/a.png"));
        assert_eq!(b.source_url(), Some("https://x/b.png"));
        assert_eq!(MediaRef::new("ftp://x/c.png").source_url(), None);
    }

    #[test]
    fn product_keeps_unknown_fields() {
        let product: Product = serde_json::from_value(json!({
            "_id": "p1",
            "name": "Shoe",
            "price": 10.5,
            "variations": [{ "_id": "v1", "picture_id": 2, "sku": "S-1" }]
        }))
        .unwrap();
        assert_eq!(product.variations[0].picture_id, Some(PictureLink::Index(2)));
        let back = serde_json::to_value(&product).unwrap();
        assert_eq!(back["price"], json!(10.5));
        assert_eq!(back["variations"][0]["sku"], json!("S-1"));
    }
}
