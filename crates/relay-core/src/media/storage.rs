//! Storage API client: fetch source bytes and push them as a multipart upload.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use super::reconcile::file_name;
use super::{MediaError, PictureSize};
use crate::config::MediaConfig;
use crate::platform::StoreAuth;

/// Sizes returned by one successful upload, before alt text and id are attached.
pub type StoredSizes = BTreeMap<String, PictureSize>;

#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn upload(
        &self,
        store_id: &str,
        auth: &StoreAuth,
        source_url: &str,
    ) -> Result<StoredSizes, MediaError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    picture: Option<BTreeMap<String, Option<RawSize>>>,
}

#[derive(Debug, Deserialize)]
struct RawSize {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    alt: Option<String>,
}

/// Keep sizes that carry a URL. Anything else the storage returns (`size`
/// dimensions and the like) is dropped.
fn usable_sizes(resp: UploadResponse) -> StoredSizes {
    resp.picture
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, raw)| {
            let raw = raw?;
            let url = raw.url.filter(|u| !u.is_empty())?;
            Some((name, PictureSize { url, alt: raw.alt }))
        })
        .collect()
}

pub struct StorageClient {
    client: Client,
    base_url: String,
}

impl StorageClient {
    pub fn new(config: &MediaConfig) -> Result<Self, MediaError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.upload_timeout_secs))
            .build()
            .map_err(|e| MediaError::Upload {
                url: config.storage_base_url.clone(),
                reason: format!("http client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.storage_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, source_url: &str) -> Result<Vec<u8>, MediaError> {
        let fetch_err = |reason: String| MediaError::Fetch {
            url: source_url.to_string(),
            reason,
        };
        let resp = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fetch_err(format!("status {}", resp.status())));
        }
        let bytes = resp.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl MediaStorage for StorageClient {
    async fn upload(
        &self,
        store_id: &str,
        auth: &StoreAuth,
        source_url: &str,
    ) -> Result<StoredSizes, MediaError> {
        let bytes = self.fetch(source_url).await?;
        let part = Part::bytes(bytes).file_name(file_name(source_url).to_string());
        let form = Form::new().part("file", part);

        let endpoint = format!("{}/{}/api/v1/upload.json", self.base_url, store_id);
        let upload_err = |reason: String| MediaError::Upload {
            url: source_url.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(&endpoint)
            .header("X-Store-ID", store_id)
            .header("X-My-ID", &auth.my_id)
            .header("X-Access-Token", &auth.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| upload_err(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| upload_err(e.to_string()))?;

        let unexpected = || MediaError::UnexpectedResponse {
            url: source_url.to_string(),
            status: status.as_u16(),
            body: body.clone(),
        };
        if !status.is_success() {
            return Err(unexpected());
        }
        let parsed: UploadResponse = serde_json::from_str(&body).map_err(|_| unexpected())?;
        let sizes = usable_sizes(parsed);
        if sizes.is_empty() {
            return Err(unexpected());
        }
        tracing::debug!(store = store_id, url = source_url, sizes = sizes.len(), "media uploaded");
        Ok(sizes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn auth() -> StoreAuth {
        StoreAuth {
            my_id: "me".into(),
            access_token: "tok".into(),
        }
    }

    fn client(server: &mockito::ServerGuard) -> StorageClient {
        StorageClient::new(&MediaConfig {
            storage_base_url: server.url(),
            upload_timeout_secs: 5,
            retry_delay_ms: 0,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn uploads_fetched_bytes_and_keeps_sizes_with_url() {
        let mut server = mockito::Server::new_async().await;
        let source = server
            .mock("GET", "/files/img1.jpg")
            .with_status(200)
            .with_body("JPEGDATA")
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/1011/api/v1/upload.json")
            .match_header("x-store-id", "1011")
            .match_header("x-my-id", "me")
            .match_header("x-access-token", "tok")
            .match_body(mockito::Matcher::Regex("img1.jpg".into()))
            .with_status(200)
            .with_body(
                json!({
                    "picture": {
                        "normal": { "url": "https://cdn/n/img1.jpg", "size": "350x350" },
                        "zoom": { "url": "https://cdn/z/img1.jpg", "size": "700x700" },
                        "big": { "size": "1000x1000" },
                        "small": null
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let url = format!("{}/files/img1.jpg", server.url());
        let sizes = client(&server).upload("1011", &auth(), &url).await.unwrap();

        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes["normal"].url, "https://cdn/n/img1.jpg");
        assert!(!sizes.contains_key("big"));
        source.assert_async().await;
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn response_without_usable_sizes_is_unexpected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/files/a.png")
            .with_status(200)
            .with_body("PNG")
            .create_async()
            .await;
        server
            .mock("POST", "/1011/api/v1/upload.json")
            .with_status(200)
            .with_body(r#"{"picture":{"normal":{"size":"1x1"}}}"#)
            .create_async()
            .await;

        let url = format!("{}/files/a.png", server.url());
        let err = client(&server).upload("1011", &auth(), &url).await.unwrap_err();
        assert!(matches!(err, MediaError::UnexpectedResponse { status: 200, .. }));
    }

    #[tokio::test]
    async fn storage_error_status_is_unexpected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/files/a.png")
            .with_status(200)
            .with_body("PNG")
            .create_async()
            .await;
        server
            .mock("POST", "/1011/api/v1/upload.json")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;

        let url = format!("{}/files/a.png", server.url());
        let err = client(&server).upload("1011", &auth(), &url).await.unwrap_err();
        match err {
            MediaError::UnexpectedResponse { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("expected UnexpectedResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_source_fails_before_upload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/files/gone.png")
            .with_status(404)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/1011/api/v1/upload.json")
            .expect(0)
            .create_async()
            .await;

        let url = format!("{}/files/gone.png", server.url());
        let err = client(&server).upload("1011", &auth(), &url).await.unwrap_err();
        assert!(matches!(err, MediaError::Fetch { .. }));
        upload.assert_async().await;
    }
}
