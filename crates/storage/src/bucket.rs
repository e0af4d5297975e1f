use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::{extension_of, fetch_source, MediaStore, StorageError, StoredMedia};

/// S3-style bucket behind an upload gateway. Keys are random; the gateway
/// serves uploads from a public base URL.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub upload_url: String,
    pub public_base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl BucketConfig {
    pub fn new(upload_url: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            public_base_url: public_base_url.into(),
            api_key: None,
            timeout_secs: 120,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

pub struct BucketStore {
    config: BucketConfig,
    client: reqwest::Client,
}

impl BucketStore {
    pub fn new(config: BucketConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.config.public_base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl MediaStore for BucketStore {
    async fn store_from_url(&self, source_url: &str) -> Result<StoredMedia, StorageError> {
        let bytes = fetch_source(&self.client, source_url).await?;
        let key = format!("{}.{}", Uuid::new_v4(), extension_of(source_url));

        let part = reqwest::multipart::Part::bytes(bytes).file_name(key.clone());
        let form = reqwest::multipart::Form::new()
            .text("key", key.clone())
            .part("file", part);

        let mut request = self.client.post(&self.config.upload_url).multipart(form);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StorageError::Store {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        // Gateways differ on whether they echo the stored location back;
        // fall back to the configured public base when they don't.
        let echoed: UploadResponse = response.json().await.unwrap_or_default();
        let key = echoed.key.unwrap_or(key);
        let url = echoed.url.unwrap_or_else(|| self.public_url(&key));
        debug!(key = %key, "uploaded media to bucket");
        Ok(StoredMedia { key, url })
    }
}

#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    key: Option<String>,
    url: Option<String>,
}
