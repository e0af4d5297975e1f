use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{fetch_source, MediaStore, StorageError, StoredMedia};

/// Content-addressed blob store with separate publish and read endpoints.
/// The key is the sha256 of the payload, so re-storing identical media is a
/// no-op server-side and always yields the same URL.
#[derive(Debug, Clone)]
pub struct BlobConfig {
    pub publish_url: String,
    pub read_url: String,
    pub timeout_secs: u64,
}

impl BlobConfig {
    pub fn new(publish_url: impl Into<String>, read_url: impl Into<String>) -> Self {
        Self {
            publish_url: publish_url.into(),
            read_url: read_url.into(),
            timeout_secs: 120,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

pub struct BlobStore {
    config: BlobConfig,
    client: reqwest::Client,
}

impl BlobStore {
    pub fn new(config: BlobConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn publish_url(&self, key: &str) -> String {
        format!("{}/blobs/{key}", self.config.publish_url.trim_end_matches('/'))
    }

    fn read_url(&self, key: &str) -> String {
        format!("{}/blobs/{key}", self.config.read_url.trim_end_matches('/'))
    }
}

/// Blob key for a payload: lowercase hex sha256.
pub fn blob_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaStore for BlobStore {
    async fn store_from_url(&self, source_url: &str) -> Result<StoredMedia, StorageError> {
        let bytes = fetch_source(&self.client, source_url).await?;
        let key = blob_key(&bytes);

        let response = self
            .client
            .put(self.publish_url(&key))
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StorageError::Store {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let url = self.read_url(&key);
        debug!(key = %key, "published media blob");
        Ok(StoredMedia { key, url })
    }
}
