use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod blob;
pub use blob::*;
mod bucket;
pub use bucket::*;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("media transfer failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("source fetch returned {status} for {url}")]
    SourceUnavailable { status: u16, url: String },
    #[error("store error: {status} - {body}")]
    Store { status: u16, body: String },
}

/// Where a piece of media ended up: the store's key for it and the durable
/// URL it is served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMedia {
    pub key: String,
    pub url: String,
}

/// Re-hosts media from a (possibly short-lived) generation URL into durable
/// storage. Injected as `Arc<dyn MediaStore>`; callers decide whether a
/// failure is fatal.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store_from_url(&self, source_url: &str) -> Result<StoredMedia, StorageError>;
}

/// File extension taken from a source URL's path, query and fragment
/// stripped. Falls back to `bin` for extensionless paths.
pub(crate) fn extension_of(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => "bin",
    }
}

pub(crate) async fn fetch_source(
    client: &reqwest::Client,
    source_url: &str,
) -> Result<Vec<u8>, StorageError> {
    let response = client.get(source_url).send().await?;
    if !response.status().is_success() {
        return Err(StorageError::SourceUnavailable {
            status: response.status().as_u16(),
            url: source_url.to_string(),
        });
    }
    Ok(response.bytes().await?.to_vec())
}
