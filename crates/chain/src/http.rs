use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use story_graph::TimelineSnapshot;

use crate::{ChainClient, ChainError, NewNode, TxHandle, TxStatus};

/// Connection settings for the JSON gateway in front of the story contract.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl ChainConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout_secs: 30,
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

/// Gateway-backed [`ChainClient`]. The gateway owns wallet and ABI
/// plumbing; this client only speaks its JSON surface.
pub struct HttpChainClient {
    config: ChainConfig,
    client: reqwest::Client,
}

impl HttpChainClient {
    pub fn new(config: ChainConfig) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ChainError> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(ChainError::Gateway {
            status: response.status().as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn read_timeline(&self) -> Result<TimelineSnapshot, ChainError> {
        let response = self
            .authorize(self.client.get(self.url("timeline")))
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;
        let snapshot: TimelineSnapshot = serde_json::from_str(&body)?;
        debug!(nodes = snapshot.len(), "fetched timeline snapshot");
        Ok(snapshot)
    }

    async fn submit_node(&self, node: &NewNode) -> Result<TxHandle, ChainError> {
        let response = self
            .authorize(self.client.post(self.url("nodes")))
            .json(node)
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;
        let submitted: SubmitResponse = serde_json::from_str(&body)?;
        debug!(tx = %submitted.tx_hash, previous_id = node.previous_id, "submitted node write");
        Ok(TxHandle(submitted.tx_hash))
    }

    async fn transaction(&self, tx: &TxHandle) -> Result<TxStatus, ChainError> {
        let response = self
            .authorize(self.client.get(self.url(&format!("tx/{tx}"))))
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    tx_hash: String,
}
