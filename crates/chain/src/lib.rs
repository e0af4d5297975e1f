use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use story_graph::TimelineSnapshot;

mod http;
pub use http::*;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway error: {status} - {body}")]
    Gateway { status: u16, body: String },
    #[error("invalid gateway response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Payload for committing one new story event on chain.
///
/// The contract assigns the node id itself; callers only name the parent.
/// `previous_id == 0` roots a new timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNode {
    pub link: String,
    pub plot: String,
    pub previous_id: u64,
}

/// Transaction hash returned by the gateway for a submitted write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed { block: u64 },
    Reverted { reason: String },
}

impl TxStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// Read/write access to the story contract, behind whatever gateway fronts
/// it. Injected as `Arc<dyn ChainClient>` so tests can substitute a fake.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch the full timeline as the contract's parallel arrays.
    async fn read_timeline(&self) -> Result<TimelineSnapshot, ChainError>;

    /// Submit a new node write and return its transaction handle. The write
    /// is not durable until [`ChainClient::transaction`] reports it
    /// confirmed.
    async fn submit_node(&self, node: &NewNode) -> Result<TxHandle, ChainError>;

    /// Current status of a submitted transaction.
    async fn transaction(&self, tx: &TxHandle) -> Result<TxStatus, ChainError>;
}
