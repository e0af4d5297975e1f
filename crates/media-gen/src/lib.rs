use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

mod models;
pub use models::*;
mod image;
pub use image::*;
mod video;
pub use video::*;

#[derive(Debug, Error)]
pub enum MediaGenError {
    #[error("generation service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generation service error: {status} - {body}")]
    Service { status: u16, body: String },
    #[error("invalid generation response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Service-side id for a queued generation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

/// One observation of a queued request: its status plus the output URL on
/// success or the service's error text on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPoll {
    pub status: GenerationStatus,
    pub url: Option<String>,
    pub error: Option<String>,
}

impl GenerationPoll {
    /// Output URL, present only once the request completed.
    pub fn completed_url(&self) -> Option<&str> {
        match self.status {
            GenerationStatus::Completed => self.url.as_deref(),
            _ => None,
        }
    }

    /// Error text for a failed request, with a fallback for services that
    /// fail without detail.
    pub fn failure_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "generation failed without detail".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitResponse {
    pub(crate) request_id: String,
}

/// Raw poll payload as the generation services return it. Status strings
/// vary by vendor, so mapping is lenient.
#[derive(Debug, Deserialize)]
pub(crate) struct PollResponse {
    status: String,
    url: Option<String>,
    error: Option<String>,
}

impl From<PollResponse> for GenerationPoll {
    fn from(wire: PollResponse) -> Self {
        let status = match wire.status.as_str() {
            "pending" | "queued" | "starting" => GenerationStatus::Pending,
            "in_progress" | "processing" | "running" => GenerationStatus::InProgress,
            "completed" | "succeeded" => GenerationStatus::Completed,
            "failed" | "error" | "canceled" => GenerationStatus::Failed,
            other => {
                debug!(status = other, "unknown generation status, treating as pending");
                GenerationStatus::Pending
            }
        };
        GenerationPoll {
            status,
            url: wire.url,
            error: wire.error,
        }
    }
}

/// Shared connection settings for the image and video services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout_secs: 60,
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

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Key {key}")),
            None => request,
        }
    }
}

pub(crate) async fn check(
    response: reqwest::Response,
) -> Result<reqwest::Response, MediaGenError> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(MediaGenError::Service {
        status: response.status().as_u16(),
        body: response.text().await.unwrap_or_default(),
    })
}
