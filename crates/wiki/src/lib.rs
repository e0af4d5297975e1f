use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WikiError {
    #[error("wiki service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("wiki service error: {status} - {body}")]
    Service { status: u16, body: String },
    #[error("invalid wiki response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Character,
    Location,
    Object,
    Faction,
}

/// A named story element extracted from an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryElement {
    pub name: String,
    pub kind: ElementKind,
    pub description: String,
}

/// Plot of an earlier event, passed along so the generated entry stays
/// consistent with what already happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub id: u64,
    pub plot: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiRequest {
    pub event_id: u64,
    pub video_url: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub character_ids: Vec<String>,
    #[serde(default)]
    pub previous_events: Vec<EventContext>,
}

/// Structured lore entry for one committed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiEntry {
    pub event_id: u64,
    pub title: String,
    pub summary: String,
    pub plot: String,
    #[serde(default)]
    pub elements: Vec<StoryElement>,
    #[serde(default)]
    pub key_moments: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Produces the lore entry for a committed event.
///
/// Generation keys on `event_id`: regenerating an entry overwrites the
/// previous one, so retries after partial failures are safe.
#[async_trait]
pub trait WikiGenerator: Send + Sync {
    async fn generate(&self, request: &WikiRequest) -> Result<WikiEntry, WikiError>;
}

#[derive(Debug, Clone)]
pub struct WikiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl WikiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
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

pub struct HttpWikiGenerator {
    config: WikiConfig,
    client: reqwest::Client,
}

impl HttpWikiGenerator {
    pub fn new(config: WikiConfig) -> Result<Self, WikiError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl WikiGenerator for HttpWikiGenerator {
    async fn generate(&self, request: &WikiRequest) -> Result<WikiEntry, WikiError> {
        let mut http = self.client.post(self.url("wiki/entries")).json(request);
        if let Some(key) = &self.config.api_key {
            http = http.header("Authorization", format!("Bearer {key}"));
        }
        let response = http.send().await?;
        if !response.status().is_success() {
            return Err(WikiError::Service {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let body = response.text().await?;
        let entry: WikiEntry = serde_json::from_str(&body)?;
        debug!(event_id = entry.event_id, "generated wiki entry");
        Ok(entry)
    }
}
