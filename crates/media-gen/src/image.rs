use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{check, GenerationPoll, MediaGenError, PollResponse, RequestId, ServiceConfig};

/// One still-image ask. Empty `reference_image_urls` is plain text-to-image;
/// non-empty switches to the compose shape, which renders the referenced
/// character images into the new scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub reference_image_urls: Vec<String>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_image_urls: Vec::new(),
        }
    }

    pub fn with_references(mut self, urls: Vec<String>) -> Self {
        self.reference_image_urls = urls;
        self
    }
}

/// Queue-style image generation service: submit returns a request id, the
/// caller polls until the request reaches a terminal status.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn submit(&self, request: &ImageRequest) -> Result<RequestId, MediaGenError>;
    async fn poll(&self, id: &RequestId) -> Result<GenerationPoll, MediaGenError>;
}

pub struct HttpImageBackend {
    config: ServiceConfig,
    client: reqwest::Client,
}

impl HttpImageBackend {
    pub fn new(config: ServiceConfig) -> Result<Self, MediaGenError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

/// Text-to-image and compose are distinct service endpoints with distinct
/// payloads, so the branch is explicit here rather than a nullable field.
fn request_body(request: &ImageRequest, client_id: &str) -> (&'static str, serde_json::Value) {
    if request.reference_image_urls.is_empty() {
        (
            "images/generate",
            serde_json::json!({
                "prompt": request.prompt,
                "client_id": client_id,
            }),
        )
    } else {
        (
            "images/compose",
            serde_json::json!({
                "prompt": request.prompt,
                "image_urls": request.reference_image_urls,
                "client_id": client_id,
            }),
        )
    }
}

#[async_trait]
impl ImageBackend for HttpImageBackend {
    async fn submit(&self, request: &ImageRequest) -> Result<RequestId, MediaGenError> {
        let client_id = Uuid::new_v4().to_string();
        let (path, body) = request_body(request, &client_id);

        let response = self
            .config
            .authorize(self.client.post(self.config.url(path)))
            .json(&body)
            .send()
            .await?;
        let body = check(response).await?.text().await?;
        let submitted: crate::SubmitResponse = serde_json::from_str(&body)?;
        debug!(
            request = %submitted.request_id,
            references = request.reference_image_urls.len(),
            "submitted image generation"
        );
        Ok(RequestId(submitted.request_id))
    }

    async fn poll(&self, id: &RequestId) -> Result<GenerationPoll, MediaGenError> {
        let response = self
            .config
            .authorize(self.client.get(self.config.url(&format!("images/requests/{id}"))))
            .send()
            .await?;
        let body = check(response).await?.text().await?;
        let wire: PollResponse = serde_json::from_str(&body)?;
        Ok(wire.into())
    }
}
