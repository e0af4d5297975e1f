use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::{
    check, AspectRatio, GenerationPoll, MediaGenError, PollResponse, RequestId, Resolution,
    ServiceConfig, VideoModel,
};

/// One video generation ask against a concrete model. Out-of-table values
/// are resolved to the model defaults at submit time, never rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub prompt: String,
    pub model: VideoModel,
    pub duration_secs: u32,
    pub aspect_ratio: AspectRatio,
    pub resolution: Option<Resolution>,
    pub reference_image_url: Option<String>,
}

impl VideoRequest {
    pub fn new(prompt: impl Into<String>, model: VideoModel) -> Self {
        Self {
            prompt: prompt.into(),
            model,
            duration_secs: model.default_duration(),
            aspect_ratio: model.default_aspect(),
            resolution: None,
            reference_image_url: None,
        }
    }

    pub fn with_duration(mut self, duration_secs: u32) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_aspect(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_reference_image(mut self, url: impl Into<String>) -> Self {
        self.reference_image_url = Some(url.into());
        self
    }
}

/// Queue-style video generation service, same submit/poll contract as
/// [`crate::ImageBackend`].
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn submit(&self, request: &VideoRequest) -> Result<RequestId, MediaGenError>;
    async fn poll(&self, id: &RequestId) -> Result<GenerationPoll, MediaGenError>;
}

pub struct HttpVideoBackend {
    config: ServiceConfig,
    client: reqwest::Client,
}

impl HttpVideoBackend {
    pub fn new(config: ServiceConfig) -> Result<Self, MediaGenError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

/// Gateway route: a reference image switches the model to its
/// image-to-video variant, which is a different endpoint, not a nullable
/// field on the text one.
fn request_path(request: &VideoRequest) -> String {
    let variant = if request.reference_image_url.is_some() {
        "image-to-video"
    } else {
        "text-to-video"
    };
    format!("videos/{}/{variant}", request.model.slug())
}

/// Vendor payload for the request. Every model spells its parameters
/// differently: Kling wants string seconds, Pixverse integer seconds plus a
/// resolution, Ray2 a `"5s"` suffix form, Veo a camelCase `durationSeconds`.
/// Values outside the model table are replaced by the model default first.
fn vendor_input(request: &VideoRequest, client_id: &str) -> serde_json::Value {
    let model = request.model;
    let duration = model.resolve_duration(request.duration_secs);
    let aspect = model.resolve_aspect(request.aspect_ratio);
    let resolution = model.resolve_resolution(request.resolution);

    let mut input = match model {
        VideoModel::Kling => serde_json::json!({
            "prompt": request.prompt,
            "duration": duration.to_string(),
            "aspect_ratio": aspect.to_string(),
        }),
        VideoModel::Pixverse => serde_json::json!({
            "prompt": request.prompt,
            "duration": duration,
            "aspect_ratio": aspect.to_string(),
        }),
        VideoModel::Ray2 => serde_json::json!({
            "prompt": request.prompt,
            "duration": format!("{duration}s"),
            "aspect_ratio": aspect.to_string(),
        }),
        VideoModel::Veo => serde_json::json!({
            "prompt": request.prompt,
            "durationSeconds": duration,
            "aspect_ratio": aspect.to_string(),
        }),
    };
    if let Some(res) = resolution {
        input["resolution"] = serde_json::Value::String(res.to_string());
    }
    if let Some(url) = &request.reference_image_url {
        input["image_url"] = serde_json::Value::String(url.clone());
    }
    input["client_id"] = serde_json::Value::String(client_id.to_string());
    input
}

#[async_trait]
impl VideoBackend for HttpVideoBackend {
    async fn submit(&self, request: &VideoRequest) -> Result<RequestId, MediaGenError> {
        let client_id = Uuid::new_v4().to_string();
        let path = request_path(request);
        let body = vendor_input(request, &client_id);

        let response = self
            .config
            .authorize(self.client.post(self.config.url(&path)))
            .json(&body)
            .send()
            .await?;
        let body = check(response).await?.text().await?;
        let submitted: crate::SubmitResponse = serde_json::from_str(&body)?;
        debug!(
            request = %submitted.request_id,
            model = request.model.slug(),
            "submitted video generation"
        );
        Ok(RequestId(submitted.request_id))
    }

    async fn poll(&self, id: &RequestId) -> Result<GenerationPoll, MediaGenError> {
        let response = self
            .config
            .authorize(self.client.get(self.config.url(&format!("videos/requests/{id}"))))
            .send()
            .await?;
        let body = check(response).await?.text().await?;
        let wire: PollResponse = serde_json::from_str(&body)?;
        Ok(wire.into())
    }
}
