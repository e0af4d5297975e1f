use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use media_gen::{AspectRatio, Resolution, VideoModel};
use story_graph::{EventId, TimelineSnapshot};

/// Where a creation session currently is. Mirrors the stage order of the
/// pipeline; the three `*Failed` states before the contract write are
/// terminal, `StorageFailed` and `WikiFailed` are degradations the run
/// survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    PromptReady,
    ImageGenerating,
    ImageReady,
    ImageFailed,
    VideoGenerating,
    VideoReady,
    VideoFailed,
    StorageUploading,
    StorageReady,
    StorageFailed,
    ContractWriting,
    ContractConfirmed,
    ContractFailed,
    WikiGenerating,
    WikiReady,
    WikiFailed,
}

impl SessionState {
    /// True for failures that end the run with nothing written on chain.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            SessionState::ImageFailed | SessionState::VideoFailed | SessionState::ContractFailed
        )
    }

    /// True for side-effect failures the run continues through.
    pub fn is_degraded(&self) -> bool {
        matches!(self, SessionState::StorageFailed | SessionState::WikiFailed)
    }
}

/// How the new event attaches to the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CreationMode {
    /// Continue the main line: the parent is the highest node id currently
    /// on chain.
    Extend,
    /// Fork from an existing event. A suffixed source (`"4c"`) still forks
    /// from its committed ancestor, node 4.
    Branch { source: EventId },
}

impl CreationMode {
    /// Parent id for the new node, given the snapshot read just before the
    /// write.
    pub fn previous_id(&self, snapshot: &TimelineSnapshot) -> u64 {
        match self {
            CreationMode::Extend => snapshot.latest_id(),
            CreationMode::Branch { source } => source.numeric_prefix(),
        }
    }
}

/// Whether and how a still image is produced before the video stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum ImagePlan {
    /// No image stage; the video model works from the prompt alone.
    Skip,
    /// Text-to-image first, then animate the result.
    Generate,
    /// Compose the referenced character images into the scene first.
    Compose { reference_urls: Vec<String> },
}

/// Video model choice plus the knobs the user turned. Values outside the
/// model's table fall back to the model default at submit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub model: VideoModel,
    pub duration_secs: u32,
    pub aspect_ratio: AspectRatio,
    pub resolution: Option<Resolution>,
}

impl VideoSettings {
    pub fn new(model: VideoModel) -> Self {
        Self {
            model,
            duration_secs: model.default_duration(),
            aspect_ratio: model.default_aspect(),
            resolution: None,
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
}

/// In-memory state of one creation flow, from prompt to committed node.
///
/// Sessions live only for the duration of the flow. They are never
/// persisted; an abandoned or failed session is simply dropped and the user
/// starts a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSession {
    pub id: Uuid,
    pub title: Option<String>,
    pub prompt: String,
    pub plot: String,
    pub character_ids: Vec<String>,
    pub image: ImagePlan,
    pub video: VideoSettings,
    pub mode: CreationMode,
    pub state: SessionState,
    pub last_error: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub node_id: Option<u64>,
    pub started_at: DateTime<Utc>,
}

impl GenerationSession {
    /// New idle session. The plot defaults to the prompt until
    /// [`GenerationSession::with_plot`] overrides it.
    pub fn new(prompt: impl Into<String>, model: VideoModel) -> Self {
        let prompt = prompt.into();
        Self {
            id: Uuid::new_v4(),
            title: None,
            plot: prompt.clone(),
            prompt,
            character_ids: Vec::new(),
            image: ImagePlan::Skip,
            video: VideoSettings::new(model),
            mode: CreationMode::Extend,
            state: SessionState::Idle,
            last_error: None,
            image_url: None,
            video_url: None,
            node_id: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// On-chain narrative text, when it differs from the media prompt.
    pub fn with_plot(mut self, plot: impl Into<String>) -> Self {
        self.plot = plot.into();
        self
    }

    pub fn with_characters(mut self, character_ids: Vec<String>) -> Self {
        self.character_ids = character_ids;
        self
    }

    pub fn with_image_plan(mut self, image: ImagePlan) -> Self {
        self.image = image;
        self
    }

    pub fn with_video(mut self, video: VideoSettings) -> Self {
        self.video = video;
        self
    }

    pub fn with_mode(mut self, mode: CreationMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Emitted on every state transition so UIs can render progress without
/// holding the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub state: SessionState,
    pub detail: Option<String>,
}
