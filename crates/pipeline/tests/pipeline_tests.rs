use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use chain::{ChainClient, ChainError, NewNode, TxHandle, TxStatus};
use media_gen::{
    GenerationPoll, GenerationStatus, ImageBackend, ImageRequest, MediaGenError, RequestId,
    VideoBackend, VideoModel, VideoRequest,
};
use pipeline::{
    CancelHandle, CreationMode, EventPipeline, GenerationSession, ImagePlan, PipelineError,
    PollConfig, SessionEvent, SessionState, Stage, VideoSettings,
};
use storage::{MediaStore, StorageError, StoredMedia};
use story_graph::TimelineSnapshot;
use wiki::{WikiEntry, WikiError, WikiGenerator, WikiRequest};

const GEN_VIDEO_URL: &str = "https://gen.example/video.mp4";
const GEN_IMAGE_URL: &str = "https://gen.example/image.png";
const DURABLE_URL: &str = "https://durable.example/stored-key.mp4";

fn poll_completed(url: &str) -> GenerationPoll {
    GenerationPoll {
        status: GenerationStatus::Completed,
        url: Some(url.to_string()),
        error: None,
    }
}

fn poll_failed(error: &str) -> GenerationPoll {
    GenerationPoll {
        status: GenerationStatus::Failed,
        url: None,
        error: Some(error.to_string()),
    }
}

fn poll_running() -> GenerationPoll {
    GenerationPoll {
        status: GenerationStatus::InProgress,
        url: None,
        error: None,
    }
}

/// Sentinel row plus a linear chain 1..=max_id.
fn linear_snapshot(max_id: u64) -> TimelineSnapshot {
    let mut snap = TimelineSnapshot::default();
    snap.push_node(0, "", "", 0, 0, false);
    for id in 1..=max_id {
        snap.push_node(
            id,
            format!("ipfs://video-{id}"),
            format!("plot {id}"),
            id - 1,
            0,
            true,
        );
    }
    snap
}

struct FakeChain {
    snapshot: TimelineSnapshot,
    submissions: Mutex<Vec<NewNode>>,
    tx_statuses: Mutex<VecDeque<TxStatus>>,
}

impl FakeChain {
    fn new(snapshot: TimelineSnapshot) -> Self {
        Self {
            snapshot,
            submissions: Mutex::new(Vec::new()),
            tx_statuses: Mutex::new(VecDeque::new()),
        }
    }

    /// Statuses handed out per poll, in order; once drained, the
    /// transaction confirms.
    fn with_tx_statuses(self, statuses: Vec<TxStatus>) -> Self {
        *self.tx_statuses.lock() = statuses.into();
        self
    }

    fn submissions(&self) -> Vec<NewNode> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn read_timeline(&self) -> Result<TimelineSnapshot, ChainError> {
        Ok(self.snapshot.clone())
    }

    async fn submit_node(&self, node: &NewNode) -> Result<TxHandle, ChainError> {
        let mut submissions = self.submissions.lock();
        submissions.push(node.clone());
        Ok(TxHandle(format!("0xtx{}", submissions.len())))
    }

    async fn transaction(&self, _tx: &TxHandle) -> Result<TxStatus, ChainError> {
        Ok(self
            .tx_statuses
            .lock()
            .pop_front()
            .unwrap_or(TxStatus::Confirmed { block: 7 }))
    }
}

struct FakeImage {
    queue: Mutex<VecDeque<GenerationPoll>>,
    fallback: GenerationPoll,
    submissions: Mutex<Vec<ImageRequest>>,
}

impl FakeImage {
    fn completed(url: &str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: poll_completed(url),
            submissions: Mutex::new(Vec::new()),
        }
    }

    fn failing(error: &str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: poll_failed(error),
            submissions: Mutex::new(Vec::new()),
        }
    }

    fn submissions(&self) -> Vec<ImageRequest> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl ImageBackend for FakeImage {
    async fn submit(&self, request: &ImageRequest) -> Result<RequestId, MediaGenError> {
        self.submissions.lock().push(request.clone());
        Ok(RequestId("img-req".to_string()))
    }

    async fn poll(&self, _id: &RequestId) -> Result<GenerationPoll, MediaGenError> {
        Ok(self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

struct FakeVideo {
    queue: Mutex<VecDeque<GenerationPoll>>,
    fallback: GenerationPoll,
    submissions: Mutex<Vec<VideoRequest>>,
}

impl FakeVideo {
    fn completed(url: &str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: poll_completed(url),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Takes `warmup` polls to come back in progress before completing.
    fn slow(url: &str, warmup: usize) -> Self {
        let fake = Self::completed(url);
        *fake.queue.lock() = (0..warmup).map(|_| poll_running()).collect();
        fake
    }

    fn never_done() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: poll_running(),
            submissions: Mutex::new(Vec::new()),
        }
    }

    fn submissions(&self) -> Vec<VideoRequest> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl VideoBackend for FakeVideo {
    async fn submit(&self, request: &VideoRequest) -> Result<RequestId, MediaGenError> {
        self.submissions.lock().push(request.clone());
        Ok(RequestId("vid-req".to_string()))
    }

    async fn poll(&self, _id: &RequestId) -> Result<GenerationPoll, MediaGenError> {
        Ok(self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

struct FakeStore {
    fail: bool,
    stored: Mutex<Vec<String>>,
}

impl FakeStore {
    fn working() -> Self {
        Self {
            fail: false,
            stored: Mutex::new(Vec::new()),
        }
    }

    fn broken() -> Self {
        Self {
            fail: true,
            stored: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MediaStore for FakeStore {
    async fn store_from_url(&self, source_url: &str) -> Result<StoredMedia, StorageError> {
        if self.fail {
            return Err(StorageError::Store {
                status: 503,
                body: "bucket unavailable".to_string(),
            });
        }
        self.stored.lock().push(source_url.to_string());
        Ok(StoredMedia {
            key: "stored-key.mp4".to_string(),
            url: DURABLE_URL.to_string(),
        })
    }
}

struct FakeWiki {
    fail: bool,
    requests: Mutex<Vec<WikiRequest>>,
}

impl FakeWiki {
    fn working() -> Self {
        Self {
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn broken() -> Self {
        Self {
            fail: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<WikiRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl WikiGenerator for FakeWiki {
    async fn generate(&self, request: &WikiRequest) -> Result<WikiEntry, WikiError> {
        self.requests.lock().push(request.clone());
        if self.fail {
            return Err(WikiError::Service {
                status: 500,
                body: "lore model overloaded".to_string(),
            });
        }
        Ok(WikiEntry {
            event_id: request.event_id,
            title: request.title.clone(),
            summary: format!("Summary of {}", request.title),
            plot: request.description.clone(),
            elements: Vec::new(),
            key_moments: Vec::new(),
            generated_at: chrono::Utc::now(),
        })
    }
}

struct Harness {
    chain: Arc<FakeChain>,
    image: Arc<FakeImage>,
    video: Arc<FakeVideo>,
    wiki: Arc<FakeWiki>,
    pipeline: EventPipeline,
    events: UnboundedReceiver<SessionEvent>,
}

fn harness(
    chain: FakeChain,
    image: FakeImage,
    video: FakeVideo,
    store: FakeStore,
    wiki: FakeWiki,
) -> Harness {
    let generation_poll = PollConfig::new(Duration::from_millis(1), 20);
    harness_with_poll(chain, image, video, store, wiki, generation_poll)
}

fn harness_with_poll(
    chain: FakeChain,
    image: FakeImage,
    video: FakeVideo,
    store: FakeStore,
    wiki: FakeWiki,
    generation_poll: PollConfig,
) -> Harness {
    let chain = Arc::new(chain);
    let image = Arc::new(image);
    let video = Arc::new(video);
    let wiki = Arc::new(wiki);
    let (tx, events) = unbounded_channel();

    let pipeline = EventPipeline::new(
        chain.clone(),
        image.clone(),
        video.clone(),
        Arc::new(store),
        wiki.clone(),
    )
    .with_generation_poll(generation_poll)
    .with_tx_poll(PollConfig::new(Duration::from_millis(1), 20))
    .with_events(tx);

    Harness {
        chain,
        image,
        video,
        wiki,
        pipeline,
        events,
    }
}

fn seen_states(events: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionState> {
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        states.push(event.state);
    }
    states
}

#[tokio::test]
async fn test_text_to_video_run_commits_next_node() {
    let mut h = harness(
        FakeChain::new(linear_snapshot(2)),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::slow(GEN_VIDEO_URL, 2),
        FakeStore::working(),
        FakeWiki::working(),
    );
    let cancel = CancelHandle::new();
    let mut session = GenerationSession::new("the gate opens", VideoModel::Kling);

    let outcome = h.pipeline.run(&mut session, &cancel.token()).await.unwrap();

    assert_eq!(outcome.node_id, 3);
    assert_eq!(outcome.video_url, DURABLE_URL);
    assert_eq!(outcome.image_url, None);
    assert_eq!(outcome.stored.as_ref().unwrap().key, "stored-key.mp4");

    // The committed link is the durable URL, the plot the session's text,
    // and the parent the highest id on chain.
    let submissions = h.chain.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].link, DURABLE_URL);
    assert_eq!(submissions[0].plot, "the gate opens");
    assert_eq!(submissions[0].previous_id, 2);

    // No image stage was planned, so the image service never saw a request.
    assert!(h.image.submissions().is_empty());

    outcome.wiki_task.await.unwrap();
    let states = seen_states(&mut h.events);
    assert_eq!(
        states,
        vec![
            SessionState::PromptReady,
            SessionState::VideoGenerating,
            SessionState::VideoReady,
            SessionState::StorageUploading,
            SessionState::StorageReady,
            SessionState::ContractWriting,
            SessionState::ContractConfirmed,
            SessionState::WikiGenerating,
            SessionState::WikiReady,
        ]
    );
    assert!(h.pipeline.dead_letters().is_empty());
}

#[tokio::test]
async fn test_storage_failure_degrades_but_still_commits() {
    let mut h = harness(
        FakeChain::new(linear_snapshot(2)),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::completed(GEN_VIDEO_URL),
        FakeStore::broken(),
        FakeWiki::working(),
    );
    let cancel = CancelHandle::new();
    let mut session = GenerationSession::new("the gate opens", VideoModel::Kling);

    let outcome = h.pipeline.run(&mut session, &cancel.token()).await.unwrap();

    // The run survives with the generation URL on chain.
    assert_eq!(outcome.node_id, 3);
    assert!(outcome.stored.is_none());
    assert_eq!(outcome.video_url, GEN_VIDEO_URL);
    assert_eq!(h.chain.submissions()[0].link, GEN_VIDEO_URL);

    let letters = h.pipeline.dead_letters().snapshot();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].stage, Stage::Storage);
    assert_eq!(letters[0].session_id, session.id);

    outcome.wiki_task.await.unwrap();
    let states = seen_states(&mut h.events);
    assert!(states.contains(&SessionState::StorageFailed));
    assert!(states.contains(&SessionState::ContractConfirmed));
}

#[tokio::test]
async fn test_image_failure_is_terminal_with_upstream_text() {
    let mut h = harness(
        FakeChain::new(linear_snapshot(2)),
        FakeImage::failing("NSFW content detected"),
        FakeVideo::completed(GEN_VIDEO_URL),
        FakeStore::working(),
        FakeWiki::working(),
    );
    let cancel = CancelHandle::new();
    let mut session = GenerationSession::new("the gate opens", VideoModel::Kling)
        .with_image_plan(ImagePlan::Generate);

    let err = h
        .pipeline
        .run(&mut session, &cancel.token())
        .await
        .unwrap_err();

    match err {
        PipelineError::Upstream { stage, message } => {
            assert_eq!(stage, Stage::Image);
            assert_eq!(message, "NSFW content detected");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.state, SessionState::ImageFailed);
    assert_eq!(
        session.last_error.as_deref(),
        Some("image generation failed: NSFW content detected")
    );

    // Nothing downstream ran.
    assert!(h.video.submissions().is_empty());
    assert!(h.chain.submissions().is_empty());
    assert!(h.wiki.requests().is_empty());

    let states = seen_states(&mut h.events);
    assert_eq!(states.last(), Some(&SessionState::ImageFailed));
}

#[tokio::test]
async fn test_contract_revert_is_fatal_and_never_resubmitted() {
    let mut h = harness(
        FakeChain::new(linear_snapshot(2)).with_tx_statuses(vec![
            TxStatus::Pending,
            TxStatus::Reverted {
                reason: "previous id unknown".to_string(),
            },
        ]),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::completed(GEN_VIDEO_URL),
        FakeStore::working(),
        FakeWiki::working(),
    );
    let cancel = CancelHandle::new();
    let mut session = GenerationSession::new("the gate opens", VideoModel::Kling);

    let err = h
        .pipeline
        .run(&mut session, &cancel.token())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transaction(ref reason) if reason == "previous id unknown"));
    assert_eq!(session.state, SessionState::ContractFailed);
    // Exactly one submission: a reverted write is the user's call to retry.
    assert_eq!(h.chain.submissions().len(), 1);
    assert!(h.wiki.requests().is_empty());

    let states = seen_states(&mut h.events);
    assert_eq!(states.last(), Some(&SessionState::ContractFailed));
}

#[tokio::test]
async fn test_branch_creation_strips_suffix_for_parent() {
    let h = harness(
        FakeChain::new(linear_snapshot(5)),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::completed(GEN_VIDEO_URL),
        FakeStore::working(),
        FakeWiki::working(),
    );
    let cancel = CancelHandle::new();
    let mut session = GenerationSession::new("a different path", VideoModel::Veo)
        .with_mode(CreationMode::Branch {
            source: "4c".parse().unwrap(),
        });

    let outcome = h.pipeline.run(&mut session, &cancel.token()).await.unwrap();

    assert_eq!(outcome.node_id, 6);
    assert_eq!(h.chain.submissions()[0].previous_id, 4);
    outcome.wiki_task.await.unwrap();
}

#[tokio::test]
async fn test_compose_image_feeds_video_reference() {
    let h = harness(
        FakeChain::new(linear_snapshot(2)),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::completed(GEN_VIDEO_URL),
        FakeStore::working(),
        FakeWiki::working(),
    );
    let cancel = CancelHandle::new();
    let references = vec![
        "https://cdn.example/captain.png".to_string(),
        "https://cdn.example/navigator.png".to_string(),
    ];
    let mut session = GenerationSession::new("the crew regroups", VideoModel::Pixverse)
        .with_image_plan(ImagePlan::Compose {
            reference_urls: references.clone(),
        });

    let outcome = h.pipeline.run(&mut session, &cancel.token()).await.unwrap();

    assert_eq!(outcome.image_url.as_deref(), Some(GEN_IMAGE_URL));
    assert_eq!(h.image.submissions()[0].reference_image_urls, references);
    assert_eq!(
        h.video.submissions()[0].reference_image_url.as_deref(),
        Some(GEN_IMAGE_URL)
    );
    outcome.wiki_task.await.unwrap();
}

#[tokio::test]
async fn test_wiki_failure_dead_letters_without_failing_run() {
    let mut h = harness(
        FakeChain::new(linear_snapshot(2)),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::completed(GEN_VIDEO_URL),
        FakeStore::working(),
        FakeWiki::broken(),
    );
    let cancel = CancelHandle::new();
    let mut session = GenerationSession::new("the gate opens", VideoModel::Kling);

    let outcome = h.pipeline.run(&mut session, &cancel.token()).await.unwrap();
    assert_eq!(outcome.node_id, 3);

    outcome.wiki_task.await.unwrap();
    let letters = h.pipeline.dead_letters().snapshot();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].stage, Stage::Wiki);
    assert!(letters[0].error.contains("lore model overloaded"));

    let states = seen_states(&mut h.events);
    assert_eq!(states.last(), Some(&SessionState::WikiFailed));
}

#[tokio::test]
async fn test_wiki_request_carries_ancestor_context() {
    let h = harness(
        FakeChain::new(linear_snapshot(3)),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::completed(GEN_VIDEO_URL),
        FakeStore::working(),
        FakeWiki::working(),
    );
    let cancel = CancelHandle::new();
    let mut session = GenerationSession::new("the gate opens", VideoModel::Kling)
        .with_plot("The gate answers at last.")
        .with_characters(vec!["captain".to_string()]);

    let outcome = h.pipeline.run(&mut session, &cancel.token()).await.unwrap();
    outcome.wiki_task.await.unwrap();

    let requests = h.wiki.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.event_id, 4);
    assert_eq!(request.video_url, DURABLE_URL);
    assert_eq!(request.title, "Event 4");
    assert_eq!(request.description, "The gate answers at last.");
    assert_eq!(request.character_ids, vec!["captain".to_string()]);

    let context_ids: Vec<u64> = request.previous_events.iter().map(|c| c.id).collect();
    assert_eq!(context_ids, vec![3, 2, 1]);
    assert_eq!(request.previous_events[0].plot, "plot 3");
}

#[tokio::test]
async fn test_video_timeout_is_terminal() {
    let h = harness(
        FakeChain::new(linear_snapshot(2)),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::never_done(),
        FakeStore::working(),
        FakeWiki::working(),
    );
    let cancel = CancelHandle::new();
    let mut session = GenerationSession::new("the gate opens", VideoModel::Ray2);

    let err = h
        .pipeline
        .run(&mut session, &cancel.token())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Timeout { stage: Stage::Video }));
    assert_eq!(session.state, SessionState::VideoFailed);
    assert!(h.chain.submissions().is_empty());
}

#[tokio::test]
async fn test_cancel_aborts_without_marking_failure() {
    // Long interval: only cancellation can end this run promptly.
    let h = harness_with_poll(
        FakeChain::new(linear_snapshot(2)),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::never_done(),
        FakeStore::working(),
        FakeWiki::working(),
        PollConfig::new(Duration::from_secs(3600), 1000),
    );
    let cancel = CancelHandle::new();
    let token = cancel.token();
    let mut session = GenerationSession::new("the gate opens", VideoModel::Kling);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = h.pipeline.run(&mut session, &token).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Cancelled { stage: Stage::Video }
    ));
    // Cancellation leaves the in-flight state; the session is dropped, not
    // marked failed.
    assert_eq!(session.state, SessionState::VideoGenerating);
    assert!(session.last_error.is_none());
    assert!(h.chain.submissions().is_empty());
}

#[tokio::test]
async fn test_unsupported_duration_reaches_vendor_as_default() {
    let h = harness(
        FakeChain::new(linear_snapshot(2)),
        FakeImage::completed(GEN_IMAGE_URL),
        FakeVideo::completed(GEN_VIDEO_URL),
        FakeStore::working(),
        FakeWiki::working(),
    );
    let cancel = CancelHandle::new();
    let mut session = GenerationSession::new("the gate opens", VideoModel::Kling)
        .with_video(VideoSettings::new(VideoModel::Kling).with_duration(7));

    let outcome = h.pipeline.run(&mut session, &cancel.token()).await.unwrap();

    // The request records what was asked; the vendor payload resolves the
    // unsupported 7s to Kling's 5s default at submit time.
    let request = &h.video.submissions()[0];
    assert_eq!(request.duration_secs, 7);
    assert_eq!(request.model.resolve_duration(request.duration_secs), 5);
    outcome.wiki_task.await.unwrap();
}
