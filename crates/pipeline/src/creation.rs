use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use chain::{ChainClient, NewNode, TxStatus};
use media_gen::{
    GenerationPoll, GenerationStatus, ImageBackend, ImageRequest, VideoBackend, VideoRequest,
};
use storage::{MediaStore, StoredMedia};
use story_graph::StoryGraph;
use wiki::{EventContext, WikiGenerator, WikiRequest};

use crate::{
    poll_until, CancelToken, DeadLetterLog, GenerationSession, ImagePlan, PipelineError,
    PollConfig, SessionEvent, SessionState, Stage,
};

/// How many ancestor plots ride along with a wiki request.
pub const WIKI_CONTEXT_DEPTH: usize = 5;

/// What a finished run produced. `video_url` is the URL actually written on
/// chain: the durable one when storage succeeded, the generation URL when
/// the run degraded through a storage failure.
#[derive(Debug)]
pub struct EventOutcome {
    pub node_id: u64,
    pub video_url: String,
    pub image_url: Option<String>,
    pub stored: Option<StoredMedia>,
    /// The detached wiki task. The pipeline never awaits it; tests can, to
    /// observe the background outcome deterministically.
    pub wiki_task: JoinHandle<()>,
}

/// Drives one creation session through image, video, storage, contract and
/// wiki stages. All five collaborators are injected, so any of them can be
/// swapped for a fake in tests or a different vendor in production.
pub struct EventPipeline {
    chain: Arc<dyn ChainClient>,
    image: Arc<dyn ImageBackend>,
    video: Arc<dyn VideoBackend>,
    store: Arc<dyn MediaStore>,
    wiki: Arc<dyn WikiGenerator>,
    generation_poll: PollConfig,
    tx_poll: PollConfig,
    events: Option<UnboundedSender<SessionEvent>>,
    dead_letters: Arc<DeadLetterLog>,
}

impl EventPipeline {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        image: Arc<dyn ImageBackend>,
        video: Arc<dyn VideoBackend>,
        store: Arc<dyn MediaStore>,
        wiki: Arc<dyn WikiGenerator>,
    ) -> Self {
        Self {
            chain,
            image,
            video,
            store,
            wiki,
            generation_poll: PollConfig::default(),
            tx_poll: PollConfig::default(),
            events: None,
            dead_letters: Arc::new(DeadLetterLog::new()),
        }
    }

    pub fn with_generation_poll(mut self, config: PollConfig) -> Self {
        self.generation_poll = config;
        self
    }

    pub fn with_tx_poll(mut self, config: PollConfig) -> Self {
        self.tx_poll = config;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn dead_letters(&self) -> Arc<DeadLetterLog> {
        self.dead_letters.clone()
    }

    /// Run the session to a committed node.
    ///
    /// Returns once the chain write is confirmed; wiki generation continues
    /// in the background and reports through events and the dead-letter
    /// log. Image, video and contract failures are fatal and leave the
    /// session in the matching `*Failed` state; storage failure degrades
    /// the run to the original generation URL and continues.
    pub async fn run(
        &self,
        session: &mut GenerationSession,
        cancel: &CancelToken,
    ) -> Result<EventOutcome, PipelineError> {
        info!(session = %session.id, model = %session.video.model, "creation run started");
        self.transition(session, SessionState::PromptReady, None);

        let image_url = match self.image_stage(session, cancel).await {
            Ok(url) => url,
            Err(err) => return self.fail(session, SessionState::ImageFailed, err),
        };

        let video_url = match self.video_stage(session, image_url.as_deref(), cancel).await {
            Ok(url) => url,
            Err(err) => return self.fail(session, SessionState::VideoFailed, err),
        };

        let stored = self.storage_stage(session, &video_url).await;
        let committed_url = stored
            .as_ref()
            .map(|s| s.url.clone())
            .unwrap_or_else(|| video_url.clone());

        let (node_id, context) = match self.contract_stage(session, &committed_url, cancel).await
        {
            Ok(confirmed) => confirmed,
            Err(err) => return self.fail(session, SessionState::ContractFailed, err),
        };

        let wiki_task = self.spawn_wiki(session, node_id, &committed_url, context);

        Ok(EventOutcome {
            node_id,
            video_url: committed_url,
            image_url,
            stored,
            wiki_task,
        })
    }

    /// Optional still-image stage. `Ok(None)` means the plan skipped it and
    /// the video model works from text alone.
    async fn image_stage(
        &self,
        session: &mut GenerationSession,
        cancel: &CancelToken,
    ) -> Result<Option<String>, PipelineError> {
        let request = match &session.image {
            ImagePlan::Skip => return Ok(None),
            ImagePlan::Generate => ImageRequest::new(&session.prompt),
            ImagePlan::Compose { reference_urls } => {
                ImageRequest::new(&session.prompt).with_references(reference_urls.clone())
            }
        };
        self.transition(session, SessionState::ImageGenerating, None);

        let request_id = self
            .image
            .submit(&request)
            .await
            .map_err(|e| PipelineError::upstream(Stage::Image, e.to_string()))?;

        let backend = self.image.clone();
        let url = poll_until(self.generation_poll, Stage::Image, cancel, move || {
            let backend = backend.clone();
            let request_id = request_id.clone();
            async move {
                let poll = backend
                    .poll(&request_id)
                    .await
                    .map_err(|e| PipelineError::upstream(Stage::Image, e.to_string()))?;
                generation_result(Stage::Image, poll)
            }
        })
        .await?;

        session.image_url = Some(url.clone());
        self.transition(session, SessionState::ImageReady, Some(url.clone()));
        Ok(Some(url))
    }

    async fn video_stage(
        &self,
        session: &mut GenerationSession,
        image_url: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String, PipelineError> {
        self.transition(session, SessionState::VideoGenerating, None);

        let mut request = VideoRequest::new(&session.prompt, session.video.model)
            .with_duration(session.video.duration_secs)
            .with_aspect(session.video.aspect_ratio);
        if let Some(resolution) = session.video.resolution {
            request = request.with_resolution(resolution);
        }
        if let Some(url) = image_url {
            request = request.with_reference_image(url);
        }

        let request_id = self
            .video
            .submit(&request)
            .await
            .map_err(|e| PipelineError::upstream(Stage::Video, e.to_string()))?;

        let backend = self.video.clone();
        let url = poll_until(self.generation_poll, Stage::Video, cancel, move || {
            let backend = backend.clone();
            let request_id = request_id.clone();
            async move {
                let poll = backend
                    .poll(&request_id)
                    .await
                    .map_err(|e| PipelineError::upstream(Stage::Video, e.to_string()))?;
                generation_result(Stage::Video, poll)
            }
        })
        .await?;

        session.video_url = Some(url.clone());
        self.transition(session, SessionState::VideoReady, Some(url.clone()));
        Ok(url)
    }

    /// Never fails the run: a broken store means the generation URL goes on
    /// chain instead and the failure is dead-lettered for a later sweep.
    async fn storage_stage(
        &self,
        session: &mut GenerationSession,
        video_url: &str,
    ) -> Option<StoredMedia> {
        self.transition(session, SessionState::StorageUploading, None);
        match self.store.store_from_url(video_url).await {
            Ok(stored) => {
                self.transition(session, SessionState::StorageReady, Some(stored.url.clone()));
                Some(stored)
            }
            Err(err) => {
                warn!(
                    session = %session.id,
                    error = %err,
                    "storage upload failed, continuing with generation url"
                );
                self.dead_letters
                    .record(session.id, Stage::Storage, err.to_string());
                self.transition(session, SessionState::StorageFailed, Some(err.to_string()));
                None
            }
        }
    }

    /// Commit the node and wait for confirmation. The id the contract will
    /// assign is `latest + 1` over the snapshot read here; reading and
    /// writing back-to-back keeps that arithmetic honest.
    async fn contract_stage(
        &self,
        session: &mut GenerationSession,
        link: &str,
        cancel: &CancelToken,
    ) -> Result<(u64, Vec<EventContext>), PipelineError> {
        self.transition(session, SessionState::ContractWriting, None);

        let snapshot = self
            .chain
            .read_timeline()
            .await
            .map_err(|e| PipelineError::Transaction(e.to_string()))?;
        let graph = StoryGraph::from_snapshot(&snapshot)?;
        let previous_id = session.mode.previous_id(&snapshot);
        let node_id = snapshot.latest_id() + 1;

        let node = NewNode {
            link: link.to_string(),
            plot: session.plot.clone(),
            previous_id,
        };
        let tx = self
            .chain
            .submit_node(&node)
            .await
            .map_err(|e| PipelineError::Transaction(e.to_string()))?;
        info!(tx = %tx, node_id, previous_id, "node write submitted");

        let chain = self.chain.clone();
        let status = poll_until(self.tx_poll, Stage::Contract, cancel, move || {
            let chain = chain.clone();
            let tx = tx.clone();
            async move {
                match chain
                    .transaction(&tx)
                    .await
                    .map_err(|e| PipelineError::Transaction(e.to_string()))?
                {
                    TxStatus::Pending => Ok(None),
                    status => Ok(Some(status)),
                }
            }
        })
        .await?;

        match status {
            TxStatus::Confirmed { block } => {
                session.node_id = Some(node_id);
                self.transition(
                    session,
                    SessionState::ContractConfirmed,
                    Some(format!("node {node_id} in block {block}")),
                );
                Ok((node_id, ancestor_context(&graph, previous_id, WIKI_CONTEXT_DEPTH)))
            }
            TxStatus::Reverted { reason } => Err(PipelineError::Transaction(reason)),
            TxStatus::Pending => Err(PipelineError::Timeout {
                stage: Stage::Contract,
            }),
        }
    }

    /// Fire-and-forget wiki generation. The run is already committed when
    /// this spawns; the task reports through events and the dead-letter log
    /// rather than the run's result.
    fn spawn_wiki(
        &self,
        session: &mut GenerationSession,
        node_id: u64,
        video_url: &str,
        previous_events: Vec<EventContext>,
    ) -> JoinHandle<()> {
        self.transition(session, SessionState::WikiGenerating, None);

        let request = WikiRequest {
            event_id: node_id,
            video_url: video_url.to_string(),
            title: session
                .title
                .clone()
                .unwrap_or_else(|| format!("Event {node_id}")),
            description: session.plot.clone(),
            character_ids: session.character_ids.clone(),
            previous_events,
        };
        let generator = self.wiki.clone();
        let dead_letters = self.dead_letters.clone();
        let events = self.events.clone();
        let session_id = session.id;

        tokio::spawn(async move {
            match generator.generate(&request).await {
                Ok(entry) => {
                    info!(event_id = entry.event_id, title = %entry.title, "wiki entry ready");
                    if let Some(tx) = &events {
                        let _ = tx.send(SessionEvent {
                            session_id,
                            state: SessionState::WikiReady,
                            detail: Some(entry.title),
                        });
                    }
                }
                Err(err) => {
                    dead_letters.record(session_id, Stage::Wiki, err.to_string());
                    if let Some(tx) = &events {
                        let _ = tx.send(SessionEvent {
                            session_id,
                            state: SessionState::WikiFailed,
                            detail: Some(err.to_string()),
                        });
                    }
                }
            }
        })
    }

    fn transition(
        &self,
        session: &mut GenerationSession,
        state: SessionState,
        detail: Option<String>,
    ) {
        session.state = state;
        info!(session = %session.id, state = ?state, "session state");
        if let Some(tx) = &self.events {
            let _ = tx.send(SessionEvent {
                session_id: session.id,
                state,
                detail,
            });
        }
    }

    fn fail<T>(
        &self,
        session: &mut GenerationSession,
        state: SessionState,
        err: PipelineError,
    ) -> Result<T, PipelineError> {
        // Cancellation is not a failure; the caller drops the session.
        if matches!(err, PipelineError::Cancelled { .. }) {
            return Err(err);
        }
        session.last_error = Some(err.to_string());
        self.transition(session, state, Some(err.to_string()));
        Err(err)
    }
}

/// Map a generation poll into the poll-loop contract: pending states keep
/// waiting, completion must carry a URL, failure carries the upstream text.
fn generation_result(
    stage: Stage,
    poll: GenerationPoll,
) -> Result<Option<String>, PipelineError> {
    match poll.status {
        GenerationStatus::Completed => match poll.url {
            Some(url) => Ok(Some(url)),
            None => Err(PipelineError::upstream(
                stage,
                "completed without an output url",
            )),
        },
        GenerationStatus::Failed => Err(PipelineError::upstream(stage, poll.failure_message())),
        GenerationStatus::Pending | GenerationStatus::InProgress => Ok(None),
    }
}

/// Plots of the committed ancestors of `id`, nearest first, bounded by
/// `limit` so a deep (or accidentally cyclic) chain cannot run away.
pub fn ancestor_context(graph: &StoryGraph, mut id: u64, limit: usize) -> Vec<EventContext> {
    let mut context = Vec::new();
    while id > 0 && context.len() < limit {
        match graph.node(id) {
            Some(node) => {
                context.push(EventContext {
                    id: node.id,
                    plot: node.plot.clone(),
                });
                id = node.previous_id;
            }
            None => break,
        }
    }
    context
}
