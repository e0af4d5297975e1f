use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use chain::{ChainClient, ChainConfig, HttpChainClient};
use media_gen::{
    AspectRatio, HttpImageBackend, HttpVideoBackend, Resolution, ServiceConfig, VideoModel,
};
use pipeline::{
    ancestor_context, CancelHandle, CreationMode, EventPipeline, GenerationSession, ImagePlan,
    PollConfig, VideoSettings, WIKI_CONTEXT_DEPTH,
};
use storage::{BlobConfig, BlobStore, BucketConfig, BucketStore, MediaStore};
use story_graph::{assign_contract_ids, EventId, StoryGraph};
use wiki::{HttpWikiGenerator, WikiConfig, WikiGenerator, WikiRequest};

#[derive(Parser)]
#[command(name = "loar")]
#[command(about = "LOAR CLI - Headless story timeline and event creation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the committed timeline as a story graph
    Timeline {
        /// Contract gateway base URL
        #[arg(long)]
        gateway: String,

        /// Gateway API key
        #[arg(long)]
        api_key: Option<String>,

        /// Print the full graph as JSON
        #[arg(long)]
        json: bool,

        /// Unsubmitted branch event id (e.g. 4c) to mix into the contract
        /// id preview; repeatable
        #[arg(long = "local-branch")]
        local_branches: Vec<EventId>,
    },

    /// Show the previous and next events of one node
    Adjacency {
        /// Contract gateway base URL
        #[arg(long)]
        gateway: String,

        /// Gateway API key
        #[arg(long)]
        api_key: Option<String>,

        /// Contract node id
        #[arg(long)]
        node: u64,

        /// Print the neighbours as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new story event end to end
    Create(CreateArgs),

    /// Regenerate the wiki entry for a committed event
    Wiki {
        /// Contract gateway base URL
        #[arg(long)]
        gateway: String,

        /// Gateway API key
        #[arg(long)]
        api_key: Option<String>,

        /// Contract node id to regenerate the entry for
        #[arg(long)]
        node: u64,

        /// Override the entry title
        #[arg(long)]
        title: Option<String>,

        /// Character id to feature; repeatable
        #[arg(long = "character")]
        characters: Vec<String>,

        /// Wiki service base URL
        #[arg(long)]
        wiki_url: String,

        /// Wiki service API key
        #[arg(long)]
        wiki_key: Option<String>,

        /// Write the entry JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct CreateArgs {
    /// Prompt for video generation
    #[arg(long)]
    prompt: String,

    /// On-chain plot text (defaults to the prompt)
    #[arg(long)]
    plot: Option<String>,

    /// Display title for the wiki entry
    #[arg(long)]
    title: Option<String>,

    /// Character id to feature; repeatable
    #[arg(long = "character")]
    characters: Vec<String>,

    /// Video model (kling, pixverse, ray2, veo)
    #[arg(long, default_value = "kling")]
    model: VideoModel,

    /// Clip length in seconds (model default when unsupported)
    #[arg(long)]
    duration: Option<u32>,

    /// Aspect ratio (16:9, 9:16, 1:1)
    #[arg(long)]
    aspect: Option<AspectRatio>,

    /// Output resolution (540p, 720p, 1080p)
    #[arg(long)]
    resolution: Option<Resolution>,

    /// Generate a keyframe still before the video
    #[arg(long)]
    still: bool,

    /// Reference image URL to compose the keyframe from; repeatable
    #[arg(long = "reference")]
    references: Vec<String>,

    /// Branch from this event instead of extending the main line
    #[arg(long)]
    branch_from: Option<EventId>,

    /// Contract gateway base URL
    #[arg(long)]
    gateway: String,

    /// Gateway API key
    #[arg(long)]
    gateway_key: Option<String>,

    /// Media generation service base URL
    #[arg(long)]
    media_url: String,

    /// Media generation service API key
    #[arg(long)]
    media_key: Option<String>,

    /// Storage backend (bucket, blob)
    #[arg(long, default_value = "bucket")]
    store: String,

    /// Storage write endpoint
    #[arg(long)]
    store_url: String,

    /// Public base URL stored media is read back from
    #[arg(long)]
    store_public_url: String,

    /// Storage API key (bucket backend only)
    #[arg(long)]
    store_key: Option<String>,

    /// Wiki service base URL
    #[arg(long)]
    wiki_url: String,

    /// Wiki service API key
    #[arg(long)]
    wiki_key: Option<String>,

    /// Seconds between generation and transaction polls
    #[arg(long, default_value = "2")]
    poll_interval: u64,

    /// Poll attempts before a stage times out
    #[arg(long, default_value = "150")]
    poll_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Timeline {
            gateway,
            api_key,
            json,
            local_branches,
        } => timeline_command(gateway, api_key, json, local_branches).await,
        Commands::Adjacency {
            gateway,
            api_key,
            node,
            json,
        } => adjacency_command(gateway, api_key, node, json).await,
        Commands::Create(args) => create_command(args).await,
        Commands::Wiki {
            gateway,
            api_key,
            node,
            title,
            characters,
            wiki_url,
            wiki_key,
            output,
        } => {
            wiki_command(
                gateway, api_key, node, title, characters, wiki_url, wiki_key, output,
            )
            .await
        }
    }
}

async fn timeline_command(
    gateway: String,
    api_key: Option<String>,
    json: bool,
    local_branches: Vec<EventId>,
) -> Result<()> {
    let client = gateway_client(&gateway, api_key.as_deref())?;
    let snapshot = client.read_timeline().await?;
    let graph = StoryGraph::from_snapshot(&snapshot)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
        return Ok(());
    }

    println!(
        "Timeline: {} nodes, {} edges (latest id {})",
        graph.nodes.len(),
        graph.edges.len(),
        snapshot.latest_id()
    );
    for node in &graph.nodes {
        let lineage = if node.canon { "canon" } else { "branch" };
        println!(
            "  {:>4}  {:<6}  prev {:>4}  {}",
            node.id,
            lineage,
            node.previous_id,
            preview(&node.plot)
        );
    }

    if !local_branches.is_empty() {
        print_contract_id_preview(&graph, &local_branches);
    }

    Ok(())
}

/// Contract ids the whole set would receive if the local branches were
/// committed now. Only valid for this exact set: adding or removing an
/// event renumbers everything after it.
fn print_contract_id_preview(graph: &StoryGraph, local_branches: &[EventId]) {
    let mut event_ids: Vec<EventId> = graph.nodes.iter().map(|n| EventId::new(n.id, "")).collect();
    event_ids.extend(local_branches.iter().cloned());

    let assigned = assign_contract_ids(&event_ids);
    event_ids.sort();
    event_ids.dedup();

    println!("\nContract ids after committing local branches:");
    for id in &event_ids {
        if let Some(contract_id) = assigned.get(&id.to_string()) {
            let marker = if id.is_branch() { "  (local)" } else { "" };
            println!("  {:<6} -> {}{}", id.to_string(), contract_id, marker);
        }
    }
}

async fn adjacency_command(
    gateway: String,
    api_key: Option<String>,
    node_id: u64,
    json: bool,
) -> Result<()> {
    let client = gateway_client(&gateway, api_key.as_deref())?;
    let snapshot = client.read_timeline().await?;
    let graph = StoryGraph::from_snapshot(&snapshot)?;

    let node = graph
        .node(node_id)
        .ok_or_else(|| anyhow::anyhow!("node {} is not on the timeline", node_id))?;
    let adjacency = graph.adjacency(node_id);

    if json {
        let value = serde_json::json!({
            "node": node,
            "previous": adjacency.previous,
            "next": adjacency.next,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let lineage = if node.canon { "canon" } else { "branch" };
    println!("Node {} ({}): {}", node.id, lineage, preview(&node.plot));
    match adjacency.previous {
        Some(previous) => println!("  previous: {}  {}", previous.id, preview(&previous.plot)),
        None => println!("  previous: none"),
    }
    if adjacency.next.is_empty() {
        println!("  next: none");
    } else {
        for next in &adjacency.next {
            println!("  next: {}  {}", next.id, preview(&next.plot));
        }
    }

    Ok(())
}

async fn create_command(args: CreateArgs) -> Result<()> {
    let chain = Arc::new(gateway_client(&args.gateway, args.gateway_key.as_deref())?);

    let mut media_config = ServiceConfig::new(&args.media_url);
    if let Some(key) = &args.media_key {
        media_config = media_config.with_api_key(key);
    }
    let image = Arc::new(HttpImageBackend::new(media_config.clone())?);
    let video = Arc::new(HttpVideoBackend::new(media_config)?);

    let store = media_store(&args)?;

    let mut wiki_config = WikiConfig::new(&args.wiki_url);
    if let Some(key) = &args.wiki_key {
        wiki_config = wiki_config.with_api_key(key);
    }
    let wiki = Arc::new(HttpWikiGenerator::new(wiki_config)?);

    let mut video_settings = VideoSettings::new(args.model);
    if let Some(duration) = args.duration {
        video_settings = video_settings.with_duration(duration);
    }
    if let Some(aspect) = args.aspect {
        video_settings = video_settings.with_aspect(aspect);
    }
    if let Some(resolution) = args.resolution {
        video_settings = video_settings.with_resolution(resolution);
    }

    let image_plan = if !args.references.is_empty() {
        ImagePlan::Compose {
            reference_urls: args.references.clone(),
        }
    } else if args.still {
        ImagePlan::Generate
    } else {
        ImagePlan::Skip
    };

    let mode = match &args.branch_from {
        Some(source) => CreationMode::Branch {
            source: source.clone(),
        },
        None => CreationMode::Extend,
    };

    let mut session = GenerationSession::new(&args.prompt, args.model)
        .with_characters(args.characters.clone())
        .with_image_plan(image_plan)
        .with_video(video_settings)
        .with_mode(mode);
    if let Some(plot) = &args.plot {
        session = session.with_plot(plot);
    }
    if let Some(title) = &args.title {
        session = session.with_title(title);
    }

    let poll = PollConfig::new(Duration::from_secs(args.poll_interval), args.poll_attempts);
    let pipeline = EventPipeline::new(chain, image, video, store, wiki)
        .with_generation_poll(poll)
        .with_tx_poll(poll);

    let cancel = CancelHandle::new();
    let token = cancel.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling the run");
            cancel.cancel();
        }
    });

    info!(session = %session.id, "starting creation run");
    let outcome = pipeline.run(&mut session, &token).await?;

    // The wiki task is detached; without this wait, process exit would kill
    // it mid-request.
    let _ = outcome.wiki_task.await;

    println!("node id:    {}", outcome.node_id);
    println!("video url:  {}", outcome.video_url);
    if let Some(image_url) = &outcome.image_url {
        println!("image url:  {}", image_url);
    }
    match &outcome.stored {
        Some(stored) => println!("stored key: {}", stored.key),
        None => println!("stored key: none (kept the generation url)"),
    }

    for letter in pipeline.dead_letters().snapshot() {
        warn!(stage = %letter.stage, error = %letter.error, "stage was dead-lettered");
    }

    Ok(())
}

fn media_store(args: &CreateArgs) -> Result<Arc<dyn MediaStore>> {
    match args.store.as_str() {
        "bucket" => {
            let mut config = BucketConfig::new(&args.store_url, &args.store_public_url);
            if let Some(key) = &args.store_key {
                config = config.with_api_key(key);
            }
            Ok(Arc::new(BucketStore::new(config)?))
        }
        "blob" => {
            let config = BlobConfig::new(&args.store_url, &args.store_public_url);
            Ok(Arc::new(BlobStore::new(config)?))
        }
        other => Err(anyhow::anyhow!("unsupported storage backend: {}", other)),
    }
}

#[allow(clippy::too_many_arguments)]
async fn wiki_command(
    gateway: String,
    api_key: Option<String>,
    node_id: u64,
    title: Option<String>,
    characters: Vec<String>,
    wiki_url: String,
    wiki_key: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let client = gateway_client(&gateway, api_key.as_deref())?;
    let snapshot = client.read_timeline().await?;
    let graph = StoryGraph::from_snapshot(&snapshot)?;

    let node = graph
        .node(node_id)
        .ok_or_else(|| anyhow::anyhow!("node {} is not on the timeline", node_id))?;

    let mut config = WikiConfig::new(&wiki_url);
    if let Some(key) = &wiki_key {
        config = config.with_api_key(key);
    }
    let generator = HttpWikiGenerator::new(config)?;

    let request = WikiRequest {
        event_id: node.id,
        video_url: node.video_url.clone(),
        title: title.unwrap_or_else(|| format!("Event {}", node.id)),
        description: node.plot.clone(),
        character_ids: characters,
        previous_events: ancestor_context(&graph, node.previous_id, WIKI_CONTEXT_DEPTH),
    };

    info!(event_id = node.id, "regenerating wiki entry");
    let entry = generator.generate(&request).await?;
    info!(title = %entry.title, "wiki entry ready");

    let json = serde_json::to_string_pretty(&entry)?;
    if let Some(output_path) = output {
        std::fs::write(&output_path, json)?;
        info!("wiki entry written to: {:?}", output_path);
    } else {
        println!("{json}");
    }

    Ok(())
}

fn gateway_client(base_url: &str, api_key: Option<&str>) -> Result<HttpChainClient> {
    let mut config = ChainConfig::new(base_url);
    if let Some(key) = api_key {
        config = config.with_api_key(key);
    }
    Ok(HttpChainClient::new(config)?)
}

/// First line of a plot, clipped for list output.
fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= 60 {
        line.to_string()
    } else {
        let clipped: String = line.chars().take(60).collect();
        format!("{clipped}...")
    }
}
