use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use crate::{GraphError, TimelineSnapshot};

/// Nodes are laid out on a fixed grid keyed by contract id, so the same
/// timeline always renders in the same place.
pub const GRID_COLUMNS: u64 = 3;
pub const GRID_X_STEP: f32 = 300.0;
pub const GRID_Y_STEP: f32 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphPosition {
    pub x: f32,
    pub y: f32,
}

impl GraphPosition {
    /// Deterministic grid slot for a node id. Positions are derived, never
    /// stored, so rebuilding a graph never moves a node.
    pub fn for_id(id: u64) -> Self {
        Self {
            x: (id % GRID_COLUMNS) as f32 * GRID_X_STEP,
            y: (id / GRID_COLUMNS) as f32 * GRID_Y_STEP,
        }
    }
}

/// Renderer key for a node id.
pub fn node_key(id: u64) -> String {
    format!("node-{id}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryNode {
    pub key: String,
    pub id: u64,
    pub video_url: String,
    pub plot: String,
    pub previous_id: u64,
    pub canon: bool,
    pub position: GraphPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryEdge {
    pub key: String,
    pub from: String,
    pub to: String,
    pub canon: bool,
}

impl StoryEdge {
    pub fn stroke_width(&self) -> f32 {
        if self.canon {
            2.5
        } else {
            1.5
        }
    }

    pub fn stroke_color(&self) -> &'static str {
        if self.canon {
            "#f59e0b"
        } else {
            "#94a3b8"
        }
    }
}

/// Previous/next neighbours of one node, borrowed from the graph.
#[derive(Debug, Default)]
pub struct Adjacency<'a> {
    pub previous: Option<&'a StoryNode>,
    pub next: Vec<&'a StoryNode>,
}

/// Reconciled render model: one node per committed event, one edge per
/// parent link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryGraph {
    pub nodes: Vec<StoryNode>,
    pub edges: Vec<StoryEdge>,
}

impl StoryGraph {
    /// Build the graph from the contract's parallel arrays.
    ///
    /// Sentinel rows (`id == 0`) are skipped. Every surviving row becomes
    /// exactly one node; rows whose `previous_id` is non-zero also produce
    /// the edge from their parent. A `previous_id` that names no node in the
    /// snapshot still produces its edge; renderers drop edges with missing
    /// endpoints, and the next snapshot usually fills the gap.
    pub fn from_snapshot(snapshot: &TimelineSnapshot) -> Result<Self, GraphError> {
        snapshot.validate()?;

        let mut nodes = Vec::with_capacity(snapshot.ids.len());
        let mut edges = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();

        for (idx, &id) in snapshot.ids.iter().enumerate() {
            if id == 0 {
                continue;
            }
            if !seen.insert(id) {
                warn!(id, "duplicate node id in timeline arrays, keeping first");
                continue;
            }
            let previous_id = snapshot.previous_ids[idx];
            let canon = snapshot.canon_flags[idx];
            if previous_id > 0 {
                edges.push(StoryEdge {
                    key: format!("edge-{previous_id}-{id}"),
                    from: node_key(previous_id),
                    to: node_key(id),
                    canon,
                });
            }
            nodes.push(StoryNode {
                key: node_key(id),
                id,
                video_url: snapshot.links[idx].clone(),
                plot: snapshot.plots[idx].clone(),
                previous_id,
                canon,
                position: GraphPosition::for_id(id),
            });
        }

        Ok(Self { nodes, edges })
    }

    pub fn node(&self, id: u64) -> Option<&StoryNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Parent and children of `id`. The parent is `None` for root nodes
    /// (`previous_id == 0`) and for parents missing from the snapshot;
    /// children keep snapshot order.
    pub fn adjacency(&self, id: u64) -> Adjacency<'_> {
        if id == 0 {
            return Adjacency::default();
        }
        let previous = self
            .node(id)
            .filter(|n| n.previous_id > 0)
            .and_then(|n| self.node(n.previous_id));
        let next = self.nodes.iter().filter(|n| n.previous_id == id).collect();
        Adjacency { previous, next }
    }
}
