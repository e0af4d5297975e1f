use serde::{Deserialize, Serialize};
use thiserror::Error;

mod event_id;
pub use event_id::*;
mod graph;
pub use graph::*;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("array length mismatch: {field} has {got} entries, ids has {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid event id: {0:?}")]
    InvalidEventId(String),
}

/// Raw per-node arrays exactly as the story contract returns them.
///
/// All six arrays are index-aligned: entry `i` of every array describes the
/// same node. Index 0 is conventionally a sentinel row with `id == 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSnapshot {
    pub ids: Vec<u64>,
    pub links: Vec<String>,
    pub plots: Vec<String>,
    pub previous_ids: Vec<u64>,
    pub next_ids: Vec<u64>,
    pub canon_flags: Vec<bool>,
}

impl TimelineSnapshot {
    /// Check that every array matches `ids` in length.
    pub fn validate(&self) -> Result<(), GraphError> {
        let expected = self.ids.len();
        let check = |field: &'static str, got: usize| {
            if got == expected {
                Ok(())
            } else {
                Err(GraphError::LengthMismatch {
                    field,
                    expected,
                    got,
                })
            }
        };
        check("links", self.links.len())?;
        check("plots", self.plots.len())?;
        check("previousIds", self.previous_ids.len())?;
        check("nextIds", self.next_ids.len())?;
        check("canonFlags", self.canon_flags.len())?;
        Ok(())
    }

    /// Highest node id on the timeline, 0 when only sentinels exist.
    pub fn latest_id(&self) -> u64 {
        self.ids.iter().copied().max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append one node row across all six arrays.
    pub fn push_node(
        &mut self,
        id: u64,
        link: impl Into<String>,
        plot: impl Into<String>,
        previous_id: u64,
        next_id: u64,
        canon: bool,
    ) {
        self.ids.push(id);
        self.links.push(link.into());
        self.plots.push(plot.into());
        self.previous_ids.push(previous_id);
        self.next_ids.push(next_id);
        self.canon_flags.push(canon);
    }
}
