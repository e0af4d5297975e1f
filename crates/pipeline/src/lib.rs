use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use story_graph::GraphError;

mod creation;
pub use creation::*;
mod dead_letter;
pub use dead_letter::*;
mod poller;
pub use poller::*;
mod session;
pub use session::*;

/// Pipeline stage names, used for error context and dead letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Image,
    Video,
    Storage,
    Contract,
    Wiki,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Image => "image generation",
            Stage::Video => "video generation",
            Stage::Storage => "storage upload",
            Stage::Contract => "contract write",
            Stage::Wiki => "wiki generation",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A generation service failed or rejected the request. `message`
    /// carries the upstream error text verbatim so the user sees what the
    /// service actually said.
    #[error("{stage} failed: {message}")]
    Upstream { stage: Stage, message: String },

    /// The chain write failed or reverted. Always fatal; the pipeline never
    /// resubmits a transaction on its own, the user must retry explicitly.
    #[error("chain write failed: {0}")]
    Transaction(String),

    #[error("{stage} timed out while polling")]
    Timeout { stage: Stage },

    #[error("{stage} cancelled")]
    Cancelled { stage: Stage },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl PipelineError {
    pub(crate) fn upstream(stage: Stage, message: impl Into<String>) -> Self {
        PipelineError::Upstream {
            stage,
            message: message.into(),
        }
    }
}
