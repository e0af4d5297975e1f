use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::Stage;

/// One non-fatal side effect that failed while its run continued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub session_id: Uuid,
    pub stage: Stage,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Record of storage and wiki failures the pipeline degraded through.
///
/// Nothing in-process retries these; the log exists so an operator (or a
/// later sweep) can see exactly what needs re-running instead of the
/// failure vanishing into a log line.
#[derive(Default)]
pub struct DeadLetterLog {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, session_id: Uuid, stage: Stage, error: impl Into<String>) {
        let letter = DeadLetter {
            session_id,
            stage,
            error: error.into(),
            at: Utc::now(),
        };
        warn!(
            session = %letter.session_id,
            stage = %letter.stage,
            error = %letter.error,
            "non-fatal failure dead-lettered"
        );
        self.entries.lock().push(letter);
    }

    /// Copy of the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.entries.lock().clone()
    }

    /// Take all entries, leaving the log empty. Callers own any retries.
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
