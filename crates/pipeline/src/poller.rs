use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

use crate::{PipelineError, Stage};

/// Fixed-interval polling budget. Every remote wait in the pipeline is
/// bounded: when the attempts run out the stage fails with a timeout
/// instead of spinning forever against a stuck service.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        // Five minutes of cover for the slower video models.
        Self::new(Duration::from_secs(2), 150)
    }
}

/// Cancellation signal for in-flight polls. Clone tokens off the handle and
/// hand them to whatever is waiting; `cancel()` stops all of them at their
/// next check, including mid-sleep.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle cancels. Pends forever if the handle was
    /// dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Drive `probe` at a fixed interval until it yields a value.
///
/// The probe returns `Ok(None)` to keep waiting and `Ok(Some(v))` to finish;
/// its errors end the loop immediately. Exhausting `max_attempts` yields
/// [`PipelineError::Timeout`], a cancelled token [`PipelineError::Cancelled`].
pub async fn poll_until<T, F, Fut>(
    config: PollConfig,
    stage: Stage,
    token: &CancelToken,
    mut probe: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, PipelineError>>,
{
    let mut token = token.clone();
    for attempt in 1..=config.max_attempts {
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled { stage });
        }
        if let Some(value) = probe().await? {
            return Ok(value);
        }
        if attempt < config.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(config.interval) => {}
                _ = token.cancelled() => return Err(PipelineError::Cancelled { stage }),
            }
        }
    }
    Err(PipelineError::Timeout { stage })
}
