//! Cooperative pause/cancel checkpoints.
//!
//! A `Checkpoint` is threaded through every stage; stages probe it between
//! sub-units of work (per segment, per batch) and around external calls.
//! Pause parks the caller at the probe; cancel makes every probe and guard
//! fail with `Error::Cancelled`.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Control side of a pipeline: held by the scheduler.
pub struct PipelineControl {
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
}

impl PipelineControl {
    /// Create a control/checkpoint pair.
    pub fn new() -> (Self, Checkpoint) {
        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let checkpoint = Checkpoint {
            cancel: cancel.clone(),
            paused: pause_rx,
        };
        (Self { cancel, pause_tx }, checkpoint)
    }

    /// Request a pause; takes effect at the next checkpoint.
    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    /// Lift a pause.
    pub fn resume(&self) {
        let _ = self.pause_tx.send(false);
    }

    /// Request cancellation; in-flight guards abort promptly.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    /// Clone of the cancellation token, for grace-timeout supervision.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Stage-side suspension/cancellation probe.
#[derive(Clone)]
pub struct Checkpoint {
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
}

impl Checkpoint {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Observe pause/cancel requests.
    ///
    /// Returns immediately when neither is requested; parks while paused;
    /// fails with `Error::Cancelled` once cancellation is requested (also
    /// while parked, so a paused pipeline can still be cancelled).
    pub async fn pause_point(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut paused = self.paused.clone();
        loop {
            if !*paused.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                changed = paused.changed() => {
                    // Sender dropped means the pipeline is being torn down.
                    if changed.is_err() {
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    }

    /// Run a future, aborting it when cancellation is requested.
    pub async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    /// Cancellation-aware sleep, used between retry attempts.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
