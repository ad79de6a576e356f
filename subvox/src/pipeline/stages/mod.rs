//! Stage executors.
//!
//! One executor per pipeline stage, each wrapping an external capability
//! with retry and cancellation. Executors never touch `Task` fields
//! directly: every mutation goes through the registry via `StageContext`,
//! and the matching event is published after the registry write so
//! subscribers re-fetching state always see at least what the event
//! described.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::EngineConfig;
use crate::domain::{RetryPolicy, TaskStage};
use crate::pipeline::Checkpoint;
use crate::progress::{ProgressBus, TaskEvent};
use crate::registry::TaskRegistry;
use crate::{Error, Result};

mod extract;
mod synthesize;
mod transcribe;
mod translate;
mod vad;

pub(crate) use extract::ExtractStage;
pub(crate) use synthesize::SynthesizeStage;
pub(crate) use transcribe::TranscribeStage;
pub(crate) use translate::TranslateStage;
pub(crate) use vad::VadStage;

/// Everything a stage needs to report progress and persist deltas.
pub(crate) struct StageContext<'a> {
    pub task_id: &'a str,
    pub registry: &'a TaskRegistry,
    pub bus: &'a ProgressBus,
    pub config: &'a EngineConfig,
    pub checkpoint: &'a Checkpoint,
    pub network_permits: &'a Arc<Semaphore>,
}

impl StageContext<'_> {
    /// Enter a pipeline stage: persist it, then announce it.
    pub fn enter_stage(&self, stage: TaskStage, detail: &str) -> Result<()> {
        let task = self.registry.set_stage(self.task_id, stage, detail)?;
        self.bus.publish(self.task_id, TaskEvent::StageChanged { stage });
        self.bus.publish(
            self.task_id,
            TaskEvent::Progress {
                progress: task.progress,
                stage,
                detail: detail.to_string(),
            },
        );
        Ok(())
    }

    /// Advance progress within the current stage: persist, then announce.
    pub fn set_progress(&self, progress: f32, detail: &str) -> Result<()> {
        let task = self.registry.set_progress(self.task_id, progress, detail)?;
        self.bus.publish(
            self.task_id,
            TaskEvent::Progress {
                progress: task.progress,
                stage: task.stage,
                detail: detail.to_string(),
            },
        );
        Ok(())
    }

    pub fn publish(&self, event: TaskEvent) {
        self.bus.publish(self.task_id, event);
    }
}

/// Wrap a provider call with a per-call timeout.
pub(crate) async fn with_timeout<T>(
    stage: &'static str,
    timeout_secs: u64,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    if timeout_secs == 0 {
        return fut.await;
    }
    match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout {
            stage,
            elapsed_ms: timeout_secs * 1000,
        }),
    }
}

/// Retry transient provider errors with exponential backoff.
///
/// Only `ProviderTransient` is retried under the policy; a `Timeout` is
/// retried once and then propagates as fatal. Every other error propagates
/// immediately. The checkpoint is observed before each attempt and during
/// backoff sleeps.
pub(crate) async fn with_retry<T, F, Fut>(
    stage: &'static str,
    policy: &RetryPolicy,
    checkpoint: &Checkpoint,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut timeout_retried = false;
    loop {
        checkpoint.pause_point().await?;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let retryable = match &err {
            Error::ProviderTransient(_) => policy.should_retry(attempt),
            Error::Timeout { .. } => !timeout_retried && policy.should_retry(attempt),
            _ => false,
        };
        if !retryable {
            return Err(err);
        }
        if matches!(err, Error::Timeout { .. }) {
            timeout_retried = true;
        }

        let delay = policy.delay_for_attempt(attempt);
        attempt += 1;
        warn!(
            stage,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient stage error, retrying"
        );
        checkpoint.sleep(delay).await?;
    }
}

/// Record the first failure, preferring a real error over `Cancelled`.
pub(crate) fn note_failure(slot: &mut Option<Error>, err: Error) {
    match slot {
        None => *slot = Some(err),
        Some(Error::Cancelled) if !matches!(err, Error::Cancelled) => *slot = Some(err),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineControl;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 20,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_after_two_transient_errors() {
        let (_control, checkpoint) = PipelineControl::new();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result = with_retry("transcribe", &fast_policy(), &checkpoint, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::ProviderTransient(format!("try {n}")))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Backoff slept ~20ms then ~40ms.
        assert!(started.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let (_control, checkpoint) = PipelineControl::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry("transcribe", &fast_policy(), &checkpoint, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ProviderTransient("always".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::ProviderTransient(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let (_control, checkpoint) = PipelineControl::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry("transcribe", &fast_policy(), &checkpoint, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ProviderFatal("bad key".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::ProviderFatal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_retried_once_then_fatal() {
        let (_control, checkpoint) = PipelineControl::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry("transcribe", &fast_policy(), &checkpoint, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::Timeout {
                    stage: "transcribe",
                    elapsed_ms: 10,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let (control, checkpoint) = PipelineControl::new();
        let slow_policy = RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 60_000,
            ..RetryPolicy::default()
        };

        let handle = tokio::spawn(async move {
            with_retry("transcribe", &slow_policy, &checkpoint, || async {
                Err::<(), _>(Error::ProviderTransient("x".into()))
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        control.cancel();

        assert!(matches!(handle.await.unwrap(), Err(Error::Cancelled)));
    }
}
