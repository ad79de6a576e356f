//! Translation stage.
//!
//! Batches untranslated entries and dispatches up to N batches
//! concurrently; permits for the network-bound work come from both the
//! per-task worker bound and the engine-wide network semaphore, so one
//! task's batch parallelism cannot starve its siblings. Batch arrival
//! order is not dispatch order; results merge by entry id.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::progress::TaskEvent;
use crate::providers::TranslationProvider;
use crate::{Error, Result};

use super::{StageContext, note_failure, with_retry, with_timeout};

type BatchResult = Result<Vec<(u64, String)>>;

/// Translates recognized subtitles in concurrent batches.
pub(crate) struct TranslateStage {
    translation: Arc<dyn TranslationProvider>,
}

impl TranslateStage {
    pub fn new(translation: Arc<dyn TranslationProvider>) -> Self {
        Self { translation }
    }

    pub async fn execute(&self, ctx: &StageContext<'_>, target_lang: &str) -> Result<()> {
        let task = ctx.registry.get(ctx.task_id)?;
        if task.subtitles.is_empty() {
            return Err(Error::invalid_input("no subtitles to translate"));
        }

        let total = task.subtitles.len();
        // Entries translated before a pause keep their original_text; only
        // the rest is dispatched, so resume never re-translates a batch.
        let pending: Vec<(u64, String)> = task
            .subtitles
            .iter()
            .filter(|e| e.original_text.is_none())
            .map(|e| (e.id, e.text.clone()))
            .collect();
        let mut completed = total - pending.len();
        if pending.is_empty() {
            return Ok(());
        }

        let batch_size = ctx.config.translation_batch_size.max(1);
        let batches: Vec<Vec<(u64, String)>> =
            pending.chunks(batch_size).map(|c| c.to_vec()).collect();
        debug!(
            task_id = ctx.task_id,
            batches = batches.len(),
            batch_size,
            "dispatching translation batches"
        );

        let workers = Arc::new(Semaphore::new(ctx.config.translation_max_workers.max(1)));
        let mut join_set: JoinSet<BatchResult> = JoinSet::new();
        let mut failure: Option<Error> = None;

        for batch in batches {
            if let Err(err) = ctx.checkpoint.pause_point().await {
                note_failure(&mut failure, err);
                break;
            }
            let worker_permit = match workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    note_failure(&mut failure, Error::Cancelled);
                    break;
                }
            };
            let network_permit = match ctx.network_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    note_failure(&mut failure, Error::Cancelled);
                    break;
                }
            };

            let translation = self.translation.clone();
            let checkpoint = ctx.checkpoint.clone();
            let policy = ctx.config.retry.clone();
            let timeout_secs = ctx.config.stage_timeout_secs;
            let target = target_lang.to_string();
            join_set.spawn(async move {
                let _permits = (worker_permit, network_permit);
                let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();

                let translated = with_retry("translate", &policy, &checkpoint, || {
                    let translation = translation.clone();
                    let checkpoint = checkpoint.clone();
                    let texts = texts.clone();
                    let target = target.clone();
                    async move {
                        checkpoint
                            .guard(with_timeout(
                                "translate",
                                timeout_secs,
                                translation.translate_batch(&texts, &target),
                            ))
                            .await
                    }
                })
                .await?;

                if translated.len() != batch.len() {
                    return Err(Error::ProviderFatal(format!(
                        "translation returned {} texts for a batch of {}",
                        translated.len(),
                        batch.len()
                    )));
                }
                Ok(batch
                    .into_iter()
                    .zip(translated)
                    .map(|((id, _), text)| (id, text))
                    .collect())
            });

            while let Some(joined) = join_set.try_join_next() {
                self.collect(ctx, joined, total, &mut completed, &mut failure)
                    .await;
            }
            if failure.is_some() {
                break;
            }
        }

        while let Some(joined) = join_set.join_next().await {
            self.collect(ctx, joined, total, &mut completed, &mut failure)
                .await;
        }

        if let Some(err) = failure {
            if ctx.checkpoint.is_cancelled() {
                return Err(Error::Cancelled);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Apply one completed batch. Results landing while paused are applied
    /// on resume; a batch that completed despite a cancel is still
    /// persisted (completed sub-work is preserved) but not announced.
    async fn collect(
        &self,
        ctx: &StageContext<'_>,
        joined: std::result::Result<BatchResult, tokio::task::JoinError>,
        total: usize,
        completed: &mut usize,
        failure: &mut Option<Error>,
    ) {
        let pairs = match joined {
            Ok(Ok(pairs)) => pairs,
            Ok(Err(err)) => {
                note_failure(failure, err);
                return;
            }
            Err(join_err) if join_err.is_cancelled() => {
                note_failure(failure, Error::Cancelled);
                return;
            }
            Err(join_err) => {
                note_failure(failure, Error::Other(join_err.to_string()));
                return;
            }
        };

        let announce = match ctx.checkpoint.pause_point().await {
            Ok(()) => true,
            Err(err) => {
                note_failure(failure, err);
                false
            }
        };

        if let Err(err) = ctx.registry.apply_translations(ctx.task_id, &pairs) {
            note_failure(failure, err);
            return;
        }
        *completed += pairs.len();

        if announce {
            ctx.publish(TaskEvent::TranslationProgress {
                completed: *completed,
                total,
            });
            let progress = 70.0 + 20.0 * (*completed as f32 / total as f32);
            if let Err(err) = ctx.set_progress(
                progress,
                &format!("Translating subtitles {completed}/{total}"),
            ) {
                note_failure(failure, err);
            }
        }
    }
}
