//! Transcription stage.
//!
//! Dispatches recognition per VAD segment with a bounded worker pool and
//! merges results as they arrive. Completion order is not start-time order;
//! the registry merge sorts by start time and dedups on entry id, so each
//! `subtitle_added` event reaches the UI as soon as its segment finishes.

use std::collections::HashSet;
use std::sync::Arc;

use subtitle_format::{ShapeOptions, SubtitleEntry, shape_entries};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::lang::mismatch_score;
use crate::providers::{AudioHandle, MediaTool, RecognitionProvider, SpeechSegment, Transcription};
use crate::progress::TaskEvent;
use crate::{Error, Result};

use super::{StageContext, note_failure, with_retry, with_timeout};

type SegmentResult = Result<(usize, SpeechSegment, Transcription)>;

/// Recognizes speech per segment and streams entries into the registry.
pub(crate) struct TranscribeStage {
    media: Arc<dyn MediaTool>,
    recognition: Arc<dyn RecognitionProvider>,
}

impl TranscribeStage {
    pub fn new(media: Arc<dyn MediaTool>, recognition: Arc<dyn RecognitionProvider>) -> Self {
        Self { media, recognition }
    }

    pub async fn execute(
        &self,
        ctx: &StageContext<'_>,
        audio: &AudioHandle,
        segments: &[SpeechSegment],
    ) -> Result<()> {
        if segments.is_empty() {
            return Err(Error::invalid_input("no speech segments to transcribe"));
        }

        let task = ctx.registry.get(ctx.task_id)?;
        let language = task
            .options
            .language
            .clone()
            .unwrap_or_else(|| ctx.config.asr_language.clone());
        let existing: HashSet<u64> = task.subtitles.iter().map(|e| e.id).collect();

        let total = segments.len();
        let mut done = existing.len().min(total);
        let workers = Arc::new(Semaphore::new(ctx.config.recognition_max_workers.max(1)));
        let mut join_set: JoinSet<SegmentResult> = JoinSet::new();
        let mut failure: Option<Error> = None;

        for (index, segment) in segments.iter().copied().enumerate() {
            let entry_id = (index + 1) as u64;
            if existing.contains(&entry_id) {
                continue;
            }
            if let Err(err) = ctx.checkpoint.pause_point().await {
                note_failure(&mut failure, err);
                break;
            }
            let permit = match workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    note_failure(&mut failure, Error::Cancelled);
                    break;
                }
            };

            join_set.spawn(Self::recognize_segment(
                self.media.clone(),
                self.recognition.clone(),
                ctx.checkpoint.clone(),
                ctx.config.retry.clone(),
                ctx.config.stage_timeout_secs,
                audio.clone(),
                segment,
                index,
                language.clone(),
                permit,
            ));

            // Merge whatever already finished without blocking dispatch.
            while let Some(joined) = join_set.try_join_next() {
                self.collect(ctx, joined, &language, total, &mut done, &mut failure)
                    .await;
            }
            if failure.is_some() {
                break;
            }
        }

        while let Some(joined) = join_set.join_next().await {
            self.collect(ctx, joined, &language, total, &mut done, &mut failure)
                .await;
        }

        if let Some(err) = failure {
            if ctx.checkpoint.is_cancelled() {
                return Err(Error::Cancelled);
            }
            return Err(err);
        }

        // Cue shaping closes the stage: merge fragmented neighbors and
        // renumber, then report the classic 65% "generating subtitles" step.
        let task = ctx.registry.get(ctx.task_id)?;
        let shaped = shape_entries(
            &task.subtitles,
            &ShapeOptions {
                merge_threshold_secs: ctx.config.merge_threshold_secs,
                max_chars: ctx.config.max_subtitle_chars,
            },
        );
        debug!(
            task_id = ctx.task_id,
            raw = task.subtitles.len(),
            shaped = shaped.len(),
            "cue shaping done"
        );
        ctx.registry.update_subtitles(ctx.task_id, shaped)?;
        ctx.set_progress(65.0, "Generating subtitles")?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn recognize_segment(
        media: Arc<dyn MediaTool>,
        recognition: Arc<dyn RecognitionProvider>,
        checkpoint: crate::pipeline::Checkpoint,
        policy: crate::domain::RetryPolicy,
        timeout_secs: u64,
        audio: AudioHandle,
        segment: SpeechSegment,
        index: usize,
        language: String,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> SegmentResult {
        let _permit = permit;
        let clip = checkpoint
            .guard(with_timeout(
                "cut_segment",
                timeout_secs,
                media.cut_segment(&audio, segment),
            ))
            .await?;

        let transcription = with_retry("transcribe", &policy, &checkpoint, || {
            let recognition = recognition.clone();
            let checkpoint = checkpoint.clone();
            let clip = clip.clone();
            let language = language.clone();
            async move {
                checkpoint
                    .guard(with_timeout(
                        "transcribe",
                        timeout_secs,
                        recognition.transcribe(&clip, segment, &language),
                    ))
                    .await
            }
        })
        .await?;

        Ok((index, segment, transcription))
    }

    /// Fold one worker result into the task. In-flight results that land
    /// while paused are applied on resume; after a cancel they are still
    /// persisted (partial subtitles are preserved) but no longer announced.
    async fn collect(
        &self,
        ctx: &StageContext<'_>,
        joined: std::result::Result<SegmentResult, tokio::task::JoinError>,
        language: &str,
        total: usize,
        done: &mut usize,
        failure: &mut Option<Error>,
    ) {
        let result = match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => {
                note_failure(failure, Error::Cancelled);
                return;
            }
            Err(join_err) => {
                note_failure(failure, Error::Other(join_err.to_string()));
                return;
            }
        };

        let (index, segment, transcription) = match result {
            Ok(parts) => parts,
            Err(err) => {
                note_failure(failure, err);
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

        *done += 1;
        let text = transcription.text.trim();
        if text.is_empty() {
            return;
        }
        if ctx.config.language_guard && mismatch_score(language, text) > 0.5 {
            debug!(
                task_id = ctx.task_id,
                segment = index,
                "dropping segment: script mismatches expected language"
            );
            return;
        }

        let mut entry = match SubtitleEntry::new((index + 1) as u64, segment.start, segment.end, text)
        {
            Ok(entry) => entry,
            Err(err) => {
                note_failure(failure, err.into());
                return;
            }
        };
        if let Some(confidence) = transcription.confidence {
            entry = entry.with_confidence(confidence);
        }

        if let Err(err) = ctx.registry.merge_subtitle(ctx.task_id, entry.clone()) {
            note_failure(failure, err);
            return;
        }
        if announce {
            ctx.publish(TaskEvent::SubtitleAdded { entry });
            let progress = 25.0 + 40.0 * (*done as f32 / total as f32);
            if let Err(err) = ctx.set_progress(
                progress,
                &format!("Transcribing segment {done}/{total}"),
            ) {
                note_failure(failure, err);
            }
        }
    }
}
