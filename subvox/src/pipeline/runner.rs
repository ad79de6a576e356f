//! Pipeline runner: drives one task through its stage sequence.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::domain::{TaskStage, TaskStatus};
use crate::progress::{ProgressBus, TaskEvent};
use crate::providers::{MediaTool, RecognitionProvider, TranslationProvider};
use crate::registry::TaskRegistry;
use crate::{Error, Result};

use super::Checkpoint;
use super::stages::{
    ExtractStage, StageContext, SynthesizeStage, TranscribeStage, TranslateStage, VadStage,
};

/// Drives a single task through `extract → vad → transcribe → [translate]
/// → generate/[synthesize]`, persisting state and observing the checkpoint
/// between stages. Settles the task itself: exactly one terminal transition
/// and one terminal event per run.
pub struct PipelineRunner {
    registry: Arc<TaskRegistry>,
    bus: Arc<ProgressBus>,
    config: Arc<EngineConfig>,
    network_permits: Arc<Semaphore>,

    extract: ExtractStage,
    vad: VadStage,
    transcribe: TranscribeStage,
    translate: TranslateStage,
    synthesize: SynthesizeStage,
}

impl PipelineRunner {
    pub fn new(
        registry: Arc<TaskRegistry>,
        bus: Arc<ProgressBus>,
        config: Arc<EngineConfig>,
        media: Arc<dyn MediaTool>,
        recognition: Arc<dyn RecognitionProvider>,
        translation: Arc<dyn TranslationProvider>,
    ) -> Self {
        let network_permits = Arc::new(Semaphore::new(config.network_total_permits.max(1)));
        Self {
            registry,
            bus,
            config,
            network_permits,
            extract: ExtractStage::new(media.clone()),
            vad: VadStage::new(recognition.clone()),
            transcribe: TranscribeStage::new(media.clone(), recognition),
            translate: TranslateStage::new(translation),
            synthesize: SynthesizeStage::new(media),
        }
    }

    /// Run the pipeline for one admitted task.
    pub async fn run(&self, task_id: &str, checkpoint: Checkpoint) {
        match self.drive(task_id, &checkpoint).await {
            Ok(()) => {}
            Err(Error::Cancelled) => self.settle_cancelled(task_id),
            // Settled elsewhere (e.g. cancelled between admission and start).
            Err(Error::TaskAlreadyFinished { .. }) => {}
            Err(err) => self.settle_failed(task_id, err, &checkpoint).await,
        }
    }

    async fn drive(&self, task_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.registry.transition(task_id, TaskStatus::Processing)?;
        let task = self.registry.get(task_id)?;
        info!(task_id, file = %task.file_name, "pipeline started");

        let ctx = StageContext {
            task_id,
            registry: &self.registry,
            bus: &self.bus,
            config: &self.config,
            checkpoint,
            network_permits: &self.network_permits,
        };

        ctx.enter_stage(TaskStage::ExtractingAudio, "Extracting audio")?;
        let audio = self.extract.execute(&ctx).await?;
        checkpoint.pause_point().await?;

        ctx.enter_stage(TaskStage::VadDetecting, "Detecting speech segments")?;
        let segments = self.vad.execute(&ctx, &audio).await?;
        checkpoint.pause_point().await?;

        ctx.enter_stage(TaskStage::Transcribing, "Transcribing audio")?;
        self.transcribe.execute(&ctx, &audio, &segments).await?;
        checkpoint.pause_point().await?;

        if let Some(translate) = task.options.translate.as_ref() {
            let target = if translate.target_lang.is_empty() {
                self.config.translation_target_lang.clone()
            } else {
                translate.target_lang.clone()
            };
            ctx.enter_stage(TaskStage::Translating, "Translating subtitles")?;
            self.translate.execute(&ctx, &target).await?;
            checkpoint.pause_point().await?;
        }

        ctx.enter_stage(TaskStage::GeneratingSubtitle, "Finalizing subtitles")?;
        if let Some(synthesize) = task.options.synthesize.as_ref() {
            self.synthesize.execute(&ctx, synthesize).await?;
            checkpoint.pause_point().await?;
        }

        self.settle_completed(task_id, checkpoint).await
    }

    /// Complete the task. If a pause landed right at the finish line, wait
    /// for the resume so the transition stays on a defined edge.
    async fn settle_completed(&self, task_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        loop {
            checkpoint.pause_point().await?;
            match self.registry.transition(task_id, TaskStatus::Completed) {
                Ok(task) => {
                    self.bus.publish(task_id, TaskEvent::Completed);
                    info!(
                        task_id,
                        subtitles = task.subtitles.len(),
                        "pipeline completed"
                    );
                    return Ok(());
                }
                Err(Error::InvalidTransition { .. }) => {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fail the task with a human-readable message. A pipeline paused at
    /// the moment of failure settles once resumed (or cancelled).
    async fn settle_failed(&self, task_id: &str, err: Error, checkpoint: &Checkpoint) {
        let message = err.to_string();
        loop {
            if checkpoint.pause_point().await.is_err() {
                self.settle_cancelled(task_id);
                return;
            }
            match self.registry.fail(task_id, message.clone()) {
                Ok(_) => {
                    error!(task_id, error = %message, "pipeline failed");
                    self.bus
                        .publish(task_id, TaskEvent::Failed { error: message });
                    return;
                }
                Err(Error::InvalidTransition { .. }) => {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                // Already terminal: settled by a concurrent cancel.
                Err(_) => return,
            }
        }
    }

    /// Cancel the task. Safe to call more than once: only the transition
    /// that actually flips the status publishes the event, so cancelling an
    /// already-cancelled task emits nothing.
    fn settle_cancelled(&self, task_id: &str) {
        if self
            .registry
            .transition(task_id, TaskStatus::Cancelled)
            .is_ok()
        {
            info!(task_id, "pipeline cancelled");
            self.bus.publish(task_id, TaskEvent::Cancelled);
        }
    }
}
