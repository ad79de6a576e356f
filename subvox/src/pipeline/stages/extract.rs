//! Audio extraction stage.

use std::sync::Arc;

use tracing::debug;

use crate::providers::{AudioHandle, MediaTool};
use crate::{Error, Result};

use super::{StageContext, with_timeout};

/// Extracts the audio track from the task's source video.
pub(crate) struct ExtractStage {
    media: Arc<dyn MediaTool>,
}

impl ExtractStage {
    pub fn new(media: Arc<dyn MediaTool>) -> Self {
        Self { media }
    }

    pub async fn execute(&self, ctx: &StageContext<'_>) -> Result<AudioHandle> {
        let task = ctx.registry.get(ctx.task_id)?;
        if task.source_path.as_os_str().is_empty() {
            return Err(Error::invalid_input("task has no source path"));
        }

        // Already extracted (resumed pipeline): skip the codec call.
        if let Some(path) = task.audio_path.clone() {
            debug!(task_id = ctx.task_id, path = %path.display(), "audio already extracted");
            let duration = ctx
                .checkpoint
                .guard(with_timeout(
                    "probe_duration",
                    ctx.config.stage_timeout_secs,
                    self.media.probe_duration(&path),
                ))
                .await?;
            return Ok(AudioHandle {
                path,
                duration_secs: duration,
            });
        }

        let audio = ctx
            .checkpoint
            .guard(with_timeout(
                "extract_audio",
                ctx.config.stage_timeout_secs,
                self.media.extract_audio(&task.source_path),
            ))
            .await?;

        ctx.registry.set_audio_path(ctx.task_id, audio.path.clone())?;
        ctx.set_progress(12.0, "Audio extracted")?;
        debug!(
            task_id = ctx.task_id,
            path = %audio.path.display(),
            duration_secs = audio.duration_secs,
            "audio extracted"
        );
        Ok(audio)
    }
}
