//! Video synthesis stage.
//!
//! Burns subtitles (and dubbed audio, when the host's media tool supports
//! it) into the source video. Runs inside the final `generating_subtitle`
//! leg of the pipeline; granular progress arrives over a channel from the
//! media tool and is re-published as `synthesis_progress` events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::SynthesizeOptions;
use crate::progress::TaskEvent;
use crate::providers::{MediaTool, SynthesisRequest};
use crate::{Error, Result};

use super::{StageContext, with_timeout};

/// Renders the output video with burned-in subtitles.
pub(crate) struct SynthesizeStage {
    media: Arc<dyn MediaTool>,
}

impl SynthesizeStage {
    pub fn new(media: Arc<dyn MediaTool>) -> Self {
        Self { media }
    }

    pub async fn execute(&self, ctx: &StageContext<'_>, options: &SynthesizeOptions) -> Result<()> {
        let task = ctx.registry.get(ctx.task_id)?;
        if task.subtitles.is_empty() {
            return Err(Error::invalid_input("no subtitles to synthesize"));
        }

        let request = SynthesisRequest {
            video_path: task.source_path.clone(),
            subtitles: task.subtitles.clone(),
            style: options.style.clone(),
            bilingual: options.bilingual,
            original_audio_volume: options.original_audio_volume,
            dubbing_volume: options.dubbing_volume,
        };

        let (progress_tx, mut progress_rx) = mpsc::channel::<f32>(16);
        let media = self.media.clone();
        let timeout_secs = ctx.config.stage_timeout_secs;
        let call = ctx.checkpoint.guard(with_timeout(
            "synthesize",
            timeout_secs,
            media.synthesize(request, progress_tx),
        ));
        tokio::pin!(call);

        let output = loop {
            tokio::select! {
                Some(percent) = progress_rx.recv() => {
                    let percent = percent.clamp(0.0, 100.0);
                    ctx.publish(TaskEvent::SynthesisProgress { progress: percent });
                    ctx.set_progress(90.0 + percent * 0.09, "Synthesizing video")?;
                }
                result = &mut call => break result?,
            }
        };

        ctx.registry
            .set_output_video_path(ctx.task_id, output.clone())?;
        ctx.set_progress(99.0, "Synthesis complete")?;
        debug!(
            task_id = ctx.task_id,
            output = %output.display(),
            "video synthesized"
        );
        Ok(())
    }
}
