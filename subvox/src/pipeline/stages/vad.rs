//! Voice-activity detection stage.

use std::sync::Arc;

use tracing::debug;

use crate::providers::{AudioHandle, RecognitionProvider, SpeechSegment};
use crate::Result;

use super::{StageContext, with_retry, with_timeout};

/// Segments extracted audio into voice-active spans.
pub(crate) struct VadStage {
    recognition: Arc<dyn RecognitionProvider>,
}

impl VadStage {
    pub fn new(recognition: Arc<dyn RecognitionProvider>) -> Self {
        Self { recognition }
    }

    pub async fn execute(
        &self,
        ctx: &StageContext<'_>,
        audio: &AudioHandle,
    ) -> Result<Vec<SpeechSegment>> {
        let raw = with_retry("vad_detect", &ctx.config.retry, ctx.checkpoint, || {
            let recognition = self.recognition.clone();
            let checkpoint = ctx.checkpoint.clone();
            let audio = audio.clone();
            let timeout_secs = ctx.config.stage_timeout_secs;
            async move {
                checkpoint
                    .guard(with_timeout(
                        "vad_detect",
                        timeout_secs,
                        recognition.detect_voice(&audio),
                    ))
                    .await
            }
        })
        .await?;

        let segments = normalize_segments(
            raw,
            ctx.config.min_speech_duration_secs,
            ctx.config.max_speech_duration_secs,
        );

        ctx.set_progress(
            20.0,
            &format!("Detected {} speech segments", segments.len()),
        )?;
        debug!(
            task_id = ctx.task_id,
            segments = segments.len(),
            "voice activity detected"
        );
        Ok(segments)
    }
}

/// Drop segments below the minimum duration and split segments above the
/// maximum into even chunks so a single cue never exceeds it.
fn normalize_segments(raw: Vec<SpeechSegment>, min_secs: f64, max_secs: f64) -> Vec<SpeechSegment> {
    let mut out = Vec::with_capacity(raw.len());
    for segment in raw {
        if segment.duration() < min_secs {
            continue;
        }
        if max_secs > 0.0 && segment.duration() > max_secs {
            let chunks = (segment.duration() / max_secs).ceil() as usize;
            let step = segment.duration() / chunks as f64;
            for i in 0..chunks {
                let start = segment.start + step * i as f64;
                let end = (start + step).min(segment.end);
                out.push(SpeechSegment::new(start, end));
            }
        } else {
            out.push(segment);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_drops_tiny_segments() {
        let raw = vec![
            SpeechSegment::new(0.0, 0.05),
            SpeechSegment::new(1.0, 2.0),
        ];
        let segments = normalize_segments(raw, 0.1, 5.0);
        assert_eq!(segments, vec![SpeechSegment::new(1.0, 2.0)]);
    }

    #[test]
    fn test_normalize_splits_long_segments() {
        let raw = vec![SpeechSegment::new(0.0, 12.0)];
        let segments = normalize_segments(raw, 0.1, 5.0);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[2].end, 12.0);
        assert!(segments.iter().all(|s| s.duration() <= 5.0 + 1e-9));
    }

    #[test]
    fn test_normalize_keeps_ordinary_segments() {
        let raw = vec![SpeechSegment::new(0.5, 2.0), SpeechSegment::new(3.0, 4.5)];
        let segments = normalize_segments(raw.clone(), 0.1, 5.0);
        assert_eq!(segments, raw);
    }
}
