//! External capability traits and their data types.
//!
//! The engine never performs media or network I/O itself; every external
//! effect goes through one of these object-safe traits so hosts can plug in
//! ffmpeg/cloud clients and tests can plug in mocks.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subtitle_format::SubtitleEntry;
use tokio::sync::mpsc;

use crate::Result;

/// Extracted audio artifact.
#[derive(Debug, Clone)]
pub struct AudioHandle {
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// One voice-active span detected by VAD, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
}

impl SpeechSegment {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Recognition result for one audio segment.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub confidence: Option<f32>,
}

/// Subtitle rendering style passed to the synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleStyle {
    #[serde(default = "default_font_name")]
    pub font_name: String,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_primary_color")]
    pub primary_color: String,
    #[serde(default = "default_outline_color")]
    pub outline_color: String,
    #[serde(default = "default_outline_width")]
    pub outline_width: f32,
    /// 2 = bottom center, libass numbering.
    #[serde(default = "default_alignment")]
    pub alignment: u8,
    #[serde(default = "default_margin_v")]
    pub margin_v: u32,
    #[serde(default = "default_bold")]
    pub bold: bool,
}

fn default_font_name() -> String {
    "Arial".to_string()
}

fn default_font_size() -> u32 {
    70
}

fn default_primary_color() -> String {
    "#FFA500".to_string()
}

fn default_outline_color() -> String {
    "#000000".to_string()
}

fn default_outline_width() -> f32 {
    2.0
}

fn default_alignment() -> u8 {
    2
}

fn default_margin_v() -> u32 {
    30
}

fn default_bold() -> bool {
    true
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_name: default_font_name(),
            font_size: default_font_size(),
            primary_color: default_primary_color(),
            outline_color: default_outline_color(),
            outline_width: default_outline_width(),
            alignment: default_alignment(),
            margin_v: default_margin_v(),
            bold: default_bold(),
        }
    }
}

/// Synthesis request: burn subtitles into a video, optionally mixing dubbed
/// audio per the style/volume options.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub video_path: PathBuf,
    pub subtitles: Vec<SubtitleEntry>,
    pub style: SubtitleStyle,
    pub bilingual: bool,
    pub original_audio_volume: f32,
    pub dubbing_volume: f32,
}

/// Media codec capability (ffmpeg-like). All failures are fatal
/// (`Error::MediaTool`); there is no transient taxonomy for local tools.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Extract a mono speech-rate audio track from a video file.
    async fn extract_audio(&self, video: &Path) -> Result<AudioHandle>;

    /// Probe the duration of a media file in seconds.
    async fn probe_duration(&self, media: &Path) -> Result<f64>;

    /// Cut one speech segment out of an extracted audio track.
    async fn cut_segment(&self, audio: &AudioHandle, span: SpeechSegment) -> Result<PathBuf>;

    /// Render the output video. Progress in percent is reported through
    /// `progress`; implementations may drop the sender if they cannot
    /// report granular progress.
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        progress: mpsc::Sender<f32>,
    ) -> Result<PathBuf>;
}

/// Speech recognition capability (VAD + ASR).
///
/// Implementations fail with `Error::ProviderTransient` for retryable
/// network conditions, `Error::ProviderFatal` for auth/malformed-input
/// failures.
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Segment an audio track into voice-active spans.
    async fn detect_voice(&self, audio: &AudioHandle) -> Result<Vec<SpeechSegment>>;

    /// Transcribe one segment clip.
    async fn transcribe(
        &self,
        clip: &Path,
        span: SpeechSegment,
        language: &str,
    ) -> Result<Transcription>;
}

/// Batch translation capability. Same error taxonomy as recognition.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translate a batch of texts, preserving order and length.
    async fn translate_batch(&self, texts: &[String], target_lang: &str) -> Result<Vec<String>>;
}
