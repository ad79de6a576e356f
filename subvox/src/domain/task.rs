//! Task entity and lifecycle state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtitle_format::SubtitleEntry;

use crate::Error;
use crate::providers::SubtitleStyle;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a scheduler slot.
    #[default]
    Pending,
    /// A pipeline is running this task.
    Processing,
    /// Suspended at a checkpoint; resumable.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished with an unrecoverable error.
    Failed,
    /// Cancelled on request.
    Cancelled,
}

impl TaskStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if a pipeline currently owns this task.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing | Self::Paused)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, target) {
            // Scheduler admission
            (Pending, Processing) => true,

            // Pause / resume at checkpoints
            (Processing, Paused) => true,
            (Paused, Processing) => true,

            // Settling
            (Processing, Completed | Failed) => true,

            // Any non-terminal state can be cancelled
            (Pending | Processing | Paused, Cancelled) => true,

            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    ///
    /// Terminal states reject every transition with `TaskAlreadyFinished`;
    /// other invalid edges fail with `InvalidTransition`.
    pub fn transition_to(&self, target: TaskStatus) -> Result<TaskStatus, Error> {
        if self.is_terminal() {
            return Err(Error::TaskAlreadyFinished {
                status: self.as_str().to_string(),
            });
        }
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage a task is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    #[default]
    Idle,
    ExtractingAudio,
    VadDetecting,
    Transcribing,
    Translating,
    /// Final subtitle assembly; covers the synthesis/dub leg when requested.
    GeneratingSubtitle,
    Completed,
    Failed,
}

impl TaskStage {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ExtractingAudio => "extracting_audio",
            Self::VadDetecting => "vad_detecting",
            Self::Transcribing => "transcribing",
            Self::Translating => "translating",
            Self::GeneratingSubtitle => "generating_subtitle",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "extracting_audio" => Some(Self::ExtractingAudio),
            "vad_detecting" => Some(Self::VadDetecting),
            "transcribing" => Some(Self::Transcribing),
            "translating" => Some(Self::Translating),
            "generating_subtitle" => Some(Self::GeneratingSubtitle),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Progress floor applied on stage entry.
    ///
    /// Floors follow the original progress plan: extraction starts the bar
    /// at 5, VAD at 15, transcription runs 25–65, translation 70–90 and the
    /// final assembly (plus synthesis when requested) 90–100.
    pub fn progress_floor(&self) -> f32 {
        match self {
            Self::Idle => 0.0,
            Self::ExtractingAudio => 5.0,
            Self::VadDetecting => 15.0,
            Self::Transcribing => 25.0,
            Self::Translating => 70.0,
            Self::GeneratingSubtitle => 90.0,
            Self::Completed => 100.0,
            Self::Failed => 0.0,
        }
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Translation options for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateOptions {
    pub target_lang: String,
}

/// Synthesis/dubbing options for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeOptions {
    #[serde(default)]
    pub style: SubtitleStyle,
    /// Burn both original and translated lines into the video.
    #[serde(default)]
    pub bilingual: bool,
    #[serde(default = "default_original_audio_volume")]
    pub original_audio_volume: f32,
    #[serde(default = "default_dubbing_volume")]
    pub dubbing_volume: f32,
}

fn default_original_audio_volume() -> f32 {
    0.1
}

fn default_dubbing_volume() -> f32 {
    1.0
}

impl Default for SynthesizeOptions {
    fn default() -> Self {
        Self {
            style: SubtitleStyle::default(),
            bilingual: false,
            original_audio_volume: default_original_audio_volume(),
            dubbing_volume: default_dubbing_volume(),
        }
    }
}

/// Per-task pipeline options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    /// Recognition language; falls back to the engine default when empty.
    #[serde(default)]
    pub language: Option<String>,
    /// Translate recognized subtitles when set.
    #[serde(default)]
    pub translate: Option<TranslateOptions>,
    /// Synthesize a dubbed/subtitled video when set.
    #[serde(default)]
    pub synthesize: Option<SynthesizeOptions>,
}

/// Parameters for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub source_path: PathBuf,
    pub file_name: Option<String>,
    pub file_size_bytes: u64,
    pub options: TaskOptions,
}

impl NewTask {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            file_name: None,
            file_size_bytes: 0,
            options: TaskOptions::default(),
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size_bytes = bytes;
        self
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }
}

/// Unit of work: one video to subtitle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub source_path: PathBuf,
    pub file_name: String,
    pub file_size_bytes: u64,

    pub status: TaskStatus,
    pub stage: TaskStage,
    pub progress: f32,
    /// Human-readable status text accompanying progress updates.
    pub stage_detail: String,

    pub options: TaskOptions,
    pub subtitles: Vec<SubtitleEntry>,

    /// Extract-stage artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    /// Synthesis-stage artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_video_path: Option<PathBuf>,

    /// Set only on transition to `Failed`; never on cancellation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(params: NewTask) -> Self {
        let now = Utc::now();
        let file_name = params.file_name.unwrap_or_else(|| {
            params
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| params.source_path.to_string_lossy().into_owned())
        });

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_path: params.source_path,
            file_name,
            file_size_bytes: params.file_size_bytes,
            status: TaskStatus::Pending,
            stage: TaskStage::Idle,
            progress: 0.0,
            stage_detail: String::new(),
            options: params.options,
            subtitles: Vec::new(),
            audio_path: None,
            output_video_path: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str() {
        assert_eq!(TaskStatus::parse("pending"), Some(TaskStatus::Pending));
        assert_eq!(TaskStatus::parse("cancelled"), Some(TaskStatus::Cancelled));
        assert_eq!(TaskStatus::parse("invalid"), None);
    }

    #[test]
    fn test_valid_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Paused));
        assert!(TaskStatus::Paused.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Paused.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Paused));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Paused.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Paused.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_terminal_rejects_all() {
        for terminal in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let result = terminal.transition_to(TaskStatus::Processing);
            assert!(matches!(result, Err(Error::TaskAlreadyFinished { .. })));
            let result = terminal.transition_to(TaskStatus::Cancelled);
            assert!(matches!(result, Err(Error::TaskAlreadyFinished { .. })));
        }
    }

    #[test]
    fn test_transition_to_invalid_edge() {
        let result = TaskStatus::Pending.transition_to(TaskStatus::Paused);
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn test_stage_round_trip() {
        for stage in [
            TaskStage::Idle,
            TaskStage::ExtractingAudio,
            TaskStage::VadDetecting,
            TaskStage::Transcribing,
            TaskStage::Translating,
            TaskStage::GeneratingSubtitle,
            TaskStage::Completed,
            TaskStage::Failed,
        ] {
            assert_eq!(TaskStage::parse(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn test_stage_floors_increase_along_pipeline() {
        let floors = [
            TaskStage::ExtractingAudio,
            TaskStage::VadDetecting,
            TaskStage::Transcribing,
            TaskStage::Translating,
            TaskStage::GeneratingSubtitle,
            TaskStage::Completed,
        ]
        .map(|s| s.progress_floor());
        assert!(floors.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_new_task_derives_file_name() {
        let task = Task::new(NewTask::new("/videos/talk.mp4"));
        assert_eq!(task.file_name, "talk.mp4");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.stage, TaskStage::Idle);
    }
}
