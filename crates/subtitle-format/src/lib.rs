//! # Subtitle Format
//!
//! Subtitle entry model and rendering shared by the pipeline engine and its
//! consumers. Entries are merged by key (sorted insertion on start time,
//! dedup on id) because recognition and translation workers complete out of
//! order. Rendering covers SRT and plain text in four export modes.

use thiserror::Error;

mod entry;
mod shape;
mod srt;
mod text;

pub use entry::{SubtitleEntry, merge_entry, validate_entries};
pub use shape::{ShapeOptions, shape_entries};
pub use srt::{format_timestamp, parse_srt, parse_timestamp, render_srt};
pub use text::render_text;

/// Common error type for subtitle operations.
#[derive(Error, Debug)]
pub enum SubtitleError {
    #[error("Invalid cue timing: start {start} must be before end {end}")]
    InvalidTiming { start: f64, end: f64 },

    #[error("Duplicate cue id {0}")]
    DuplicateId(u64),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Which text a rendered cue carries.
///
/// `Bilingual` pairs original and translation per cue; `BilingualTagged`
/// additionally prefixes lines with `[O]` / `[T]` markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    #[default]
    Original,
    Translated,
    Bilingual,
    BilingualTagged,
}

impl ExportMode {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Translated => "translated",
            Self::Bilingual => "bilingual",
            Self::BilingualTagged => "bilingual_tagged",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "original" => Some(Self::Original),
            "translated" => Some(Self::Translated),
            "bilingual" => Some(Self::Bilingual),
            "bilingual_tagged" => Some(Self::BilingualTagged),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
