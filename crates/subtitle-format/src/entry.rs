//! Subtitle entry model and merge-by-key insertion.

use serde::{Deserialize, Serialize};

use crate::SubtitleError;

/// One recognized utterance.
///
/// `id` is a monotonically increasing integer scoped to the owning task and
/// is the dedup key for out-of-order arrivals from parallel recognition
/// workers. `text` holds the display text (translated when a translation has
/// been applied); `original_text` keeps the pre-translation text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleEntry {
    pub id: u64,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl SubtitleEntry {
    /// Create a new entry, validating cue timing.
    pub fn new(
        id: u64,
        start_time: f64,
        end_time: f64,
        text: impl Into<String>,
    ) -> Result<Self, SubtitleError> {
        if !(start_time < end_time) {
            return Err(SubtitleError::InvalidTiming {
                start: start_time,
                end: end_time,
            });
        }
        Ok(Self {
            id,
            start_time,
            end_time,
            text: text.into(),
            original_text: None,
            confidence: None,
        })
    }

    /// Set the recognizer confidence score.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Cue duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Text to render for the original-language line.
    pub fn original_line(&self) -> &str {
        self.original_text.as_deref().unwrap_or(&self.text)
    }
}

/// Insert an entry keeping the list sorted by start time.
///
/// An existing entry with the same `id` is replaced in place instead of
/// inserted, so repeated delivery of a segment result is harmless.
pub fn merge_entry(entries: &mut Vec<SubtitleEntry>, entry: SubtitleEntry) {
    if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
        *existing = entry;
        entries.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        return;
    }
    let at = entries.partition_point(|e| e.start_time <= entry.start_time);
    entries.insert(at, entry);
}

/// Validate a full entry list: per-cue timing plus the no-duplicate-id
/// invariant. Used on user-edited subtitle updates.
pub fn validate_entries(entries: &[SubtitleEntry]) -> Result<(), SubtitleError> {
    let mut seen = std::collections::HashSet::with_capacity(entries.len());
    for entry in entries {
        if !(entry.start_time < entry.end_time) {
            return Err(SubtitleError::InvalidTiming {
                start: entry.start_time,
                end: entry.end_time,
            });
        }
        if !seen.insert(entry.id) {
            return Err(SubtitleError::DuplicateId(entry.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, start: f64, end: f64, text: &str) -> SubtitleEntry {
        SubtitleEntry::new(id, start, end, text).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted_timing() {
        assert!(SubtitleEntry::new(1, 2.0, 1.0, "x").is_err());
        assert!(SubtitleEntry::new(1, 1.0, 1.0, "x").is_err());
    }

    #[test]
    fn test_merge_keeps_sorted_order() {
        let mut entries = Vec::new();
        merge_entry(&mut entries, entry(2, 3.0, 4.5, "second"));
        merge_entry(&mut entries, entry(1, 0.5, 2.0, "first"));
        merge_entry(&mut entries, entry(3, 5.0, 6.0, "third"));

        let starts: Vec<f64> = entries.iter().map(|e| e.start_time).collect();
        assert_eq!(starts, vec![0.5, 3.0, 5.0]);
    }

    #[test]
    fn test_merge_replaces_duplicate_id() {
        let mut entries = vec![entry(1, 0.5, 2.0, "draft")];
        merge_entry(&mut entries, entry(1, 0.5, 2.0, "final"));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "final");
    }

    #[test]
    fn test_validate_detects_duplicate_id() {
        let entries = vec![entry(1, 0.5, 2.0, "a"), entry(1, 3.0, 4.0, "b")];
        assert!(matches!(
            validate_entries(&entries),
            Err(SubtitleError::DuplicateId(1))
        ));
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let e = entry(1, 0.5, 2.0, "hello");
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"startTime\":0.5"));
        assert!(json.contains("\"endTime\":2.0"));
        assert!(!json.contains("originalText"));
    }
}
