//! Post-recognition cue shaping.
//!
//! Raw recognition output follows VAD segment boundaries, which tends to
//! produce fragmented cues. Shaping merges neighbors separated by less than
//! a gap threshold, subject to a maximum cue length, then renumbers ids.

use crate::SubtitleEntry;

/// Options controlling cue shaping.
#[derive(Debug, Clone)]
pub struct ShapeOptions {
    /// Merge neighbors whose gap is at or below this many seconds.
    pub merge_threshold_secs: f64,
    /// Maximum merged cue length in characters; 0 disables the limit.
    pub max_chars: usize,
}

impl Default for ShapeOptions {
    fn default() -> Self {
        Self {
            merge_threshold_secs: 0.5,
            max_chars: 30,
        }
    }
}

fn join_text(left: &str, right: &str) -> String {
    // CJK text reads naturally without a separator; latin words need one.
    let needs_space = left
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_alphanumeric());
    if needs_space {
        format!("{left} {right}")
    } else {
        format!("{left}{right}")
    }
}

fn can_merge(left: &SubtitleEntry, right: &SubtitleEntry, opts: &ShapeOptions) -> bool {
    if left.original_text.is_some() || right.original_text.is_some() {
        // Translated cues are never reshaped.
        return false;
    }
    let gap = right.start_time - left.end_time;
    if gap > opts.merge_threshold_secs {
        return false;
    }
    if opts.max_chars > 0 {
        let combined = left.text.chars().count() + right.text.chars().count();
        if combined > opts.max_chars {
            return false;
        }
    }
    true
}

/// Merge short neighboring cues and renumber ids from 1.
///
/// Input must already be sorted by start time; output preserves that order.
pub fn shape_entries(entries: &[SubtitleEntry], opts: &ShapeOptions) -> Vec<SubtitleEntry> {
    let mut shaped: Vec<SubtitleEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        match shaped.last_mut() {
            Some(last) if can_merge(last, entry, opts) => {
                last.text = join_text(&last.text, &entry.text);
                last.end_time = entry.end_time;
                last.confidence = match (last.confidence, entry.confidence) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
            }
            _ => shaped.push(entry.clone()),
        }
    }

    for (index, entry) in shaped.iter_mut().enumerate() {
        entry.id = (index + 1) as u64;
    }
    shaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, start: f64, end: f64, text: &str) -> SubtitleEntry {
        SubtitleEntry::new(id, start, end, text).unwrap()
    }

    #[test]
    fn test_merges_close_neighbors() {
        let entries = vec![entry(1, 0.0, 1.0, "你好"), entry(2, 1.2, 2.0, "世界")];
        let shaped = shape_entries(&entries, &ShapeOptions::default());

        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].text, "你好世界");
        assert_eq!(shaped[0].start_time, 0.0);
        assert_eq!(shaped[0].end_time, 2.0);
    }

    #[test]
    fn test_keeps_distant_neighbors() {
        let entries = vec![entry(1, 0.5, 2.0, "first"), entry(2, 3.0, 4.5, "second")];
        let shaped = shape_entries(&entries, &ShapeOptions::default());
        assert_eq!(shaped.len(), 2);
    }

    #[test]
    fn test_respects_max_chars() {
        let opts = ShapeOptions {
            merge_threshold_secs: 0.5,
            max_chars: 8,
        };
        let entries = vec![entry(1, 0.0, 1.0, "long text"), entry(2, 1.1, 2.0, "more")];
        let shaped = shape_entries(&entries, &opts);
        assert_eq!(shaped.len(), 2);
    }

    #[test]
    fn test_latin_merge_inserts_space() {
        let opts = ShapeOptions {
            merge_threshold_secs: 0.5,
            max_chars: 0,
        };
        let entries = vec![entry(1, 0.0, 1.0, "hello"), entry(2, 1.1, 2.0, "world")];
        let shaped = shape_entries(&entries, &opts);
        assert_eq!(shaped[0].text, "hello world");
    }

    #[test]
    fn test_renumbers_ids() {
        let entries = vec![entry(3, 0.5, 2.0, "first"), entry(7, 3.0, 4.5, "second")];
        let shaped = shape_entries(&entries, &ShapeOptions::default());
        let ids: Vec<u64> = shaped.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
