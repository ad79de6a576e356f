//! SRT rendering and parsing.
//!
//! Timing format is fixed: `HH:MM:SS,mmm --> HH:MM:SS,mmm`, cue index
//! starting at 1.

use crate::{ExportMode, SubtitleEntry, SubtitleError};

/// Format seconds as an SRT timestamp with millisecond precision.
pub fn format_timestamp(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = total_secs / 3600;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Parse an SRT timestamp back to seconds.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let (hms, ms) = s.trim().split_once(',')?;
    let mut parts = hms.split(':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let sec: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let ms: u64 = ms.parse().ok()?;
    Some((h * 3600 + m * 60 + sec) as f64 + ms as f64 / 1000.0)
}

fn cue_lines(entry: &SubtitleEntry, mode: ExportMode) -> Vec<String> {
    match mode {
        ExportMode::Original => vec![entry.original_line().to_string()],
        ExportMode::Translated => vec![entry.text.clone()],
        ExportMode::Bilingual => {
            if entry.original_text.is_some() {
                vec![entry.original_line().to_string(), entry.text.clone()]
            } else {
                vec![entry.text.clone()]
            }
        }
        ExportMode::BilingualTagged => {
            if entry.original_text.is_some() {
                vec![
                    format!("[O] {}", entry.original_line()),
                    format!("[T] {}", entry.text),
                ]
            } else {
                vec![format!("[O] {}", entry.text)]
            }
        }
    }
}

/// Render entries as an SRT document.
///
/// Cues are numbered from 1 in list order; callers pass an already-sorted
/// list (the registry keeps task subtitles sorted by start time).
pub fn render_srt(entries: &[SubtitleEntry], mode: ExportMode) -> String {
    let mut out = String::new();
    for (index, entry) in entries.iter().enumerate() {
        out.push_str(&format!("{}\n", index + 1));
        out.push_str(&format!(
            "{} --> {}\n",
            format_timestamp(entry.start_time),
            format_timestamp(entry.end_time)
        ));
        for line in cue_lines(entry, mode) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Parse an SRT document produced by [`render_srt`] in original mode.
///
/// Entry ids are taken from the cue index, so
/// `render_srt(parse_srt(srt)?, Original) == srt` modulo cue renumbering.
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleEntry>, SubtitleError> {
    let mut entries = Vec::new();
    let mut lines = content.lines().enumerate().peekable();

    while let Some((line_no, line)) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        // Cue index line.
        let id: u64 = line.trim().parse().map_err(|_| SubtitleError::Parse {
            line: line_no + 1,
            message: format!("expected cue index, got {line:?}"),
        })?;

        let (timing_no, timing) = lines.next().ok_or(SubtitleError::Parse {
            line: line_no + 1,
            message: "missing timing line".to_string(),
        })?;
        let (start_raw, end_raw) =
            timing
                .split_once("-->")
                .ok_or_else(|| SubtitleError::Parse {
                    line: timing_no + 1,
                    message: format!("expected timing line, got {timing:?}"),
                })?;
        let start = parse_timestamp(start_raw).ok_or_else(|| SubtitleError::Parse {
            line: timing_no + 1,
            message: format!("bad start timestamp {start_raw:?}"),
        })?;
        let end = parse_timestamp(end_raw).ok_or_else(|| SubtitleError::Parse {
            line: timing_no + 1,
            message: format!("bad end timestamp {end_raw:?}"),
        })?;

        let mut text_lines = Vec::new();
        while let Some((_, text)) = lines.peek() {
            if text.trim().is_empty() {
                lines.next();
                break;
            }
            text_lines.push(lines.next().unwrap().1.to_string());
        }

        entries.push(SubtitleEntry::new(id, start, end, text_lines.join("\n"))?);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, start: f64, end: f64, text: &str) -> SubtitleEntry {
        SubtitleEntry::new(id, start, end, text).unwrap()
    }

    fn translated(id: u64, start: f64, end: f64, original: &str, text: &str) -> SubtitleEntry {
        let mut e = entry(id, start, end, text);
        e.original_text = Some(original.to_string());
        e
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(0.5), "00:00:00,500");
        assert_eq!(format_timestamp(3661.042), "01:01:01,042");
    }

    #[test]
    fn test_timestamp_round_trip() {
        for secs in [0.0, 0.5, 2.0, 59.999, 3661.042] {
            let formatted = format_timestamp(secs);
            let parsed = parse_timestamp(&formatted).unwrap();
            assert!((parsed - secs).abs() < 0.001, "{secs} -> {formatted} -> {parsed}");
        }
    }

    #[test]
    fn test_render_original() {
        let entries = vec![entry(1, 0.5, 2.0, "hello"), entry(2, 3.0, 4.5, "world")];
        let srt = render_srt(&entries, ExportMode::Original);
        assert_eq!(
            srt,
            "1\n00:00:00,500 --> 00:00:02,000\nhello\n\n2\n00:00:03,000 --> 00:00:04,500\nworld\n\n"
        );
    }

    #[test]
    fn test_render_bilingual_tagged() {
        let entries = vec![translated(1, 0.5, 2.0, "你好", "hello")];
        let srt = render_srt(&entries, ExportMode::BilingualTagged);
        assert!(srt.contains("[O] 你好\n[T] hello\n"));
    }

    #[test]
    fn test_srt_round_trip() {
        let entries = vec![entry(1, 0.5, 2.0, "hello"), entry(2, 3.0, 4.5, "world")];
        let srt = render_srt(&entries, ExportMode::Original);
        let parsed = parse_srt(&srt).unwrap();
        assert_eq!(render_srt(&parsed, ExportMode::Original), srt);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_srt("not a subtitle").is_err());
        assert!(parse_srt("1\n00:00 -> 00:01\nx\n").is_err());
    }
}
