//! Plain-text export.

use crate::{ExportMode, SubtitleEntry, format_timestamp};

/// Render entries as plain text, one cue per block.
///
/// With `with_timestamps` each block is prefixed by a `[start - end]` line.
pub fn render_text(entries: &[SubtitleEntry], mode: ExportMode, with_timestamps: bool) -> String {
    let mut out = String::new();
    for entry in entries {
        if with_timestamps {
            out.push_str(&format!(
                "[{} - {}]\n",
                format_timestamp(entry.start_time),
                format_timestamp(entry.end_time)
            ));
        }
        match mode {
            ExportMode::Original => {
                out.push_str(entry.original_line());
                out.push('\n');
            }
            ExportMode::Translated => {
                out.push_str(&entry.text);
                out.push('\n');
            }
            ExportMode::Bilingual => {
                if entry.original_text.is_some() {
                    out.push_str(entry.original_line());
                    out.push('\n');
                }
                out.push_str(&entry.text);
                out.push('\n');
            }
            ExportMode::BilingualTagged => {
                if entry.original_text.is_some() {
                    out.push_str(&format!("[O] {}\n[T] {}\n", entry.original_line(), entry.text));
                } else {
                    out.push_str(&format!("[O] {}\n", entry.text));
                }
            }
        }
        if with_timestamps {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SubtitleEntry;

    #[test]
    fn test_render_text_plain() {
        let entries = vec![
            SubtitleEntry::new(1, 0.5, 2.0, "hello").unwrap(),
            SubtitleEntry::new(2, 3.0, 4.5, "world").unwrap(),
        ];
        assert_eq!(
            render_text(&entries, ExportMode::Original, false),
            "hello\nworld\n"
        );
    }

    #[test]
    fn test_render_text_with_timestamps() {
        let entries = vec![SubtitleEntry::new(1, 0.5, 2.0, "hello").unwrap()];
        let text = render_text(&entries, ExportMode::Original, true);
        assert_eq!(text, "[00:00:00,500 - 00:00:02,000]\nhello\n\n");
    }

    #[test]
    fn test_render_text_bilingual() {
        let mut e = SubtitleEntry::new(1, 0.5, 2.0, "hello").unwrap();
        e.original_text = Some("你好".to_string());
        assert_eq!(
            render_text(&[e], ExportMode::Bilingual, false),
            "你好\nhello\n"
        );
    }
}
