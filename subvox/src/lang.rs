//! Script-based language heuristics.
//!
//! Used by the language guard to drop recognition results whose script
//! clearly mismatches the expected language (a cloud recognizer fed noisy
//! audio occasionally hallucinates text in the wrong language).

use std::collections::HashMap;

/// Count characters per script family.
pub fn script_counts(text: &str) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::from([("zh", 0), ("ja", 0), ("ko", 0), ("en", 0)]);
    for ch in text.chars() {
        let code = ch as u32;
        let key = if (0xAC00..=0xD7AF).contains(&code) {
            "ko"
        } else if (0x3040..=0x30FF).contains(&code) {
            "ja"
        } else if (0x4E00..=0x9FFF).contains(&code) {
            "zh"
        } else if ch.is_ascii_alphabetic() {
            "en"
        } else {
            continue;
        };
        *counts.get_mut(key).unwrap() += 1;
    }
    counts
}

/// Detect the dominant script of a text.
///
/// Kana presence wins outright (Japanese text mixes kana and han). Returns
/// `"unknown"` for script-free text and `"mixed"` when no script clearly
/// dominates.
pub fn detect_language(text: &str) -> &'static str {
    let counts = script_counts(text);
    let total: usize = counts.values().sum();
    if total == 0 {
        return "unknown";
    }

    if counts["ja"] > 0 {
        return "ja";
    }

    let (&dominant, &dominant_count) = counts.iter().max_by_key(|&(_, &c)| c).unwrap();
    let mut sorted: Vec<usize> = counts.values().copied().collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let second = sorted[1];

    if dominant_count == 0 {
        return "unknown";
    }
    if second as f64 / dominant_count.max(1) as f64 > 0.5 {
        return "mixed";
    }
    dominant
}

/// Fraction of scripted characters that do NOT belong to the expected
/// language, 0.0 (all match) to 1.0 (none match).
pub fn mismatch_score(expected: &str, text: &str) -> f64 {
    let counts = script_counts(text);
    let total: usize = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    let expected_count = counts.get(expected).copied().unwrap_or(0);
    1.0 - (expected_count as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_chinese() {
        assert_eq!(detect_language("这是一段中文字幕"), "zh");
    }

    #[test]
    fn test_detect_japanese_by_kana() {
        assert_eq!(detect_language("これは日本語です"), "ja");
    }

    #[test]
    fn test_detect_english() {
        assert_eq!(detect_language("plain english text"), "en");
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect_language("123 456 ..."), "unknown");
    }

    #[test]
    fn test_mismatch_score() {
        assert_eq!(mismatch_score("zh", "全是中文"), 0.0);
        assert_eq!(mismatch_score("zh", "english only"), 1.0);
        assert_eq!(mismatch_score("zh", ""), 0.0);
    }
}
