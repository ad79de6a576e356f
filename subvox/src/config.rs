//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;

/// Configuration for the pipeline engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum tasks processed concurrently.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Recognition workers per task.
    #[serde(default = "default_recognition_max_workers")]
    pub recognition_max_workers: usize,
    /// Subtitle entries per translation request.
    #[serde(default = "default_translation_batch_size")]
    pub translation_batch_size: usize,
    /// Translation batches in flight per task.
    #[serde(default = "default_translation_max_workers")]
    pub translation_max_workers: usize,
    /// Network-bound sub-work permits shared across all tasks.
    #[serde(default = "default_network_total_permits")]
    pub network_total_permits: usize,

    /// Default recognition language.
    #[serde(default = "default_asr_language")]
    pub asr_language: String,
    /// Drop recognized text whose script mismatches the expected language.
    #[serde(default)]
    pub language_guard: bool,
    /// Default translation target language.
    #[serde(default = "default_translation_target_lang")]
    pub translation_target_lang: String,

    /// Speech segments shorter than this are discarded (seconds).
    #[serde(default = "default_min_speech_duration_secs")]
    pub min_speech_duration_secs: f64,
    /// Speech segments longer than this are split (seconds).
    #[serde(default = "default_max_speech_duration_secs")]
    pub max_speech_duration_secs: f64,
    /// Merge neighboring cues whose gap is at or below this (seconds).
    #[serde(default = "default_merge_threshold_secs")]
    pub merge_threshold_secs: f64,
    /// Maximum merged cue length in characters; 0 disables the limit.
    #[serde(default = "default_max_subtitle_chars")]
    pub max_subtitle_chars: usize,

    /// Retry policy for transient provider errors.
    #[serde(default = "default_retry_policy")]
    pub retry: RetryPolicy,
    /// Per-call provider timeout in seconds; 0 disables.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Grace period before a cancelled pipeline is force-aborted (ms).
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Progress bus channel capacity per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrent_tasks() -> usize {
    3
}

fn default_recognition_max_workers() -> usize {
    2
}

fn default_translation_batch_size() -> usize {
    20
}

fn default_translation_max_workers() -> usize {
    3
}

fn default_network_total_permits() -> usize {
    6
}

fn default_asr_language() -> String {
    "zh".to_string()
}

fn default_translation_target_lang() -> String {
    "en".to_string()
}

fn default_min_speech_duration_secs() -> f64 {
    0.1
}

fn default_max_speech_duration_secs() -> f64 {
    5.0
}

fn default_merge_threshold_secs() -> f64 {
    0.5
}

fn default_max_subtitle_chars() -> usize {
    30
}

fn default_retry_policy() -> RetryPolicy {
    RetryPolicy::default()
}

fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_cancel_grace_ms() -> u64 {
    5000
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            recognition_max_workers: default_recognition_max_workers(),
            translation_batch_size: default_translation_batch_size(),
            translation_max_workers: default_translation_max_workers(),
            network_total_permits: default_network_total_permits(),
            asr_language: default_asr_language(),
            language_guard: false,
            translation_target_lang: default_translation_target_lang(),
            min_speech_duration_secs: default_min_speech_duration_secs(),
            max_speech_duration_secs: default_max_speech_duration_secs(),
            merge_threshold_secs: default_merge_threshold_secs(),
            max_subtitle_chars: default_max_subtitle_chars(),
            retry: default_retry_policy(),
            stage_timeout_secs: default_stage_timeout_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.translation_batch_size, 20);
        assert_eq!(config.translation_max_workers, 3);
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_concurrent_tasks": 5}"#).unwrap();
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.translation_batch_size, 20);
    }
}
