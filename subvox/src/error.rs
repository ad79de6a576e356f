//! Engine-wide error types.

use thiserror::Error;

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider error (transient): {0}")]
    ProviderTransient(String),

    #[error("Provider error: {0}")]
    ProviderFatal(String),

    #[error("Media tool error: {0}")]
    MediaTool(String),

    #[error("{stage} timed out after {elapsed_ms} ms")]
    Timeout {
        stage: &'static str,
        elapsed_ms: u64,
    },

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task already finished with status {status}")]
    TaskAlreadyFinished { status: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Subtitle error: {0}")]
    Subtitle(#[from] subtitle_format::SubtitleError),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the retry policy applies to this error.
    ///
    /// Timeouts are retryable too, but only once; the retry helper tracks
    /// that separately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderTransient(_) | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::ProviderTransient("503".into()).is_transient());
        assert!(
            Error::Timeout {
                stage: "transcribe",
                elapsed_ms: 1000
            }
            .is_transient()
        );
        assert!(!Error::ProviderFatal("bad key".into()).is_transient());
        assert!(!Error::MediaTool("no stream".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }
}
