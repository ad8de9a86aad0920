use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the Storyrank system.
///
/// Subsystem crates define their own error types (feed, embedding) and
/// implement `From<SubsystemError> for StoryrankError` so that `?` works
/// across crate boundaries. The first five variants after `Config` are the
/// failure classes the ingestion loop reacts to.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoryrankError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller error. Never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Upstream hiccup that is expected to clear within seconds.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Upstream rate or quota limit. Clears on the order of minutes.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The feed could not be reached at all.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<toml::de::Error> for StoryrankError {
    fn from(err: toml::de::Error) -> Self {
        StoryrankError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for StoryrankError {
    fn from(err: serde_json::Error) -> Self {
        StoryrankError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Storyrank operations.
pub type Result<T> = std::result::Result<T, StoryrankError>;
