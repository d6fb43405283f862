//! Error types for podtagger.
//!
//! Library crates use [`PodtaggerError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all podtagger operations.
#[derive(Debug, thiserror::Error)]
pub enum PodtaggerError {
    /// Configuration loading or validation error. Always fatal.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport failure talking to the feed or the language model.
    #[error("network error: {0}")]
    Network(String),

    /// Feed or model reply could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Persisted state could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// The language model answered, but not with something usable.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (empty input, schema mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PodtaggerError>;

impl PodtaggerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure happened before the remote side answered
    /// (unreachable host, timeout, connection reset).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
