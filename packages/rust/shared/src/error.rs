//! Error types for paperpipe.
//!
//! Library crates use [`PaperPipeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all paperpipe operations.
#[derive(Debug, thiserror::Error)]
pub enum PaperPipeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error that is not tied to a single record's fetch.
    #[error("network error: {0}")]
    Network(String),

    /// Bad or missing input on a record (no source URL, unsafe id, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The binary fetch gave up after exhausting its retries.
    #[error("download failed for {paper_id}: {reason}")]
    Acquisition { paper_id: String, reason: String },

    /// The binary could not be turned into text.
    #[error("conversion failed for {paper_id}: {reason}")]
    Transformation { paper_id: String, reason: String },

    /// Index, log, or artifact store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PaperPipeError>;

impl PaperPipeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an acquisition error for a record.
    pub fn acquisition(paper_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Acquisition {
            paper_id: paper_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a transformation error for a record.
    pub fn transformation(paper_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transformation {
            paper_id: paper_id.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for PaperPipeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PaperPipeError::config("missing base_dir");
        assert_eq!(err.to_string(), "config error: missing base_dir");

        let err = PaperPipeError::acquisition("p1", "HTTP 503");
        assert_eq!(err.to_string(), "download failed for p1: HTTP 503");
    }
}
