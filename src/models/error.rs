//! Error types for siftline.
//!
//! Two levels:
//! - `SiftError`: run-level failures that abort a stage (unreadable input, unwritable output)
//! - `CallError`: a single external call failed; always recovered into an Outcome field

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for siftline.
#[derive(Debug, Error)]
pub enum SiftError {
    // ═══════════════════════════════════════════════════════════════════
    // SETUP: the run cannot start or cannot keep its durability promise
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // ═══════════════════════════════════════════════════════════════════
    // INVARIANT: should not happen
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SiftError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Failure of one external call (model, search, page fetch).
///
/// Never aborts a record: the stage plug-in turns it into placeholder fields
/// and an error description on the Outcome.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("{label} timed out after {after:?}")]
    Timeout { label: String, after: Duration },

    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CallError {
    /// Whether the call was cut off by the per-call timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Result type alias for siftline.
pub type Result<T> = std::result::Result<T, SiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_context() {
        let err = SiftError::io(
            "opening input dataset",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.to_string(), "IO error: opening input dataset");
    }

    #[test]
    fn test_timeout_detection() {
        let err = CallError::Timeout {
            label: "theme".to_string(),
            after: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert!(!CallError::Network("reset".to_string()).is_timeout());
    }
}
