// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for mediasort

use thiserror::Error;

/// Result type alias for mediasort operations
pub type Result<T> = std::result::Result<T, SortError>;

/// mediasort error types
///
/// Per-file failures are captured in a [`crate::pipeline::FileOutcome`] and never
/// abort a run; only setup failures (config, scanning the source) propagate out
/// of [`crate::pipeline::Scheduler::run`].
#[derive(Error, Debug)]
pub enum SortError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Media preparation failed: {0}")]
    MediaPrepFailed(String),

    #[error("API key is not configured")]
    AuthMissing,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Could not interpret model response: {0}")]
    Parse(String),

    #[error("Organize failed: {0}")]
    OrganizeFailed(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl SortError {
    /// Short stable label used in log events and the error-export sidecar
    pub fn kind(&self) -> &'static str {
        match self {
            SortError::Config(_) => "config",
            SortError::NotFound(_) => "not_found",
            SortError::AlreadyProcessed(_) => "already_processed",
            SortError::MediaPrepFailed(_) => "media_prep_failed",
            SortError::AuthMissing => "auth_missing",
            SortError::Transport(_) => "transport",
            SortError::Server { .. } => "server",
            SortError::Unavailable(_) => "unavailable",
            SortError::Parse(_) => "parse",
            SortError::OrganizeFailed(_) => "organize_failed",
            SortError::Scan(_) => "scan",
            SortError::FileSystem(_) => "filesystem",
            SortError::Database(_) => "database",
            SortError::Json(_) => "json",
            SortError::Image(_) => "image",
        }
    }

    /// Only transport and server failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, SortError::Transport(_) | SortError::Server { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(SortError::Transport("timeout".into()).is_retryable());
        assert!(SortError::Server { status: 503, body: "busy".into() }.is_retryable());
        assert!(!SortError::AuthMissing.is_retryable());
        assert!(!SortError::Parse("empty".into()).is_retryable());
    }

    #[test]
    fn test_server_error_message_carries_status_and_body() {
        let err = SortError::Server { status: 429, body: "rate limited".into() };
        assert_eq!(err.to_string(), "HTTP 429: rate limited");
        assert_eq!(err.kind(), "server");
    }
}
