// Error types for the download orchestrator

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker that a tool error message carries when the process was terminated on request.
pub const CANCEL_MARKER: &str = "cancel";

/// Keywords that mark an error message as a transient network failure.
pub const NETWORK_ERROR_KEYWORDS: &[&str] = &[
    "ssl",
    "eof",
    "connection",
    "timeout",
    "reset",
    "network",
    "http",
    "socket",
    "broken pipe",
    "403",
    "forbidden",
];

#[derive(Debug, Error)]
pub enum DownloadError {
    /// A download session is already active
    #[error("A download is already running")]
    AlreadyRunning,

    /// Toolchain was not initialized or has been torn down
    #[error("Toolchain not ready: {0}")]
    NotReady(String),

    /// User-initiated termination (terminal, not a failure)
    #[error("Download cancelled: {0}")]
    Cancelled(String),

    /// Network-level failure, retried up to the bound
    #[error("Network error: {0}")]
    NetworkTransient(String),

    /// Non-network failure or retries exhausted
    #[error("Download failed: {0}")]
    Fatal(String),

    /// Raw failure reported by the external tool. Displayed verbatim so it can be classified.
    #[error("{0}")]
    Tool(String),

    /// yt-dlp or ffmpeg not found
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Failed to parse yt-dlp output
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to fetch the tool binary
    #[error("Install error: {0}")]
    Install(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Cancelled(_) => ErrorClass::Cancelled,
            Self::NetworkTransient(_) => ErrorClass::NetworkTransient,
            Self::AlreadyRunning | Self::NotReady(_) | Self::Fatal(_) => ErrorClass::Fatal,
            other => ErrorClass::of(&other.to_string()),
        }
    }
}

/// How an attempt failure affects the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Cancelled,
    NetworkTransient,
    Fatal,
}

impl ErrorClass {
    /// Classify an error message. The cancellation marker wins over network keywords.
    pub fn of(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains(CANCEL_MARKER) {
            return Self::Cancelled;
        }

        if NETWORK_ERROR_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return Self::NetworkTransient;
        }

        Self::Fatal
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkTransient)
    }
}

/// Truncate an error message for display, on a char boundary.
pub fn truncate_for_display(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut out: String = message.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_keywords() {
        assert_eq!(ErrorClass::of("Connection reset by peer"), ErrorClass::NetworkTransient);
        assert_eq!(ErrorClass::of("ERROR: HTTP Error 403: Forbidden"), ErrorClass::NetworkTransient);
        assert_eq!(ErrorClass::of("[SSL: UNEXPECTED_EOF_WHILE_READING]"), ErrorClass::NetworkTransient);
        assert_eq!(ErrorClass::of("Read timed out. (read timeout=30)"), ErrorClass::NetworkTransient);
        assert_eq!(ErrorClass::of("[Errno 32] Broken pipe"), ErrorClass::NetworkTransient);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(ErrorClass::of("SOCKET CLOSED"), ErrorClass::NetworkTransient);
        assert_eq!(ErrorClass::of("Process Cancelled"), ErrorClass::Cancelled);
    }

    #[test]
    fn test_cancel_wins_over_network() {
        assert_eq!(
            ErrorClass::of("connection closed: process was cancelled"),
            ErrorClass::Cancelled
        );
    }

    #[test]
    fn test_fatal_fallback() {
        assert_eq!(ErrorClass::of("disk full"), ErrorClass::Fatal);
        assert_eq!(ErrorClass::of("Unsupported URL: foo"), ErrorClass::Fatal);
        assert!(!ErrorClass::Fatal.is_retryable());
        assert!(ErrorClass::NetworkTransient.is_retryable());
    }

    #[test]
    fn test_error_class_of_variants() {
        assert_eq!(
            DownloadError::Tool("Connection reset by peer".into()).class(),
            ErrorClass::NetworkTransient
        );
        assert_eq!(DownloadError::Tool("disk full".into()).class(), ErrorClass::Fatal);
        assert_eq!(
            DownloadError::Tool("yt-dlp process x was cancelled".into()).class(),
            ErrorClass::Cancelled
        );
        assert_eq!(DownloadError::AlreadyRunning.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate_for_display("short", 10), "short");
        assert_eq!(truncate_for_display("абвгдеёжзи", 3), "абв...");
    }
}
