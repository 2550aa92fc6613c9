// Common data models for the download orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static CORRELATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Caller-assigned token targeting one running external-tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh id. The sequence suffix keeps ids minted in the same millisecond distinct.
    pub fn mint() -> Self {
        let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let seq = CORRELATION_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("download_{}_{}", millis, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upper bound on the video stream resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoQuality {
    Best,
    MaxHeight(u32),
}

impl VideoQuality {
    /// `0` means "no bound", matching the quality picker's "Best" entry.
    pub fn from_height(height: u32) -> Self {
        if height == 0 {
            Self::Best
        } else {
            Self::MaxHeight(height)
        }
    }
}

impl Default for VideoQuality {
    fn default() -> Self {
        Self::MaxHeight(720)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadMode {
    Video(VideoQuality),
    Audio,
}

impl DownloadMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Video(_) => "video",
            Self::Audio => "audio",
        }
    }
}

/// Input of a single download attempt. A new value is built for every retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub source_url: String,
    pub mode: DownloadMode,
    pub output_directory: PathBuf,
    pub attempt: u32,
}

impl DownloadRequest {
    pub fn new(source_url: impl Into<String>, mode: DownloadMode, output_directory: PathBuf) -> Self {
        Self {
            source_url: source_url.into(),
            mode,
            output_directory,
            attempt: 1,
        }
    }

    pub fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    FetchingInfo,
    Downloading,
    Cancelling,
    Succeeded,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::FetchingInfo | Self::Downloading | Self::Cancelling)
    }
}

/// Mutable orchestration state, exposed to callers as snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSession {
    pub correlation_id: CorrelationId,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub status: SessionStatus,
}

impl DownloadSession {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            attempt_count: 0,
            last_error: None,
            status: SessionStatus::Idle,
        }
    }
}

impl Default for DownloadSession {
    fn default() -> Self {
        Self::new(CorrelationId::mint())
    }
}

/// Download progress reported by the external process
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: f32,
    pub eta_seconds: Option<u64>,
}

impl ProgressEvent {
    pub fn new(percent: f32, eta_seconds: Option<i64>) -> Self {
        Self {
            percent: if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) },
            eta_seconds: eta_seconds.filter(|s| *s > 0).map(|s| s as u64),
        }
    }
}

/// Video information for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub uploader_name: Option<String>,
    pub duration_seconds: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoMetadata {
    pub fn formatted_duration(&self) -> Option<String> {
        self.duration_seconds
            .map(|secs| format!("{}:{:02}", secs / 60, secs % 60))
    }

    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    Stable,
    #[default]
    Nightly,
}

impl UpdateChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Nightly => "nightly",
        }
    }
}

/// Outcome of an extractor self-update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStatus {
    Done,
    AlreadyUpToDate,
    Other(String),
}
