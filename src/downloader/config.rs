// Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::errors::DownloadError;
use super::models::UpdateChannel;

pub const MAX_RETRIES: u32 = 3;
pub const RETRY_BACKOFF_SECS: u64 = 3;

const APP_DIR: &str = "simple-yt-downloader";
const OUTPUT_SUBDIR: &str = "SimpleYTDownloader";

/// Retry loop and reporting options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Attempts per download, 1-indexed
    pub max_retries: u32,
    /// Fixed delay before a retry. No growth, no jitter.
    pub retry_backoff_secs: u64,
    /// Run the extractor self-update before every download
    pub update_before_download: bool,
    pub update_channel: UpdateChannel,
    /// Fetch metadata on the first attempt for display
    pub fetch_metadata: bool,
    /// Publish informational log lines to the observer
    pub verbose: bool,
    /// Bound of the event queue; oldest progress events are dropped beyond it
    pub progress_capacity: usize,
    pub output_directory: Option<PathBuf>,
    pub tool: ToolFlags,
    pub toolchain: ToolchainConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_backoff_secs: RETRY_BACKOFF_SECS,
            update_before_download: true,
            update_channel: UpdateChannel::Nightly,
            fetch_metadata: true,
            verbose: true,
            progress_capacity: 64,
            output_directory: None,
            tool: ToolFlags::default(),
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    /// Configured output directory, or `<Downloads>/SimpleYTDownloader`
    pub fn resolve_output_directory(&self) -> PathBuf {
        self.output_directory.clone().unwrap_or_else(default_output_directory)
    }

    fn validate(self) -> Result<Self, DownloadError> {
        if self.max_retries == 0 {
            return Err(DownloadError::Config("max_retries must be at least 1".to_string()));
        }
        if self.progress_capacity == 0 {
            return Err(DownloadError::Config("progress_capacity must be at least 1".to_string()));
        }
        Ok(self)
    }
}

/// Flags passed to yt-dlp on every download attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolFlags {
    pub retries: u32,
    pub fragment_retries: u32,
    pub file_access_retries: u32,
    pub extractor_retries: u32,
    pub socket_timeout_secs: u32,
    pub http_chunk_size: String,
    /// Comma-separated YouTube player clients
    pub player_clients: String,
    pub user_agent: String,
    pub filename_max_len: u32,
    pub audio_format: String,
    pub audio_quality: String,
    pub merge_output_format: String,
}

impl Default for ToolFlags {
    fn default() -> Self {
        Self {
            retries: 10,
            fragment_retries: 10,
            file_access_retries: 3,
            extractor_retries: 5,
            socket_timeout_secs: 30,
            http_chunk_size: "10M".to_string(),
            // mweb does not need a PO token
            player_clients: "mweb,android,ios".to_string(),
            user_agent: "Mozilla/5.0 (Linux; Android 14) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Mobile Safari/537.36".to_string(),
            filename_max_len: 100,
            audio_format: "mp3".to_string(),
            audio_quality: "0".to_string(),
            merge_output_format: "mp4".to_string(),
        }
    }
}

/// Where to find (or install) the external binaries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    /// Download the standalone yt-dlp release when no binary is found
    pub auto_install: bool,
}

pub fn default_output_directory() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(OUTPUT_SUBDIR)
}

pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json"))
}

/// Directory for binaries installed by the toolchain
pub fn managed_bin_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR).join("bin"))
}

/// Load config from the default location, falling back to defaults when absent.
pub fn load_config() -> Result<OrchestratorConfig, DownloadError> {
    let config = match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path)?,
        _ => OrchestratorConfig::default(),
    };
    Ok(apply_env_overrides(config))
}

pub fn load_config_from(path: &Path) -> Result<OrchestratorConfig, DownloadError> {
    let content = std::fs::read_to_string(path)?;
    let config: OrchestratorConfig = serde_json::from_str(&content)
        .map_err(|e| DownloadError::Config(format!("{}: {}", path.display(), e)))?;
    tracing::info!("[Config] Loaded {}", path.display());
    config.validate()
}

// Allow overriding binaries, e.g. export YTDLP_PATH="/path/to/yt-dlp"
fn apply_env_overrides(mut config: OrchestratorConfig) -> OrchestratorConfig {
    if let Ok(path) = std::env::var("YTDLP_PATH") {
        config.toolchain.ytdlp_path = Some(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var("FFMPEG_PATH") {
        config.toolchain.ffmpeg_path = Some(PathBuf::from(path));
    }
    config
}
