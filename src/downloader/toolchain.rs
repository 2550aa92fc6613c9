// Toolchain lifecycle gate
//
// The external binaries must be verified before any orchestration call.
// Calls made before init() or after teardown() fail with NotReady.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::backends::ytdlp::{locate_ytdlp, YtDlpTool};
use super::config::{managed_bin_dir, ToolchainConfig};
use super::errors::DownloadError;
use super::traits::MediaTool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainInfo {
    pub tool: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainState {
    Uninitialized,
    Ready(ToolchainInfo),
    TornDown,
}

#[derive(Debug)]
pub struct Toolchain {
    state: RwLock<ToolchainState>,
}

impl Toolchain {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ToolchainState::Uninitialized),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ToolchainState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ToolchainState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Verify the tool responds and open the gate
    pub async fn init(&self, tool: &dyn MediaTool) -> Result<ToolchainInfo, DownloadError> {
        let version = tool.version().await.map_err(|e| {
            tracing::error!("[Toolchain] {} failed to initialize: {}", tool.name(), e);
            e
        })?;

        let info = ToolchainInfo {
            tool: tool.name().to_string(),
            version,
        };
        tracing::info!("[Toolchain] {} {} initialized", info.tool, info.version);
        *self.write() = ToolchainState::Ready(info.clone());
        Ok(info)
    }

    pub fn teardown(&self) {
        tracing::info!("[Toolchain] Torn down");
        *self.write() = ToolchainState::TornDown;
    }

    pub fn state(&self) -> ToolchainState {
        self.read().clone()
    }

    pub fn ensure_ready(&self) -> Result<(), DownloadError> {
        match &*self.read() {
            ToolchainState::Ready(_) => Ok(()),
            ToolchainState::Uninitialized => Err(DownloadError::NotReady(
                "toolchain is still initializing".to_string(),
            )),
            ToolchainState::TornDown => {
                Err(DownloadError::NotReady("toolchain has been shut down".to_string()))
            }
        }
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::new()
    }
}

/// Release asset of the standalone yt-dlp binary for this platform
pub fn release_asset_url() -> &'static str {
    if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else if cfg!(target_arch = "aarch64") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux_aarch64"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux"
    }
}

pub fn binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

/// Download the standalone yt-dlp binary into `dir`
pub async fn install_ytdlp(dir: &Path) -> Result<PathBuf, DownloadError> {
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(binary_name());
    let url = release_asset_url();

    tracing::info!("[Toolchain] Installing yt-dlp from {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| DownloadError::Install(format!("Failed to build HTTP client: {}", e)))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DownloadError::Install(format!("Failed to download yt-dlp: {}", e)))?;

    if !response.status().is_success() {
        return Err(DownloadError::Install(format!(
            "Failed to download yt-dlp: HTTP {}",
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DownloadError::Install(format!("Failed to read yt-dlp download: {}", e)))?;
    tokio::fs::write(&target, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(&target, perms).await?;
    }

    tracing::info!("[Toolchain] yt-dlp installed at {}", target.display());
    Ok(target)
}

/// Make sure `tool` points at a usable binary, installing one when allowed
pub async fn prepare_ytdlp(tool: &YtDlpTool, config: &ToolchainConfig) -> Result<(), DownloadError> {
    if locate_ytdlp(config).is_some() {
        return Ok(());
    }
    if !config.auto_install {
        tracing::warn!("[Toolchain] yt-dlp not found and auto-install is disabled");
        return Ok(());
    }

    let dir = managed_bin_dir()
        .ok_or_else(|| DownloadError::Install("Could not determine data directory".to_string()))?;
    let path = install_ytdlp(&dir).await?;
    tool.set_binary(path);
    Ok(())
}
