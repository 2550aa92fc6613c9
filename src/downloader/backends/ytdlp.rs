// yt-dlp backend - runs the native binary as a child process
//
// - One child process per attempt, addressed by its correlation id
// - Progress is parsed from `--newline` stdout lines
// - Termination requests are delivered over a oneshot per running process

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::oneshot;

use crate::downloader::config::{managed_bin_dir, ToolchainConfig};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{
    CorrelationId, ProgressEvent, UpdateChannel, UpdateStatus, VideoMetadata,
};
use crate::downloader::toolchain::binary_name;
use crate::downloader::traits::{MediaTool, ProgressCallback};
use crate::downloader::utils::{run_output_with_timeout, spawn_error};

const VERSION_TIMEOUT_SECS: u64 = 15;
const METADATA_TIMEOUT_SECS: u64 = 60;
const UPDATE_TIMEOUT_SECS: u64 = 180;

#[derive(Default)]
struct ProcessRegistry {
    running: HashMap<CorrelationId, oneshot::Sender<()>>,
    /// Termination requested before the process was registered. Sessions are
    /// single-flight, so only the latest request is kept.
    pending_cancel: Option<CorrelationId>,
}

pub struct YtDlpTool {
    binary: RwLock<PathBuf>,
    ffmpeg_path: Option<PathBuf>,
    processes: Mutex<ProcessRegistry>,
}

impl YtDlpTool {
    pub fn new(binary: PathBuf, ffmpeg_path: Option<PathBuf>) -> Self {
        Self {
            binary: RwLock::new(binary),
            ffmpeg_path,
            processes: Mutex::new(ProcessRegistry::default()),
        }
    }

    pub fn from_config(config: &ToolchainConfig) -> Self {
        let binary = locate_ytdlp(config).unwrap_or_else(|| PathBuf::from(binary_name()));
        tracing::info!("[yt-dlp] Using binary {}", binary.display());
        Self::new(binary, config.ffmpeg_path.clone())
    }

    pub fn binary(&self) -> PathBuf {
        self.binary.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Point the tool at a different binary (e.g. a freshly installed one)
    pub fn set_binary(&self, path: PathBuf) {
        tracing::info!("[yt-dlp] Switching binary to {}", path.display());
        *self.binary.write().unwrap_or_else(|e| e.into_inner()) = path;
    }

    fn program(&self) -> String {
        self.binary().to_string_lossy().to_string()
    }

    fn registry(&self) -> MutexGuard<'_, ProcessRegistry> {
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, process_id: &CorrelationId) -> Result<oneshot::Receiver<()>, DownloadError> {
        let mut registry = self.registry();
        if registry.pending_cancel.as_ref() == Some(process_id) {
            registry.pending_cancel = None;
            return Err(DownloadError::Tool(format!(
                "yt-dlp process {} was cancelled before start",
                process_id
            )));
        }
        let (tx, rx) = oneshot::channel();
        registry.running.insert(process_id.clone(), tx);
        Ok(rx)
    }

    fn unregister(&self, process_id: &CorrelationId) {
        self.registry().running.remove(process_id);
    }

    pub fn is_running(&self, process_id: &CorrelationId) -> bool {
        self.registry().running.contains_key(process_id)
    }

    fn command_args(&self, args: &[String]) -> Vec<String> {
        let mut full = vec!["--newline".to_string()];
        if let Some(ffmpeg) = &self.ffmpeg_path {
            full.push("--ffmpeg-location".to_string());
            full.push(ffmpeg.to_string_lossy().to_string());
        }
        full.extend(args.iter().cloned());
        full
    }
}

/// Find a yt-dlp binary: configured path, managed install, common paths, then PATH
pub fn locate_ytdlp(config: &ToolchainConfig) -> Option<PathBuf> {
    if let Some(path) = &config.ytdlp_path {
        if path.exists() {
            return Some(path.clone());
        }
        tracing::warn!("[yt-dlp] Configured path {} does not exist", path.display());
    }

    if let Some(managed) = managed_bin_dir().map(|d| d.join(binary_name())) {
        if managed.exists() {
            return Some(managed);
        }
    }

    let common_paths = [
        "/opt/homebrew/bin/yt-dlp", // Homebrew on Apple Silicon
        "/usr/local/bin/yt-dlp",    // Homebrew on Intel Mac
        "/usr/bin/yt-dlp",          // System installation
    ];
    for path in common_paths {
        if Path::new(path).exists() {
            return Some(PathBuf::from(path));
        }
    }

    let finder = if cfg!(target_os = "windows") { "where" } else { "which" };
    let output = std::process::Command::new(finder).arg("yt-dlp").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(PathBuf::from)
}

/// Parse a yt-dlp progress line like:
/// [download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32 (frag 29/454)
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    lazy_static::lazy_static! {
        static ref PERCENT_RE: Regex = Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").unwrap();
        static ref ETA_RE: Regex = Regex::new(r"ETA\s+(\d+(?::\d+)*)").unwrap();
    }

    let caps = PERCENT_RE.captures(line)?;
    let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
    let eta = ETA_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_eta(m.as_str()));

    Some(ProgressEvent::new(percent, eta))
}

/// "12:32" -> 752, "1:02:03" -> 3723
fn parse_eta(eta: &str) -> Option<i64> {
    eta.split(':')
        .try_fold(0i64, |acc, part| part.parse::<i64>().ok().map(|v| acc * 60 + v))
}

/// Short failure reason from stderr: ERROR lines first, then the last non-empty line
pub fn summarize_failure(stderr_lines: &[String], status: Option<ExitStatus>) -> String {
    let errors: Vec<&str> = stderr_lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.starts_with("ERROR:"))
        .take(2)
        .collect();
    if !errors.is_empty() {
        return errors.join(" | ");
    }

    if let Some(last) = stderr_lines.iter().rev().map(|l| l.trim()).find(|l| !l.is_empty()) {
        return last.to_string();
    }

    match status {
        Some(status) => format!("yt-dlp exited with {}", status),
        None => "yt-dlp failed without output".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

fn parse_metadata(stdout: &[u8]) -> Result<VideoMetadata, DownloadError> {
    let json_str = String::from_utf8_lossy(stdout);
    let raw: RawInfo = serde_json::from_str(json_str.trim())
        .map_err(|e| DownloadError::Parse(format!("Failed to parse JSON: {}", e)))?;

    Ok(VideoMetadata {
        title: raw.title.unwrap_or_else(|| "Unknown".to_string()),
        uploader_name: raw.uploader.or(raw.channel),
        duration_seconds: raw.duration.filter(|d| *d >= 0.0).map(|d| d as u64),
        width: raw.width,
        height: raw.height,
    })
}

fn parse_update_output(stdout: &str) -> UpdateStatus {
    if stdout.contains("is up to date") {
        UpdateStatus::AlreadyUpToDate
    } else if stdout.contains("Updated yt-dlp to") {
        UpdateStatus::Done
    } else {
        UpdateStatus::Other(stdout.trim().to_string())
    }
}

#[async_trait]
impl MediaTool for YtDlpTool {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn version(&self) -> Result<String, DownloadError> {
        let program = self.program();
        let output =
            run_output_with_timeout(&program, vec!["--version".to_string()], VERSION_TIMEOUT_SECS)
                .await?;
        if !output.status.success() {
            return Err(DownloadError::ToolNotFound(format!(
                "{} --version exited with {}",
                program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn execute(
        &self,
        args: &[String],
        process_id: &CorrelationId,
        on_progress: ProgressCallback,
    ) -> Result<(), DownloadError> {
        let mut cancel_rx = self.register(process_id)?;
        let program = self.program();

        tracing::info!("[yt-dlp] Starting process {}", process_id);
        tracing::debug!("[yt-dlp] {} {:?}", program, args);

        let spawned = TokioCommand::new(&program)
            .args(self.command_args(args))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.unregister(process_id);
                return Err(spawn_error(&program, e));
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(progress) = parse_progress_line(&line) {
                    on_progress(progress);
                }
                if line.contains("[Merger]") || line.contains("Destination") {
                    tracing::debug!("[yt-dlp] {}", line);
                }
            }
        });
        let stderr_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            let Some(stderr) = stderr else { return collected };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        let outcome = tokio::select! {
            status = child.wait() => Some(status),
            _ = &mut cancel_rx => None,
        };
        self.unregister(process_id);

        let status = match outcome {
            Some(status) => status?,
            None => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                tracing::info!("[yt-dlp] Process {} terminated on request", process_id);
                return Err(DownloadError::Tool(format!(
                    "yt-dlp process {} was cancelled",
                    process_id
                )));
            }
        };

        let _ = stdout_task.await;
        let stderr_lines = stderr_task.await.unwrap_or_default();

        if status.success() {
            tracing::info!("[yt-dlp] Process {} finished", process_id);
            return Ok(());
        }

        let reason = summarize_failure(&stderr_lines, Some(status));
        tracing::warn!("[yt-dlp] Process {} failed: {}", process_id, reason);
        Err(DownloadError::Tool(reason))
    }

    fn destroy_process(&self, process_id: &CorrelationId) -> Result<(), DownloadError> {
        let mut registry = self.registry();
        match registry.running.remove(process_id) {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => {
                tracing::debug!("[yt-dlp] {} not running yet, cancel deferred", process_id);
                registry.pending_cancel = Some(process_id.clone());
            }
        }
        Ok(())
    }

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, DownloadError> {
        let args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--skip-download".to_string(),
            url.to_string(),
        ];
        let output = run_output_with_timeout(&self.program(), args, METADATA_TIMEOUT_SECS).await?;
        if !output.status.success() {
            let stderr: Vec<String> = String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string)
                .collect();
            return Err(DownloadError::Tool(summarize_failure(&stderr, Some(output.status))));
        }
        parse_metadata(&output.stdout)
    }

    async fn update(&self, channel: UpdateChannel) -> Result<UpdateStatus, DownloadError> {
        let args = vec!["--update-to".to_string(), channel.as_str().to_string()];
        let output = run_output_with_timeout(&self.program(), args, UPDATE_TIMEOUT_SECS).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            let stderr: Vec<String> = String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string)
                .collect();
            return Err(DownloadError::Tool(summarize_failure(&stderr, Some(output.status))));
        }
        Ok(parse_update_output(&stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_parse_progress_with_eta() {
        let p = parse_progress_line(
            "[download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32 (frag 29/454)",
        )
        .unwrap();
        assert!((p.percent - 6.2).abs() < f32::EPSILON);
        assert_eq!(p.eta_seconds, Some(752));
    }

    #[test]
    fn test_parse_progress_without_eta() {
        let p = parse_progress_line("[download] 100% of   12.00MiB in 00:00:03 at 3.9MiB/s").unwrap();
        assert_eq!(p.percent, 100.0);
        assert_eq!(p.eta_seconds, None);

        let p = parse_progress_line("[download]  45.0% of 10.00MiB at 1.00MiB/s ETA Unknown").unwrap();
        assert_eq!(p.eta_seconds, None);
    }

    #[test]
    fn test_non_progress_lines_ignored() {
        assert!(parse_progress_line("[download] Destination: /tmp/a.mp4").is_none());
        assert!(parse_progress_line("[youtube] abc: Downloading webpage").is_none());
    }

    #[test]
    fn test_parse_eta_hours() {
        assert_eq!(parse_eta("1:02:03"), Some(3723));
        assert_eq!(parse_eta("00:00"), Some(0));
        assert_eq!(parse_eta("soon"), None);
    }

    #[test]
    fn test_summarize_prefers_error_lines() {
        let lines = vec![
            "WARNING: something".to_string(),
            "ERROR: [youtube] abc: HTTP Error 403: Forbidden".to_string(),
            "trailing".to_string(),
        ];
        assert_eq!(
            summarize_failure(&lines, None),
            "ERROR: [youtube] abc: HTTP Error 403: Forbidden"
        );

        let lines = vec!["first".to_string(), "last line".to_string(), "  ".to_string()];
        assert_eq!(summarize_failure(&lines, None), "last line");
        assert_eq!(summarize_failure(&[], None), "yt-dlp failed without output");
    }

    #[test]
    fn test_parse_metadata() {
        let json = br#"{"title":"Demo","channel":"Chan","duration":125.4,"width":1280,"height":720,"formats":[]}"#;
        let meta = parse_metadata(json).unwrap();
        assert_eq!(meta.title, "Demo");
        assert_eq!(meta.uploader_name.as_deref(), Some("Chan"));
        assert_eq!(meta.duration_seconds, Some(125));
        assert_eq!(meta.height, Some(720));

        assert!(matches!(parse_metadata(b"nope"), Err(DownloadError::Parse(_))));
    }

    #[test]
    fn test_parse_update_output() {
        assert_eq!(
            parse_update_output("Latest version: nightly@2024.08.06\nyt-dlp is up to date (nightly@2024.08.06)"),
            UpdateStatus::AlreadyUpToDate
        );
        assert_eq!(
            parse_update_output("Updated yt-dlp to nightly@2024.08.07"),
            UpdateStatus::Done
        );
        assert!(matches!(parse_update_output("something else"), UpdateStatus::Other(_)));
    }

    #[test]
    fn test_deferred_cancel_rejects_start() {
        let tool = YtDlpTool::new(PathBuf::from("yt-dlp"), None);
        let id = CorrelationId::from("download_1_0");
        tool.destroy_process(&id).unwrap();

        let err = tool.register(&id).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(tool.register(&id).is_ok());
    }

    #[test]
    fn test_deferred_cancel_keeps_only_latest() {
        let tool = YtDlpTool::new(PathBuf::from("yt-dlp"), None);
        let stale = CorrelationId::from("download_1_0");
        let latest = CorrelationId::from("download_1_1");
        tool.destroy_process(&stale).unwrap();
        tool.destroy_process(&latest).unwrap();

        assert_eq!(tool.registry().pending_cancel.as_ref(), Some(&latest));
        assert!(tool.register(&stale).is_ok());
        assert!(tool.register(&latest).is_err());
        assert!(tool.registry().pending_cancel.is_none());
    }

    #[test]
    fn test_ffmpeg_location_prepended() {
        let tool = YtDlpTool::new(PathBuf::from("yt-dlp"), Some(PathBuf::from("/opt/ffmpeg")));
        let args = tool.command_args(&["https://youtu.be/x".to_string()]);
        assert_eq!(args[0], "--newline");
        assert_eq!(args[1], "--ffmpeg-location");
        assert_eq!(args.last().map(|s| s.as_str()), Some("https://youtu.be/x"));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_streams_progress() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(
            dir.path(),
            "echo '[download]  10.0% of 10.00MiB at 1.00MiB/s ETA 00:09'\necho '[download] 100% of 10.00MiB'",
        );
        let tool = YtDlpTool::new(bin, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        tool.execute(
            &[],
            &CorrelationId::mint(),
            Arc::new(move |p| sink.lock().unwrap().push(p.percent)),
        )
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![10.0, 100.0]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_failure_reports_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "echo 'ERROR: Unsupported URL: x' >&2\nexit 1");
        let tool = YtDlpTool::new(bin, None);

        let err = tool
            .execute(&[], &CorrelationId::mint(), Arc::new(|_| {}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ERROR: Unsupported URL: x");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_destroy_process_terminates_child() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "sleep 30");
        let tool = Arc::new(YtDlpTool::new(bin, None));
        let id = CorrelationId::mint();

        let runner = {
            let tool = tool.clone();
            let id = id.clone();
            tokio::spawn(async move { tool.execute(&[], &id, Arc::new(|_| {})).await })
        };
        while !tool.is_running(&id) {
            tokio::task::yield_now().await;
        }
        tool.destroy_process(&id).unwrap();

        let err = runner.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("cancel"));
    }
}
