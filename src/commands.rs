// Tauri plugin surface: commands, webview events and system notifications

use std::path::PathBuf;
use std::sync::Arc;

use tauri::plugin::{Builder, TauriPlugin};
use tauri::{AppHandle, Emitter, Manager, RunEvent, Runtime, State};
use tauri_plugin_notification::NotificationExt;

use crate::downloader::config::load_config;
use crate::downloader::events::{self, DownloadEvent};
use crate::downloader::models::{
    DownloadMode, DownloadRequest, DownloadSession, UpdateStatus, VideoMetadata, VideoQuality,
};
use crate::downloader::notifier::{DownloadNotifier, LogNotifier, NotifyingObserver};
use crate::downloader::toolchain::{prepare_ytdlp, Toolchain};
use crate::downloader::traits::{DownloadObserver, ObserverSet};
use crate::downloader::utils;
use crate::downloader::{Orchestrator, YtDlpTool};

pub const EVENT_CHANNEL: &str = "download-event";
pub const PROGRESS_CHANNEL: &str = "download-progress";

pub struct DownloaderState {
    pub orchestrator: Orchestrator,
}

/// Forwards orchestrator events to the webview
struct TauriEventEmitter<R: Runtime> {
    app: AppHandle<R>,
}

impl<R: Runtime> DownloadObserver for TauriEventEmitter<R> {
    fn on_event(&self, event: &DownloadEvent) {
        if let DownloadEvent::Progress(progress) = event {
            let _ = self.app.emit(PROGRESS_CHANNEL, progress);
        }
        if let Err(e) = self.app.emit(EVENT_CHANNEL, event) {
            tracing::warn!("[Commands] Failed to emit event: {}", e);
        }
    }
}

/// System notifications through tauri-plugin-notification
struct SystemNotifier<R: Runtime> {
    app: AppHandle<R>,
}

impl<R: Runtime> SystemNotifier<R> {
    fn show(&self, title: &str, body: &str) {
        if let Err(e) = self.app.notification().builder().title(title).body(body).show() {
            tracing::warn!("[Notifier] Failed to show notification: {}", e);
        }
    }
}

impl<R: Runtime> DownloadNotifier for SystemNotifier<R> {
    fn start(&self) {
        self.show("Download started 🚀", "Simple YT Downloader is working...");
    }

    // Desktop notifications cannot be updated in place
    fn update_progress(&self, percent: u8, title: &str) {
        tracing::debug!("[Notifier] {}: {}%", title, percent);
    }

    fn show_complete(&self, title: &str) {
        self.show("Download complete 🎉", title);
    }

    fn stop(&self) {
        tracing::debug!("[Notifier] Stopped");
    }
}

/// Start a download. `url` may be free text containing a link.
#[tauri::command]
async fn start_download(
    url: String,
    audio_only: bool,
    max_height: Option<u32>,
    output_dir: Option<String>,
    state: State<'_, DownloaderState>,
) -> Result<String, String> {
    let url = utils::extract_url(&url).ok_or_else(|| "No link found in the text".to_string())?;

    let mode = if audio_only {
        DownloadMode::Audio
    } else {
        DownloadMode::Video(max_height.map(VideoQuality::from_height).unwrap_or_default())
    };

    let orchestrator = &state.orchestrator;
    let output_directory = output_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| orchestrator.config().resolve_output_directory());
    tokio::fs::create_dir_all(&output_directory)
        .await
        .map_err(|e| format!("Failed to create {}: {}", output_directory.display(), e))?;

    let handle = orchestrator
        .start(DownloadRequest::new(url, mode, output_directory))
        .map_err(|e| e.to_string())?;
    Ok(handle.correlation_id().to_string())
}

#[tauri::command]
async fn cancel_download(state: State<'_, DownloaderState>) -> Result<bool, String> {
    Ok(state.orchestrator.cancel())
}

#[tauri::command]
async fn get_video_info(url: String, state: State<'_, DownloaderState>) -> Result<VideoMetadata, String> {
    let url = utils::extract_url(&url).ok_or_else(|| "No link found in the text".to_string())?;
    state
        .orchestrator
        .fetch_metadata(&url)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn update_ytdlp(state: State<'_, DownloaderState>) -> Result<UpdateStatus, String> {
    state.orchestrator.update_tool().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn download_status(state: State<'_, DownloaderState>) -> Result<DownloadSession, String> {
    Ok(state.orchestrator.session())
}

#[tauri::command]
fn extract_url(text: String) -> Option<String> {
    utils::extract_url(&text)
}

/// Downloader plugin. Register with `tauri::Builder::default().plugin(simple_yt_downloader_lib::init())`.
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("downloader")
        .invoke_handler(tauri::generate_handler![
            start_download,
            cancel_download,
            get_video_info,
            update_ytdlp,
            download_status,
            extract_url,
        ])
        .setup(|app, _api| {
            crate::logging::init_tracing();

            let config = load_config()?;

            let (events_tx, events_rx) = events::channel(config.progress_capacity);
            let toolchain_config = config.toolchain.clone();
            let tool = Arc::new(YtDlpTool::from_config(&toolchain_config));
            let toolchain = Arc::new(Toolchain::new());
            let orchestrator = Orchestrator::new(tool.clone(), toolchain.clone(), config, events_tx);

            let webview: Arc<dyn DownloadObserver> = Arc::new(TauriEventEmitter { app: app.clone() });
            let notifications: Arc<dyn DownloadObserver> =
                match app.plugin(tauri_plugin_notification::init()) {
                    Ok(()) => {
                        Arc::new(NotifyingObserver::new(SystemNotifier { app: app.clone() }))
                            as Arc<dyn DownloadObserver>
                    }
                    Err(e) => {
                        tracing::warn!("[Commands] Notification plugin unavailable: {}", e);
                        Arc::new(NotifyingObserver::new(LogNotifier))
                    }
                };
            let observer: Arc<dyn DownloadObserver> =
                Arc::new(ObserverSet::new(vec![webview, notifications]));
            tauri::async_runtime::spawn(events::dispatch(events_rx, observer));

            tauri::async_runtime::spawn(async move {
                if let Err(e) = prepare_ytdlp(&tool, &toolchain_config).await {
                    tracing::warn!("[Commands] yt-dlp install failed: {}", e);
                }
                if let Err(e) = toolchain.init(tool.as_ref()).await {
                    tracing::error!("[Commands] Toolchain unavailable: {}", e);
                }
            });

            app.manage(DownloaderState { orchestrator });
            tracing::info!("[Commands] Downloader plugin ready");
            Ok(())
        })
        .on_event(|app, event| {
            if matches!(event, RunEvent::Exit) {
                if let Some(state) = app.try_state::<DownloaderState>() {
                    state.orchestrator.cancel();
                    state.orchestrator.toolchain().teardown();
                }
            }
        })
        .build()
}
