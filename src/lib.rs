mod commands;
pub mod downloader;
pub mod logging;

pub use commands::{init, DownloaderState, EVENT_CHANNEL, PROGRESS_CHANNEL};
pub use downloader::{
    DownloadError, DownloadEvent, DownloadHandle, DownloadMode, DownloadRequest, DownloadSession,
    Orchestrator, SessionStatus, VideoQuality,
};
