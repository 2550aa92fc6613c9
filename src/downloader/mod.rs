// Download orchestration for the yt-dlp backend

pub mod backends;
pub mod config;
pub mod errors;
pub mod events;
pub mod format_selector;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod toolchain;
pub mod traits;
pub mod utils;

pub use backends::YtDlpTool;
pub use config::{load_config, OrchestratorConfig};
pub use errors::{DownloadError, ErrorClass};
pub use events::{DownloadEvent, EventReceiver, EventSender};
pub use models::{
    CorrelationId, DownloadMode, DownloadRequest, DownloadSession, ProgressEvent, SessionStatus,
    UpdateStatus, VideoMetadata, VideoQuality,
};
pub use orchestrator::{DownloadHandle, Orchestrator};
pub use toolchain::Toolchain;
pub use traits::{DownloadObserver, MediaTool};
