// Seams between the orchestrator, the external tool and the UI

use async_trait::async_trait;
use std::sync::Arc;

use super::errors::DownloadError;
use super::events::DownloadEvent;
use super::models::{CorrelationId, ProgressEvent, UpdateChannel, UpdateStatus, VideoMetadata};

/// Progress callback handed to the tool for one attempt
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// External extraction/download tool
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Name of the tool (for logging)
    fn name(&self) -> &'static str;

    /// Tool version, used to verify the toolchain at init
    async fn version(&self) -> Result<String, DownloadError>;

    /// Run one download to completion under `process_id`.
    /// A process terminated through `destroy_process` fails with a message containing "cancel".
    async fn execute(
        &self,
        args: &[String],
        process_id: &CorrelationId,
        on_progress: ProgressCallback,
    ) -> Result<(), DownloadError>;

    /// Ask the process running under `process_id` to terminate
    fn destroy_process(&self, process_id: &CorrelationId) -> Result<(), DownloadError>;

    /// Fetch display metadata without downloading
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, DownloadError>;

    /// Self-update the tool
    async fn update(&self, channel: UpdateChannel) -> Result<UpdateStatus, DownloadError>;
}

/// Receives orchestrator events, in production order, on a single dispatcher task
pub trait DownloadObserver: Send + Sync {
    fn on_event(&self, event: &DownloadEvent);
}

/// Fan out to several observers
pub struct ObserverSet {
    observers: Vec<Arc<dyn DownloadObserver>>,
}

impl ObserverSet {
    pub fn new(observers: Vec<Arc<dyn DownloadObserver>>) -> Self {
        Self { observers }
    }
}

impl DownloadObserver for ObserverSet {
    fn on_event(&self, event: &DownloadEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
