// Orchestrator with bounded retry
//
// Runs at most one download at a time. Each attempt gets its own correlation id;
// failures are classified into cancelled / network / fatal and only network
// failures are retried, after a fixed backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use super::config::OrchestratorConfig;
use super::errors::{truncate_for_display, DownloadError, ErrorClass};
use super::events::{DownloadEvent, EventSender};
use super::format_selector::FormatSelector;
use super::models::{
    CorrelationId, DownloadRequest, DownloadSession, SessionStatus, UpdateStatus, VideoMetadata,
};
use super::toolchain::Toolchain;
use super::traits::{MediaTool, ProgressCallback};

const RETRY_REASON_MAX_CHARS: usize = 100;
const FAILURE_MAX_CHARS: usize = 200;
const UPDATE_MESSAGE_MAX_CHARS: usize = 80;

/// Handle to a started download
pub struct DownloadHandle {
    correlation_id: CorrelationId,
    task: JoinHandle<DownloadSession>,
}

impl DownloadHandle {
    /// Correlation id of the first attempt
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Wait for the terminal session
    pub async fn wait(self) -> Result<DownloadSession, DownloadError> {
        self.task
            .await
            .map_err(|e| DownloadError::Fatal(format!("download task failed: {}", e)))
    }
}

/// Fails the session if the run task unwinds before reaching a terminal state
struct RunGuard {
    inner: Arc<Inner>,
    request: DownloadRequest,
    armed: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed || self.inner.status().is_terminal() {
            return;
        }
        tracing::error!("[Orchestrator] Download task aborted before finishing");
        self.inner.lock_session().last_error = Some("download task aborted unexpectedly".to_string());
        self.inner.finish(SessionStatus::Failed, &self.request);
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    tool: Arc<dyn MediaTool>,
    toolchain: Arc<Toolchain>,
    config: OrchestratorConfig,
    events: EventSender,
    session: Mutex<DownloadSession>,
    is_downloading: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        tool: Arc<dyn MediaTool>,
        toolchain: Arc<Toolchain>,
        config: OrchestratorConfig,
        events: EventSender,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tool,
                toolchain,
                config,
                events,
                session: Mutex::new(DownloadSession::default()),
                is_downloading: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn toolchain(&self) -> &Arc<Toolchain> {
        &self.inner.toolchain
    }

    pub fn is_downloading(&self) -> bool {
        self.inner.is_downloading.load(Ordering::Acquire)
    }

    /// Snapshot of the current session
    pub fn session(&self) -> DownloadSession {
        self.inner.lock_session().clone()
    }

    /// Start a download. Fails with `NotReady` before toolchain init and
    /// `AlreadyRunning` while another session is active.
    pub fn start(&self, request: DownloadRequest) -> Result<DownloadHandle, DownloadError> {
        self.inner.toolchain.ensure_ready()?;

        if self
            .inner
            .is_downloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("[Orchestrator] Rejected start: a download is already running");
            return Err(DownloadError::AlreadyRunning);
        }

        let correlation_id = CorrelationId::mint();
        let snapshot = {
            let mut session = self.inner.lock_session();
            *session = DownloadSession::new(correlation_id.clone());
            session.status = SessionStatus::FetchingInfo;
            session.clone()
        };

        tracing::info!(
            "[Orchestrator] Starting {} download of {} ({})",
            request.mode.label(),
            request.source_url,
            correlation_id
        );
        self.inner.events.send(DownloadEvent::Started {
            correlation_id: correlation_id.clone(),
            source_url: request.source_url.clone(),
            mode: request.mode,
        });
        self.inner.emit_status(&snapshot);

        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.run(request).await });

        Ok(DownloadHandle {
            correlation_id,
            task,
        })
    }

    /// Request termination of the running attempt. Returns false when nothing is active.
    pub fn cancel(&self) -> bool {
        let snapshot = {
            let mut session = self.inner.lock_session();
            if !session.status.is_active() {
                return false;
            }
            session.status = SessionStatus::Cancelling;
            session.clone()
        };

        tracing::info!("[Orchestrator] Cancelling {}", snapshot.correlation_id);
        self.inner.emit_status(&snapshot);
        self.inner.log("⏹️ Cancelling...");

        if let Err(e) = self.inner.tool.destroy_process(&snapshot.correlation_id) {
            tracing::warn!(
                "[Orchestrator] Failed to terminate {}: {}",
                snapshot.correlation_id,
                e
            );
        }
        true
    }

    pub async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, DownloadError> {
        self.inner.toolchain.ensure_ready()?;
        self.inner.tool.fetch_metadata(url).await
    }

    /// Self-update the tool. Refused while a download is running it.
    pub async fn update_tool(&self) -> Result<UpdateStatus, DownloadError> {
        self.inner.toolchain.ensure_ready()?;
        if self.is_downloading() {
            return Err(DownloadError::AlreadyRunning);
        }
        self.inner.tool.update(self.inner.config.update_channel).await
    }
}

impl Inner {
    fn lock_session(&self) -> MutexGuard<'_, DownloadSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn status(&self) -> SessionStatus {
        self.lock_session().status
    }

    fn emit_status(&self, session: &DownloadSession) {
        self.events.send(DownloadEvent::Status {
            correlation_id: session.correlation_id.clone(),
            status: session.status,
            attempt: session.attempt_count,
        });
    }

    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("[Orchestrator] {}", message);
        if self.config.verbose {
            self.events.send(DownloadEvent::Log { message });
        }
    }

    async fn run(self: Arc<Self>, request: DownloadRequest) -> DownloadSession {
        let mut guard = RunGuard {
            inner: self.clone(),
            request: request.clone(),
            armed: true,
        };
        let session = self.run_attempts(&request).await;
        guard.armed = false;
        session
    }

    async fn run_attempts(&self, request: &DownloadRequest) -> DownloadSession {
        if self.config.update_before_download {
            self.self_update().await;
        }

        let max_retries = self.config.max_retries;
        for attempt in 1..=max_retries {
            if self.status() == SessionStatus::Cancelling {
                return self.finish(SessionStatus::Cancelled, request);
            }

            if attempt == 1 && self.config.fetch_metadata {
                self.fetch_metadata_best_effort(&request.source_url).await;
            }

            let Some(process_id) = self.begin_attempt(attempt) else {
                return self.finish(SessionStatus::Cancelled, request);
            };

            let attempt_request = request.for_attempt(attempt);
            let args = FormatSelector::build_download_args(&attempt_request, &self.config.tool);

            self.log(format!(
                "⬇️ Downloading {} (attempt {}/{})",
                attempt_request.mode.label(),
                attempt,
                max_retries
            ));

            let events = self.events.clone();
            let on_progress: ProgressCallback =
                Arc::new(move |progress| events.send(DownloadEvent::Progress(progress)));

            let error = match self.tool.execute(&args, &process_id, on_progress).await {
                Ok(()) => return self.finish(SessionStatus::Succeeded, request),
                Err(e) => e,
            };

            let message = error.to_string();
            self.lock_session().last_error = Some(message.clone());

            match error.class() {
                ErrorClass::Cancelled => {
                    return self.finish(SessionStatus::Cancelled, request);
                }
                class if class.is_retryable() && attempt < max_retries => {
                    self.prepare_retry(attempt, &message);
                    tokio::time::sleep(self.config.retry_backoff()).await;
                }
                _ => {
                    tracing::warn!(
                        "[Orchestrator] Attempt {} failed, not retrying: {}",
                        attempt,
                        message
                    );
                    return self.finish(SessionStatus::Failed, request);
                }
            }
        }

        self.finish(SessionStatus::Failed, request)
    }

    /// Move into `Downloading` for `attempt`, unless a cancel arrived first
    fn begin_attempt(&self, attempt: u32) -> Option<CorrelationId> {
        let snapshot = {
            let mut session = self.lock_session();
            if session.status == SessionStatus::Cancelling {
                return None;
            }
            session.status = SessionStatus::Downloading;
            session.attempt_count = attempt;
            session.clone()
        };
        self.emit_status(&snapshot);
        Some(snapshot.correlation_id)
    }

    /// Mint a fresh correlation id so a late cancel of the old process cannot hit the next one
    fn prepare_retry(&self, attempt: u32, message: &str) {
        let next_id = CorrelationId::mint();
        {
            let mut session = self.lock_session();
            session.correlation_id = next_id.clone();
        }

        let reason = truncate_for_display(message, RETRY_REASON_MAX_CHARS);
        let delay_secs = self.config.retry_backoff_secs;
        tracing::warn!(
            "[Orchestrator] Network error on attempt {}/{}, retrying in {}s as {}: {}",
            attempt,
            self.config.max_retries,
            delay_secs,
            next_id,
            reason
        );
        self.events.send(DownloadEvent::Retrying {
            attempt,
            max_retries: self.config.max_retries,
            delay_secs,
            reason: reason.clone(),
        });
        self.log(format!(
            "⚠️ Network error (attempt {}/{}): {}. Retrying in {}s...",
            attempt, self.config.max_retries, reason, delay_secs
        ));
    }

    async fn self_update(&self) {
        self.log("🔄 Checking for yt-dlp updates...");
        match self.tool.update(self.config.update_channel).await {
            Ok(UpdateStatus::Done) => self.log("✅ yt-dlp updated"),
            Ok(UpdateStatus::AlreadyUpToDate) => self.log("✅ yt-dlp is up to date"),
            Ok(UpdateStatus::Other(output)) => self.log(format!(
                "ℹ️ yt-dlp update: {}",
                truncate_for_display(&output, UPDATE_MESSAGE_MAX_CHARS)
            )),
            Err(e) => {
                tracing::warn!("[Orchestrator] Self-update failed: {}", e);
                self.log(format!(
                    "⚠️ Update failed: {}, continuing",
                    truncate_for_display(&e.to_string(), UPDATE_MESSAGE_MAX_CHARS)
                ));
            }
        }
    }

    async fn fetch_metadata_best_effort(&self, url: &str) {
        match self.tool.fetch_metadata(url).await {
            Ok(metadata) => {
                let mut line = format!("📹 {}", metadata.title);
                if let Some(duration) = metadata.formatted_duration() {
                    line.push_str(&format!(" ({})", duration));
                }
                self.log(line);
                self.events.send(DownloadEvent::Metadata(metadata));
            }
            Err(e) => {
                tracing::debug!("[Orchestrator] Metadata unavailable: {}", e);
            }
        }
    }

    fn finish(&self, status: SessionStatus, request: &DownloadRequest) -> DownloadSession {
        let snapshot = {
            let mut session = self.lock_session();
            session.status = status;
            session.clone()
        };

        let message = match status {
            SessionStatus::Succeeded => format!(
                "✅ Download complete! Saved to {}",
                request.output_directory.display()
            ),
            SessionStatus::Cancelled => "⏹️ Download cancelled".to_string(),
            _ => format!(
                "❌ Download failed after {} attempt(s): {}",
                snapshot.attempt_count,
                truncate_for_display(
                    snapshot.last_error.as_deref().unwrap_or("unknown error"),
                    FAILURE_MAX_CHARS
                )
            ),
        };

        tracing::info!(
            "[Orchestrator] {} finished as {:?} after {} attempt(s)",
            snapshot.correlation_id,
            status,
            snapshot.attempt_count
        );
        self.emit_status(&snapshot);
        self.events.send(DownloadEvent::Finished {
            status,
            last_error: snapshot.last_error.clone(),
            message,
        });

        self.is_downloading.store(false, Ordering::Release);
        snapshot
    }
}
