// Foreground notification surface
//
// The notifier is driven from the event stream: started on session start,
// updated on progress, completed on success and stopped on any terminal state.

use std::sync::{Mutex, MutexGuard};

use super::events::DownloadEvent;
use super::models::SessionStatus;
use super::traits::DownloadObserver;

pub trait DownloadNotifier: Send + Sync {
    fn start(&self);
    fn update_progress(&self, percent: u8, title: &str);
    fn show_complete(&self, title: &str);
    fn stop(&self);
}

/// Notifier that only writes to the log
pub struct LogNotifier;

impl DownloadNotifier for LogNotifier {
    fn start(&self) {
        tracing::info!("[Notifier] Download started");
    }

    fn update_progress(&self, percent: u8, title: &str) {
        tracing::debug!("[Notifier] {}: {}%", title, percent);
    }

    fn show_complete(&self, title: &str) {
        tracing::info!("[Notifier] Download complete: {}", title);
    }

    fn stop(&self) {
        tracing::debug!("[Notifier] Stopped");
    }
}

#[derive(Default)]
struct NotifyState {
    title: String,
    last_percent: Option<u8>,
}

/// Adapts orchestrator events onto a notifier
pub struct NotifyingObserver<N: DownloadNotifier> {
    notifier: N,
    state: Mutex<NotifyState>,
}

impl<N: DownloadNotifier> NotifyingObserver<N> {
    pub fn new(notifier: N) -> Self {
        Self {
            notifier,
            state: Mutex::new(NotifyState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, NotifyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<N: DownloadNotifier> DownloadObserver for NotifyingObserver<N> {
    fn on_event(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Started { source_url, .. } => {
                *self.state() = NotifyState {
                    title: source_url.clone(),
                    last_percent: None,
                };
                self.notifier.start();
            }
            DownloadEvent::Metadata(metadata) => {
                self.state().title = metadata.title.clone();
            }
            DownloadEvent::Progress(progress) => {
                let percent = progress.percent.round() as u8;
                let title = {
                    let mut state = self.state();
                    if state.last_percent == Some(percent) {
                        return;
                    }
                    state.last_percent = Some(percent);
                    state.title.clone()
                };
                self.notifier.update_progress(percent, &title);
            }
            DownloadEvent::Finished { status, .. } => {
                if *status == SessionStatus::Succeeded {
                    let title = self.state().title.clone();
                    self.notifier.show_complete(&title);
                }
                self.notifier.stop();
            }
            _ => {}
        }
    }
}
