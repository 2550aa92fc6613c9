// Orchestrator events and the bounded queue that carries them to the observer
//
// The queue is FIFO. When it is full the oldest queued progress event is
// dropped; status, metadata, retry, log and finish events are never dropped.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use super::models::{CorrelationId, DownloadMode, ProgressEvent, SessionStatus, VideoMetadata};
use super::traits::DownloadObserver;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// A new session was accepted
    Started {
        correlation_id: CorrelationId,
        source_url: String,
        mode: DownloadMode,
    },
    Status {
        correlation_id: CorrelationId,
        status: SessionStatus,
        attempt: u32,
    },
    Progress(ProgressEvent),
    Metadata(VideoMetadata),
    /// Informational line for the on-screen log
    Log { message: String },
    /// A transient failure will be retried after `delay_secs`
    Retrying {
        attempt: u32,
        max_retries: u32,
        delay_secs: u64,
        reason: String,
    },
    Finished {
        status: SessionStatus,
        last_error: Option<String>,
        message: String,
    },
}

impl DownloadEvent {
    pub fn is_progress(&self) -> bool {
        matches!(self, Self::Progress(_))
    }
}

struct Shared {
    queue: Mutex<VecDeque<DownloadEvent>>,
    capacity: usize,
    notify: Notify,
    senders: AtomicUsize,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, VecDeque<DownloadEvent>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create a bounded event queue
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        capacity: capacity.max(1),
        notify: Notify::new(),
        senders: AtomicUsize::new(1),
        dropped: AtomicU64::new(0),
    });
    (
        EventSender {
            shared: shared.clone(),
        },
        EventReceiver { shared },
    )
}

pub struct EventSender {
    shared: Arc<Shared>,
}

impl EventSender {
    /// Enqueue an event. Never blocks.
    pub fn send(&self, event: DownloadEvent) {
        {
            let mut queue = self.shared.lock();
            if queue.len() >= self.shared.capacity {
                if let Some(pos) = queue.iter().position(DownloadEvent::is_progress) {
                    queue.remove(pos);
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                } else if event.is_progress() {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
            queue.push_back(event);
        }
        self.shared.notify.notify_one();
    }

    /// Progress events discarded so far
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Clone for EventSender {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for EventSender {
    fn drop(&mut self) {
        self.shared.senders.fetch_sub(1, Ordering::AcqRel);
        self.shared.notify.notify_one();
    }
}

pub struct EventReceiver {
    shared: Arc<Shared>,
}

impl EventReceiver {
    /// Next event in production order. `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<DownloadEvent> {
        loop {
            if let Some(event) = self.shared.lock().pop_front() {
                return Some(event);
            }
            if self.shared.senders.load(Ordering::Acquire) == 0 {
                return self.shared.lock().pop_front();
            }
            self.shared.notify.notified().await;
        }
    }

    /// Take everything queued right now
    pub fn drain(&mut self) -> Vec<DownloadEvent> {
        self.shared.lock().drain(..).collect()
    }
}

/// Deliver events to `observer` one at a time until all senders are dropped
pub async fn dispatch(mut receiver: EventReceiver, observer: Arc<dyn DownloadObserver>) {
    while let Some(event) = receiver.recv().await {
        observer.on_event(&event);
    }
    tracing::debug!("[Events] Dispatcher stopped");
}
