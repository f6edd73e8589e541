//! Rate-limited outbound line queue.
//!
//! Servers disconnect clients that flood them, so every outbound line is
//! pushed here and a single timer task forwards at most one per tick. The
//! timer starts on the first push and keeps ticking over an empty queue
//! until [`OutboundQueue::stop`] is called or the queue is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::protocol::Protocol;

/// Spacing between forwarded lines unless configured otherwise.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// `tokio::time::interval` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEntry {
    pub destination: String,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue already active")]
    AlreadyActive,
}

struct QueueInner {
    interval: Duration,
    protocol: Arc<dyn Protocol>,
    entries: Mutex<VecDeque<OutboundEntry>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Cloneable handle; clones share the same entries and timer.
#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<QueueInner>,
}

impl OutboundQueue {
    pub fn new(protocol: Arc<dyn Protocol>, interval: Duration) -> Self {
        OutboundQueue {
            inner: Arc::new(QueueInner {
                interval: interval.max(MIN_INTERVAL),
                protocol,
                entries: Mutex::new(VecDeque::new()),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Append to the tail, starting the timer if it is idle.
    ///
    /// Must be called within a tokio runtime.
    pub fn push(&self, destination: &str, text: &str) {
        self.inner.entries.lock().push_back(OutboundEntry {
            destination: destination.to_string(),
            text: text.to_string(),
        });
        // Losing this race just means someone else started it.
        let _ = self.start();
    }

    /// Start the drain timer. Fails if it is already running.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut timer = self.inner.timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(QueueError::AlreadyActive);
        }
        debug!(interval = ?self.inner.interval, "Starting outbound queue");
        *timer = Some(tokio::spawn(drain(Arc::downgrade(&self.inner))));
        Ok(())
    }

    /// Stop the timer. Pending entries stay queued for a later start.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
            debug!("Stopped outbound queue");
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }
}

async fn drain(queue: Weak<QueueInner>) {
    let period = match queue.upgrade() {
        Some(inner) => inner.interval,
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // skip first immediate tick

    loop {
        ticker.tick().await;
        let Some(inner) = queue.upgrade() else {
            return;
        };
        let Some(entry) = inner.entries.lock().pop_front() else {
            continue;
        };
        let protocol = inner.protocol.clone();
        drop(inner);

        if let Err(e) = protocol.send(&entry.destination, &entry.text).await {
            warn!(destination = %entry.destination, "Dropped outbound line: {e:#}");
        }
    }
}
