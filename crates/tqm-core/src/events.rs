//! Best-effort push stream of transfer events.
//!
//! Every listener gets its own bounded buffer. `publish` never waits: a
//! listener whose buffer is full, or whose receiver is gone, is dropped on
//! the spot. Listeners that need the real state ask for a status snapshot.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Wire form: `{"type": "progress", "data": {"percent": 40.0}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Status { text: String },
    Progress { percent: f64 },
    Meta { filename: String, total_size: Option<u64> },
    Complete { message: String },
    Error { message: String },
}

impl Event {
    pub fn status(text: impl Into<String>) -> Self {
        Event::Status { text: text.into() }
    }
}

#[derive(Debug)]
pub struct EventHub {
    listeners: Mutex<Vec<mpsc::Sender<Event>>>,
    buffer: usize,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a listener. Events published from now on are delivered until
    /// the receiver is dropped or falls a full buffer behind.
    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.lock().push(tx);
        rx
    }

    /// Fan out to every listener without blocking.
    pub fn publish(&self, event: Event) {
        let mut listeners = self.lock();
        listeners.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("dropping slow event listener");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<Event>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
