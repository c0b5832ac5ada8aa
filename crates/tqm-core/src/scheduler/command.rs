use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::CommandError;
use crate::events::{Event, EventHub};

use super::status::StatusSnapshot;

type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

#[derive(Debug)]
pub(crate) enum Command {
    Enqueue {
        source: String,
        alias: Option<String>,
        reply: Reply<String>,
    },
    GetStatus {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Cancel {
        reply: Reply<()>,
    },
    Reorder {
        hashes: Vec<String>,
        reply: Reply<()>,
    },
    Remove {
        hash: String,
        reply: Reply<()>,
    },
    Promote {
        hash: String,
        reply: Reply<()>,
    },
    DemoteActive {
        position: usize,
        reply: Reply<()>,
    },
    CleanCache {
        reply: Reply<usize>,
    },
    SetSpeedLimit {
        bytes_per_sec: Option<u64>,
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to the scheduler actor. Every call is one command,
/// processed in order with every other command.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<Command>,
    hub: Arc<EventHub>,
}

impl SchedulerHandle {
    pub(crate) fn new(command_tx: mpsc::Sender<Command>, hub: Arc<EventHub>) -> Self {
        Self { command_tx, hub }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| CommandError::Shutdown)?;
        reply_rx.await.map_err(|_| CommandError::Shutdown)?
    }

    /// Add a transfer; returns its hash (the existing one for duplicates).
    pub async fn enqueue(&self, source: &str, alias: Option<&str>) -> Result<String, CommandError> {
        let source = source.to_string();
        let alias = alias.map(str::to_string);
        self.request(|reply| Command::Enqueue { source, alias, reply }).await
    }

    pub async fn get_status(&self) -> Result<StatusSnapshot, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::GetStatus { reply: reply_tx })
            .await
            .map_err(|_| CommandError::Shutdown)?;
        reply_rx.await.map_err(|_| CommandError::Shutdown)
    }

    pub async fn pause(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    pub async fn cancel(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Cancel { reply }).await
    }

    pub async fn reorder(&self, hashes: Vec<String>) -> Result<(), CommandError> {
        self.request(|reply| Command::Reorder { hashes, reply }).await
    }

    pub async fn remove(&self, hash: &str) -> Result<(), CommandError> {
        let hash = hash.to_string();
        self.request(|reply| Command::Remove { hash, reply }).await
    }

    /// Put a queued transfer into the Active slot, sending the running one
    /// back to the head of the queue.
    pub async fn promote(&self, hash: &str) -> Result<(), CommandError> {
        let hash = hash.to_string();
        self.request(|reply| Command::Promote { hash, reply }).await
    }

    /// Send the running transfer back into the queue at `position`.
    pub async fn demote_active(&self, position: usize) -> Result<(), CommandError> {
        self.request(|reply| Command::DemoteActive { position, reply }).await
    }

    pub async fn clean_cache(&self) -> Result<usize, CommandError> {
        self.request(|reply| Command::CleanCache { reply }).await
    }

    /// `None` or `Some(0)` removes the cap.
    pub async fn set_speed_limit(&self, bytes_per_sec: Option<u64>) -> Result<(), CommandError> {
        self.request(|reply| Command::SetSpeedLimit { bytes_per_sec, reply }).await
    }

    /// Stop the active worker (keeping its artifact), persist and end the actor.
    pub async fn shutdown(&self) -> Result<(), CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| CommandError::Shutdown)?;
        reply_rx.await.map_err(|_| CommandError::Shutdown)
    }

    /// Listen to the push stream. Best effort: see `EventHub`.
    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        self.hub.subscribe()
    }
}
