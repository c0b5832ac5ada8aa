//! Single-active-job scheduler.
//!
//! One tokio task owns the queue store and the active job; everything else
//! talks to it through `SchedulerHandle`. The active job's pipeline
//! (fetch → cache artifact → finalise) runs on one blocking thread that the
//! actor supervises. Status snapshots are built inside the actor from the
//! store and the worker's live counters; the push stream is fed separately
//! through the `EventHub` and never read back.

mod actor;
mod command;
mod status;
mod worker;

#[cfg(test)]
mod tests;

pub use command::SchedulerHandle;
pub use status::{CurrentTransfer, StatusSnapshot};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::archiver::{Archiver, CommandArchiver, MoveArchiver};
use crate::cache::Cache;
use crate::config::TqmConfig;
use crate::events::EventHub;
use crate::fetcher::{CurlFetcher, Fetcher};
use crate::limiter::SpeedLimiter;
use crate::queue_db::QueueDb;
use crate::retry::RetryPolicy;

/// Collaborators and tunables the scheduler is built from.
pub struct SchedulerParts {
    pub fetcher: Arc<dyn Fetcher>,
    pub archiver: Arc<dyn Archiver>,
    pub cache: Cache,
    pub limiter: Arc<SpeedLimiter>,
    /// Queue persistence; `None` keeps the queue in memory only.
    pub db: Option<QueueDb>,
    pub retry: RetryPolicy,
    pub progress_interval: Duration,
    pub speed_smoothing: f64,
    pub event_buffer: usize,
}

impl SchedulerParts {
    /// Default collaborators for `cfg`: curl transport, move or command
    /// archiver, cache and limiter from the configured dirs and cap.
    pub fn from_config(cfg: &TqmConfig, db: Option<QueueDb>) -> Result<Self> {
        let download_dir = cfg.resolved_download_dir()?;
        let archiver: Arc<dyn Archiver> = match &cfg.archive {
            Some(archive) => Arc::new(CommandArchiver::new(archive.clone(), download_dir)),
            None => Arc::new(MoveArchiver::new(download_dir)),
        };
        Ok(Self {
            fetcher: Arc::new(CurlFetcher::default()),
            archiver,
            cache: Cache::open(cfg.resolved_cache_dir()?)?,
            limiter: Arc::new(SpeedLimiter::from_cap(cfg.max_bytes_per_sec)),
            db,
            retry: cfg.retry.as_ref().map(RetryPolicy::from).unwrap_or_default(),
            progress_interval: Duration::from_millis(cfg.progress_interval_ms),
            speed_smoothing: cfg.speed_smoothing,
            event_buffer: cfg.event_buffer,
        })
    }
}

/// Start the scheduler actor on the current runtime. The returned task ends
/// after `SchedulerHandle::shutdown` or once every handle is dropped.
pub fn spawn(parts: SchedulerParts) -> (SchedulerHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let hub = Arc::new(EventHub::new(parts.event_buffer));
    let handle = SchedulerHandle::new(command_tx, Arc::clone(&hub));
    let scheduler = actor::Scheduler::new(parts, hub, command_rx);
    let task = tokio::spawn(scheduler.run());
    (handle, task)
}
