//! Pull-side status: built inside a scheduler turn from the queue store and
//! the active job's live counters. Nothing here is cached between requests.

use serde::{Deserialize, Serialize};

use crate::progress::{percent, remaining_time, TransferProgress};
use crate::queue::{QueueEntry, QueueStore};
use crate::transfer::TransferStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentTransfer {
    pub hash: String,
    pub source: String,
    pub alias: String,
    /// On-disk name, once the source has been probed.
    pub filename: Option<String>,
    pub status: TransferStatus,
    pub bytes_total: u64,
    pub bytes_done: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub active: bool,
    pub current: Option<CurrentTransfer>,
    /// Smoothed rate in bytes/sec; 0 while paused.
    pub speed: u64,
    /// Seconds left; `None` while the rate is zero or the size unknown.
    pub remaining_time: Option<f64>,
    pub is_paused: bool,
    /// Download done, finalisation or extraction running.
    pub is_processing: bool,
    pub speed_limit: Option<u64>,
    pub queue: Vec<QueueEntry>,
}

impl StatusSnapshot {
    pub(crate) fn build(
        store: &QueueStore,
        live: Option<(&TransferProgress, Option<&str>)>,
        speed_limit: u64,
    ) -> Self {
        let speed_limit = (speed_limit > 0).then_some(speed_limit);
        let queue = store.queue_entries();

        let Some(t) = store.active() else {
            return Self {
                active: false,
                current: None,
                speed: 0,
                remaining_time: None,
                is_paused: false,
                is_processing: false,
                speed_limit,
                queue,
            };
        };

        let is_paused = t.status == TransferStatus::Paused;
        let (bytes_done, bytes_total, speed, is_processing, filename) = match live {
            Some((p, filename)) => (
                p.bytes_done(),
                p.bytes_total(),
                if is_paused { 0 } else { p.speed() },
                p.is_processing(),
                filename.map(str::to_string),
            ),
            None => (t.bytes_done, t.bytes_total, 0, false, None),
        };
        let remaining = if bytes_total == 0 {
            None
        } else {
            remaining_time(bytes_done, bytes_total, speed)
        };

        Self {
            active: true,
            current: Some(CurrentTransfer {
                hash: t.hash.clone(),
                source: t.source.clone(),
                alias: t.alias.clone(),
                filename,
                status: t.status,
                bytes_total,
                bytes_done,
                percent: percent(bytes_done, bytes_total),
            }),
            speed,
            remaining_time: remaining,
            is_paused,
            is_processing,
            speed_limit,
            queue,
        }
    }

    /// Hashes of the queue, in order.
    pub fn queue_hashes(&self) -> Vec<String> {
        self.queue.iter().map(|e| e.hash.clone()).collect()
    }

    pub fn active_hash(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.hash.as_str())
    }
}
