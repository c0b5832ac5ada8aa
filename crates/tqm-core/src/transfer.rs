//! The transfer record and its lifecycle states.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle state of a transfer.
///
/// Only the scheduler moves a transfer between states. `Completed`, `Failed`
/// and `Cancelled` are terminal and the transfer leaves the queue store the
/// moment it reaches one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Queued,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Queued => "queued",
            TransferStatus::Active => "active",
            TransferStatus::Paused => "paused",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// Fingerprint of `source` + `alias`: first 16 bytes of SHA-256 as lowercase hex.
///
/// Used for dedup, for addressing commands and as the cache key.
pub fn transfer_hash(source: &str, alias: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\n");
    hasher.update(alias.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// One requested download/import job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub hash: String,
    pub source: String,
    pub alias: String,
    pub status: TransferStatus,
    /// Total size once probed; 0 while unknown.
    pub bytes_total: u64,
    /// Bytes confirmed on disk in the partial artifact.
    pub bytes_done: u64,
    pub enqueue_order: u64,
}

impl Transfer {
    pub fn new(source: &str, alias: &str, enqueue_order: u64) -> Self {
        Self {
            hash: transfer_hash(source, alias),
            source: source.to_string(),
            alias: alias.to_string(),
            status: TransferStatus::Queued,
            bytes_total: 0,
            bytes_done: 0,
            enqueue_order,
        }
    }
}
