//! Error taxonomy for transfers and scheduler commands.
//!
//! `TransferError` is what the active job's pipeline produces; only the
//! `Transport` kind is retried. `ValidationError` is returned synchronously by
//! commands that would otherwise corrupt the queue, before any mutation.

use thiserror::Error;

/// Failure of the active job's fetch/finalize pipeline.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Network or IO failure while moving bytes. Retried with backoff.
    #[error("transport: {message}")]
    Transport {
        message: String,
        /// HTTP status when the failure was an HTTP response.
        http_status: Option<u32>,
    },
    /// Corrupt or unsupported archive, or the extraction tool failed.
    #[error("archive: {0}")]
    Archive(String),
    /// Not enough disk space for the remaining bytes.
    #[error("insufficient disk space: {0}")]
    Capacity(String),
    /// The worker honoured a stop request at a checkpoint.
    #[error("transfer stopped")]
    Stopped,
}

impl TransferError {
    pub fn transport(message: impl Into<String>) -> Self {
        TransferError::Transport {
            message: message.into(),
            http_status: None,
        }
    }

    pub fn capacity(needed: u64, available: u64) -> Self {
        TransferError::Capacity(format!("need {} bytes, {} available", needed, available))
    }

    pub fn http(code: u32) -> Self {
        TransferError::Transport {
            message: format!("HTTP {}", code),
            http_status: Some(code),
        }
    }

    /// Map an IO error from the artifact file. Disk-full is a capacity error,
    /// everything else is treated like a transport hiccup.
    pub fn from_io(e: std::io::Error) -> Self {
        if is_disk_full(&e) {
            return TransferError::Capacity(e.to_string());
        }
        TransferError::transport(e.to_string())
    }
}

#[cfg(unix)]
fn is_disk_full(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::ENOSPC)
}

#[cfg(not(unix))]
fn is_disk_full(_e: &std::io::Error) -> bool {
    false
}

/// A command was rejected; the queue was left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("reorder list is not a permutation of the current queue")]
    NotAPermutation,
    #[error("unknown transfer hash: {0}")]
    UnknownHash(String),
    #[error("source must not be empty")]
    EmptySource,
    #[error("active slot is occupied")]
    SlotOccupied,
}

/// Error returned by `SchedulerHandle` calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("scheduler has shut down")]
    Shutdown,
    /// The cache directory could not be read or cleaned.
    #[error("cache: {0}")]
    Cache(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_keeps_status() {
        match TransferError::http(503) {
            TransferError::Transport { http_status, .. } => assert_eq!(http_status, Some(503)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn enospc_maps_to_capacity() {
        let e = std::io::Error::from_raw_os_error(libc::ENOSPC);
        assert!(matches!(TransferError::from_io(e), TransferError::Capacity(_)));
    }

    #[test]
    fn other_io_is_transport() {
        let e = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(TransferError::from_io(e), TransferError::Transport { .. }));
    }

    #[test]
    fn validation_converts_into_command_error() {
        let e: CommandError = ValidationError::NotAPermutation.into();
        assert_eq!(e, CommandError::Validation(ValidationError::NotAPermutation));
    }
}
