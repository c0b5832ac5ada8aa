//! Classify transfer errors into retry policy error kinds.

use crate::error::TransferError;
use crate::retry::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        408 => ErrorKind::Timeout,
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a transfer error into an ErrorKind.
pub fn classify(e: &TransferError) -> ErrorKind {
    match e {
        TransferError::Transport {
            http_status: Some(code),
            ..
        } => classify_http_status(*code),
        TransferError::Transport { http_status: None, .. } => ErrorKind::Connection,
        TransferError::Archive(_) | TransferError::Capacity(_) | TransferError::Stopped => {
            ErrorKind::Other
        }
    }
}
