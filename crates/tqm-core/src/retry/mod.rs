//! Retry and backoff policy for the active transfer.
//!
//! Only transport failures are retried. Archive, capacity and stop outcomes
//! are classified as `ErrorKind::Other` and surface on the first occurrence.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
