//! Retry loop: run an attempt until success or the policy says stop.

use super::classify;
use super::policy::{RetryDecision, RetryPolicy};
use crate::control::WorkerControl;
use crate::error::TransferError;

/// Runs `attempt` until it succeeds or the retry policy gives up.
///
/// `bytes_done` reports confirmed progress; an attempt that moved it forward
/// resets the attempt counter, so a long transfer on a flaky link is not
/// failed for errors spread over hours. Backoff sleeps end early on stop.
pub fn run_with_retry<F, P>(
    policy: &RetryPolicy,
    control: &WorkerControl,
    bytes_done: P,
    mut attempt: F,
) -> Result<(), TransferError>
where
    F: FnMut() -> Result<(), TransferError>,
    P: Fn() -> u64,
{
    let mut attempt_no = 1u32;
    loop {
        let before = bytes_done();
        let e = match attempt() {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if bytes_done() > before {
            attempt_no = 1;
        }
        match policy.decide(attempt_no, classify::classify(&e)) {
            RetryDecision::NoRetry => return Err(e),
            RetryDecision::RetryAfter(delay) => {
                tracing::warn!(
                    attempt = attempt_no,
                    delay_ms = delay.as_millis() as u64,
                    "transfer attempt failed, retrying: {}",
                    e
                );
                control.sleep(delay)?;
                attempt_no += 1;
            }
        }
    }
}
