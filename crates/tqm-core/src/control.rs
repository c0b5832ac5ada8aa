//! Cooperative control of the active worker: pause, resume and stop.
//!
//! The scheduler owns one `WorkerControl` per running job and shares it with
//! the worker thread. The worker calls `checkpoint` after every buffer write;
//! that is where a pause blocks and where a stop request turns into
//! `TransferError::Stopped`. Nothing is ever interrupted mid-write.

use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::TransferError;

/// Why the scheduler asked the worker to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// User cancel or removal; the partial artifact is deleted afterwards.
    Cancel,
    /// Sent back into the queue; the partial artifact is kept for resume.
    Demote,
    /// Scheduler shutting down; the partial artifact is kept for resume.
    Shutdown,
}

#[derive(Debug, Default)]
struct ControlState {
    paused: bool,
    stop: Option<StopReason>,
}

/// Pause/stop flags shared between the scheduler and the active worker.
#[derive(Debug, Default)]
pub struct WorkerControl {
    state: Mutex<ControlState>,
    wake: Condvar,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request suspension at the next checkpoint. Returns false if already paused.
    pub fn pause(&self) -> bool {
        let mut state = self.lock();
        if state.paused {
            return false;
        }
        state.paused = true;
        true
    }

    /// Release a pause. Returns false if the worker was not paused.
    pub fn resume(&self) -> bool {
        let mut state = self.lock();
        if !state.paused {
            return false;
        }
        state.paused = false;
        self.wake.notify_all();
        true
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Ask the worker to stop. The first reason wins; a paused worker is woken.
    pub fn request_stop(&self, reason: StopReason) {
        let mut state = self.lock();
        if state.stop.is_none() {
            state.stop = Some(reason);
        }
        self.wake.notify_all();
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.lock().stop
    }

    /// Safe point: blocks while paused, fails with `Stopped` once a stop is requested.
    pub fn checkpoint(&self) -> Result<(), TransferError> {
        let guard = self.lock();
        let guard = self
            .wake
            .wait_while(guard, |s| s.paused && s.stop.is_none())
            .unwrap_or_else(|e| e.into_inner());
        if guard.stop.is_some() {
            return Err(TransferError::Stopped);
        }
        Ok(())
    }

    /// Backoff sleep that returns early with `Stopped` when a stop is requested.
    pub fn sleep(&self, delay: Duration) -> Result<(), TransferError> {
        let guard = self.lock();
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, delay, |s| s.stop.is_none())
            .unwrap_or_else(|e| e.into_inner());
        if guard.stop.is_some() {
            return Err(TransferError::Stopped);
        }
        Ok(())
    }
}

/// Default path for the control socket (XDG state dir).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("tqm")?.get_state_home();
    Ok(dir.join("control.sock"))
}
