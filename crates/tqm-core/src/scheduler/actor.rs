use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use crate::archiver::Archiver;
use crate::cache::Cache;
use crate::control::{StopReason, WorkerControl};
use crate::error::{CommandError, TransferError, ValidationError};
use crate::events::{Event, EventHub};
use crate::fetcher::Fetcher;
use crate::limiter::SpeedLimiter;
use crate::progress::{spawn_reporter, TransferProgress};
use crate::queue::QueueStore;
use crate::queue_db::QueueDb;
use crate::retry::RetryPolicy;
use crate::transfer::TransferStatus;

use super::command::Command;
use super::status::StatusSnapshot;
use super::worker::{run_transfer, Job, WorkerContext};
use super::SchedulerParts;

type WorkerOutcome = Result<PathBuf, TransferError>;

/// The running pipeline of the transfer in the Active slot.
struct ActiveJob {
    hash: String,
    control: Arc<WorkerControl>,
    progress: Arc<TransferProgress>,
    filename: Arc<OnceLock<String>>,
    worker: JoinHandle<WorkerOutcome>,
    reporter: JoinHandle<()>,
}

fn flatten(joined: Result<WorkerOutcome, JoinError>) -> WorkerOutcome {
    joined.unwrap_or_else(|e| Err(TransferError::transport(format!("worker crashed: {}", e))))
}

async fn wait_worker(active: &mut Option<ActiveJob>) -> Result<WorkerOutcome, JoinError> {
    match active {
        Some(job) => (&mut job.worker).await,
        None => std::future::pending().await,
    }
}

/// Sole owner of the queue and the active job. Runs as one task; commands
/// are handled one at a time, each to completion, so no two transitions
/// ever interleave.
pub(crate) struct Scheduler {
    store: QueueStore,
    active: Option<ActiveJob>,
    command_rx: mpsc::Receiver<Command>,
    fetcher: Arc<dyn Fetcher>,
    archiver: Arc<dyn Archiver>,
    cache: Cache,
    limiter: Arc<SpeedLimiter>,
    hub: Arc<EventHub>,
    db: Option<QueueDb>,
    retry: RetryPolicy,
    progress_interval: Duration,
    speed_smoothing: f64,
}

impl Scheduler {
    pub(crate) fn new(parts: SchedulerParts, hub: Arc<EventHub>, command_rx: mpsc::Receiver<Command>) -> Self {
        Self {
            store: QueueStore::new(),
            active: None,
            command_rx,
            fetcher: parts.fetcher,
            archiver: parts.archiver,
            cache: parts.cache,
            limiter: parts.limiter,
            hub,
            db: parts.db,
            retry: parts.retry,
            progress_interval: parts.progress_interval,
            speed_smoothing: parts.speed_smoothing,
        }
    }

    pub(crate) async fn run(mut self) {
        self.restore().await;
        self.start_next();

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let keep_going = match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            self.shutdown().await;
                            false
                        }
                    };
                    if !keep_going {
                        break;
                    }
                }
                joined = wait_worker(&mut self.active) => {
                    if let Some(job) = self.active.take() {
                        job.reporter.abort();
                        self.sync_counters(&job);
                        self.finish(&job, flatten(joined));
                    }
                    self.start_next();
                    self.persist().await;
                }
            }
        }
        tracing::info!("scheduler stopped");
    }

    /// Returns false once the actor should stop.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Enqueue { source, alias, reply } => {
                let res = self.enqueue(&source, alias.as_deref()).await;
                let _ = reply.send(res.map_err(CommandError::from));
            }
            Command::GetStatus { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Pause { reply } => {
                self.pause();
                let _ = reply.send(Ok(()));
            }
            Command::Resume { reply } => {
                self.resume();
                let _ = reply.send(Ok(()));
            }
            Command::Cancel { reply } => {
                self.cancel_active().await;
                let _ = reply.send(Ok(()));
            }
            Command::Reorder { hashes, reply } => {
                let res = self.store.reorder(&hashes);
                if res.is_ok() {
                    self.persist().await;
                }
                let _ = reply.send(res.map_err(CommandError::from));
            }
            Command::Remove { hash, reply } => {
                let res = self.remove(&hash).await;
                let _ = reply.send(res.map_err(CommandError::from));
            }
            Command::Promote { hash, reply } => {
                let res = self.promote(&hash).await;
                let _ = reply.send(res.map_err(CommandError::from));
            }
            Command::DemoteActive { position, reply } => {
                self.demote_active(position).await;
                let _ = reply.send(Ok(()));
            }
            Command::CleanCache { reply } => {
                let res = self.clean_cache().await;
                let _ = reply.send(res);
            }
            Command::SetSpeedLimit { bytes_per_sec, reply } => {
                let rate = bytes_per_sec.unwrap_or(0);
                self.limiter.set_rate(rate);
                tracing::info!(bytes_per_sec = rate, "speed limit changed");
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn enqueue(&mut self, source: &str, alias: Option<&str>) -> Result<String, ValidationError> {
        let added = self.store.enqueue(source, alias)?;
        if added.created {
            tracing::info!(hash = %added.hash, source, "transfer enqueued");
            self.start_next();
            self.persist().await;
        } else {
            tracing::debug!(hash = %added.hash, "duplicate enqueue ignored");
        }
        Ok(added.hash)
    }

    fn snapshot(&self) -> StatusSnapshot {
        let live = self
            .active
            .as_ref()
            .map(|job| (job.progress.as_ref(), job.filename.get().map(String::as_str)));
        StatusSnapshot::build(&self.store, live, self.limiter.rate())
    }

    fn pause(&mut self) {
        let Some(job) = &self.active else {
            return;
        };
        if job.progress.is_processing() {
            tracing::debug!(hash = %job.hash, "pause ignored while finalising");
            return;
        }
        if job.control.pause() {
            if let Some(t) = self.store.active_mut() {
                t.status = TransferStatus::Paused;
            }
            tracing::info!(hash = %job.hash, "transfer paused");
            self.hub.publish(Event::status("paused"));
        }
    }

    fn resume(&mut self) {
        let Some(job) = &self.active else {
            return;
        };
        if job.control.resume() {
            if let Some(t) = self.store.active_mut() {
                t.status = TransferStatus::Active;
            }
            tracing::info!(hash = %job.hash, "transfer resumed");
            self.hub.publish(Event::status("resumed"));
        }
    }

    /// Ask the worker to stop and wait until it has. The partial artifact is
    /// untouched afterwards; nothing writes to it any more.
    async fn stop_active(&mut self, reason: StopReason) -> Option<(ActiveJob, WorkerOutcome)> {
        let mut job = self.active.take()?;
        job.control.request_stop(reason);
        let outcome = flatten((&mut job.worker).await);
        job.reporter.abort();
        self.sync_counters(&job);
        Some((job, outcome))
    }

    async fn cancel_active(&mut self) {
        let Some((job, outcome)) = self.stop_active(StopReason::Cancel).await else {
            return;
        };
        match outcome {
            Err(TransferError::Stopped) => {
                match self.cache.remove_artifacts(&job.hash) {
                    Ok(n) => tracing::debug!(hash = %job.hash, removed = n, "partial artifact deleted"),
                    Err(e) => tracing::warn!(hash = %job.hash, "deleting partial artifact failed: {}", e),
                }
                self.store.take_active();
                tracing::info!(hash = %job.hash, "transfer cancelled");
                self.hub.publish(Event::status("cancelled"));
            }
            // Finished on its own before the stop landed.
            other => self.finish(&job, other),
        }
        self.start_next();
        self.persist().await;
    }

    async fn demote_active(&mut self, position: usize) {
        let Some((job, outcome)) = self.stop_active(StopReason::Demote).await else {
            return;
        };
        match outcome {
            Err(TransferError::Stopped) => {
                if let Some(demoted) = self.store.demote_active_to_queue(position) {
                    tracing::info!(hash = %demoted, position, "transfer demoted");
                    let next = self
                        .store
                        .queue()
                        .find(|t| t.hash != demoted)
                        .map(|t| t.hash.clone())
                        .unwrap_or(demoted);
                    if let Err(e) = self.store.promote(&next) {
                        tracing::warn!(hash = %next, "promotion after demote failed: {}", e);
                    }
                }
            }
            other => self.finish(&job, other),
        }
        self.start_next();
        self.persist().await;
    }

    async fn promote(&mut self, hash: &str) -> Result<(), ValidationError> {
        if self.store.is_active(hash) {
            return Ok(());
        }
        if !self.store.contains(hash) {
            return Err(ValidationError::UnknownHash(hash.to_string()));
        }
        if let Some((job, outcome)) = self.stop_active(StopReason::Demote).await {
            match outcome {
                Err(TransferError::Stopped) => {
                    self.store.demote_active_to_queue(0);
                }
                other => self.finish(&job, other),
            }
        }
        let res = self.store.promote(hash).map(|_| ());
        if res.is_ok() {
            tracing::info!(hash, "transfer promoted");
        }
        self.start_next();
        self.persist().await;
        res
    }

    async fn remove(&mut self, hash: &str) -> Result<(), ValidationError> {
        if self.store.is_active(hash) {
            self.cancel_active().await;
            return Ok(());
        }
        let removed = self.store.remove(hash)?;
        if let Err(e) = self.cache.remove_artifacts(&removed.hash) {
            tracing::warn!(hash, "deleting cached artifacts failed: {}", e);
        }
        tracing::info!(hash, "transfer removed from queue");
        self.persist().await;
        Ok(())
    }

    async fn clean_cache(&mut self) -> Result<usize, CommandError> {
        let keep = self.store.active().map(|t| t.hash.clone());
        let cache = self.cache.clone();
        let res = match tokio::task::spawn_blocking(move || cache.clean(keep.as_deref())).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(CommandError::Cache(e.to_string())),
            Err(e) => Err(CommandError::Cache(format!("clean task failed: {}", e))),
        };
        match &res {
            Ok(n) => tracing::info!(removed = n, "cache cleaned"),
            Err(e) => tracing::warn!("cache clean failed: {}", e),
        }
        res
    }

    async fn shutdown(&mut self) {
        if let Some((job, outcome)) = self.stop_active(StopReason::Shutdown).await {
            match outcome {
                // Stays in the slot; persisted first in line for next start.
                Err(TransferError::Stopped) => {
                    tracing::info!(hash = %job.hash, "active transfer suspended for shutdown");
                }
                other => self.finish(&job, other),
            }
        }
        self.persist().await;
    }

    /// Terminal outcome of the active job: clear the slot and report.
    fn finish(&mut self, job: &ActiveJob, outcome: WorkerOutcome) {
        let alias = self
            .store
            .take_active()
            .map(|t| t.alias)
            .unwrap_or_else(|| job.hash.clone());
        match outcome {
            Ok(dest) => {
                tracing::info!(hash = %job.hash, dest = %dest.display(), "transfer completed");
                self.hub.publish(Event::status("finished"));
                self.hub.publish(Event::Complete {
                    message: format!("{} saved to {}", alias, dest.display()),
                });
            }
            Err(e) => {
                tracing::warn!(hash = %job.hash, "transfer failed: {}", e);
                self.hub.publish(Event::status("failed"));
                self.hub.publish(Event::Error {
                    message: format!("{}: {}", alias, e),
                });
            }
        }
    }

    fn sync_counters(&mut self, job: &ActiveJob) {
        if let Some(t) = self.store.active_mut() {
            if t.hash == job.hash {
                t.bytes_done = job.progress.bytes_done();
                t.bytes_total = job.progress.bytes_total();
            }
        }
    }

    /// Fill an empty slot from the head of the queue and start its worker.
    fn start_next(&mut self) {
        if self.active.is_some() {
            return;
        }
        if self.store.active().is_none() && self.store.promote_next().is_none() {
            return;
        }
        let Some(t) = self.store.active_mut() else {
            return;
        };
        t.status = TransferStatus::Active;
        let job = Job {
            hash: t.hash.clone(),
            source: t.source.clone(),
        };
        let alias = t.alias.clone();
        let bytes_total = t.bytes_total;

        let control = Arc::new(WorkerControl::new());
        let progress = Arc::new(TransferProgress::new(
            self.cache.partial_len(&job.hash),
            bytes_total,
        ));
        let filename = Arc::new(OnceLock::new());
        let ctx = WorkerContext {
            fetcher: Arc::clone(&self.fetcher),
            archiver: Arc::clone(&self.archiver),
            cache: self.cache.clone(),
            limiter: Arc::clone(&self.limiter),
            hub: Arc::clone(&self.hub),
            retry: self.retry,
            control: Arc::clone(&control),
            progress: Arc::clone(&progress),
            filename: Arc::clone(&filename),
        };
        let worker = tokio::task::spawn_blocking({
            let job = job.clone();
            move || run_transfer(&job, &ctx)
        });
        let reporter = spawn_reporter(
            Arc::clone(&progress),
            Arc::clone(&control),
            Arc::clone(&self.hub),
            self.progress_interval,
            self.speed_smoothing,
        );

        tracing::info!(hash = %job.hash, alias = %alias, "transfer started");
        self.hub.publish(Event::status("started"));
        self.active = Some(ActiveJob {
            hash: job.hash,
            control,
            progress,
            filename,
            worker,
            reporter,
        });
    }

    async fn restore(&mut self) {
        let Some(db) = &self.db else {
            return;
        };
        match db.load().await {
            Ok(transfers) if !transfers.is_empty() => {
                tracing::info!(count = transfers.len(), "restored persisted queue");
                self.store.restore(transfers);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("loading persisted queue failed: {:#}", e),
        }
    }

    async fn persist(&mut self) {
        if let (Some(job), Some(t)) = (&self.active, self.store.active_mut()) {
            t.bytes_done = job.progress.bytes_done();
            t.bytes_total = job.progress.bytes_total();
        }
        let Some(db) = &self.db else {
            return;
        };
        if let Err(e) = db.save(&self.store.persisted()).await {
            tracing::warn!("persisting queue failed: {:#}", e);
        }
    }
}
