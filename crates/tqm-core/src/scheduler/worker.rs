//! The active job's pipeline: probe, resumable fetch into the cache, then
//! finalise. Runs on one blocking thread; every buffer write is followed by a
//! checkpoint where pause blocks and stop requests surface as `Stopped`.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::archiver::Archiver;
use crate::cache::Cache;
use crate::control::WorkerControl;
use crate::error::TransferError;
use crate::events::{Event, EventHub};
use crate::fetcher::{FetchSink, Fetcher, Probe};
use crate::limiter::SpeedLimiter;
use crate::naming::derive_filename;
use crate::progress::TransferProgress;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::storage::ArtifactWriter;

/// What the worker needs to know about the transfer it runs.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub hash: String,
    pub source: String,
}

/// Collaborators and shared state handed to one worker run.
pub(crate) struct WorkerContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub archiver: Arc<dyn Archiver>,
    pub cache: Cache,
    pub limiter: Arc<SpeedLimiter>,
    pub hub: Arc<EventHub>,
    pub retry: RetryPolicy,
    pub control: Arc<WorkerControl>,
    pub progress: Arc<TransferProgress>,
    pub filename: Arc<OnceLock<String>>,
}

/// Appends fetched bytes to the partial artifact, honouring the speed cap
/// and the control checkpoints.
struct ArtifactSink<'a> {
    writer: &'a mut ArtifactWriter,
    ctx: &'a WorkerContext,
}

impl FetchSink for ArtifactSink<'_> {
    fn begin(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset != self.writer.len() {
            tracing::debug!(offset, have = self.writer.len(), "restarting artifact");
            self.writer.rewind_to(offset).map_err(TransferError::from_io)?;
            self.ctx.progress.set_bytes_done(self.writer.len());
        }
        Ok(())
    }

    fn chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.writer.write_chunk(data)?;
        self.ctx.progress.set_bytes_done(self.writer.len());
        if let Some(delay) = self.ctx.limiter.reserve(data.len() as u64) {
            self.ctx.control.sleep(delay)?;
        }
        self.ctx.control.checkpoint()
    }
}

/// Run the whole pipeline. Returns where the finished transfer ended up.
pub(crate) fn run_transfer(job: &Job, ctx: &WorkerContext) -> Result<PathBuf, TransferError> {
    ctx.control.checkpoint()?;

    let mut probe = Probe::default();
    run_with_retry(&ctx.retry, &ctx.control, || 0, || {
        probe = ctx.fetcher.probe(&job.source, &ctx.control)?;
        Ok(())
    })?;

    let filename = derive_filename(&job.source, probe.content_disposition.as_deref());
    let _ = ctx.filename.set(filename.clone());
    let total = probe.total_size.unwrap_or(0);
    ctx.progress.set_bytes_total(total);
    ctx.hub.publish(Event::Meta {
        filename: filename.clone(),
        total_size: probe.total_size,
    });

    let part = ctx.cache.partial_path(&job.hash);
    let mut have = ctx.cache.partial_len(&job.hash);
    if (total > 0 && have > total) || (!probe.accept_ranges && have < total) {
        have = 0;
    }
    ctx.progress.set_bytes_done(have);

    if total > 0 && have == total {
        tracing::info!(hash = %job.hash, "artifact already complete in cache, skipping fetch");
    } else {
        if total > 0 {
            ctx.cache.ensure_capacity(total - have)?;
        }
        let mut writer = ArtifactWriter::open_at(&part, have).map_err(TransferError::from_io)?;
        ctx.progress.set_bytes_done(writer.len());
        tracing::info!(hash = %job.hash, offset = writer.len(), total, "fetching");

        run_with_retry(&ctx.retry, &ctx.control, || ctx.progress.bytes_done(), || {
            ctx.control.checkpoint()?;
            let offset = writer.len();
            let mut sink = ArtifactSink {
                writer: &mut writer,
                ctx,
            };
            ctx.fetcher.fetch(&job.source, offset, &ctx.control, &mut sink)?;
            if total > 0 && writer.len() < total {
                return Err(TransferError::transport(format!(
                    "connection closed at {} of {} bytes",
                    writer.len(),
                    total
                )));
            }
            Ok(())
        })?;
        writer.sync().map_err(TransferError::from_io)?;
        if total == 0 {
            ctx.progress.set_bytes_total(writer.len());
        }
    }

    ctx.control.checkpoint()?;
    ctx.progress.set_processing(true);
    ctx.hub.publish(Event::status("processing"));
    ctx.archiver.finalize(&part, &filename, &ctx.control)
}
