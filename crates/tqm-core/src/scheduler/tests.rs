use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::*;
use crate::archiver::{Archiver, MoveArchiver};
use crate::control::WorkerControl;
use crate::error::{CommandError, TransferError, ValidationError};
use crate::events::Event;
use crate::fetcher::{FetchSink, Fetcher, Probe};
use crate::transfer::{transfer_hash, TransferStatus};

/// Serves the same in-memory body for every source, one chunk per `delay`.
struct MemoryFetcher {
    data: Vec<u8>,
    chunk: usize,
    delay: Duration,
    /// Fetch calls that fail with a transport error after one chunk.
    failures_left: AtomicU32,
    /// Error returned by every fetch instead of data.
    hard_error: Option<u32>,
    /// Size reported by probe instead of the real length.
    probe_size: Option<u64>,
    calls: Mutex<Vec<(String, u64)>>,
}

impl MemoryFetcher {
    fn new(len: usize, chunk: usize, delay: Duration) -> Self {
        Self {
            data: (0..len).map(|i| (i % 251) as u8).collect(),
            chunk,
            delay,
            failures_left: AtomicU32::new(0),
            hard_error: None,
            probe_size: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Takes several seconds per transfer; tests stop it explicitly.
    fn slow() -> Self {
        Self::new(512 * 1024, 1024, Duration::from_millis(5))
    }

    fn fast() -> Self {
        Self::new(10 * 1024, 4096, Duration::ZERO)
    }

    fn offsets_for(&self, source: &str) -> Vec<u64> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == source)
            .map(|(_, o)| *o)
            .collect()
    }

    fn fetch_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MemoryFetcher {
    fn probe(&self, _source: &str, _control: &WorkerControl) -> Result<Probe, TransferError> {
        Ok(Probe {
            total_size: Some(self.probe_size.unwrap_or(self.data.len() as u64)),
            accept_ranges: true,
            content_disposition: None,
        })
    }

    fn fetch(
        &self,
        source: &str,
        offset: u64,
        control: &WorkerControl,
        sink: &mut dyn FetchSink,
    ) -> Result<(), TransferError> {
        self.calls.lock().unwrap().push((source.to_string(), offset));
        if let Some(code) = self.hard_error {
            return Err(TransferError::http(code));
        }
        sink.begin(offset)?;
        let mut pos = offset as usize;
        while pos < self.data.len() {
            if control.stop_reason().is_some() {
                return Err(TransferError::Stopped);
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            let end = (pos + self.chunk).min(self.data.len());
            sink.chunk(&self.data[pos..end])?;
            pos = end;
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(TransferError::transport("connection reset"));
            }
        }
        Ok(())
    }
}

struct FailingArchiver;

impl Archiver for FailingArchiver {
    fn finalize(
        &self,
        _artifact: &Path,
        _filename: &str,
        _control: &WorkerControl,
    ) -> Result<PathBuf, TransferError> {
        Err(TransferError::Archive("corrupt archive".into()))
    }
}

struct Harness {
    handle: SchedulerHandle,
    task: JoinHandle<()>,
    fetcher: Arc<MemoryFetcher>,
    cache: Cache,
    downloads: PathBuf,
    _dir: tempfile::TempDir,
}

fn parts_in(
    dir: &Path,
    fetcher: Arc<MemoryFetcher>,
    archiver: Option<Arc<dyn Archiver>>,
    db: Option<QueueDb>,
) -> SchedulerParts {
    let downloads = dir.join("downloads");
    SchedulerParts {
        fetcher,
        archiver: archiver.unwrap_or_else(|| Arc::new(MoveArchiver::new(downloads))),
        cache: Cache::open(dir.join("cache")).unwrap(),
        limiter: Arc::new(SpeedLimiter::new(0)),
        db,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        progress_interval: Duration::from_millis(10),
        speed_smoothing: 0.5,
        event_buffer: 1024,
    }
}

fn start_with(fetcher: MemoryFetcher, archiver: Option<Arc<dyn Archiver>>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(fetcher);
    let parts = parts_in(dir.path(), Arc::clone(&fetcher), archiver, None);
    let cache = parts.cache.clone();
    let (handle, task) = spawn(parts);
    Harness {
        handle,
        task,
        fetcher,
        cache,
        downloads: dir.path().join("downloads"),
        _dir: dir,
    }
}

fn start(fetcher: MemoryFetcher) -> Harness {
    start_with(fetcher, None)
}

impl Harness {
    async fn stop(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}

fn src(name: &str) -> String {
    format!("https://files.example.com/{}.bin", name)
}

async fn wait_for(
    handle: &SchedulerHandle,
    what: &str,
    pred: impl Fn(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let s = handle.get_status().await.unwrap();
        if pred(&s) {
            return s;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}: {s:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn bytes_done(s: &StatusSnapshot) -> u64 {
    s.current.as_ref().map_or(0, |c| c.bytes_done)
}

/// Read events until one matches, failing on timeout.
async fn next_matching(rx: &mut mpsc::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    let deadline = Duration::from_secs(20);
    tokio::time::timeout(deadline, async {
        loop {
            let ev = rx.recv().await.expect("event stream closed");
            if pred(&ev) {
                return ev;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn enqueue_two_promotes_first_and_queues_second() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    let b = h.handle.enqueue(&src("b"), None).await.unwrap();

    let s = h.handle.get_status().await.unwrap();
    assert!(s.active);
    assert_eq!(s.active_hash(), Some(a.as_str()));
    assert_eq!(s.current.as_ref().unwrap().status, TransferStatus::Active);
    assert_eq!(s.queue_hashes(), vec![b]);
    assert_eq!(s.queue[0].alias, "B");
    h.stop().await;
}

#[tokio::test]
async fn duplicate_and_empty_enqueue() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), Some("Alpha")).await.unwrap();
    let b = h.handle.enqueue(&src("b"), None).await.unwrap();
    assert_eq!(h.handle.enqueue(&src("b"), None).await.unwrap(), b);
    assert_eq!(h.handle.enqueue(&src("a"), Some("Alpha")).await.unwrap(), a);
    assert_eq!(a, transfer_hash(&src("a"), "Alpha"));
    assert_eq!(
        h.handle.enqueue("   ", None).await,
        Err(CommandError::Validation(ValidationError::EmptySource))
    );
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.queue_hashes(), vec![b]);
    h.stop().await;
}

#[tokio::test]
async fn pause_then_resume_never_reports_regress() {
    let h = start(MemoryFetcher::new(100 * 1024, 1024, Duration::from_millis(3)));
    let mut rx = h.handle.subscribe();
    h.handle.enqueue(&src("a"), None).await.unwrap();

    wait_for(&h.handle, "40%", |s| {
        s.current.as_ref().is_some_and(|c| c.percent >= 40.0)
    })
    .await;
    h.handle.pause().await.unwrap();
    // Second pause is a no-op success.
    h.handle.pause().await.unwrap();

    let s = h.handle.get_status().await.unwrap();
    assert!(s.is_paused);
    assert_eq!(s.current.as_ref().unwrap().status, TransferStatus::Paused);
    assert_eq!(s.speed, 0);
    assert_eq!(s.remaining_time, None);

    // Let the in-flight chunk land, then the counters must stay frozen.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let frozen = bytes_done(&h.handle.get_status().await.unwrap());
    tokio::time::sleep(Duration::from_millis(80)).await;
    let later = h.handle.get_status().await.unwrap();
    assert_eq!(bytes_done(&later), frozen);
    assert!(later.current.as_ref().unwrap().percent >= 40.0);

    while rx.try_recv().is_ok() {}
    h.handle.resume().await.unwrap();
    h.handle.resume().await.unwrap();
    assert!(!h.handle.get_status().await.unwrap().is_paused);

    loop {
        let ev = next_matching(&mut rx, |e| {
            matches!(e, Event::Progress { .. } | Event::Complete { .. })
        })
        .await;
        match ev {
            Event::Progress { percent } => assert!(percent >= 40.0, "regressed to {percent}"),
            _ => break,
        }
    }
    // The artifact was continued, never refetched from 0.
    assert_eq!(h.fetcher.offsets_for(&src("a")), vec![0]);
    h.stop().await;
}

#[tokio::test]
async fn pause_and_resume_without_active_are_noops() {
    let h = start(MemoryFetcher::slow());
    h.handle.pause().await.unwrap();
    h.handle.resume().await.unwrap();
    h.handle.cancel().await.unwrap();
    h.handle.demote_active(0).await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert!(!s.active);
    assert!(!s.is_paused);
    h.stop().await;
}

#[tokio::test]
async fn reorder_queue_is_pure_data_movement() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    let x = h.handle.enqueue(&src("x"), None).await.unwrap();
    let y = h.handle.enqueue(&src("y"), None).await.unwrap();
    let z = h.handle.enqueue(&src("z"), None).await.unwrap();

    h.handle
        .reorder(vec![z.clone(), x.clone(), y.clone()])
        .await
        .unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.queue_hashes(), vec![z.clone(), x.clone(), y.clone()]);
    assert_eq!(s.active_hash(), Some(a.as_str()));

    for bad in [
        vec![z.clone(), x.clone()],
        vec![z.clone(), x.clone(), x.clone()],
        vec![a.clone(), z.clone(), x.clone(), y.clone()],
    ] {
        assert_eq!(
            h.handle.reorder(bad).await,
            Err(CommandError::Validation(ValidationError::NotAPermutation))
        );
        let s = h.handle.get_status().await.unwrap();
        assert_eq!(s.queue_hashes(), vec![z.clone(), x.clone(), y.clone()]);
        assert_eq!(s.active_hash(), Some(a.as_str()));
    }
    h.stop().await;
}

#[tokio::test]
async fn demote_active_swaps_with_next_and_keeps_artifact() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    let b = h.handle.enqueue(&src("b"), None).await.unwrap();
    wait_for(&h.handle, "a progress", |s| bytes_done(s) > 0).await;

    h.handle.demote_active(0).await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(b.as_str()));
    assert_eq!(s.queue_hashes(), vec![a.clone()]);
    let kept = h.cache.partial_len(&a);
    assert!(kept > 0);

    // Back again: a continues from its partial artifact.
    h.handle.demote_active(5).await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(a.as_str()));
    assert_eq!(s.queue_hashes(), vec![b.clone()]);
    wait_for(&h.handle, "a resumed", |s| bytes_done(s) > kept).await;
    let offsets = h.fetcher.offsets_for(&src("a"));
    assert_eq!(offsets.len(), 2);
    assert_eq!(offsets[0], 0);
    assert!(offsets[1] >= kept);
    h.stop().await;
}

#[tokio::test]
async fn demote_with_empty_queue_restarts_same_job() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    wait_for(&h.handle, "a progress", |s| bytes_done(s) > 0).await;
    h.handle.demote_active(0).await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(a.as_str()));
    assert!(s.queue.is_empty());
    h.stop().await;
}

#[tokio::test]
async fn promote_queued_job_over_running_one() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    let b = h.handle.enqueue(&src("b"), None).await.unwrap();
    let c = h.handle.enqueue(&src("c"), None).await.unwrap();

    h.handle.promote(&c).await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(c.as_str()));
    assert_eq!(s.queue_hashes(), vec![a.clone(), b.clone()]);

    // Promoting the active job changes nothing.
    h.handle.promote(&c).await.unwrap();
    assert_eq!(
        h.handle.promote("0000").await,
        Err(CommandError::Validation(ValidationError::UnknownHash("0000".into())))
    );
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(c.as_str()));
    assert_eq!(s.queue_hashes(), vec![a, b]);
    h.stop().await;
}

#[tokio::test]
async fn cancel_deletes_artifact_and_promotes_next_in_same_turn() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    let b = h.handle.enqueue(&src("b"), None).await.unwrap();
    let mut rx = h.handle.subscribe();
    wait_for(&h.handle, "a progress", |s| bytes_done(s) > 0).await;
    assert!(h.cache.partial_len(&a) > 0);

    h.handle.cancel().await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(b.as_str()));
    assert!(s.queue.is_empty());
    assert!(!h.cache.partial_path(&a).exists());
    next_matching(&mut rx, |e| *e == Event::status("cancelled")).await;

    h.handle.cancel().await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert!(!s.active);
    assert!(s.current.is_none());
    assert!(!h.cache.partial_path(&b).exists());
    h.stop().await;
}

#[tokio::test]
async fn cancel_while_paused_deletes_artifact_and_runs_next() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    let b = h.handle.enqueue(&src("b"), None).await.unwrap();
    wait_for(&h.handle, "a progress", |s| bytes_done(s) > 0).await;
    h.handle.pause().await.unwrap();
    assert!(h.handle.get_status().await.unwrap().is_paused);

    tokio::time::timeout(Duration::from_secs(5), h.handle.cancel())
        .await
        .expect("cancel of a paused job must not hang")
        .unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(b.as_str()));
    assert!(!s.is_paused);
    assert_eq!(s.current.as_ref().unwrap().status, TransferStatus::Active);
    assert!(!h.cache.partial_path(&a).exists());
    wait_for(&h.handle, "b progress", |s| bytes_done(s) > 0).await;
    h.stop().await;
}

#[tokio::test]
async fn demote_while_paused_keeps_artifact_and_requeues() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    let b = h.handle.enqueue(&src("b"), None).await.unwrap();
    wait_for(&h.handle, "a progress", |s| bytes_done(s) > 0).await;
    h.handle.pause().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let kept = h.cache.partial_len(&a);
    assert!(kept > 0);

    tokio::time::timeout(Duration::from_secs(5), h.handle.demote_active(0))
        .await
        .expect("demote of a paused job must not hang")
        .unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(b.as_str()));
    assert!(!s.is_paused);
    assert_eq!(s.queue_hashes(), vec![a.clone()]);
    assert_eq!(h.cache.partial_len(&a), kept);

    // Back in the slot it runs again instead of staying paused.
    h.handle.demote_active(1).await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(a.as_str()));
    assert_eq!(s.current.as_ref().unwrap().status, TransferStatus::Active);
    wait_for(&h.handle, "a resumed", |s| bytes_done(s) > kept).await;
    assert!(h.fetcher.offsets_for(&src("a"))[1] >= kept);
    h.stop().await;
}

#[tokio::test]
async fn remove_queued_active_and_unknown() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    let b = h.handle.enqueue(&src("b"), None).await.unwrap();
    let c = h.handle.enqueue(&src("c"), None).await.unwrap();
    std::fs::write(h.cache.partial_path(&b), b"stale").unwrap();

    h.handle.remove(&b).await.unwrap();
    assert!(!h.cache.partial_path(&b).exists());
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.queue_hashes(), vec![c.clone()]);

    h.handle.remove(&a).await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    assert_eq!(s.active_hash(), Some(c.as_str()));

    assert_eq!(
        h.handle.remove(&a).await,
        Err(CommandError::Validation(ValidationError::UnknownHash(a.clone())))
    );
    h.stop().await;
}

#[tokio::test]
async fn completed_transfer_lands_in_download_dir() {
    let h = start(MemoryFetcher::fast());
    let mut rx = h.handle.subscribe();
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();

    let meta = next_matching(&mut rx, |e| matches!(e, Event::Meta { .. })).await;
    assert_eq!(
        meta,
        Event::Meta {
            filename: "a.bin".into(),
            total_size: Some(10 * 1024),
        }
    );
    next_matching(&mut rx, |e| matches!(e, Event::Complete { .. })).await;
    wait_for(&h.handle, "idle", |s| !s.active).await;

    let out = h.downloads.join("a.bin");
    assert_eq!(std::fs::read(&out).unwrap(), h.fetcher.data);
    assert!(!h.cache.partial_path(&a).exists());
    h.stop().await;
}

#[tokio::test]
async fn transport_errors_are_retried_from_confirmed_offset() {
    let fetcher = MemoryFetcher::fast();
    fetcher.failures_left.store(2, Ordering::SeqCst);
    let h = start(fetcher);
    let mut rx = h.handle.subscribe();
    h.handle.enqueue(&src("a"), None).await.unwrap();

    next_matching(&mut rx, |e| matches!(e, Event::Complete { .. })).await;
    let offsets = h.fetcher.offsets_for(&src("a"));
    assert_eq!(offsets, vec![0, 4096, 8192]);
    assert_eq!(std::fs::read(h.downloads.join("a.bin")).unwrap(), h.fetcher.data);
    h.stop().await;
}

#[tokio::test]
async fn client_error_fails_job_and_next_runs() {
    let mut fetcher = MemoryFetcher::fast();
    fetcher.hard_error = Some(404);
    let h = start(fetcher);
    let mut rx = h.handle.subscribe();
    h.handle.enqueue(&src("a"), None).await.unwrap();

    let ev = next_matching(&mut rx, |e| matches!(e, Event::Error { .. })).await;
    match ev {
        Event::Error { message } => assert!(message.contains("404"), "{message}"),
        _ => unreachable!(),
    }
    wait_for(&h.handle, "idle", |s| !s.active).await;
    // Not retried.
    assert_eq!(h.fetcher.fetch_count(), 1);

    // The loop keeps serving commands.
    h.handle.set_speed_limit(Some(2048)).await.unwrap();
    assert_eq!(h.handle.get_status().await.unwrap().speed_limit, Some(2048));
    h.handle.set_speed_limit(None).await.unwrap();
    assert_eq!(h.handle.get_status().await.unwrap().speed_limit, None);
    h.stop().await;
}

#[tokio::test]
async fn archive_error_is_terminal_and_keeps_artifact() {
    let h = start_with(MemoryFetcher::fast(), Some(Arc::new(FailingArchiver)));
    let mut rx = h.handle.subscribe();
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    let b = h.handle.enqueue(&src("b"), None).await.unwrap();

    let ev = next_matching(&mut rx, |e| matches!(e, Event::Error { .. })).await;
    match ev {
        Event::Error { message } => assert!(message.contains("corrupt archive"), "{message}"),
        _ => unreachable!(),
    }
    assert_eq!(h.cache.partial_len(&a), h.fetcher.data.len() as u64);
    // b is promoted and fails the same way; only one fetch each.
    next_matching(&mut rx, |e| matches!(e, Event::Error { .. })).await;
    wait_for(&h.handle, "idle", |s| !s.active).await;
    assert_eq!(h.fetcher.offsets_for(&src("a")), vec![0]);
    assert_eq!(h.fetcher.offsets_for(&src("b")), vec![0]);
    assert_eq!(h.cache.partial_len(&b), h.fetcher.data.len() as u64);
    h.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn capacity_error_is_terminal() {
    let mut fetcher = MemoryFetcher::fast();
    fetcher.probe_size = Some(u64::MAX / 4);
    let h = start(fetcher);
    let mut rx = h.handle.subscribe();
    h.handle.enqueue(&src("a"), None).await.unwrap();
    let ev = next_matching(&mut rx, |e| matches!(e, Event::Error { .. })).await;
    match ev {
        Event::Error { message } => assert!(message.contains("disk space"), "{message}"),
        _ => unreachable!(),
    }
    assert_eq!(h.fetcher.fetch_count(), 0);
    h.stop().await;
}

#[tokio::test]
async fn complete_artifact_in_cache_skips_fetch() {
    let fetcher = MemoryFetcher::fast();
    let data = fetcher.data.clone();
    let h = start(fetcher);
    let hash = transfer_hash(&src("a"), "Cached");
    std::fs::write(h.cache.partial_path(&hash), &data).unwrap();

    let mut rx = h.handle.subscribe();
    h.handle.enqueue(&src("a"), Some("Cached")).await.unwrap();
    next_matching(&mut rx, |e| matches!(e, Event::Complete { .. })).await;
    assert_eq!(h.fetcher.fetch_count(), 0);
    assert_eq!(std::fs::read(h.downloads.join("a.bin")).unwrap(), data);
    h.stop().await;
}

#[tokio::test]
async fn clean_cache_spares_active_artifacts() {
    let h = start(MemoryFetcher::slow());
    let a = h.handle.enqueue(&src("a"), None).await.unwrap();
    wait_for(&h.handle, "a progress", |s| bytes_done(s) > 0).await;
    std::fs::write(h.cache.dir().join("deadbeef.part"), b"old").unwrap();
    std::fs::create_dir(h.cache.dir().join("cafebabe.extract")).unwrap();

    assert_eq!(h.handle.clean_cache().await.unwrap(), 2);
    assert!(h.cache.partial_path(&a).exists());
    assert_eq!(h.handle.clean_cache().await.unwrap(), 0);
    h.stop().await;
}

#[tokio::test]
async fn clean_cache_reports_unreadable_cache_dir() {
    let h = start(MemoryFetcher::slow());
    std::fs::remove_dir_all(h.cache.dir()).unwrap();
    std::fs::write(h.cache.dir(), b"not a directory").unwrap();

    match h.handle.clean_cache().await {
        Err(CommandError::Cache(message)) => assert!(!message.is_empty()),
        other => panic!("unexpected {other:?}"),
    }
    // The scheduler keeps serving commands afterwards.
    assert!(!h.handle.get_status().await.unwrap().active);
    h.stop().await;
}

#[tokio::test]
async fn shutdown_keeps_artifact_and_queue_is_restored() {
    let dir = tempfile::tempdir().unwrap();
    let db = crate::queue_db::open_memory().await.unwrap();

    let fetcher = Arc::new(MemoryFetcher::slow());
    let (handle, task) = spawn(parts_in(dir.path(), Arc::clone(&fetcher), None, Some(db.clone())));
    let a = handle.enqueue(&src("a"), None).await.unwrap();
    let b = handle.enqueue(&src("b"), None).await.unwrap();
    wait_for(&handle, "a progress", |s| bytes_done(s) > 0).await;
    handle.shutdown().await.unwrap();
    task.await.unwrap();

    let cache = Cache::open(dir.path().join("cache")).unwrap();
    let kept = cache.partial_len(&a);
    assert!(kept > 0);
    let saved = db.load().await.unwrap();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].hash, a);
    assert_eq!(saved[0].bytes_done, kept);

    let fetcher = Arc::new(MemoryFetcher::slow());
    let (handle, task) = spawn(parts_in(dir.path(), Arc::clone(&fetcher), None, Some(db)));
    let s = wait_for(&handle, "restored", |s| s.active).await;
    assert_eq!(s.active_hash(), Some(a.as_str()));
    assert_eq!(s.queue_hashes(), vec![b]);
    wait_for(&handle, "a resumed", |s| bytes_done(s) > kept).await;
    assert_eq!(fetcher.offsets_for(&src("a")), vec![kept]);
    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn commands_after_shutdown_report_shutdown() {
    let h = start(MemoryFetcher::fast());
    let handle = h.handle.clone();
    h.stop().await;
    assert_eq!(handle.pause().await, Err(CommandError::Shutdown));
    assert!(handle.get_status().await.is_err());
}

#[tokio::test]
async fn active_slot_never_holds_more_than_one() {
    let h = start(MemoryFetcher::slow());
    let mut hashes = Vec::new();
    for name in ["a", "b", "c", "d"] {
        hashes.push(h.handle.enqueue(&src(name), None).await.unwrap());
    }
    let check = |s: &StatusSnapshot| {
        assert!(s.active);
        assert_eq!(1 + s.queue.len(), 4);
    };
    check(&h.handle.get_status().await.unwrap());
    h.handle.demote_active(2).await.unwrap();
    check(&h.handle.get_status().await.unwrap());
    h.handle.promote(&hashes[3]).await.unwrap();
    check(&h.handle.get_status().await.unwrap());
    h.handle.pause().await.unwrap();
    h.handle.promote(&hashes[0]).await.unwrap();
    let s = h.handle.get_status().await.unwrap();
    check(&s);
    // A fresh worker starts unpaused.
    assert!(!s.is_paused);
    h.stop().await;
}
