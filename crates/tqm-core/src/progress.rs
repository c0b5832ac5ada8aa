//! Progress sampling for the active transfer.
//!
//! The worker thread bumps `TransferProgress` counters after every write. A
//! reporter task samples them on a fixed interval, smooths the rate with an
//! exponential moving average and pushes `progress` events. Status snapshots
//! read the same counters directly, so both read paths see one source.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::control::WorkerControl;
use crate::events::{Event, EventHub};

/// Live counters shared by the worker, the reporter and status snapshots.
#[derive(Debug, Default)]
pub struct TransferProgress {
    bytes_done: AtomicU64,
    /// 0 while unknown.
    bytes_total: AtomicU64,
    /// Smoothed rate in bytes/sec, maintained by the reporter.
    speed: AtomicU64,
    /// Download finished, finalisation/extraction running.
    processing: AtomicBool,
}

impl TransferProgress {
    pub fn new(bytes_done: u64, bytes_total: u64) -> Self {
        Self {
            bytes_done: AtomicU64::new(bytes_done),
            bytes_total: AtomicU64::new(bytes_total),
            ..Self::default()
        }
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    pub fn set_bytes_done(&self, n: u64) {
        self.bytes_done.store(n, Ordering::Relaxed);
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::Relaxed)
    }

    pub fn set_bytes_total(&self, n: u64) {
        self.bytes_total.store(n, Ordering::Relaxed);
    }

    pub fn speed(&self) -> u64 {
        self.speed.load(Ordering::Relaxed)
    }

    fn set_speed(&self, bps: u64) {
        self.speed.store(bps, Ordering::Relaxed);
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Relaxed)
    }

    pub fn set_processing(&self, on: bool) {
        self.processing.store(on, Ordering::Relaxed);
    }

    pub fn percent(&self) -> f64 {
        percent(self.bytes_done(), self.bytes_total())
    }
}

/// Completion percentage clamped to [0, 100]. Unknown totals, NaN and
/// negative values collapse to 0.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent(done as f64 / total as f64 * 100.0)
}

pub fn clamp_percent(p: f64) -> f64 {
    if p.is_nan() || p < 0.0 {
        return 0.0;
    }
    p.min(100.0)
}

/// Seconds left at `speed`; `None` (unbounded) when speed is zero.
pub fn remaining_time(done: u64, total: u64, speed: u64) -> Option<f64> {
    if speed == 0 {
        return None;
    }
    Some(total.saturating_sub(done) as f64 / speed as f64)
}

/// Exponential moving average over instantaneous rate samples.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    alpha: f64,
    speed: f64,
    last: Option<(Instant, u64)>,
}

impl SpeedMeter {
    /// `alpha` is the weight of the newest sample, clamped to (0, 1].
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 { alpha.min(1.0) } else { 1.0 };
        Self {
            alpha,
            speed: 0.0,
            last: None,
        }
    }

    /// Feed the counter value observed at `now`; returns the smoothed rate.
    /// The first sample after construction or `reset` only sets the baseline.
    pub fn sample(&mut self, now: Instant, bytes: u64) -> f64 {
        if let Some((at, prev)) = self.last {
            let dt = now.saturating_duration_since(at).as_secs_f64();
            if dt > 0.0 {
                let instant = bytes.saturating_sub(prev) as f64 / dt;
                self.speed = if self.speed == 0.0 {
                    instant
                } else {
                    self.alpha * instant + (1.0 - self.alpha) * self.speed
                };
            }
        }
        self.last = Some((now, bytes));
        self.speed
    }

    /// Drop the baseline and the average (used while paused).
    pub fn reset(&mut self) {
        self.speed = 0.0;
        self.last = None;
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }
}

/// Sample `progress` every `interval` and publish `progress` events until aborted.
///
/// While the worker is paused the rate reads 0 and nothing is published; on
/// resume the meter starts from a fresh baseline. Published percentages never
/// go down.
pub fn spawn_reporter(
    progress: Arc<TransferProgress>,
    control: Arc<WorkerControl>,
    hub: Arc<EventHub>,
    interval: Duration,
    alpha: f64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut meter = SpeedMeter::new(alpha);
        let mut last_percent: Option<f64> = None;

        loop {
            ticker.tick().await;
            if control.is_paused() {
                meter.reset();
                progress.set_speed(0);
                continue;
            }
            let speed = meter.sample(Instant::now(), progress.bytes_done());
            progress.set_speed(speed.round() as u64);

            if progress.is_processing() || progress.bytes_total() == 0 {
                continue;
            }
            let pct = progress.percent();
            if last_percent.map_or(true, |last| pct > last) {
                last_percent = Some(pct);
                hub.publish(Event::Progress { percent: pct });
            }
        }
    })
}
