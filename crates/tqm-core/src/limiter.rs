//! Token-bucket bandwidth cap for the active transfer.
//!
//! Shared between the scheduler (which changes the rate) and the worker
//! thread (which reserves tokens per chunk and sleeps the returned delay).
//! A rate of 0 means unlimited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct SpeedLimiter {
    rate: AtomicU64,
    bucket: Mutex<Bucket>,
}

impl SpeedLimiter {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        Self {
            rate: AtomicU64::new(rate_bytes_per_sec),
            bucket: Mutex::new(Bucket {
                tokens: rate_bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// From an optional config cap: `None` or 0 is unlimited.
    pub fn from_cap(cap: Option<u64>) -> Self {
        Self::new(cap.unwrap_or(0))
    }

    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate() == 0
    }

    /// Change the cap at runtime. Takes effect on the next `reserve`.
    pub fn set_rate(&self, rate_bytes_per_sec: u64) {
        self.rate.store(rate_bytes_per_sec, Ordering::Relaxed);
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.tokens = bucket.tokens.min(rate_bytes_per_sec as f64);
        bucket.last_refill = Instant::now();
    }

    /// Take `bytes` tokens. Returns how long the caller must wait before
    /// moving more data, or `None` when within budget.
    pub fn reserve(&self, bytes: u64) -> Option<Duration> {
        if self.is_unlimited() {
            return None;
        }
        let rate = self.rate();
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * rate as f64).min(rate as f64 * 2.0);

        bucket.tokens -= bytes as f64;
        if bucket.tokens < 0.0 {
            Some(Duration::from_secs_f64(-bucket.tokens / rate as f64))
        } else {
            None
        }
    }
}
