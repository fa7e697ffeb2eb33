//! Named latency timers
//!
//! A timer tracks a smoothed average plus observed min/max, in
//! microseconds. Samples come from the loop thread; readers may flush the
//! aggregates into stats counters at any time.

use memrouter_common::ExponentialSmoother;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SMOOTHING_FACTOR: f64 = 1.0 / 16.0;

/// Smoothed latency aggregate with a name for stats output.
#[derive(Debug)]
pub struct NamedTimer {
    name: &'static str,
    avg: Mutex<ExponentialSmoother>,
    min_us: AtomicU64,
    max_us: AtomicU64,
}

impl NamedTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            avg: Mutex::new(ExponentialSmoother::new(SMOOTHING_FACTOR)),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record one duration sample.
    pub fn record(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.avg.lock().insert_sample(us as f64);
        self.min_us.fetch_min(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    /// Start a sample; recorded when the guard drops.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            timer: self,
            started: Instant::now(),
        }
    }

    pub fn average_us(&self) -> u64 {
        self.avg.lock().current_value() as u64
    }

    pub fn min_us(&self) -> u64 {
        let v = self.min_us.load(Ordering::Relaxed);
        if v == u64::MAX {
            0
        } else {
            v
        }
    }

    pub fn max_us(&self) -> u64 {
        self.max_us.load(Ordering::Relaxed)
    }
}

/// Records the elapsed time into its timer on drop.
pub struct TimerGuard<'a> {
    timer: &'a NamedTimer,
    started: Instant,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.record(self.started.elapsed());
    }
}

static ON_REQUEST_TIMER: Lazy<NamedTimer> = Lazy::new(|| NamedTimer::new("router_on_request"));

/// The process-wide request processing timer.
pub fn on_request_timer() -> &'static NamedTimer {
    &ON_REQUEST_TIMER
}
