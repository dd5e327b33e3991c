use std::time::{Duration, Instant};

use serde::Serialize;

pub const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Rate {
    /// Megabits per second (decimal).
    pub mbps: f64,
    /// Megabytes per second, always `mbps / 8`.
    pub mbytes_per_sec: f64,
}

/// Stateless rate computation. `elapsed_secs` must be > 0; callers only sample
/// once a full report interval has passed.
pub struct RateSampler;

impl RateSampler {
    pub fn sample(bytes_in_window: u64, elapsed_secs: f64) -> Rate {
        debug_assert!(elapsed_secs > 0.0, "rate sampled over an empty window");
        let mbps = (bytes_in_window as f64) * 8.0 / elapsed_secs / 1_000_000.0;
        Rate { mbps, mbytes_per_sec: mbps / 8.0 }
    }
}

pub fn to_mib(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MIB
}

/// Bytes counted since `started`, reported at most once per `interval`.
///
/// The rate is always taken over the whole window (start to now), so the
/// estimate smooths out as the window grows. Only the report timer resets.
pub struct RateWindow {
    started: Instant,
    last_report: Instant,
    bytes: u64,
    interval: Duration,
}

impl RateWindow {
    pub fn new(now: Instant, interval: Duration) -> Self {
        Self { started: now, last_report: now, bytes: 0, interval }
    }

    pub fn record(&mut self, n: u64) {
        self.bytes += n;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Returns a sample if the report interval has elapsed since the last one.
    pub fn poll(&mut self, now: Instant) -> Option<Rate> {
        if self.interval.is_zero() || now.duration_since(self.last_report) < self.interval {
            return None;
        }
        let elapsed = now.duration_since(self.started).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        self.last_report = now;
        Some(RateSampler::sample(self.bytes, elapsed))
    }
}
