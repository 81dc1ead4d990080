//! Round-trip latency estimate from capture and playback timestamps.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Average of `playback[i] - capture[i]` over the paired indices, in
/// milliseconds.
///
/// Timestamps are paired index-for-index up to the shorter slice.  The
/// result is negative when playback runs ahead of capture, and `0.0` when
/// either slice is empty.
pub fn average_latency_ms(capture: &[Instant], playback: &[Instant]) -> f64 {
    let pairs = capture.len().min(playback.len());
    if pairs == 0 {
        return 0.0;
    }
    let total: f64 = capture
        .iter()
        .zip(playback)
        .map(|(&c, &p)| signed_millis(c, p))
        .sum();
    total / pairs as f64
}

fn signed_millis(from: Instant, to: Instant) -> f64 {
    match to.checked_duration_since(from) {
        Some(ahead) => ahead.as_secs_f64() * 1_000.0,
        None => -from.duration_since(to).as_secs_f64() * 1_000.0,
    }
}

/// Holds the last computed latency for `ttl`.
pub struct LatencyCache {
    ttl: Duration,
    last: Mutex<Option<(Instant, f64)>>,
}

impl LatencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: Mutex::new(None),
        }
    }

    /// Cached value if still fresh, otherwise `compute()` (which is then
    /// cached).
    pub fn get_or_update(&self, compute: impl FnOnce() -> f64) -> f64 {
        let mut last = self.last.lock();
        if let Some((at, value)) = *last {
            if at.elapsed() < self.ttl {
                return value;
            }
        }
        let value = compute();
        *last = Some((Instant::now(), value));
        value
    }

    pub fn invalidate(&self) {
        *self.last.lock() = None;
    }
}
