//! Fixed-capacity circular record of monotonic callback times.
//!
//! When the ring is full, new timestamps **overwrite** the oldest ones, so
//! the most recent `capacity` invocations are always available.  Reads skip
//! slots that were never written and return entries in chronological order
//! (oldest first).
//!
//! # Example
//!
//! ```rust
//! use std::time::Instant;
//! use voice_relay::audio::TimestampRing;
//!
//! let mut ring = TimestampRing::new(2);
//! let start = Instant::now();
//! for _ in 0..3 {
//!     ring.record(start);
//! }
//! assert_eq!(ring.entries().len(), 2);
//! ```

use std::time::Instant;

/// A fixed-capacity ring of optional timestamps.
pub struct TimestampRing {
    slots: Vec<Option<Instant>>,
    /// Index of the *next* write position (wraps around capacity).
    write_pos: usize,
}

impl TimestampRing {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "TimestampRing capacity must be > 0");
        Self {
            slots: vec![None; capacity],
            write_pos: 0,
        }
    }

    /// Record `at`, overwriting the oldest entry once full.
    pub fn record(&mut self, at: Instant) {
        self.slots[self.write_pos] = Some(at);
        self.write_pos = (self.write_pos + 1) % self.slots.len();
    }

    /// Populated entries, oldest first.
    pub fn entries(&self) -> Vec<Instant> {
        let capacity = self.slots.len();
        (0..capacity)
            .filter_map(|i| self.slots[(self.write_pos + i) % capacity])
            .collect()
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Forget every entry and rewind the write position.
    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.write_pos = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
