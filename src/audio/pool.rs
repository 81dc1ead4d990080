//! Fixed-capacity rotating pool of pre-allocated sample buffers.
//!
//! Each slot is an `Arc<Vec<f32>>` so a filled slot can be published as a
//! snapshot without copying.  A slot is only rewritten in place when the pool
//! holds the sole reference to it; a slot that is still published or held by
//! a reader is replaced instead, so a published block is never mutated.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use voice_relay::audio::BufferPool;
//!
//! let mut pool = BufferPool::new(2, 4);
//! let first = pool.acquire();
//! let _second = pool.acquire();
//! let third = pool.acquire(); // wraps to slot 0
//! assert!(Arc::ptr_eq(&first, &third));
//! assert_eq!(third.len(), 4);
//! ```

use std::sync::Arc;

// ---------------------------------------------------------------------------
// BufferPool
// ---------------------------------------------------------------------------

/// Ring of `capacity` buffers, each `buffer_len` samples long.
///
/// ## Allocation behaviour
///
/// [`fill_next`](Self::fill_next) writes into the next slot without
/// allocating as long as nobody else holds that slot and the requested length
/// fits its capacity.  Otherwise the slot is replaced with a fresh buffer.
pub struct BufferPool {
    slots: Vec<Arc<Vec<f32>>>,
    buffer_len: usize,
    /// Index of the slot handed out by the next request (wraps at capacity).
    cursor: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` zeroed buffers of `buffer_len` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        assert!(capacity > 0, "BufferPool capacity must be > 0");
        Self {
            slots: (0..capacity)
                .map(|_| Arc::new(vec![0.0; buffer_len]))
                .collect(),
            buffer_len,
            cursor: 0,
        }
    }

    /// Hand out the next slot in rotation.
    pub fn acquire(&mut self) -> Arc<Vec<f32>> {
        let index = self.advance();
        Arc::clone(&self.slots[index])
    }

    /// Fill the next slot with `len` samples produced by `fill`.
    ///
    /// `fill` receives a zeroed-or-stale slice of exactly `len` samples and
    /// returns whether it succeeded.  On failure nothing is returned and no
    /// previously handed-out buffer has been touched.
    pub fn fill_next<F>(&mut self, len: usize, fill: F) -> Option<Arc<Vec<f32>>>
    where
        F: FnOnce(&mut [f32]) -> bool,
    {
        let index = self.advance();
        let slot = &mut self.slots[index];

        if Arc::get_mut(slot).map_or(true, |buf| buf.capacity() < len) {
            // Still referenced elsewhere, or too small: replace rather than
            // mutate a buffer someone may be reading.
            *slot = Arc::new(vec![0.0; len.max(self.buffer_len)]);
        }

        let buf = Arc::get_mut(slot)?;
        buf.resize(len, 0.0);
        if !fill(buf.as_mut_slice()) {
            return None;
        }
        Some(Arc::clone(slot))
    }

    /// Copy `samples` into the next slot.
    pub fn copy_next(&mut self, samples: &[f32]) -> Arc<Vec<f32>> {
        match self.fill_next(samples.len(), |dst| {
            dst.copy_from_slice(samples);
            true
        }) {
            Some(buf) => buf,
            None => Arc::new(samples.to_vec()),
        }
    }

    fn advance(&mut self) -> usize {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.slots.len();
        index
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
