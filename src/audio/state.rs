//! Running state shared between caller threads and realtime callbacks.
//!
//! [`RunningFlag`] stores a [`RunningState`] in an atomic so the realtime
//! side can read it without locking.  Writers publish with `Release` and
//! readers observe with `Acquire`: once a reader sees `Running`, every write
//! made by the start sequence before the flag flip is visible too.

use std::sync::atomic::{AtomicBool, Ordering};

// ---------------------------------------------------------------------------
// RunningState
// ---------------------------------------------------------------------------

/// Lifecycle phase of a processor as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunningState {
    /// No device is streaming (initial state, and after `stop()`).
    #[default]
    Idle,
    /// The full device start sequence succeeded and has not been stopped.
    Running,
}

// ---------------------------------------------------------------------------
// RunningFlag
// ---------------------------------------------------------------------------

/// Atomic holder for a [`RunningState`].
#[derive(Debug, Default)]
pub struct RunningFlag(AtomicBool);

impl RunningFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> RunningState {
        if self.0.load(Ordering::Acquire) {
            RunningState::Running
        } else {
            RunningState::Idle
        }
    }

    pub fn set(&self, state: RunningState) {
        self.0
            .store(state == RunningState::Running, Ordering::Release);
    }

    /// Set to `state`, returning what it was before.
    pub fn replace(&self, state: RunningState) -> RunningState {
        if self.0.swap(state == RunningState::Running, Ordering::AcqRel) {
            RunningState::Running
        } else {
            RunningState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.get() == RunningState::Running
    }
}
