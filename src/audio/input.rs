//! Capture-direction processor.
//!
//! [`InputProcessor`] owns a lazily-built capture [`DeviceManager`].  Each
//! realtime render invocation copies the captured block into a pooled
//! buffer, timestamps it, publishes it as the current snapshot and hands it
//! to the registered data callback.
//!
//! ```rust
//! use voice_relay::audio::InputProcessor;
//! use voice_relay::config::AudioConfig;
//!
//! let input = InputProcessor::new(AudioConfig::default()); // simulated backend
//! assert!(!input.is_running());
//! assert!(input.start());
//! assert!(input.start()); // idempotent
//! input.stop();
//! assert!(!input.is_running());
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use super::device::{
    backend_factory, BackendFactory, DeviceHandle, DeviceManager, Direction, RenderBlock,
    RenderCallback, RenderStatus,
};
use super::pool::BufferPool;
use super::state::{RunningFlag, RunningState};
use super::timestamps::TimestampRing;
use crate::config::AudioConfig;

/// Receives every published capture snapshot, on the realtime thread.
pub type DataCallback = Arc<dyn Fn(&Arc<Vec<f32>>) + Send + Sync>;

// ---------------------------------------------------------------------------
// Realtime side
// ---------------------------------------------------------------------------

/// State touched by the capture callback.  Each field has its own guard.
struct CaptureShared {
    pool: Mutex<BufferPool>,
    snapshot: ArcSwapOption<Vec<f32>>,
    timestamps: Mutex<TimestampRing>,
    data_callback: Mutex<Option<DataCallback>>,
}

impl RenderCallback for CaptureShared {
    fn render(&self, _frame_count: usize, block: RenderBlock<'_>) -> RenderStatus {
        let samples = match block {
            RenderBlock::Captured(Ok(samples)) => samples,
            RenderBlock::Captured(Err(status)) => return status,
            RenderBlock::Playback(_) => return RenderStatus::BAD_BLOCK,
        };

        // Only this callback locks the pool; the mutex makes the shared
        // state `Sync`.  An overlapping invocation gets BUSY, never a wait.
        let Some(mut pool) = self.pool.try_lock() else {
            return RenderStatus::BUSY;
        };
        let filled = pool.fill_next(samples.len(), |dst| {
            dst.copy_from_slice(samples);
            true
        });
        drop(pool);
        let Some(snapshot) = filled else {
            return RenderStatus::BAD_BLOCK;
        };

        self.timestamps.lock().record(Instant::now());
        self.snapshot.store(Some(Arc::clone(&snapshot)));

        let callback = self.data_callback.lock().clone();
        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot))).is_err() {
                return RenderStatus::CALLBACK_PANICKED;
            }
        }
        RenderStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// InputProcessor
// ---------------------------------------------------------------------------

/// Capture processor; see the [module docs](self).
pub struct InputProcessor {
    config: AudioConfig,
    factory: BackendFactory,
    shared: Arc<CaptureShared>,
    running: RunningFlag,
    /// Lifecycle lock; never taken by the realtime callback.
    device: Mutex<Option<DeviceManager>>,
    acquisitions: AtomicUsize,
}

impl InputProcessor {
    /// Create a processor for the backend named in `config`.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`AudioConfig::validate`].
    pub fn new(config: AudioConfig) -> Self {
        let factory = backend_factory(config.backend);
        Self::with_backend(config, factory)
    }

    /// Create a processor whose devices come from `factory`.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`AudioConfig::validate`].
    pub fn with_backend(config: AudioConfig, factory: BackendFactory) -> Self {
        if let Err(e) = config.validate() {
            panic!("invalid audio configuration: {e}");
        }
        let shared = Arc::new(CaptureShared {
            pool: Mutex::new(BufferPool::new(
                config.buffer_pool_size,
                config.samples_per_buffer(),
            )),
            snapshot: ArcSwapOption::empty(),
            timestamps: Mutex::new(TimestampRing::new(config.max_timestamps)),
            data_callback: Mutex::new(None),
        });
        Self {
            config,
            factory,
            shared,
            running: RunningFlag::new(),
            device: Mutex::new(None),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Acquire the capture device and start streaming.
    ///
    /// Returns `true` immediately when already running.  On any failure the
    /// half-built device is released and the processor stays idle.
    pub fn start(&self) -> bool {
        let mut device = self.device.lock();
        if self.running.is_running() {
            return true;
        }

        let mut manager = DeviceManager::new(
            Direction::Capture,
            self.config.clone(),
            (self.factory)(Direction::Capture),
        );
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        let callback: Arc<dyn RenderCallback> = self.shared.clone();
        if !(manager.setup(Some(callback)) && manager.initialize() && manager.start()) {
            manager.dispose();
            log::warn!("input processor: capture device failed to start");
            return false;
        }

        *device = Some(manager);
        self.running.set(RunningState::Running);
        log::info!(
            "input processor running ({} Hz, {} frames/buffer)",
            self.config.sample_rate,
            self.config.frames_per_buffer
        );
        true
    }

    /// Stop streaming and release the device.  No-op when idle.
    ///
    /// The running flag drops before teardown begins, so readers observe
    /// "not running" while the device is still being closed.
    pub fn stop(&self) {
        let mut device = self.device.lock();
        let was = self.running.replace(RunningState::Idle);
        if let Some(mut manager) = device.take() {
            manager.stop();
            manager.dispose();
        }
        if was == RunningState::Running {
            log::info!("input processor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    pub fn state(&self) -> RunningState {
        self.running.get()
    }

    /// Most recently published capture block.
    pub fn captured_buffer(&self) -> Option<Arc<Vec<f32>>> {
        self.shared.snapshot.load_full()
    }

    /// Replace the published snapshot (test / harness injection).
    pub fn set_captured_buffer(&self, samples: Vec<f32>) {
        self.shared.snapshot.store(Some(Arc::new(samples)));
    }

    /// Populated capture timestamps, oldest first.
    pub fn timestamps(&self) -> Vec<Instant> {
        self.shared.timestamps.lock().entries()
    }

    /// Register the callback invoked with every new snapshot.
    pub fn set_data_callback<F>(&self, callback: F)
    where
        F: Fn(&Arc<Vec<f32>>) + Send + Sync + 'static,
    {
        *self.shared.data_callback.lock() = Some(Arc::new(callback));
    }

    pub fn clear_data_callback(&self) {
        *self.shared.data_callback.lock() = None;
    }

    pub fn device_handle(&self) -> Option<DeviceHandle> {
        self.device.lock().as_ref().and_then(DeviceManager::device_handle)
    }

    /// How many times a capture device has been acquired.
    pub fn device_acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl Drop for InputProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
