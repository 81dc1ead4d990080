//! Render-direction processor.
//!
//! [`OutputProcessor`] mirrors [`InputProcessor`](super::InputProcessor):
//! it owns a lazily-built render [`DeviceManager`] and, on every realtime
//! invocation, fills the device buffer from (in order of precedence)
//!
//! 1. an active one-shot playback started by [`play_audio`](OutputProcessor::play_audio),
//! 2. the audio data provider, if one is registered,
//! 3. the last buffer passed to [`set_output_audio_buffer`](OutputProcessor::set_output_audio_buffer),
//!
//! zero-filling whatever the source does not cover, and records a playback
//! timestamp.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use super::device::{
    backend_factory, BackendFactory, DeviceHandle, DeviceManager, Direction, RenderBlock,
    RenderCallback, RenderStatus,
};
use super::state::{RunningFlag, RunningState};
use super::timestamps::TimestampRing;
use crate::config::AudioConfig;

/// Pulled by the render callback for the next block, on the realtime thread.
pub type AudioDataProvider = Arc<dyn Fn() -> Option<Arc<Vec<f32>>> + Send + Sync>;

/// Extra time a one-shot playback may take beyond its own duration.
const PLAYBACK_GRACE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// BufferSource
// ---------------------------------------------------------------------------

/// Read-only handle on an output processor's last-set buffer.
#[derive(Clone)]
pub struct BufferSource {
    slot: Arc<ArcSwapOption<Vec<f32>>>,
}

impl BufferSource {
    pub fn latest(&self) -> Option<Arc<Vec<f32>>> {
        self.slot.load_full()
    }
}

// ---------------------------------------------------------------------------
// Realtime side
// ---------------------------------------------------------------------------

struct OneShot {
    samples: Arc<Vec<f32>>,
    cursor: usize,
    done: Option<SyncSender<()>>,
}

impl OneShot {
    fn render_into(&mut self, out: &mut [f32]) {
        let remaining = &self.samples[self.cursor.min(self.samples.len())..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        out[n..].fill(0.0);
        self.cursor += n;

        if self.cursor >= self.samples.len() {
            if let Some(done) = self.done.take() {
                // Capacity 1 and sent once: never blocks.
                let _ = done.try_send(());
            }
        }
    }
}

struct RenderShared {
    buffer: Arc<ArcSwapOption<Vec<f32>>>,
    provider: Mutex<Option<AudioDataProvider>>,
    timestamps: Mutex<TimestampRing>,
    one_shot: Mutex<Option<OneShot>>,
}

impl RenderShared {
    fn fill_from_sources(&self, out: &mut [f32]) -> RenderStatus {
        {
            let mut one_shot = self.one_shot.lock();
            if let Some(shot) = one_shot.as_mut() {
                shot.render_into(out);
                return RenderStatus::Ok;
            }
        }

        let provider = self.provider.lock().clone();
        if let Some(provider) = provider {
            return match panic::catch_unwind(AssertUnwindSafe(|| provider())) {
                Ok(samples) => {
                    copy_padded(samples.as_deref().map(Vec::as_slice), out);
                    RenderStatus::Ok
                }
                Err(_) => {
                    out.fill(0.0);
                    RenderStatus::CALLBACK_PANICKED
                }
            };
        }

        let latest = self.buffer.load();
        copy_padded(latest.as_deref().map(Vec::as_slice), out);
        RenderStatus::Ok
    }
}

impl RenderCallback for RenderShared {
    fn render(&self, _frame_count: usize, block: RenderBlock<'_>) -> RenderStatus {
        let RenderBlock::Playback(out) = block else {
            return RenderStatus::BAD_BLOCK;
        };
        let status = self.fill_from_sources(out);
        self.timestamps.lock().record(Instant::now());
        status
    }
}

fn copy_padded(source: Option<&[f32]>, out: &mut [f32]) {
    let source = source.unwrap_or(&[]);
    let n = source.len().min(out.len());
    out[..n].copy_from_slice(&source[..n]);
    out[n..].fill(0.0);
}

// ---------------------------------------------------------------------------
// OutputProcessor
// ---------------------------------------------------------------------------

/// Caller-side device state; never touched by the realtime callback.
#[derive(Default)]
struct Lifecycle {
    manager: Option<DeviceManager>,
    /// Set while a `play_audio` call owns the device.
    one_shot_session: bool,
}

/// Render processor; see the [module docs](self).
pub struct OutputProcessor {
    config: AudioConfig,
    factory: BackendFactory,
    shared: Arc<RenderShared>,
    running: RunningFlag,
    lifecycle: Mutex<Lifecycle>,
    acquisitions: AtomicUsize,
}

impl OutputProcessor {
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
        let shared = Arc::new(RenderShared {
            buffer: Arc::new(ArcSwapOption::empty()),
            provider: Mutex::new(None),
            timestamps: Mutex::new(TimestampRing::new(config.max_timestamps)),
            one_shot: Mutex::new(None),
        });
        Self {
            config,
            factory,
            shared,
            running: RunningFlag::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Acquire the render device and start streaming.
    ///
    /// Returns `true` immediately when already running, and `false` while a
    /// [`play_audio`](Self::play_audio) call owns the device.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.one_shot_session {
            log::warn!("output processor: start rejected during one-shot playback");
            return false;
        }
        self.start_locked(&mut lifecycle.manager)
    }

    fn start_locked(&self, device: &mut Option<DeviceManager>) -> bool {
        if self.running.is_running() {
            return true;
        }

        let mut manager = DeviceManager::new(
            Direction::Render,
            self.config.clone(),
            (self.factory)(Direction::Render),
        );
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        let callback: Arc<dyn RenderCallback> = self.shared.clone();
        if !(manager.setup(Some(callback)) && manager.initialize() && manager.start()) {
            manager.dispose();
            log::warn!("output processor: render device failed to start");
            return false;
        }

        *device = Some(manager);
        self.running.set(RunningState::Running);
        log::info!("output processor running");
        true
    }

    /// Stop streaming and release the device.  No-op when idle.
    ///
    /// Also ends an active one-shot playback early.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        self.stop_locked(&mut lifecycle);
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        let was = self.running.replace(RunningState::Idle);
        if let Some(mut manager) = lifecycle.manager.take() {
            manager.stop();
            manager.dispose();
        }
        // Drops any pending completion sender, waking a blocked `play_audio`.
        self.shared.one_shot.lock().take();
        if was == RunningState::Running {
            log::info!("output processor stopped");
        }
    }

    /// Play `samples` once, blocking until the device has consumed them.
    ///
    /// Returns `false` without side effects when the processor is already
    /// running, and `false` if the device cannot start or playback does not
    /// finish in time.  An empty buffer plays trivially and returns `true`
    /// without touching the device.  While playback is in progress
    /// [`start`](Self::start) is refused.  The processor is idle again when
    /// this returns.
    pub fn play_audio(&self, samples: impl Into<Arc<Vec<f32>>>) -> bool {
        let samples = samples.into();
        let mut lifecycle = self.lifecycle.lock();
        if self.running.is_running() || lifecycle.one_shot_session {
            log::warn!("output processor: play_audio rejected while running");
            return false;
        }
        if samples.is_empty() {
            return true;
        }

        let budget = Duration::from_secs_f64(
            samples.len() as f64
                / (self.config.sample_rate * f64::from(self.config.channels)),
        ) + self.config.buffer_duration() * 2
            + PLAYBACK_GRACE;

        let (done_tx, done_rx) = mpsc::sync_channel(1);
        *self.shared.one_shot.lock() = Some(OneShot {
            samples,
            cursor: 0,
            done: Some(done_tx),
        });

        if !self.start_locked(&mut lifecycle.manager) {
            self.shared.one_shot.lock().take();
            return false;
        }
        lifecycle.one_shot_session = true;
        drop(lifecycle);

        let completed = done_rx.recv_timeout(budget).is_ok();

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.one_shot_session = false;
        self.stop_locked(&mut lifecycle);
        drop(lifecycle);
        if !completed {
            log::warn!("output processor: one-shot playback did not complete");
        }
        completed
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    pub fn state(&self) -> RunningState {
        self.running.get()
    }

    /// Register a provider pulled on every render invocation.  Takes
    /// precedence over the last-set buffer.
    pub fn set_audio_data_provider<F>(&self, provider: F)
    where
        F: Fn() -> Option<Arc<Vec<f32>>> + Send + Sync + 'static,
    {
        *self.shared.provider.lock() = Some(Arc::new(provider));
    }

    pub fn clear_audio_data_provider(&self) {
        *self.shared.provider.lock() = None;
    }

    /// Publish the block the render path falls back to.
    pub fn set_output_audio_buffer(&self, samples: impl Into<Arc<Vec<f32>>>) {
        self.shared.buffer.store(Some(samples.into()));
    }

    pub fn output_audio_buffer(&self) -> Option<Arc<Vec<f32>>> {
        self.shared.buffer.load_full()
    }

    /// Handle that reads the last-set buffer without borrowing the processor.
    pub fn buffer_source(&self) -> BufferSource {
        BufferSource {
            slot: Arc::clone(&self.shared.buffer),
        }
    }

    /// Populated playback timestamps, oldest first.
    pub fn playback_timestamps(&self) -> Vec<Instant> {
        self.shared.timestamps.lock().entries()
    }

    pub fn device_handle(&self) -> Option<DeviceHandle> {
        self.lifecycle
            .lock()
            .manager
            .as_ref()
            .and_then(DeviceManager::device_handle)
    }

    /// How many times a render device has been acquired.
    pub fn device_acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl Drop for OutputProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::testing::{ManualDevice, Step};
    use std::thread;

    fn config() -> AudioConfig {
        AudioConfig {
            frames_per_buffer: 4,
            buffer_pool_size: 2,
            max_timestamps: 3,
            ..AudioConfig::default()
        }
    }

    fn manual() -> (OutputProcessor, ManualDevice) {
        let device = ManualDevice::new();
        let output = OutputProcessor::with_backend(config(), device.factory());
        (output, device)
    }

    #[test]
    fn new_processor_is_idle() {
        let (output, device) = manual();
        assert!(!output.is_running());
        assert!(output.playback_timestamps().is_empty());
        assert_eq!(device.backends_built(), 0);
    }

    #[test]
    fn start_is_idempotent() {
        let (output, device) = manual();
        assert!(output.start());
        assert!(output.start());
        assert_eq!(output.device_acquisitions(), 1);
        assert_eq!(device.starts(), 1);
        output.stop();
        assert!(!output.is_running());
    }

    #[test]
    fn renders_last_buffer_zero_padded() {
        let (output, device) = manual();
        output.set_output_audio_buffer(vec![0.5, 0.25]);
        assert!(output.start());

        let (block, status) = device.pull(4).expect("running");
        assert_eq!(status, RenderStatus::Ok);
        assert_eq!(block, vec![0.5, 0.25, 0.0, 0.0]);
        assert_eq!(output.playback_timestamps().len(), 1);
    }

    #[test]
    fn renders_silence_without_source() {
        let (output, device) = manual();
        assert!(output.start());
        let (block, _) = device.pull(4).expect("running");
        assert_eq!(block, vec![0.0; 4]);
    }

    #[test]
    fn provider_takes_precedence_over_buffer() {
        let (output, device) = manual();
        output.set_output_audio_buffer(vec![1.0; 4]);
        output.set_audio_data_provider(|| Some(Arc::new(vec![2.0; 4])));
        assert!(output.start());
        assert_eq!(device.pull(4).expect("running").0, vec![2.0; 4]);

        output.clear_audio_data_provider();
        assert_eq!(device.pull(4).expect("running").0, vec![1.0; 4]);
    }

    #[test]
    fn playback_timestamps_are_capped() {
        let (output, device) = manual();
        assert!(output.start());
        for _ in 0..7 {
            device.pull(4);
        }
        assert_eq!(output.playback_timestamps().len(), 3);
    }

    #[test]
    fn play_audio_rejected_while_running() {
        let (output, device) = manual();
        output.set_output_audio_buffer(vec![0.1; 4]);
        assert!(output.start());

        assert!(!output.play_audio(vec![0.9; 8]));
        assert!(output.is_running());
        // No side effects: the regular source is still rendered.
        assert_eq!(device.pull(4).expect("running").0, vec![0.1; 4]);
    }

    #[test]
    fn play_audio_streams_buffer_once_then_goes_idle() {
        let device = ManualDevice::new();
        let output = Arc::new(OutputProcessor::with_backend(config(), device.factory()));

        let player = {
            let output = Arc::clone(&output);
            thread::spawn(move || output.play_audio(vec![0.5; 10]))
        };

        let mut rendered = Vec::new();
        while !player.is_finished() {
            match device.pull(4) {
                Some((block, _)) => rendered.extend(block),
                None => thread::sleep(Duration::from_millis(1)),
            }
        }

        assert!(player.join().expect("player thread"));
        assert!(!output.is_running());
        assert!(rendered.len() >= 12);
        assert_eq!(&rendered[..10], &[0.5; 10]);
        assert_eq!(&rendered[10..12], &[0.0; 2]);
    }

    #[test]
    fn play_audio_fails_when_device_cannot_start() {
        let device = ManualDevice::failing(Step::Start);
        let output = OutputProcessor::with_backend(config(), device.factory());
        assert!(!output.play_audio(vec![0.5; 10]));
        assert!(!output.is_running());
    }

    #[test]
    fn play_audio_on_simulated_device() {
        let output = OutputProcessor::new(AudioConfig {
            sample_rate: 48_000.0,
            frames_per_buffer: 480,
            ..AudioConfig::default()
        });
        assert!(output.play_audio(vec![0.2; 2_000]));
        assert!(!output.is_running());
        assert!(!output.playback_timestamps().is_empty());
    }

    #[test]
    fn running_is_not_visible_until_device_start_completes() {
        let (output, device) = manual();
        let gate = device.park_at(Step::Start);

        thread::scope(|scope| {
            let starter = scope.spawn(|| output.start());
            gate.wait();
            assert!(!output.is_running());
            gate.wait();
            assert!(starter.join().expect("starter thread"));
        });
        assert!(output.is_running());
    }

    #[test]
    fn stop_clears_running_before_teardown_finishes() {
        let (output, device) = manual();
        assert!(output.start());
        let gate = device.park_at(Step::Stop);

        thread::scope(|scope| {
            let stopper = scope.spawn(|| output.stop());
            gate.wait();
            assert!(!output.is_running());
            assert!(device.is_running());
            gate.wait();
            stopper.join().expect("stopper thread");
        });
        assert!(!device.is_running());
    }

    #[test]
    fn empty_play_audio_succeeds_without_starting() {
        let (output, device) = manual();
        assert!(output.play_audio(Vec::new()));
        assert!(!output.is_running());
        assert_eq!(device.backends_built(), 0);
        assert!(output.playback_timestamps().is_empty());
    }

    #[test]
    fn start_is_refused_while_play_audio_owns_the_device() {
        let (output, device) = manual();

        thread::scope(|scope| {
            let player = scope.spawn(|| output.play_audio(vec![0.5; 10]));

            let deadline = Instant::now() + Duration::from_secs(2);
            while !device.is_running() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            assert!(device.is_running());
            assert!(!output.start());
            assert!(!output.play_audio(vec![0.1; 4]));

            while !player.is_finished() {
                if device.pull(4).is_none() {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            assert!(player.join().expect("player thread"));
        });

        // A start after playback is a regular session that stays up.
        assert!(!output.is_running());
        assert!(output.start());
        assert!(output.is_running());
        assert!(device.is_running());
    }

    #[test]
    fn stop_ends_one_shot_playback_early() {
        let (output, device) = manual();

        thread::scope(|scope| {
            let player = scope.spawn(|| output.play_audio(vec![0.5; 1_000]));
            let deadline = Instant::now() + Duration::from_secs(2);
            while !device.is_running() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            output.stop();
            assert!(!player.join().expect("player thread"));
        });
        assert!(!output.is_running());
        assert!(output.start());
    }

    #[test]
    fn buffer_source_tracks_latest_buffer() {
        let (output, _device) = manual();
        let source = output.buffer_source();
        assert!(source.latest().is_none());
        output.set_output_audio_buffer(vec![3.0; 2]);
        assert_eq!(source.latest().map(|b| b.to_vec()), Some(vec![3.0; 2]));
    }
}
