//! Pipeline: capture → transform → render.
//!
//! [`Pipeline`] lazily owns one [`InputProcessor`] and one
//! [`OutputProcessor`].  Once wired, every captured block is run through the
//! optional [`AudioTransform`] on the capture thread and published as the
//! output's buffer, which the render thread reads back on its next pull.
//!
//! # Start / stop ordering
//!
//! ```text
//! start: output.start() ──ok──▶ input.start() ──ok──▶ Running
//!             │                      │
//!            err                    err ──▶ output.stop()
//!             ▼                      ▼
//!           false                  false
//!
//! stop:  flag → Idle, input.stop(), output.stop()
//! ```

use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use super::latency::{average_latency_ms, LatencyCache};
use super::transform::AudioTransform;
use crate::audio::{
    backend_factory, BackendFactory, BufferPool, InputProcessor, OutputProcessor, RunningFlag,
    RunningState,
};
use crate::config::{AppConfig, AudioConfig, PipelineConfig};

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Shared between the pipeline and the input's data callback.
struct Routing {
    transform: Mutex<Option<Arc<dyn AudioTransform>>>,
    /// Output blocks for length-preserving transforms.
    pool: Mutex<BufferPool>,
}

impl Routing {
    fn route(&self, snapshot: &Arc<Vec<f32>>) -> Arc<Vec<f32>> {
        let transform = self.transform.lock().clone();
        let Some(processed) = transform.and_then(|t| t.process(snapshot.as_slice())) else {
            return Arc::clone(snapshot);
        };
        if processed.len() != snapshot.len() {
            return Arc::new(processed);
        }
        match self.pool.try_lock() {
            Some(mut pool) => pool.copy_next(&processed),
            None => Arc::new(processed),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Capture-to-render pipeline; see the [module docs](self).
///
/// ```rust
/// use voice_relay::config::AudioConfig;
/// use voice_relay::pipeline::Pipeline;
///
/// let pipeline = Pipeline::new(AudioConfig::default()); // simulated devices
/// pipeline.set_transform(|block: &[f32]| -> Option<Vec<f32>> {
///     Some(block.iter().map(|s| s * 0.5).collect())
/// });
/// assert!(pipeline.start());
/// assert!(pipeline.is_running());
/// pipeline.stop();
/// assert!(!pipeline.is_running());
/// ```
pub struct Pipeline {
    config: AudioConfig,
    factory: BackendFactory,
    input: OnceLock<Arc<InputProcessor>>,
    output: OnceLock<Arc<OutputProcessor>>,
    wiring: Once,
    routing: Arc<Routing>,
    running: RunningFlag,
    /// Serialises `start` and `stop`.
    lifecycle: Mutex<()>,
    latency: LatencyCache,
}

impl Pipeline {
    /// # Panics
    ///
    /// Panics if `config` fails [`AudioConfig::validate`].
    pub fn new(config: AudioConfig) -> Self {
        let factory = backend_factory(config.backend);
        Self::with_backend(config, factory)
    }

    /// Pipeline built from a loaded [`AppConfig`].
    ///
    /// # Panics
    ///
    /// Panics if the audio section fails [`AudioConfig::validate`].
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(config.audio.clone()).with_pipeline_config(&config.pipeline)
    }

    /// Pipeline whose devices (both directions) come from `factory`.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`AudioConfig::validate`].
    pub fn with_backend(config: AudioConfig, factory: BackendFactory) -> Self {
        if let Err(e) = config.validate() {
            panic!("invalid audio configuration: {e}");
        }
        let routing = Arc::new(Routing {
            transform: Mutex::new(None),
            pool: Mutex::new(BufferPool::new(
                config.buffer_pool_size,
                config.samples_per_buffer(),
            )),
        });
        Self {
            factory,
            input: OnceLock::new(),
            output: OnceLock::new(),
            wiring: Once::new(),
            routing,
            running: RunningFlag::new(),
            lifecycle: Mutex::new(()),
            latency: LatencyCache::new(Duration::from_millis(
                PipelineConfig::default().latency_cache_ms,
            )),
            config,
        }
    }

    pub fn with_pipeline_config(mut self, config: &PipelineConfig) -> Self {
        self.latency = LatencyCache::new(Duration::from_millis(config.latency_cache_ms));
        self
    }

    /// The capture processor, created on first use.
    pub fn input(&self) -> &Arc<InputProcessor> {
        self.input.get_or_init(|| {
            log::debug!("pipeline: creating input processor");
            Arc::new(InputProcessor::with_backend(
                self.config.clone(),
                Arc::clone(&self.factory),
            ))
        })
    }

    /// The render processor, created on first use.
    pub fn output(&self) -> &Arc<OutputProcessor> {
        self.output.get_or_init(|| {
            log::debug!("pipeline: creating output processor");
            Arc::new(OutputProcessor::with_backend(
                self.config.clone(),
                Arc::clone(&self.factory),
            ))
        })
    }

    /// Connect input to output.  Only the first call has an effect.
    pub fn setup_pipeline(&self) {
        self.wiring.call_once(|| {
            let output = Arc::clone(self.output());
            let routing = Arc::clone(&self.routing);
            self.input().set_data_callback(move |snapshot| {
                output.set_output_audio_buffer(routing.route(snapshot));
            });

            let source = self.output().buffer_source();
            self.output().set_audio_data_provider(move || source.latest());
            log::debug!("pipeline wired");
        });
    }

    /// Start output, then input.
    ///
    /// Returns `false` if either side fails; output is stopped again when
    /// input fails, and input is never touched when output fails.
    pub fn start(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        if self.is_running() {
            return true;
        }
        self.setup_pipeline();

        if !self.output().start() {
            log::warn!("pipeline: output failed to start");
            return false;
        }
        if !self.input().start() {
            log::warn!("pipeline: input failed to start, rolling back output");
            self.output().stop();
            return false;
        }

        self.running.set(RunningState::Running);
        // Timestamps from a previous session no longer describe this one.
        self.latency.invalidate();
        log::info!("pipeline running");
        true
    }

    /// Stop input, then output.  No-op when idle.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        let was = self.running.replace(RunningState::Idle);
        if let Some(input) = self.input.get() {
            input.stop();
        }
        if let Some(output) = self.output.get() {
            output.stop();
        }
        if was == RunningState::Running {
            log::info!("pipeline stopped");
        }
    }

    /// `true` only while both processors are running.
    ///
    /// If either has stopped on its own the pipeline flag is cleared, so a
    /// later `start` performs a full restart.
    pub fn is_running(&self) -> bool {
        if !self.running.is_running() {
            return false;
        }
        let input_up = self.input.get().is_some_and(|p| p.is_running());
        let output_up = self.output.get().is_some_and(|p| p.is_running());
        if input_up && output_up {
            return true;
        }
        log::debug!("pipeline: processor stopped underneath (input={input_up}, output={output_up})");
        self.running.set(RunningState::Idle);
        false
    }

    /// Average capture-to-playback latency in milliseconds, refreshed at
    /// most once per cache window.  `0.0` before both sides have timestamps.
    pub fn measured_latency(&self) -> f64 {
        self.latency.get_or_update(|| {
            let capture = self
                .input
                .get()
                .map(|p| p.timestamps())
                .unwrap_or_default();
            let playback = self
                .output
                .get()
                .map(|p| p.playback_timestamps())
                .unwrap_or_default();
            average_latency_ms(&capture, &playback)
        })
    }

    /// One-shot playback on the output; see [`OutputProcessor::play_audio`].
    pub fn play_audio(&self, samples: impl Into<Arc<Vec<f32>>>) -> bool {
        self.output().play_audio(samples)
    }

    /// Install the transform applied to every captured block.
    pub fn set_transform<T>(&self, transform: T)
    where
        T: AudioTransform + 'static,
    {
        *self.routing.transform.lock() = Some(Arc::new(transform));
    }

    /// Pass captured blocks through unchanged.
    pub fn clear_transform(&self) {
        *self.routing.transform.lock() = None;
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl Drop for Pipeline {
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
    use crate::audio::{Direction, RenderStatus};
    use crate::pipeline::Gain;
    use std::thread;
    use std::time::Instant;

    fn config() -> AudioConfig {
        AudioConfig {
            frames_per_buffer: 4,
            buffer_pool_size: 2,
            max_timestamps: 8,
            ..AudioConfig::default()
        }
    }

    struct Rig {
        pipeline: Pipeline,
        mic: ManualDevice,
        speaker: ManualDevice,
    }

    fn rig_with(mic: ManualDevice, speaker: ManualDevice) -> Rig {
        let factory: BackendFactory = {
            let (mic, speaker) = (mic.clone(), speaker.clone());
            Arc::new(move |direction| match direction {
                Direction::Capture => mic.backend(),
                Direction::Render => speaker.backend(),
            })
        };
        let pipeline = Pipeline::with_backend(config(), factory)
            .with_pipeline_config(&PipelineConfig { latency_cache_ms: 0 });
        Rig {
            pipeline,
            mic,
            speaker,
        }
    }

    fn rig() -> Rig {
        rig_with(ManualDevice::new(), ManualDevice::new())
    }

    #[test]
    fn new_pipeline_is_idle_and_lazy() {
        let rig = rig();
        assert!(!rig.pipeline.is_running());
        assert_eq!(rig.pipeline.measured_latency(), 0.0);
        assert_eq!(rig.mic.backends_built(), 0);
        assert_eq!(rig.speaker.backends_built(), 0);
    }

    #[test]
    fn start_runs_both_sides_and_is_idempotent() {
        let rig = rig();
        assert!(rig.pipeline.start());
        assert!(rig.pipeline.start());
        assert!(rig.pipeline.is_running());
        assert!(rig.mic.is_running());
        assert!(rig.speaker.is_running());
        assert_eq!(rig.mic.starts(), 1);
        assert_eq!(rig.speaker.starts(), 1);

        rig.pipeline.stop();
        rig.pipeline.stop();
        assert!(!rig.pipeline.is_running());
        assert!(!rig.mic.is_running());
        assert!(!rig.speaker.is_running());
    }

    #[test]
    fn output_failure_never_starts_input() {
        let rig = rig_with(ManualDevice::new(), ManualDevice::failing(Step::Start));
        assert!(!rig.pipeline.start());
        assert!(!rig.pipeline.is_running());
        assert_eq!(rig.mic.backends_built(), 0);
    }

    #[test]
    fn input_failure_rolls_back_output() {
        let rig = rig_with(ManualDevice::failing(Step::Initialize), ManualDevice::new());
        assert!(!rig.pipeline.start());
        assert!(!rig.pipeline.is_running());
        assert_eq!(rig.speaker.starts(), 1);
        assert!(!rig.speaker.is_running());
        assert!(!rig.pipeline.output().is_running());
    }

    #[test]
    fn is_running_heals_when_a_side_stops() {
        let rig = rig();
        assert!(rig.pipeline.start());
        rig.pipeline.input().stop();
        assert!(!rig.pipeline.is_running());

        // Restarting the input alone does not revive the pipeline flag.
        assert!(rig.pipeline.input().start());
        assert!(!rig.pipeline.is_running());
        assert!(rig.pipeline.start());
        assert!(rig.pipeline.is_running());
    }

    #[test]
    fn captured_block_passes_through_without_transform() {
        let rig = rig();
        assert!(rig.pipeline.start());
        assert_eq!(rig.mic.capture(&[0.1, 0.2, 0.3, 0.4]), Some(RenderStatus::Ok));

        let (block, status) = rig.speaker.pull(4).expect("speaker running");
        assert_eq!(status, RenderStatus::Ok);
        assert_eq!(block, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn length_preserving_transform_reaches_output() {
        let rig = rig();
        rig.pipeline.set_transform(Gain(2.0));
        assert!(rig.pipeline.start());

        rig.mic.capture(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(
            rig.pipeline.output().output_audio_buffer().map(|b| b.to_vec()),
            Some(vec![0.2, 0.4, 0.6, 0.8])
        );
        assert_eq!(rig.speaker.pull(4).expect("running").0, vec![0.2, 0.4, 0.6, 0.8]);
    }

    #[test]
    fn length_changing_transform_is_used_as_is() {
        let rig = rig();
        rig.pipeline
            .set_transform(|block: &[f32]| -> Option<Vec<f32>> {
                Some(block.iter().step_by(2).copied().collect())
            });
        assert!(rig.pipeline.start());

        rig.mic.capture(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            rig.pipeline.output().output_audio_buffer().map(|b| b.to_vec()),
            Some(vec![1.0, 3.0])
        );
        assert_eq!(rig.speaker.pull(4).expect("running").0, vec![1.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn transform_yielding_nothing_passes_through() {
        let rig = rig();
        rig.pipeline.set_transform(|_: &[f32]| -> Option<Vec<f32>> { None });
        assert!(rig.pipeline.start());
        rig.mic.capture(&[0.5; 4]);
        assert_eq!(rig.speaker.pull(4).expect("running").0, vec![0.5; 4]);

        rig.pipeline.set_transform(Gain(0.0));
        rig.mic.capture(&[0.5; 4]);
        assert_eq!(rig.speaker.pull(4).expect("running").0, vec![0.0; 4]);

        rig.pipeline.clear_transform();
        rig.mic.capture(&[0.25; 4]);
        assert_eq!(rig.speaker.pull(4).expect("running").0, vec![0.25; 4]);
    }

    #[test]
    fn panicking_transform_reports_failed_render() {
        let rig = rig();
        rig.pipeline
            .set_transform(|_: &[f32]| -> Option<Vec<f32>> { panic!("model blew up") });
        assert!(rig.pipeline.start());
        assert_eq!(
            rig.mic.capture(&[0.5; 4]),
            Some(RenderStatus::CALLBACK_PANICKED)
        );
        assert!(rig.pipeline.is_running());
    }

    #[test]
    fn measured_latency_pairs_capture_and_playback() {
        let rig = rig();
        assert!(rig.pipeline.start());
        for _ in 0..3 {
            rig.mic.capture(&[0.0; 4]);
            thread::sleep(Duration::from_millis(2));
            rig.speaker.pull(4);
        }
        let latency = rig.pipeline.measured_latency();
        assert!(latency.is_finite());
        assert!(latency >= 2.0, "latency {latency} ms");
    }

    #[test]
    fn pipeline_is_not_running_while_output_start_is_in_progress() {
        let rig = rig();
        let gate = rig.speaker.park_at(Step::Start);

        thread::scope(|scope| {
            let starter = scope.spawn(|| rig.pipeline.start());
            gate.wait();
            assert!(!rig.pipeline.is_running());
            assert_eq!(rig.mic.backends_built(), 0);
            gate.wait();
            assert!(starter.join().expect("starter thread"));
        });
        assert!(rig.pipeline.is_running());
    }

    #[test]
    fn pipeline_stop_clears_running_before_teardown_finishes() {
        let rig = rig();
        assert!(rig.pipeline.start());
        let gate = rig.mic.park_at(Step::Stop);

        thread::scope(|scope| {
            let stopper = scope.spawn(|| rig.pipeline.stop());
            gate.wait();
            assert!(!rig.pipeline.is_running());
            assert!(rig.speaker.is_running());
            gate.wait();
            stopper.join().expect("stopper thread");
        });
        assert!(!rig.speaker.is_running());
    }

    #[test]
    fn start_during_play_audio_is_refused_and_later_start_sticks() {
        let rig = rig();

        thread::scope(|scope| {
            let player = scope.spawn(|| rig.pipeline.play_audio(vec![0.5; 10]));

            let deadline = Instant::now() + Duration::from_secs(2);
            while !rig.speaker.is_running() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            assert!(!rig.pipeline.start());
            assert!(!rig.pipeline.is_running());
            assert!(!rig.mic.is_running());

            while !player.is_finished() {
                if rig.speaker.pull(4).is_none() {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            assert!(player.join().expect("player thread"));
        });

        assert!(rig.pipeline.start());
        assert!(rig.pipeline.is_running());
        assert!(rig.speaker.is_running());
    }

    #[test]
    fn play_audio_delegates_to_output() {
        let rig = rig();
        assert!(rig.pipeline.start());
        assert!(!rig.pipeline.play_audio(vec![0.5; 8]));
        assert!(rig.pipeline.is_running());
    }

    #[test]
    fn simulated_round_trip() {
        let pipeline = Pipeline::new(AudioConfig::default());
        assert!(pipeline.start());
        thread::sleep(Duration::from_millis(120));

        assert!(pipeline.is_running());
        let captured = pipeline.input().captured_buffer().expect("captured a block");
        assert_eq!(captured.len(), 512);
        assert!(pipeline.measured_latency().is_finite());

        pipeline.stop();
        assert!(!pipeline.is_running());
        assert!(pipeline.input().device_handle().is_none());
    }
}
