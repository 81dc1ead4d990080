//! Voice-conversion model seam.
//!
//! # Overview
//!
//! [`VoiceModel`] is the interface to an external inference collaborator.  It
//! receives log-mel frames and returns a waveform for the current block, or
//! `None` when it has nothing to offer (no model loaded, not enough context,
//! inference failed).
//!
//! [`SpectralTransform`] adapts a model to the pipeline's
//! [`AudioTransform`] hook: captured blocks feed a
//! [`StreamingSpectralProcessor`], the resulting frames go to the model, and
//! a `None` from the model leaves the captured block untouched.
//!
//! [`PassThroughModel`] never converts anything; it keeps the full spectral
//! path running with no model present.
//!
//! ```rust
//! use voice_relay::config::{AudioConfig, SpectralConfig};
//! use voice_relay::inference::{PassThroughModel, SpectralTransform};
//! use voice_relay::pipeline::Pipeline;
//!
//! let pipeline = Pipeline::new(AudioConfig::default());
//! pipeline.set_transform(SpectralTransform::new(PassThroughModel, SpectralConfig::default()));
//! assert!(pipeline.start());
//! pipeline.stop();
//! ```

use parking_lot::Mutex;

use crate::config::SpectralConfig;
use crate::pipeline::AudioTransform;
use crate::spectral::StreamingSpectralProcessor;

// ---------------------------------------------------------------------------
// VoiceModel trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for voice-conversion models.
///
/// # Contract
///
/// - `frames` are log-mel frames (dB, `mel_bands` values each), oldest first.
/// - `block_len` is the length of the captured block being replaced; a
///   returned waveform of that length is rendered in its place.
/// - Called on the capture thread: must not block for long.
pub trait VoiceModel: Send + Sync {
    fn convert(&self, frames: &[Vec<f32>], block_len: usize) -> Option<Vec<f32>>;
}

// Compile-time assertion: Box<dyn VoiceModel> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn VoiceModel>) {}
};

/// Model stand-in that never produces output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughModel;

impl VoiceModel for PassThroughModel {
    fn convert(&self, _frames: &[Vec<f32>], _block_len: usize) -> Option<Vec<f32>> {
        None
    }
}

// ---------------------------------------------------------------------------
// SpectralTransform
// ---------------------------------------------------------------------------

/// Runs captured audio through the spectral front end into a [`VoiceModel`].
///
/// Interleaved multi-channel blocks are averaged to mono before analysis;
/// the model still receives the interleaved block length.
pub struct SpectralTransform<M> {
    model: M,
    spectral: Mutex<StreamingSpectralProcessor>,
    channels: usize,
}

impl<M: VoiceModel> SpectralTransform<M> {
    /// # Panics
    ///
    /// Panics if `config` fails [`SpectralConfig::validate`].
    pub fn new(model: M, config: SpectralConfig) -> Self {
        Self {
            model,
            spectral: Mutex::new(StreamingSpectralProcessor::new(config)),
            channels: 1,
        }
    }

    /// Interleaved channel count of the blocks passed to `process`.
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = usize::from(channels.max(1));
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Discard accumulated audio, e.g. after a stream restart.
    pub fn reset(&self) {
        self.spectral.lock().reset();
    }

    /// Samples waiting for the next analysis window.
    pub fn pending_samples(&self) -> usize {
        self.spectral.lock().buffer_length()
    }
}

impl<M: VoiceModel> AudioTransform for SpectralTransform<M> {
    fn process(&self, input: &[f32]) -> Option<Vec<f32>> {
        // A caller inspecting the accumulator wins; this block passes through.
        let mono;
        let samples = if self.channels > 1 {
            mono = downmix(input, self.channels);
            mono.as_slice()
        } else {
            input
        };
        let batch = {
            let mut spectral = self.spectral.try_lock()?;
            spectral.add_samples(samples);
            spectral.process_log_mel_spectrogram(0)
        };
        if batch.is_empty() {
            return None;
        }
        self.model.convert(&batch.frames, input.len())
    }
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::ScriptedModel;


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
