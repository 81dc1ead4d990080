//! Streaming mel-spectrogram extraction.
//!
//! [`StreamingSpectralProcessor`] accepts audio in arbitrary chunks and
//! extracts overlapping `fft_size` windows every `hop_size` samples.  Samples
//! that still belong to a future window stay in the accumulator, so chunk
//! boundaries never change the frames produced.
//!
//! ```rust
//! use voice_relay::config::SpectralConfig;
//! use voice_relay::spectral::StreamingSpectralProcessor;
//!
//! let mut spectral = StreamingSpectralProcessor::new(SpectralConfig::default());
//! spectral.add_samples(&vec![0.0; 1024 + 2 * 256]);
//! let batch = spectral.process_mel_spectrogram(0);
//! assert_eq!(batch.frames.len(), 3);
//! assert_eq!(batch.frames[0].len(), 80);
//! ```

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::mel::{hann_window, MelFilterbank};
use crate::config::SpectralConfig;

/// Power values below this are treated as this value before taking a log.
const POWER_FLOOR: f32 = 1e-10;

/// Frames produced by one processing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectralBatch {
    /// One `mel_bands`-long vector per analysis window, oldest first.
    pub frames: Vec<Vec<f32>>,
    /// Samples dropped from the front of the accumulator by this pass.
    pub samples_consumed: usize,
}

impl SpectralBatch {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// See the [module docs](self).
pub struct StreamingSpectralProcessor {
    config: SpectralConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    filterbank: MelFilterbank,
    /// Accumulated samples; everything before `read_pos` is consumed.
    buffer: Vec<f32>,
    read_pos: usize,
    spectrum: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    power: Vec<f32>,
    /// Power of a full-scale sine in its peak bin; 0 dB in the log path.
    log_reference: f32,
}

impl StreamingSpectralProcessor {
    /// # Panics
    ///
    /// Panics if `config` fails [`SpectralConfig::validate`].
    pub fn new(config: SpectralConfig) -> Self {
        if let Err(e) = config.validate() {
            panic!("invalid spectral configuration: {e}");
        }
        let fft_size = config.fft_size;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let window = hann_window(fft_size);
        let filterbank = MelFilterbank::new(
            fft_size,
            config.mel_bands,
            config.sample_rate as f32,
            config.min_frequency,
            config.max_frequency,
        );
        let window_gain = window.iter().sum::<f32>() / 2.0;

        Self {
            fft_scratch: vec![Complex::default(); fft.get_inplace_scratch_len()],
            spectrum: vec![Complex::default(); fft_size],
            power: vec![0.0; fft_size / 2 + 1],
            buffer: Vec::with_capacity(config.max_buffer_multiple * fft_size),
            read_pos: 0,
            log_reference: (window_gain * window_gain).max(POWER_FLOOR),
            fft,
            window,
            filterbank,
            config,
        }
    }

    /// Append a chunk of samples.
    ///
    /// If the accumulator then holds more than `max_buffer_multiple ×
    /// fft_size` samples, the oldest samples retained from earlier chunks are
    /// dropped down to that cap.  The chunk just appended is kept whole.
    pub fn add_samples(&mut self, chunk: &[f32]) {
        let retained = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let cap = self.config.max_buffer_multiple * self.config.fft_size;
        if self.buffer.len() > cap {
            let excess = (self.buffer.len() - cap).min(retained);
            if excess > 0 {
                self.buffer.drain(..excess);
                self.read_pos = self.read_pos.saturating_sub(excess);
            }
        }
    }

    /// Extract mel power frames from the accumulated samples.
    ///
    /// Produces every complete window when `min_frames == 0`, otherwise at
    /// most `min_frames` (fewer if that many are not available; never waits
    /// for input).
    pub fn process_mel_spectrogram(&mut self, min_frames: usize) -> SpectralBatch {
        self.process(min_frames, false)
    }

    /// Like [`process_mel_spectrogram`](Self::process_mel_spectrogram) with
    /// every value converted to dB relative to a full-scale sine, clamped to
    /// `[log_floor_db, 0]`.
    pub fn process_log_mel_spectrogram(&mut self, min_frames: usize) -> SpectralBatch {
        self.process(min_frames, true)
    }

    /// Drop every accumulated sample.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }

    /// Unconsumed samples currently held.
    pub fn buffer_length(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Frames a full processing pass would produce right now.
    pub fn frames_available(&self) -> usize {
        let available = self.buffer_length();
        if available < self.config.fft_size {
            0
        } else {
            (available - self.config.fft_size) / self.config.hop_size + 1
        }
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    pub fn filterbank(&self) -> &MelFilterbank {
        &self.filterbank
    }

    fn process(&mut self, min_frames: usize, log_scale: bool) -> SpectralBatch {
        let fft_size = self.config.fft_size;
        let mut frames = Vec::with_capacity(match min_frames {
            0 => self.frames_available(),
            n => n.min(self.frames_available()),
        });

        while self.buffer.len() - self.read_pos >= fft_size
            && (min_frames == 0 || frames.len() < min_frames)
        {
            let frame = self.analyse(self.read_pos, log_scale);
            frames.push(frame);
            self.read_pos += self.config.hop_size;
        }

        let consumed = self.read_pos.min(self.buffer.len());
        self.buffer.drain(..consumed);
        self.read_pos = 0;

        SpectralBatch {
            frames,
            samples_consumed: consumed,
        }
    }

    fn analyse(&mut self, start: usize, log_scale: bool) -> Vec<f32> {
        let fft_size = self.config.fft_size;
        let samples = &self.buffer[start..start + fft_size];
        for ((bin, &sample), &w) in self.spectrum.iter_mut().zip(samples).zip(&self.window) {
            *bin = Complex::new(sample * w, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.fft_scratch);

        for (p, c) in self.power.iter_mut().zip(&self.spectrum) {
            *p = c.norm_sqr();
        }

        let mut mel = vec![0.0; self.config.mel_bands];
        self.filterbank.apply(&self.power, &mut mel);

        if log_scale {
            let floor = self.config.log_floor_db;
            for value in &mut mel {
                let db = 10.0 * (value.max(POWER_FLOOR) / self.log_reference).log10();
                *value = db.clamp(floor, 0.0);
            }
        }
        mel
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
