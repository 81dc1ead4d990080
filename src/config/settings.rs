//! Pipeline settings structs, defaults, validation and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to every
//! processor that needs an immutable copy.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A configuration value that no processor can be built from.
///
/// These are contract violations on the caller's side, not runtime failures:
/// processors refuse to construct from an invalid configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("sample rate must be a positive finite number, got {0}")]
    SampleRate(f64),

    #[error("channel count must be at least 1")]
    Channels,

    #[error("bits per sample must be a non-zero multiple of 8, got {0}")]
    BitsPerSample(u16),

    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },

    #[error("hop size {hop} must be in 1..={fft}")]
    HopSize { hop: usize, fft: usize },

    #[error("frequency range {min}..{max} Hz is empty or exceeds Nyquist ({nyquist} Hz)")]
    FrequencyRange { min: f32, max: f32, nyquist: f32 },

    #[error("log floor must be negative and finite, got {0} dB")]
    LogFloor(f32),

    #[error("spectral sample rate {spectral} Hz does not match the audio sample rate {audio} Hz")]
    SpectralRateMismatch { audio: f64, spectral: f64 },
}

// ---------------------------------------------------------------------------
// BackendKind
// ---------------------------------------------------------------------------

/// Which platform audio implementation a processor drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Hardware-free clock that invokes render callbacks on its own thread.
    Simulated,
    /// The default host's devices through `cpal` (feature `cpal-audio`).
    Cpal,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Simulated
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Device-facing settings shared by the input and output processors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Stream sample rate in Hz.
    pub sample_rate: f64,
    /// Interleaved channel count.
    pub channels: u16,
    /// Sample width in bits (32 for `f32` streams).
    pub bits_per_sample: u16,
    /// Frames delivered per render callback.
    pub frames_per_buffer: usize,
    /// Number of pre-allocated buffers in each rotating pool.
    pub buffer_pool_size: usize,
    /// Capacity of each capture / playback timestamp ring.
    pub max_timestamps: usize,
    /// Platform implementation to open on `start()`.
    pub backend: BackendKind,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            channels: 1,
            bits_per_sample: 32,
            frames_per_buffer: 512,
            buffer_pool_size: 8,
            max_timestamps: 100,
            backend: BackendKind::default(),
        }
    }
}

impl AudioConfig {
    /// Bytes occupied by a single sample.
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Interleaved samples in one block (`frames_per_buffer × channels`).
    pub fn samples_per_buffer(&self) -> usize {
        self.frames_per_buffer * usize::from(self.channels)
    }

    /// Wall-clock duration of one block.
    pub fn buffer_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.frames_per_buffer as f64 / self.sample_rate)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if self.channels == 0 {
            return Err(ConfigError::Channels);
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 {
            return Err(ConfigError::BitsPerSample(self.bits_per_sample));
        }
        if self.frames_per_buffer == 0 {
            return Err(ConfigError::Zero {
                field: "frames_per_buffer",
            });
        }
        if self.buffer_pool_size == 0 {
            return Err(ConfigError::Zero {
                field: "buffer_pool_size",
            });
        }
        if self.max_timestamps == 0 {
            return Err(ConfigError::Zero {
                field: "max_timestamps",
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SpectralConfig
// ---------------------------------------------------------------------------

/// Settings for the streaming mel-spectrogram front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralConfig {
    /// Analysis window and FFT length in samples.
    pub fft_size: usize,
    /// Sample advance between consecutive windows.
    pub hop_size: usize,
    /// Sample rate of the analysed signal in Hz.
    pub sample_rate: f64,
    /// Number of mel filterbank outputs per frame.
    pub mel_bands: usize,
    /// Lower edge of the filterbank in Hz.
    pub min_frequency: f32,
    /// Upper edge of the filterbank in Hz (at most Nyquist).
    pub max_frequency: f32,
    /// Retained samples are capped at this multiple of `fft_size`.
    pub max_buffer_multiple: usize,
    /// Lowest value emitted by the log-mel path, in dB.
    pub log_floor_db: f32,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            hop_size: 256,
            sample_rate: 44_100.0,
            mel_bands: 80,
            min_frequency: 0.0,
            max_frequency: 8_000.0,
            max_buffer_multiple: 3,
            log_floor_db: -80.0,
        }
    }
}

impl SpectralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if self.fft_size < 2 {
            return Err(ConfigError::Zero { field: "fft_size" });
        }
        if self.hop_size == 0 || self.hop_size > self.fft_size {
            return Err(ConfigError::HopSize {
                hop: self.hop_size,
                fft: self.fft_size,
            });
        }
        if self.mel_bands == 0 {
            return Err(ConfigError::Zero { field: "mel_bands" });
        }
        if self.max_buffer_multiple == 0 {
            return Err(ConfigError::Zero {
                field: "max_buffer_multiple",
            });
        }
        let nyquist = (self.sample_rate / 2.0) as f32;
        if !(self.min_frequency >= 0.0
            && self.min_frequency < self.max_frequency
            && self.max_frequency <= nyquist)
        {
            return Err(ConfigError::FrequencyRange {
                min: self.min_frequency,
                max: self.max_frequency,
                nyquist,
            });
        }
        if !(self.log_floor_db.is_finite() && self.log_floor_db < 0.0) {
            return Err(ConfigError::LogFloor(self.log_floor_db));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Settings for the composed capture → transform → render pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How long a measured latency value is reused before recomputing.
    pub latency_cache_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            latency_cache_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_relay::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Device / block settings.
    pub audio: AudioConfig,
    /// Mel-spectrogram front end settings.
    pub spectral: SpectralConfig,
    /// Pipeline composition settings.
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Validate every section.
    ///
    /// The spectral front end analyses captured blocks, so it must run at
    /// the audio sample rate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.audio.validate()?;
        self.spectral.validate()?;
        if self.spectral.sample_rate != self.audio.sample_rate {
            return Err(ConfigError::SpectralRateMismatch {
                audio: self.audio.sample_rate,
                spectral: self.spectral.sample_rate,
            });
        }
        Ok(())
    }

    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
