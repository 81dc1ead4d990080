//! Streaming spectral front end.
//!
//! ```text
//! chunk ─▶ accumulator ─▶ fft_size window (Hann) ─▶ FFT ─▶ |X|² ─▶ mel filterbank ─▶ [dB]
//!                ▲                                                                    │
//!                └────────────── advance by hop_size, drop consumed ─────────────────┘
//! ```

pub mod mel;
pub mod streaming;

pub use mel::{hann_window, hz_to_mel, mel_to_hz, MelFilterbank};
pub use streaming::{SpectralBatch, StreamingSpectralProcessor};
