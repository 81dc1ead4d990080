//! Low-latency capture → transform → render audio pipeline.
//!
//! - [`audio`]: device lifecycle, capture and render processors.
//! - [`pipeline`]: wires input to output and measures round-trip latency.
//! - [`spectral`]: streaming mel / log-mel spectrogram extraction.
//! - [`inference`]: the voice-model seam fed by the spectral front end.
//! - [`config`]: TOML-backed settings.

#![warn(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod audio;
pub mod config;
pub mod inference;
pub mod pipeline;
pub mod spectral;

pub use config::AppConfig;
pub use pipeline::Pipeline;
