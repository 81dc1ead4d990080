//! Headless entry point: relays capture to playback for a while and reports
//! the measured latency.
//!
//! # Startup sequence
//!
//! 1. Initialise logging (`RUST_LOG` overrides the `info` default).
//! 2. Load [`AppConfig`] from disk (defaults on first run).
//! 3. Build the [`Pipeline`] with the spectral voice-model transform.
//! 4. Run for the requested number of seconds (first argument, default 5),
//!    logging latency once per second, then stop.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use voice_relay::{
    config::AppConfig,
    inference::{PassThroughModel, SpectralTransform},
    pipeline::Pipeline,
};

const DEFAULT_SESSION_SECS: u64 = 5;

fn session_length() -> Result<Duration> {
    match std::env::args().nth(1) {
        None => Ok(Duration::from_secs(DEFAULT_SESSION_SECS)),
        Some(arg) => {
            let secs: u64 = arg
                .parse()
                .with_context(|| format!("session length must be whole seconds, got {arg:?}"))?;
            Ok(Duration::from_secs(secs))
        }
    }
}

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice-relay starting up");

    // 2. Configuration
    let session = session_length()?;
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    config.validate().context("invalid configuration")?;
    log::info!(
        "backend {:?}, {} Hz, {} ch, {} frames/buffer",
        config.audio.backend,
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.frames_per_buffer
    );

    // 3. Pipeline
    let pipeline = Pipeline::from_app_config(&config);
    pipeline.set_transform(
        SpectralTransform::new(PassThroughModel, config.spectral.clone())
            .with_channels(config.audio.channels),
    );

    if !pipeline.start() {
        bail!("audio pipeline failed to start");
    }

    // 4. Session
    let started = Instant::now();
    while started.elapsed() < session {
        thread::sleep(Duration::from_secs(1).min(session.saturating_sub(started.elapsed())));
        if !pipeline.is_running() {
            pipeline.stop();
            bail!("audio pipeline stopped unexpectedly");
        }
        log::info!("measured latency: {:.2} ms", pipeline.measured_latency());
    }

    pipeline.stop();
    log::info!("voice-relay finished after {:.1} s", started.elapsed().as_secs_f64());
    Ok(())
}
