//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the device,
//! spectral and pipeline layers, `AppPaths` for the platform config
//! directory, and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AudioConfig, BackendKind, ConfigError, PipelineConfig, SpectralConfig,
};
