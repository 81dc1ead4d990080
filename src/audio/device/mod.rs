//! Platform device lifecycle for one stream direction.
//!
//! [`DeviceManager`] walks a platform device through
//!
//! ```text
//! Uninitialized ─setup─▶ Configured ─initialize─▶ Initialized ─start─▶ Running
//!                                                      ▲                  │
//!                                                      └──start── Stopped ◀┘ stop
//! any state ─dispose─▶ Disposed
//! ```
//!
//! Every lifecycle call returns `bool`.  A call made in the wrong state, or
//! one the backend rejects, returns `false` and leaves the state as it was.
//!
//! The platform itself sits behind [`AudioBackend`]; the realtime side talks
//! back through the [`RenderCallback`] capability registered at `setup`.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{AudioConfig, BackendKind};

#[cfg(feature = "cpal-audio")]
pub mod cpal_backend;
pub mod simulated;
#[cfg(test)]
pub mod testing;

#[cfg(feature = "cpal-audio")]
pub use cpal_backend::CpalBackend;
pub use simulated::SimulatedBackend;

// ---------------------------------------------------------------------------
// Direction / render capability
// ---------------------------------------------------------------------------

/// Which way samples flow through a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Microphone → application.
    Capture,
    /// Application → speaker.
    Render,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => f.write_str("capture"),
            Direction::Render => f.write_str("render"),
        }
    }
}

/// Outcome of one realtime render invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Ok,
    /// Platform- or callback-specific failure code.
    Error(i32),
}

impl RenderStatus {
    /// The capture block did not match what the callback can accept.
    pub const BAD_BLOCK: RenderStatus = RenderStatus::Error(-50);
    /// A lock needed on the realtime path was busy.
    pub const BUSY: RenderStatus = RenderStatus::Error(-1);
    /// A user callback panicked and the unwind was stopped at the boundary.
    pub const CALLBACK_PANICKED: RenderStatus = RenderStatus::Error(-2);

    pub fn is_ok(&self) -> bool {
        matches!(self, RenderStatus::Ok)
    }
}

/// The block exchanged with a [`RenderCallback`].
pub enum RenderBlock<'a> {
    /// Samples pulled from a capture device, or the status the platform
    /// reported when it could not deliver them.
    Captured(Result<&'a [f32], RenderStatus>),
    /// A playback buffer the callback must fill completely.
    Playback(&'a mut [f32]),
}

/// Realtime render capability.
///
/// Invoked on a platform-owned thread; implementations must not block or
/// allocate in the steady state and must never panic across this boundary.
pub trait RenderCallback: Send + Sync {
    fn render(&self, frame_count: usize, block: RenderBlock<'_>) -> RenderStatus;
}

/// Opaque identity of an opened platform device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub name: String,
}

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Errors raised by an [`AudioBackend`].
///
/// They never cross the processor boundary: [`DeviceManager`] logs them and
/// reports `false`.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no default {0} device on the audio host")]
    NoDevice(Direction),

    #[error("backend `{0}` is not compiled into this build")]
    Unavailable(&'static str),

    #[error("backend used before it was configured")]
    NotConfigured,

    #[error("unsupported stream parameter: {0}")]
    UnsupportedConfig(String),

    #[error("failed to spawn device clock thread: {0}")]
    Clock(#[from] std::io::Error),

    #[cfg(feature = "cpal-audio")]
    #[error("failed to build stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "cpal-audio")]
    #[error("failed to start stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[cfg(feature = "cpal-audio")]
    #[error("failed to pause stream: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),
}

// ---------------------------------------------------------------------------
// AudioBackend
// ---------------------------------------------------------------------------

/// One platform device, driven by a [`DeviceManager`].
///
/// The manager guarantees call order; backends only report whether the
/// platform accepted each step.
pub trait AudioBackend: Send {
    fn configure(
        &mut self,
        direction: Direction,
        config: &AudioConfig,
        callback: Option<Arc<dyn RenderCallback>>,
    ) -> Result<(), DeviceError>;

    fn initialize(&mut self) -> Result<(), DeviceError>;

    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Release every platform resource.  Must be safe to call twice.
    fn dispose(&mut self);

    fn handle(&self) -> Option<DeviceHandle>;
}

// Compile-time assertion: Box<dyn AudioBackend> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn AudioBackend>) {}
};

/// Builds a fresh backend each time a processor acquires a device.
pub type BackendFactory = Arc<dyn Fn(Direction) -> Box<dyn AudioBackend> + Send + Sync>;

/// The factory matching a configured [`BackendKind`].
pub fn backend_factory(kind: BackendKind) -> BackendFactory {
    match kind {
        BackendKind::Simulated => {
            Arc::new(|_: Direction| -> Box<dyn AudioBackend> { Box::new(SimulatedBackend::new()) })
        }
        #[cfg(feature = "cpal-audio")]
        BackendKind::Cpal => {
            Arc::new(|_: Direction| -> Box<dyn AudioBackend> { Box::new(CpalBackend::new()) })
        }
        #[cfg(not(feature = "cpal-audio"))]
        BackendKind::Cpal => Arc::new(|_: Direction| -> Box<dyn AudioBackend> {
            Box::new(UnavailableBackend("cpal"))
        }),
    }
}

/// Integral `(sample_rate, frames_per_buffer)` for a platform stream.
#[cfg_attr(not(feature = "cpal-audio"), allow(dead_code))]
pub(crate) fn stream_params(config: &AudioConfig) -> Result<(u32, u32), DeviceError> {
    let rate = config.sample_rate.round();
    if !(1.0..=f64::from(u32::MAX)).contains(&rate) {
        return Err(DeviceError::UnsupportedConfig(format!(
            "sample rate {} Hz",
            config.sample_rate
        )));
    }
    let frames = u32::try_from(config.frames_per_buffer).map_err(|_| {
        DeviceError::UnsupportedConfig(format!(
            "{} frames per buffer",
            config.frames_per_buffer
        ))
    })?;
    Ok((rate as u32, frames))
}

/// Stand-in for a backend that was compiled out; refuses to configure.
#[cfg_attr(feature = "cpal-audio", allow(dead_code))]
struct UnavailableBackend(&'static str);

impl AudioBackend for UnavailableBackend {
    fn configure(
        &mut self,
        _: Direction,
        _: &AudioConfig,
        _: Option<Arc<dyn RenderCallback>>,
    ) -> Result<(), DeviceError> {
        Err(DeviceError::Unavailable(self.0))
    }

    fn initialize(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Unavailable(self.0))
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Unavailable(self.0))
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn dispose(&mut self) {}

    fn handle(&self) -> Option<DeviceHandle> {
        None
    }
}

// ---------------------------------------------------------------------------
// DeviceManager
// ---------------------------------------------------------------------------

/// Lifecycle phase of a [`DeviceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Configured,
    Initialized,
    Running,
    Stopped,
    Disposed,
}

/// Owns one backend for one direction and enforces lifecycle order.
pub struct DeviceManager {
    direction: Direction,
    config: AudioConfig,
    backend: Box<dyn AudioBackend>,
    state: DeviceState,
}

impl DeviceManager {
    pub fn new(direction: Direction, config: AudioConfig, backend: Box<dyn AudioBackend>) -> Self {
        Self {
            direction,
            config,
            backend,
            state: DeviceState::Uninitialized,
        }
    }

    /// Configure the device and register the realtime render callback.
    pub fn setup(&mut self, callback: Option<Arc<dyn RenderCallback>>) -> bool {
        if self.state != DeviceState::Uninitialized {
            return self.out_of_order("setup");
        }
        let result = self
            .backend
            .configure(self.direction, &self.config, callback);
        self.advance("setup", result, DeviceState::Configured)
    }

    pub fn initialize(&mut self) -> bool {
        if self.state != DeviceState::Configured {
            return self.out_of_order("initialize");
        }
        let result = self.backend.initialize();
        self.advance("initialize", result, DeviceState::Initialized)
    }

    pub fn start(&mut self) -> bool {
        if !matches!(self.state, DeviceState::Initialized | DeviceState::Stopped) {
            return self.out_of_order("start");
        }
        let result = self.backend.start();
        self.advance("start", result, DeviceState::Running)
    }

    pub fn stop(&mut self) -> bool {
        if self.state != DeviceState::Running {
            return self.out_of_order("stop");
        }
        let result = self.backend.stop();
        self.advance("stop", result, DeviceState::Stopped)
    }

    /// Stop if running and release the platform device.  Idempotent.
    pub fn dispose(&mut self) {
        if self.state == DeviceState::Disposed {
            return;
        }
        if self.state == DeviceState::Running {
            if let Err(e) = self.backend.stop() {
                log::warn!("{} device: stop during dispose failed: {e}", self.direction);
            }
        }
        self.backend.dispose();
        self.state = DeviceState::Disposed;
        log::debug!("{} device disposed", self.direction);
    }

    /// Identity of the opened device; `None` once disposed or when the
    /// backend has no hardware behind it.
    pub fn device_handle(&self) -> Option<DeviceHandle> {
        if self.state == DeviceState::Disposed {
            return None;
        }
        self.backend.handle()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn advance(
        &mut self,
        op: &'static str,
        result: Result<(), DeviceError>,
        next: DeviceState,
    ) -> bool {
        match result {
            Ok(()) => {
                log::debug!("{} device: {op} → {next:?}", self.direction);
                self.state = next;
                true
            }
            Err(e) => {
                log::warn!("{} device: {op} failed: {e}", self.direction);
                false
            }
        }
    }

    fn out_of_order(&self, op: &'static str) -> bool {
        log::warn!(
            "{} device: {op} rejected in state {:?}",
            self.direction,
            self.state
        );
        false
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
