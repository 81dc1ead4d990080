//! Audio I/O: device lifecycle plus capture and render processors.
//!
//! # Data flow
//!
//! ```text
//! hardware ─▶ DeviceManager(Capture) ─▶ InputProcessor ─▶ snapshot + timestamp
//!                                              │
//!                                        data callback
//!                                              ▼
//! hardware ◀─ DeviceManager(Render) ◀── OutputProcessor ◀─ provider / last buffer
//! ```
//!
//! Everything a realtime callback touches is either an atomic, an
//! `ArcSwap`-published snapshot, or a narrowly-held `parking_lot` mutex.

pub mod device;
pub mod input;
pub mod output;
pub mod pool;
pub mod state;
pub mod timestamps;

pub use device::{
    backend_factory, AudioBackend, BackendFactory, DeviceError, DeviceHandle, DeviceManager,
    DeviceState, Direction, RenderBlock, RenderCallback, RenderStatus, SimulatedBackend,
};
pub use input::{DataCallback, InputProcessor};
pub use output::{AudioDataProvider, BufferSource, OutputProcessor};
pub use pool::BufferPool;
pub use state::{RunningFlag, RunningState};
pub use timestamps::TimestampRing;
