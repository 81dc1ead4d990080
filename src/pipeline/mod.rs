//! Capture → transform → render orchestration and latency measurement.

pub mod latency;
pub mod runner;
pub mod transform;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use latency::{average_latency_ms, LatencyCache};
pub use runner::Pipeline;
pub use transform::{AudioTransform, Gain};
