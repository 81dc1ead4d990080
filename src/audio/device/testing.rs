//! Test doubles for driving processors without a clock or hardware.
//!
//! [`ManualDevice`] records the render callback a processor registers and
//! lets a test invoke it synchronously, exactly as a platform thread would.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use super::{
    AudioBackend, BackendFactory, DeviceError, DeviceHandle, Direction, RenderBlock,
    RenderCallback, RenderStatus,
};
use crate::config::AudioConfig;

/// Backend lifecycle step, for failure injection and parking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Setup,
    Initialize,
    Start,
    Stop,
}

#[derive(Default)]
struct Shared {
    callback: Option<Arc<dyn RenderCallback>>,
    configured: bool,
    running: bool,
    fail_at: Option<Step>,
    park_at: Option<(Step, Arc<Barrier>)>,
    backends_built: usize,
    starts: usize,
}

/// Shared handle to a manually-driven device.  Clones observe the same state.
#[derive(Clone, Default)]
pub struct ManualDevice {
    shared: Arc<Mutex<Shared>>,
}

impl ManualDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(at: Step) -> Self {
        let device = Self::new();
        device.shared.lock().fail_at = Some(at);
        device
    }

    pub fn set_fail_at(&self, at: Option<Step>) {
        self.shared.lock().fail_at = at;
    }

    /// Make the backend block inside `step` until released.
    ///
    /// The backend waits on the returned barrier twice: once on entering
    /// the step, once before completing it.  A test thread mirrors both
    /// waits and inspects state in between.
    pub fn park_at(&self, step: Step) -> Arc<Barrier> {
        let barrier = Arc::new(Barrier::new(2));
        self.shared.lock().park_at = Some((step, Arc::clone(&barrier)));
        barrier
    }

    pub fn backend(&self) -> Box<dyn AudioBackend> {
        self.shared.lock().backends_built += 1;
        Box::new(ManualBackend {
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn factory(&self) -> BackendFactory {
        let device = self.clone();
        Arc::new(move |_| device.backend())
    }

    /// Deliver `samples` as a captured block.  `None` if nothing is started.
    pub fn capture(&self, samples: &[f32]) -> Option<RenderStatus> {
        let callback = self.running_callback()?;
        Some(callback.render(samples.len(), RenderBlock::Captured(Ok(samples))))
    }

    /// Report a failed capture render with `status`.
    pub fn capture_error(&self, frames: usize, status: RenderStatus) -> Option<RenderStatus> {
        let callback = self.running_callback()?;
        Some(callback.render(frames, RenderBlock::Captured(Err(status))))
    }

    /// Pull `frames` samples from a render callback.
    pub fn pull(&self, frames: usize) -> Option<(Vec<f32>, RenderStatus)> {
        let callback = self.running_callback()?;
        let mut out = vec![f32::NAN; frames];
        let status = callback.render(frames, RenderBlock::Playback(&mut out));
        Some((out, status))
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn backends_built(&self) -> usize {
        self.shared.lock().backends_built
    }

    pub fn starts(&self) -> usize {
        self.shared.lock().starts
    }

    fn running_callback(&self) -> Option<Arc<dyn RenderCallback>> {
        let shared = self.shared.lock();
        if !shared.running {
            return None;
        }
        shared.callback.clone()
    }
}

struct ManualBackend {
    shared: Arc<Mutex<Shared>>,
}

impl ManualBackend {
    fn check(&self, step: Step) -> Result<(), DeviceError> {
        if self.shared.lock().fail_at == Some(step) {
            return Err(DeviceError::NotConfigured);
        }
        Ok(())
    }

    fn park(&self, step: Step) {
        let barrier = match &self.shared.lock().park_at {
            Some((at, barrier)) if *at == step => Arc::clone(barrier),
            _ => return,
        };
        barrier.wait();
        barrier.wait();
    }
}

impl AudioBackend for ManualBackend {
    fn configure(
        &mut self,
        _direction: Direction,
        _config: &AudioConfig,
        callback: Option<Arc<dyn RenderCallback>>,
    ) -> Result<(), DeviceError> {
        self.check(Step::Setup)?;
        let mut shared = self.shared.lock();
        shared.callback = callback;
        shared.configured = true;
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), DeviceError> {
        self.check(Step::Initialize)
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.check(Step::Start)?;
        self.park(Step::Start);
        let mut shared = self.shared.lock();
        shared.running = true;
        shared.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.check(Step::Stop)?;
        self.park(Step::Stop);
        self.shared.lock().running = false;
        Ok(())
    }

    fn dispose(&mut self) {
        let mut shared = self.shared.lock();
        shared.running = false;
        shared.configured = false;
        shared.callback = None;
    }

    fn handle(&self) -> Option<DeviceHandle> {
        self.shared.lock().configured.then(|| DeviceHandle {
            name: "manual".into(),
        })
    }
}
