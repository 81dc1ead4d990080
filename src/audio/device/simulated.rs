//! Hardware-free backend.
//!
//! Every lifecycle step succeeds.  While started, a clock thread invokes the
//! registered render callback once per block period: capture devices deliver
//! silence, render devices hand over a scratch buffer and discard whatever
//! the callback wrote.  There is no platform device, so [`handle`] is
//! always `None`.
//!
//! [`handle`]: AudioBackend::handle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{AudioBackend, DeviceError, DeviceHandle, Direction, RenderBlock, RenderCallback};
use crate::config::AudioConfig;

struct Clock {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// See the [module docs](self).
#[derive(Default)]
pub struct SimulatedBackend {
    direction: Option<Direction>,
    frames: usize,
    channels: usize,
    period: Duration,
    callback: Option<Arc<dyn RenderCallback>>,
    clock: Option<Clock>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn stop_clock(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.stop.store(true, Ordering::Release);
            if clock.thread.join().is_err() {
                log::error!("simulated device: render callback panicked");
            }
        }
    }
}

impl AudioBackend for SimulatedBackend {
    fn configure(
        &mut self,
        direction: Direction,
        config: &AudioConfig,
        callback: Option<Arc<dyn RenderCallback>>,
    ) -> Result<(), DeviceError> {
        self.direction = Some(direction);
        self.frames = config.frames_per_buffer;
        self.channels = usize::from(config.channels);
        self.period = config.buffer_duration();
        self.callback = callback;
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.clock.is_some() {
            return Ok(());
        }
        let direction = self.direction.ok_or(DeviceError::NotConfigured)?;
        let Some(callback) = self.callback.clone() else {
            // Nothing to drive.
            return Ok(());
        };

        let stop = Arc::new(AtomicBool::new(false));
        let frames = self.frames;
        let period = self.period;
        let mut block = vec![0.0_f32; frames * self.channels];
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name(format!("sim-{direction}"))
            .spawn(move || {
                let mut next = Instant::now() + period;
                while !thread_stop.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                        next += period;
                    } else {
                        // Fell behind; resynchronise instead of bursting.
                        next = now + period;
                    }
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    match direction {
                        Direction::Capture => {
                            callback.render(frames, RenderBlock::Captured(Ok(&block[..])));
                        }
                        Direction::Render => {
                            callback.render(frames, RenderBlock::Playback(&mut block[..]));
                        }
                    }
                }
            })?;

        self.clock = Some(Clock { stop, thread });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.stop_clock();
        Ok(())
    }

    fn dispose(&mut self) {
        self.stop_clock();
        self.callback = None;
    }

    fn handle(&self) -> Option<DeviceHandle> {
        None
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        self.stop_clock();
    }
}
