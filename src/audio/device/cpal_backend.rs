//! Platform devices via `cpal`.
//!
//! Opens the default input or output device of the default host with an
//! `f32` stream of the configured rate, channel count and fixed block size.
//! The stream is built in `initialize`, played in `start`, paused in `stop`
//! and dropped in `dispose`.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{
    stream_params, AudioBackend, DeviceError, DeviceHandle, Direction, RenderBlock,
    RenderCallback,
};
use crate::config::AudioConfig;

/// Wrapper to hold a `cpal::Stream` in a `Send` context.
///
/// `cpal::Stream` is `!Send` on some platforms.  The stream is only touched
/// through `&mut CpalBackend`, which lives inside a `DeviceManager` behind the
/// owning processor's lifecycle mutex, so it is never accessed concurrently.
struct StreamHandle(cpal::Stream);

// SAFETY: see above; access is serialised by the processor's lifecycle lock.
unsafe impl Send for StreamHandle {}

/// See the [module docs](self).
#[derive(Default)]
pub struct CpalBackend {
    direction: Option<Direction>,
    config: Option<cpal::StreamConfig>,
    callback: Option<Arc<dyn RenderCallback>>,
    stream: Option<StreamHandle>,
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_input(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        callback: Option<Arc<dyn RenderCallback>>,
    ) -> Result<cpal::Stream, DeviceError> {
        let channels = usize::from(config.channels.max(1));
        let stream = device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Some(callback) = &callback {
                    callback.render(data.len() / channels, RenderBlock::Captured(Ok(data)));
                }
            },
            |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
            },
            None,
        )?;
        Ok(stream)
    }

    fn build_output(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        callback: Option<Arc<dyn RenderCallback>>,
    ) -> Result<cpal::Stream, DeviceError> {
        let channels = usize::from(config.channels.max(1));
        let stream = device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let rendered = match &callback {
                    Some(callback) => callback
                        .render(data.len() / channels, RenderBlock::Playback(&mut *data))
                        .is_ok(),
                    None => false,
                };
                if !rendered {
                    data.fill(0.0);
                }
            },
            |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
            },
            None,
        )?;
        Ok(stream)
    }
}

impl AudioBackend for CpalBackend {
    fn configure(
        &mut self,
        direction: Direction,
        config: &AudioConfig,
        callback: Option<Arc<dyn RenderCallback>>,
    ) -> Result<(), DeviceError> {
        let (sample_rate, frames) = stream_params(config)?;
        self.direction = Some(direction);
        self.config = Some(cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(frames),
        });
        self.callback = callback;
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), DeviceError> {
        let (Some(direction), Some(config)) = (self.direction, self.config.as_ref()) else {
            return Err(DeviceError::NotConfigured);
        };

        let host = cpal::default_host();
        let device = match direction {
            Direction::Capture => host.default_input_device(),
            Direction::Render => host.default_output_device(),
        }
        .ok_or(DeviceError::NoDevice(direction))?;

        let callback = self.callback.clone();
        let stream = match direction {
            Direction::Capture => Self::build_input(&device, config, callback)?,
            Direction::Render => Self::build_output(&device, config, callback)?,
        };

        self.device_name = device.name().ok();
        self.stream = Some(StreamHandle(stream));
        log::info!(
            "cpal {direction} device ready: {}",
            self.device_name.as_deref().unwrap_or("<unnamed>")
        );
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        let stream = self.stream.as_ref().ok_or(DeviceError::NotConfigured)?;
        stream.0.play()?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(stream) = &self.stream {
            stream.0.pause()?;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        // Dropping the stream closes the device.
        self.stream = None;
        self.callback = None;
    }

    fn handle(&self) -> Option<DeviceHandle> {
        self.stream.as_ref()?;
        Some(DeviceHandle {
            name: self.device_name.clone().unwrap_or_default(),
        })
    }
}
