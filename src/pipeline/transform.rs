//! Per-block processing hook between capture and render.

/// Processes one captured block on the capture thread.
///
/// Returning `None` passes the captured block through unchanged.  Output of
/// the same length as the input is copied into a pooled buffer; any other
/// length is rendered as returned.
///
/// Implementations run on the realtime thread: keep them short and avoid
/// blocking.  A panic is caught at the device boundary and reported as a
/// failed render.
pub trait AudioTransform: Send + Sync {
    fn process(&self, input: &[f32]) -> Option<Vec<f32>>;
}

impl<F> AudioTransform for F
where
    F: Fn(&[f32]) -> Option<Vec<f32>> + Send + Sync,
{
    fn process(&self, input: &[f32]) -> Option<Vec<f32>> {
        self(input)
    }
}

// Compile-time assertion: Box<dyn AudioTransform> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn AudioTransform>) {}
};

/// Multiplies every sample by a constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain(pub f32);

impl AudioTransform for Gain {
    fn process(&self, input: &[f32]) -> Option<Vec<f32>> {
        Some(input.iter().map(|s| s * self.0).collect())
    }
}
