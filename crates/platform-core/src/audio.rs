//! Live audio signals.

/// A continuous mono audio feed producing `f32` samples in `[-1.0, 1.0]`.
///
/// Signals are pulled: the consumer asks for exactly as many samples as
/// it needs and the signal fills the buffer (with silence if it has
/// nothing to offer).
pub trait AudioSignal: Send {
    fn sample_rate(&self) -> u32;

    /// Fill `out` with the next `out.len()` samples.
    fn pull(&mut self, out: &mut [f32]);

    /// Short label for logs ("microphone", "system").
    fn label(&self) -> &str {
        "audio"
    }

    /// Give the device back. Must be idempotent.
    fn release(&mut self) {}
}
