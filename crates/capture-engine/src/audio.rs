//! Audio mixing graph.
//!
//! Every connected input is summed into a single mono track. There is no
//! gain stage, ducking or clipping protection: loud inputs can exceed
//! `[-1.0, 1.0]` and are passed on as-is. Inputs are expected to run at the
//! mixer's sample rate; mismatches are logged, not resampled.

use std::sync::Arc;

use duocast_platform_core::audio::AudioSignal;
use parking_lot::Mutex;

type SharedInputs = Arc<Mutex<Vec<Box<dyn AudioSignal>>>>;

/// Merges live audio signals into one output track.
pub trait AudioMixer: Send {
    /// Add a signal to the mix. It stays connected until teardown.
    fn connect_input(&mut self, signal: Box<dyn AudioSignal>);

    /// The mixed output. Every handle reads the same shared inputs.
    fn output_track(&self) -> MixedTrack;

    fn input_count(&self) -> usize;

    /// Disconnect and release every input.
    fn teardown(&mut self);
}

/// Sum `input` into `out`, sample by sample.
pub fn mix_into(out: &mut [f32], input: &[f32]) {
    for (o, i) in out.iter_mut().zip(input) {
        *o += *i;
    }
}

/// [`AudioMixer`] that adds its inputs together.
pub struct SummingMixer {
    sample_rate: u32,
    inputs: SharedInputs,
}

impl SummingMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioMixer for SummingMixer {
    fn connect_input(&mut self, signal: Box<dyn AudioSignal>) {
        if signal.sample_rate() != self.sample_rate {
            tracing::warn!(
                input = signal.label(),
                input_rate = signal.sample_rate(),
                mix_rate = self.sample_rate,
                "Audio input sample rate differs from the mix; it will play at the wrong speed"
            );
        }
        tracing::debug!(input = signal.label(), "Audio input connected");
        self.inputs.lock().push(signal);
    }

    fn output_track(&self) -> MixedTrack {
        MixedTrack {
            sample_rate: self.sample_rate,
            inputs: Arc::clone(&self.inputs),
            scratch: Vec::new(),
        }
    }

    fn input_count(&self) -> usize {
        self.inputs.lock().len()
    }

    fn teardown(&mut self) {
        let mut inputs = self.inputs.lock();
        for input in inputs.iter_mut() {
            input.release();
        }
        let released = inputs.len();
        inputs.clear();
        tracing::debug!(released, "Audio mixer torn down");
    }
}

impl Drop for SummingMixer {
    fn drop(&mut self) {
        for input in self.inputs.lock().iter_mut() {
            input.release();
        }
    }
}

/// The mixer's output, readable as an ordinary [`AudioSignal`].
pub struct MixedTrack {
    sample_rate: u32,
    inputs: SharedInputs,
    scratch: Vec<f32>,
}

impl AudioSignal for MixedTrack {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        self.scratch.resize(out.len(), 0.0);
        for input in self.inputs.lock().iter_mut() {
            input.pull(&mut self.scratch);
            mix_into(out, &self.scratch);
        }
    }

    fn label(&self) -> &str {
        "mix"
    }
}
