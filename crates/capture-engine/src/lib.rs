//! Duocast Capture Engine
//!
//! Drives a live recording:
//!
//! - **Scheduler:** the fixed-cadence tick source, real or manual
//! - **Audio:** the summing mixer that merges microphone and system audio
//! - **Session:** the recording state machine tying sources, compositor,
//!   mixer and encoder together
//!
//! Everything runs on the caller's task. A host drives the recording by
//! calling [`RecordingController::pump`] whenever the scheduler may have
//! ticks due.

pub mod audio;
pub mod scheduler;
pub mod session;

pub use audio::{mix_into, AudioMixer, MixedTrack, SummingMixer};
pub use scheduler::{IntervalScheduler, ManualScheduler, ManualTicks, Scheduler};
pub use session::*;
