//! Duocast platform core contracts.
//!
//! Capture handles are supplied by the host (browser bridge, PipeWire,
//! AVFoundation, ...). This crate holds the data structures and traits the
//! compositor, encoder, and recording controller program against, without
//! coupling to a concrete OS backend.

pub mod audio;
pub mod device;
pub mod frame;
pub mod source;
pub mod synthetic;

pub use audio::AudioSignal;
pub use device::{AcquiredScreen, DeviceProvider, DeviceRef};
pub use frame::{Rgba, VideoFrame};
pub use source::{CaptureSource, SeekableSource, SourceKind};
