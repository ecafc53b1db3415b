//! Visual source handles.

use std::fmt;
use std::sync::Arc;

use duocast_common::error::DuocastResult;
use serde::{Deserialize, Serialize};

use crate::frame::VideoFrame;

/// What a capture handle is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Screen,
    Camera,
    Microphone,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Screen => "screen",
            Self::Camera => "camera",
            Self::Microphone => "microphone",
        };
        f.write_str(text)
    }
}

/// A live, continuously playing visual feed.
///
/// The feed runs on its own decode clock. The compositor never waits for
/// it: each tick samples whatever frame is current, so frames are
/// duplicated or skipped when the rates differ.
pub trait CaptureSource: Send {
    fn kind(&self) -> SourceKind;

    /// Whether a frame is decodable right now.
    fn is_ready(&self) -> bool;

    /// Intrinsic width of the feed in pixels.
    fn native_width(&self) -> u32;

    /// Intrinsic height of the feed in pixels.
    fn native_height(&self) -> u32;

    /// The most recent decoded frame, if any.
    fn current_frame(&self) -> Option<Arc<VideoFrame>>;

    /// `false` once the platform reports the feed has ended. The last
    /// frame stays available, so sampling keeps returning a frozen image.
    fn is_live(&self) -> bool {
        true
    }

    /// Give the device back. Must be idempotent.
    fn release(&mut self);
}

/// A recorded visual source that can be positioned frame-exactly.
#[async_trait::async_trait]
pub trait SeekableSource: Send {
    fn native_width(&self) -> u32;

    fn native_height(&self) -> u32;

    /// Playable duration in seconds.
    fn duration_secs(&self) -> f64;

    /// Position the source at `secs`. Resolves once the "seek completed"
    /// signal fires, after which [`SeekableSource::current_frame`] holds
    /// the frame for that timestamp. Callers bound the wait themselves.
    async fn seek(&mut self, secs: f64) -> DuocastResult<()>;

    /// Frame at the last completed seek position.
    fn current_frame(&self) -> Option<Arc<VideoFrame>>;

    /// Sample rate of the recorded audio, if the source has any.
    fn audio_sample_rate(&self) -> Option<u32> {
        None
    }

    /// Fill `out` with mono samples starting at `start_secs`. Sources
    /// without audio (or past the end) write silence.
    fn read_audio(&self, start_secs: f64, out: &mut [f32]) {
        let _ = start_secs;
        out.fill(0.0);
    }
}
