//! Streaming encoder contract.

use duocast_common::error::{DuocastError, DuocastResult};
use serde::Serialize;

use crate::surface::CompositingSurface;

/// Parameters an encoder is created with. Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Sample rate of the mono audio track.
    pub sample_rate: u32,
    /// Media time covered by one emitted chunk.
    pub chunk_interval_ms: u32,
}

impl EncoderConfig {
    pub const MAX_DIMENSION: u32 = 16_384;
    pub const MAX_FPS: u32 = 240;
    pub const MAX_CHUNK_INTERVAL_MS: u32 = 30_000;

    /// Reject configurations no encoder can honour.
    pub fn validate(&self) -> DuocastResult<()> {
        if self.width == 0
            || self.height == 0
            || self.width > Self::MAX_DIMENSION
            || self.height > Self::MAX_DIMENSION
        {
            return Err(DuocastError::unsupported(format!(
                "output size {}x{} is not encodable",
                self.width, self.height
            )));
        }
        if self.fps == 0 || self.fps > Self::MAX_FPS {
            return Err(DuocastError::unsupported(format!(
                "frame rate {} is outside 1..={}",
                self.fps,
                Self::MAX_FPS
            )));
        }
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(DuocastError::unsupported(format!(
                "audio sample rate {} is not supported",
                self.sample_rate
            )));
        }
        if self.chunk_interval_ms == 0 || self.chunk_interval_ms > Self::MAX_CHUNK_INTERVAL_MS {
            return Err(DuocastError::unsupported(format!(
                "chunk interval {}ms is outside 1..={}",
                self.chunk_interval_ms,
                Self::MAX_CHUNK_INTERVAL_MS
            )));
        }
        Ok(())
    }
}

/// One ordered piece of the output container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub sequence: u64,
    pub data: Vec<u8>,
}

/// Running counters, mostly for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub audio_samples_encoded: u64,
    /// Frames offered while paused.
    pub frames_ignored: u64,
    pub chunks_emitted: u64,
    /// Chunks that failed to serialize and were discarded.
    pub chunks_dropped: u64,
    pub bytes_emitted: u64,
}

/// Incremental encoder for the composited stream.
///
/// Chunks are emitted in strictly increasing `sequence` order and their
/// concatenation is one decodable buffer once [`StreamEncoder::stop`] has
/// flushed.
pub trait StreamEncoder: Send {
    fn start(&mut self) -> DuocastResult<()>;

    /// Suspend emission. Input offered while paused is discarded.
    fn pause(&mut self);

    fn resume(&mut self);

    fn is_paused(&self) -> bool;

    /// Encode the surface's current contents as the next video frame.
    fn push_video(&mut self, surface: &CompositingSurface) -> DuocastResult<()>;

    /// Append mono samples to the audio track.
    fn push_audio(&mut self, samples: &[f32]) -> DuocastResult<()>;

    /// Take the chunks completed so far.
    fn drain_chunks(&mut self) -> Vec<EncodedChunk>;

    /// Flush and finalize. Returns every chunk not yet drained.
    fn stop(&mut self) -> DuocastResult<Vec<EncodedChunk>>;

    fn stats(&self) -> EncoderStats;
}

/// Lifecycle shared by the encoders in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EncoderPhase {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl EncoderPhase {
    /// Whether input should be accepted right now. Paused input is
    /// dropped silently; input before start or after stop is an error.
    pub(crate) fn accepting(self, operation: &str) -> DuocastResult<bool> {
        match self {
            Self::Running => Ok(true),
            Self::Paused => Ok(false),
            phase => Err(DuocastError::invalid_state(operation, phase)),
        }
    }
}

/// Builds an encoder for a recording or an export.
pub type EncoderFactory =
    Box<dyn Fn(EncoderConfig) -> DuocastResult<Box<dyn StreamEncoder>> + Send + Sync>;

/// Concatenate chunks in sequence order into the final buffer.
pub fn assemble_chunks(mut chunks: Vec<EncodedChunk>) -> Vec<u8> {
    chunks.sort_by_key(|chunk| chunk.sequence);
    let total = chunks.iter().map(|chunk| chunk.data.len()).sum();
    let mut buffer = Vec::with_capacity(total);
    for chunk in chunks {
        buffer.extend_from_slice(&chunk.data);
    }
    buffer
}
