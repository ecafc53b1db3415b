//! Uncompressed in-memory stream.
//!
//! [`MemoryEncoder`] keeps every composited frame and audio sample on a
//! shared [`MemoryTape`] instead of compressing them. It backs previews and
//! headless runs where exact pixels matter more than size, and
//! [`MemoryPlayback`] reads a tape back as a [`SeekableSource`].

use std::sync::Arc;

use async_trait::async_trait;
use duocast_common::error::{DuocastError, DuocastResult};
use duocast_platform_core::frame::VideoFrame;
use duocast_platform_core::source::SeekableSource;
use parking_lot::Mutex;

use crate::encoder::{
    EncodedChunk, EncoderConfig, EncoderFactory, EncoderPhase, EncoderStats, StreamEncoder,
};
use crate::surface::CompositingSurface;

#[derive(Debug, Default)]
struct TapeContents {
    config: Option<EncoderConfig>,
    frames: Vec<Arc<VideoFrame>>,
    audio: Vec<f32>,
}

/// Shared record of what a [`MemoryEncoder`] accepted. Clones share the
/// same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryTape {
    inner: Arc<Mutex<TapeContents>>,
}

impl MemoryTape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose encoders all write to this tape. Each new encoder
    /// clears what the previous one left.
    pub fn factory(&self) -> EncoderFactory {
        let tape = self.clone();
        Box::new(
            move |config: EncoderConfig| -> DuocastResult<Box<dyn StreamEncoder>> {
                Ok(Box::new(MemoryEncoder::new(config, tape.clone())?))
            },
        )
    }

    pub fn config(&self) -> Option<EncoderConfig> {
        self.inner.lock().config
    }

    pub fn frame_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn frame(&self, index: usize) -> Option<Arc<VideoFrame>> {
        self.inner.lock().frames.get(index).cloned()
    }

    pub fn audio(&self) -> Vec<f32> {
        self.inner.lock().audio.clone()
    }

    /// Media time covered by the recorded frames.
    pub fn duration_secs(&self) -> f64 {
        let inner = self.inner.lock();
        match inner.config {
            Some(config) => inner.frames.len() as f64 / config.fps as f64,
            None => 0.0,
        }
    }

    /// Snapshot of the tape as a seekable source.
    pub fn playback(&self) -> DuocastResult<MemoryPlayback> {
        let inner = self.inner.lock();
        let config = inner
            .config
            .ok_or_else(|| DuocastError::render("tape has never been written"))?;
        if inner.frames.is_empty() {
            return Err(DuocastError::render("tape has no video frames"));
        }
        Ok(MemoryPlayback {
            config,
            frames: inner.frames.clone(),
            audio: Arc::new(inner.audio.clone()),
            position: None,
        })
    }

    fn reset(&self, config: EncoderConfig) {
        let mut inner = self.inner.lock();
        inner.config = Some(config);
        inner.frames.clear();
        inner.audio.clear();
    }
}

/// [`StreamEncoder`] that stores raw frames on a [`MemoryTape`].
///
/// Chunks carry the RGBA bytes of the frames in each chunk interval, so
/// the assembled buffer is the frames back to back.
#[derive(Debug)]
pub struct MemoryEncoder {
    config: EncoderConfig,
    tape: MemoryTape,
    phase: EncoderPhase,
    pending: Vec<u8>,
    chunk_start_ms: u64,
    ready: Vec<EncodedChunk>,
    next_sequence: u64,
    stats: EncoderStats,
}

impl MemoryEncoder {
    pub fn new(config: EncoderConfig, tape: MemoryTape) -> DuocastResult<Self> {
        config.validate()?;
        tape.reset(config);
        Ok(Self {
            config,
            tape,
            phase: EncoderPhase::Idle,
            pending: Vec::new(),
            chunk_start_ms: 0,
            ready: Vec::new(),
            next_sequence: 0,
            stats: EncoderStats::default(),
        })
    }

    fn media_ms(&self) -> u64 {
        self.stats.frames_encoded * 1000 / self.config.fps as u64
    }

    fn emit(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.pending);
        self.stats.chunks_emitted += 1;
        self.stats.bytes_emitted += data.len() as u64;
        self.ready.push(EncodedChunk {
            sequence: self.next_sequence,
            data,
        });
        self.next_sequence += 1;
    }
}

impl StreamEncoder for MemoryEncoder {
    fn start(&mut self) -> DuocastResult<()> {
        if self.phase != EncoderPhase::Idle {
            return Err(DuocastError::invalid_state("start encoder", self.phase));
        }
        self.phase = EncoderPhase::Running;
        Ok(())
    }

    fn pause(&mut self) {
        if self.phase == EncoderPhase::Running {
            self.phase = EncoderPhase::Paused;
        }
    }

    fn resume(&mut self) {
        if self.phase == EncoderPhase::Paused {
            self.phase = EncoderPhase::Running;
        }
    }

    fn is_paused(&self) -> bool {
        self.phase == EncoderPhase::Paused
    }

    fn push_video(&mut self, surface: &CompositingSurface) -> DuocastResult<()> {
        if !self.phase.accepting("push video")? {
            self.stats.frames_ignored += 1;
            return Ok(());
        }
        if surface.width() != self.config.width || surface.height() != self.config.height {
            return Err(DuocastError::encoder(format!(
                "surface is {}x{} but the encoder expects {}x{}",
                surface.width(),
                surface.height(),
                self.config.width,
                self.config.height
            )));
        }
        let interval = self.config.chunk_interval_ms as u64;
        let now = self.media_ms();
        if now >= self.chunk_start_ms + interval {
            self.emit();
            self.chunk_start_ms = now - now % interval;
        }
        self.pending.extend_from_slice(surface.as_bytes());
        self.tape.inner.lock().frames.push(Arc::new(surface.snapshot()));
        self.stats.frames_encoded += 1;
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32]) -> DuocastResult<()> {
        if !self.phase.accepting("push audio")? {
            return Ok(());
        }
        self.tape.inner.lock().audio.extend_from_slice(samples);
        self.stats.audio_samples_encoded += samples.len() as u64;
        Ok(())
    }

    fn drain_chunks(&mut self) -> Vec<EncodedChunk> {
        std::mem::take(&mut self.ready)
    }

    fn stop(&mut self) -> DuocastResult<Vec<EncodedChunk>> {
        if matches!(self.phase, EncoderPhase::Idle | EncoderPhase::Stopped) {
            return Err(DuocastError::invalid_state("stop encoder", self.phase));
        }
        self.emit();
        self.phase = EncoderPhase::Stopped;
        Ok(std::mem::take(&mut self.ready))
    }

    fn stats(&self) -> EncoderStats {
        self.stats
    }
}

/// A [`MemoryTape`] snapshot exposed as a [`SeekableSource`]. Seeking
/// selects the frame on screen at the target instant.
#[derive(Debug, Clone)]
pub struct MemoryPlayback {
    config: EncoderConfig,
    frames: Vec<Arc<VideoFrame>>,
    audio: Arc<Vec<f32>>,
    position: Option<usize>,
}

impl MemoryPlayback {
    /// Index of the frame shown after the last seek.
    pub fn position(&self) -> Option<usize> {
        self.position
    }
}

#[async_trait]
impl SeekableSource for MemoryPlayback {
    fn native_width(&self) -> u32 {
        self.config.width
    }

    fn native_height(&self) -> u32 {
        self.config.height
    }

    fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 / self.config.fps as f64
    }

    async fn seek(&mut self, secs: f64) -> DuocastResult<()> {
        if !secs.is_finite() {
            return Err(DuocastError::render(format!("cannot seek to {secs}")));
        }
        // Nudge by a microsecond so k/fps lands on frame k despite rounding.
        let index = ((secs.max(0.0) + 1e-6) * self.config.fps as f64).floor() as usize;
        self.position = Some(index.min(self.frames.len() - 1));
        Ok(())
    }

    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.frames.get(self.position?).cloned()
    }

    fn audio_sample_rate(&self) -> Option<u32> {
        Some(self.config.sample_rate)
    }

    fn read_audio(&self, start_secs: f64, out: &mut [f32]) {
        copy_audio(&self.audio, self.config.sample_rate, start_secs, out);
    }
}

/// Copy `out.len()` samples of `audio` starting at `start_secs`, padding
/// with silence past the end.
pub(crate) fn copy_audio(audio: &[f32], rate: u32, start_secs: f64, out: &mut [f32]) {
    out.fill(0.0);
    let start = (start_secs.max(0.0) * rate as f64).round() as usize;
    if start >= audio.len() {
        return;
    }
    let available = (audio.len() - start).min(out.len());
    out[..available].copy_from_slice(&audio[start..start + available]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Rect;

    fn config() -> EncoderConfig {
        EncoderConfig {
            width: 4,
            height: 2,
            fps: 10,
            sample_rate: 8_000,
            chunk_interval_ms: 500,
        }
    }

    fn record(tape: &MemoryTape, frames: u8) -> Vec<EncodedChunk> {
        let mut encoder = (tape.factory())(config()).unwrap();
        let mut surface = CompositingSurface::new(4, 2);
        encoder.start().unwrap();
        for k in 0..frames {
            surface.fill_rect(Rect::new(0, 0, 4, 2), [k, 0, 0, 255]);
            encoder.push_video(&surface).unwrap();
            encoder.push_audio(&[k as f32; 800]).unwrap();
        }
        encoder.stop().unwrap()
    }

    #[test]
    fn chunks_follow_media_time() {
        let tape = MemoryTape::new();
        let chunks = record(&tape, 12);
        // 500ms chunks at 10fps: 5 + 5 + 2 frames.
        let sizes: Vec<usize> = chunks.iter().map(|c| c.data.len() / 32).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert!(chunks.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(tape.frame_count(), 12);
        assert_eq!(tape.audio().len(), 12 * 800);
    }

    #[test]
    fn paused_input_is_not_taped() {
        let tape = MemoryTape::new();
        let mut encoder = MemoryEncoder::new(config(), tape.clone()).unwrap();
        let surface = CompositingSurface::new(4, 2);
        encoder.start().unwrap();
        encoder.push_video(&surface).unwrap();
        encoder.pause();
        encoder.push_video(&surface).unwrap();
        encoder.push_audio(&[1.0; 10]).unwrap();
        encoder.resume();
        encoder.push_video(&surface).unwrap();
        encoder.stop().unwrap();

        assert_eq!(tape.frame_count(), 2);
        assert!(tape.audio().is_empty());
        assert_eq!(encoder.stats().frames_ignored, 1);
    }

    #[test]
    fn wrong_surface_size_is_rejected() {
        let mut encoder = MemoryEncoder::new(config(), MemoryTape::new()).unwrap();
        encoder.start().unwrap();
        let err = encoder
            .push_video(&CompositingSurface::new(8, 8))
            .unwrap_err();
        assert!(matches!(err, DuocastError::Encoder { .. }));
    }

    #[tokio::test]
    async fn playback_seeks_to_the_frame_on_screen() {
        let tape = MemoryTape::new();
        record(&tape, 20);
        let mut playback = tape.playback().unwrap();
        assert_eq!(playback.duration_secs(), 2.0);
        assert!(playback.current_frame().is_none());

        for k in [0usize, 3, 19] {
            playback.seek(k as f64 / 10.0).await.unwrap();
            assert_eq!(playback.position(), Some(k));
            assert_eq!(playback.current_frame().unwrap().pixel(0, 0), Some([k as u8, 0, 0, 255]));
        }
        playback.seek(9.0).await.unwrap();
        assert_eq!(playback.position(), Some(19));

        let mut out = [0.0f32; 4];
        playback.read_audio(0.5, &mut out);
        assert_eq!(out, [5.0; 4]);
        playback.read_audio(60.0, &mut out);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn unwritten_tape_has_no_playback() {
        assert!(MemoryTape::new().playback().is_err());
    }
}
