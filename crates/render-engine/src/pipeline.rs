//! GStreamer pipelines behind the output container.
//!
//! Encoding runs two `appsrc`s into a streamable `matroskamux`:
//!
//! ```text
//! appsrc(RGBA) ! videoconvert ! x264enc ! h264parse ──┐
//!                                                     ├─ matroskamux ! appsink
//! appsrc(F32LE mono) ! audioconvert ──────────────────┘
//! ```
//!
//! Buffer timestamps come from frame and sample counts, so paused time never
//! reaches the muxer. Whatever the `appsink` has produced is cut into a
//! chunk each time media time crosses a chunk interval.

use std::sync::OnceLock;
use std::time::Duration;

use duocast_common::error::{DuocastError, DuocastResult};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_audio as gst_audio;
use gstreamer_video as gst_video;

use crate::encoder::{EncodedChunk, EncoderConfig, EncoderPhase, EncoderStats, StreamEncoder};
use crate::surface::CompositingSurface;

/// Upper bound on the end-of-stream drain at stop.
const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Elements the encode and playback pipelines are built from.
const REQUIRED_ELEMENTS: [&str; 11] = [
    "appsrc",
    "appsink",
    "queue",
    "videoconvert",
    "x264enc",
    "h264parse",
    "audioconvert",
    "matroskamux",
    "matroskademux",
    "decodebin",
    "fakesink",
];

/// Any one of these lets `decodebin` read the video track back.
const H264_DECODERS: [&str; 4] = ["avdec_h264", "openh264dec", "vah264dec", "nvh264dec"];

pub fn init_gstreamer() -> DuocastResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(DuocastError::encoder(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Whether GStreamer is usable and has every plugin the encoder and
/// [`crate::playback::RecordingPlayback`] need.
pub fn media_runtime_available() -> bool {
    if init_gstreamer().is_err() {
        return false;
    }
    let missing: Vec<&str> = REQUIRED_ELEMENTS
        .iter()
        .copied()
        .filter(|name| gst::ElementFactory::find(name).is_none())
        .collect();
    let decoder = H264_DECODERS
        .iter()
        .any(|name| gst::ElementFactory::find(name).is_some());
    if !missing.is_empty() || !decoder {
        tracing::debug!(?missing, decoder, "GStreamer plugins incomplete");
        return false;
    }
    true
}

fn pipeline_from_launch(launch: &str) -> DuocastResult<gst::Pipeline> {
    let element = gst::parse::launch(launch)
        .map_err(|e| DuocastError::encoder(format!("Failed to build pipeline: {e}")))?;
    element
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| DuocastError::encoder("Launch string did not produce a pipeline"))
}

fn app_src(pipeline: &gst::Pipeline, name: &str) -> DuocastResult<gst_app::AppSrc> {
    pipeline
        .by_name(name)
        .and_then(|element| element.downcast::<gst_app::AppSrc>().ok())
        .ok_or_else(|| DuocastError::encoder(format!("pipeline has no appsrc named {name}")))
}

fn app_sink(pipeline: &gst::Pipeline, name: &str) -> DuocastResult<gst_app::AppSink> {
    pipeline
        .by_name(name)
        .and_then(|element| element.downcast::<gst_app::AppSink>().ok())
        .ok_or_else(|| DuocastError::encoder(format!("pipeline has no appsink named {name}")))
}

/// Block until `done` is posted on `bus`. A pipeline error or the timeout
/// passing first is reported through `fail`.
pub(crate) fn wait_on_bus(
    bus: &gst::Bus,
    done: gst::MessageType,
    timeout: Duration,
    fail: fn(String) -> DuocastError,
) -> DuocastResult<()> {
    let timeout_ns = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
    match bus.timed_pop_filtered(timeout_ns, &[done, gst::MessageType::Error]) {
        Some(msg) => match msg.view() {
            gst::MessageView::Error(e) => Err(fail(format!(
                "pipeline error: {} ({:?})",
                e.error(),
                e.debug()
            ))),
            _ => Ok(()),
        },
        None => Err(fail(format!(
            "no {done:?} within {}ms",
            timeout.as_millis()
        ))),
    }
}

/// [`StreamEncoder`] writing H.264 video and float PCM audio into a
/// streamable Matroska buffer through GStreamer.
///
/// Output sizes must be even on both axes (4:2:0 chroma).
#[derive(Debug)]
pub struct GstChunkEncoder {
    config: EncoderConfig,
    phase: EncoderPhase,
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: gst_app::AppSrc,
    sink: gst_app::AppSink,
    /// Muxer output not yet cut into a chunk.
    pending: Vec<u8>,
    chunk_start_ms: u64,
    ready: Vec<EncodedChunk>,
    next_sequence: u64,
    stats: EncoderStats,
}

impl GstChunkEncoder {
    /// Validate `config` and build the pipeline. Fails synchronously with
    /// `Unsupported` for configurations that cannot be encoded.
    pub fn new(config: EncoderConfig) -> DuocastResult<Self> {
        config.validate()?;
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(DuocastError::unsupported(format!(
                "H.264 output needs even dimensions, got {}x{}",
                config.width, config.height
            )));
        }
        init_gstreamer()?;

        // One keyframe every 2 seconds keeps export seeks short.
        let keyint = config.fps.saturating_mul(2).max(2);
        let launch = format!(
            "appsrc name=video format=time ! queue ! videoconvert ! x264enc tune=zerolatency speed-preset=veryfast key-int-max={keyint} ! h264parse ! queue ! mux. \
             appsrc name=audio format=time ! queue ! audioconvert ! queue ! mux. \
             matroskamux name=mux streamable=true ! appsink name=sink sync=false"
        );
        let pipeline = pipeline_from_launch(&launch)?;
        let video_src = app_src(&pipeline, "video")?;
        let audio_src = app_src(&pipeline, "audio")?;
        let sink = app_sink(&pipeline, "sink")?;

        let video_info = gst_video::VideoInfo::builder(
            gst_video::VideoFormat::Rgba,
            config.width,
            config.height,
        )
        .fps(gst::Fraction::new(config.fps as i32, 1))
        .build()
        .map_err(|e| DuocastError::encoder(format!("Failed to describe video input: {e}")))?;
        let video_caps = video_info
            .to_caps()
            .map_err(|e| DuocastError::encoder(format!("Failed to create video caps: {e}")))?;
        video_src.set_caps(Some(&video_caps));

        let audio_info =
            gst_audio::AudioInfo::builder(gst_audio::AudioFormat::F32le, config.sample_rate, 1)
                .build()
                .map_err(|e| {
                    DuocastError::encoder(format!("Failed to describe audio input: {e}"))
                })?;
        let audio_caps = audio_info
            .to_caps()
            .map_err(|e| DuocastError::encoder(format!("Failed to create audio caps: {e}")))?;
        audio_src.set_caps(Some(&audio_caps));

        Ok(Self {
            config,
            phase: EncoderPhase::Idle,
            pipeline,
            video_src,
            audio_src,
            sink,
            pending: Vec::new(),
            chunk_start_ms: 0,
            ready: Vec::new(),
            next_sequence: 0,
            stats: EncoderStats::default(),
        })
    }

    /// Boxed constructor matching [`crate::encoder::EncoderFactory`].
    pub fn boxed(config: EncoderConfig) -> DuocastResult<Box<dyn StreamEncoder>> {
        Ok(Box::new(Self::new(config)?))
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    fn media_ms(&self) -> u64 {
        self.stats.frames_encoded * 1000 / self.config.fps as u64
    }

    /// Surface a pipeline error posted since the last call.
    fn check_bus(&self) -> DuocastResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(e) = msg.view() {
                return Err(DuocastError::encoder(format!(
                    "Encoder pipeline failed: {}",
                    e.error()
                )));
            }
        }
        Ok(())
    }

    /// Move everything the muxer has produced into `pending`.
    fn collect(&mut self) {
        while let Some(sample) = self.sink.try_pull_sample(gst::ClockTime::ZERO) {
            match sample.buffer().map(|buffer| buffer.map_readable()) {
                Some(Ok(map)) => self.pending.extend_from_slice(map.as_slice()),
                _ => {
                    self.stats.chunks_dropped += 1;
                    tracing::warn!(
                        media_ms = self.media_ms(),
                        "Dropping muxer output that could not be read"
                    );
                }
            }
        }
    }

    fn emit(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.pending);
        self.stats.chunks_emitted += 1;
        self.stats.bytes_emitted += data.len() as u64;
        tracing::trace!(sequence = self.next_sequence, bytes = data.len(), "Chunk emitted");
        self.ready.push(EncodedChunk {
            sequence: self.next_sequence,
            data,
        });
        self.next_sequence += 1;
    }

    fn push(
        src: &gst_app::AppSrc,
        bytes: Vec<u8>,
        pts_ns: u64,
        duration_ns: u64,
        track: &str,
    ) -> DuocastResult<()> {
        let mut buffer = gst::Buffer::from_slice(bytes);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(gst::ClockTime::from_nseconds(pts_ns));
            buffer.set_duration(gst::ClockTime::from_nseconds(duration_ns));
        }
        src.push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| DuocastError::encoder(format!("{track} buffer rejected: {e}")))
    }
}

impl StreamEncoder for GstChunkEncoder {
    fn start(&mut self) -> DuocastResult<()> {
        if self.phase != EncoderPhase::Idle {
            return Err(DuocastError::invalid_state("start encoder", self.phase));
        }
        // Non-live sources preroll on the first pushed buffers, so the
        // state change completes asynchronously.
        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            DuocastError::encoder(format!("Failed to start encoder pipeline: {e:?}"))
        })?;
        self.phase = EncoderPhase::Running;
        tracing::debug!(
            width = self.config.width,
            height = self.config.height,
            fps = self.config.fps,
            sample_rate = self.config.sample_rate,
            chunk_interval_ms = self.config.chunk_interval_ms,
            "GStreamer encoder started"
        );
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
        self.check_bus()?;
        self.collect();

        let interval = self.config.chunk_interval_ms as u64;
        let now = self.media_ms();
        if now >= self.chunk_start_ms + interval {
            self.emit();
            self.chunk_start_ms = now - now % interval;
        }

        let fps = self.config.fps as u64;
        let frames = self.stats.frames_encoded;
        let pts_ns = frames * 1_000_000_000 / fps;
        let next_ns = (frames + 1) * 1_000_000_000 / fps;
        Self::push(
            &self.video_src,
            surface.as_bytes().to_vec(),
            pts_ns,
            next_ns - pts_ns,
            "video",
        )?;
        self.stats.frames_encoded += 1;
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32]) -> DuocastResult<()> {
        if !self.phase.accepting("push audio")? || samples.is_empty() {
            return Ok(());
        }
        let rate = self.config.sample_rate as u64;
        let written = self.stats.audio_samples_encoded;
        let pts_ns = written * 1_000_000_000 / rate;
        let end_ns = (written + samples.len() as u64) * 1_000_000_000 / rate;
        let bytes: Vec<u8> = samples.iter().copied().flat_map(f32::to_le_bytes).collect();
        Self::push(&self.audio_src, bytes, pts_ns, end_ns - pts_ns, "audio")?;
        self.stats.audio_samples_encoded += samples.len() as u64;
        Ok(())
    }

    fn drain_chunks(&mut self) -> Vec<EncodedChunk> {
        self.collect();
        std::mem::take(&mut self.ready)
    }

    fn stop(&mut self) -> DuocastResult<Vec<EncodedChunk>> {
        if matches!(self.phase, EncoderPhase::Idle | EncoderPhase::Stopped) {
            return Err(DuocastError::invalid_state("stop encoder", self.phase));
        }

        // EOS on both inputs lets x264 and the muxer flush their tails.
        let video_eos = self.video_src.end_of_stream();
        let audio_eos = self.audio_src.end_of_stream();
        if video_eos.is_err() || audio_eos.is_err() {
            tracing::warn!(
                ?video_eos,
                ?audio_eos,
                "Failed to signal end of stream; output may be truncated"
            );
        } else if let Some(bus) = self.pipeline.bus() {
            match wait_on_bus(&bus, gst::MessageType::Eos, EOS_DRAIN_TIMEOUT, |m| {
                DuocastError::encoder(m)
            }) {
                Ok(()) => tracing::debug!("EOS received; encoder drained"),
                Err(e) => tracing::warn!(error = %e, "Encoder EOS drain incomplete"),
            }
        }
        self.collect();
        self.emit();

        self.pipeline.set_state(gst::State::Null).map_err(|e| {
            DuocastError::encoder(format!("Failed to stop encoder pipeline: {e:?}"))
        })?;
        self.phase = EncoderPhase::Stopped;
        tracing::debug!(
            frames = self.stats.frames_encoded,
            samples = self.stats.audio_samples_encoded,
            chunks = self.stats.chunks_emitted,
            dropped = self.stats.chunks_dropped,
            bytes = self.stats.bytes_emitted,
            "GStreamer encoder stopped"
        );
        Ok(std::mem::take(&mut self.ready))
    }

    fn stats(&self) -> EncoderStats {
        self.stats
    }
}

impl Drop for GstChunkEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::assemble_chunks;
    use crate::surface::Rect;

    fn config() -> EncoderConfig {
        EncoderConfig {
            width: 64,
            height: 36,
            fps: 30,
            sample_rate: 8_000,
            chunk_interval_ms: 250,
        }
    }

    #[test]
    fn odd_dimensions_are_unsupported() {
        let err = GstChunkEncoder::new(EncoderConfig {
            width: 63,
            ..config()
        })
        .unwrap_err();
        assert!(matches!(err, DuocastError::Unsupported { .. }));
    }

    #[test]
    fn invalid_config_fails_before_touching_gstreamer() {
        let err = GstChunkEncoder::new(EncoderConfig { fps: 0, ..config() }).unwrap_err();
        assert!(matches!(err, DuocastError::Unsupported { .. }));
    }

    #[test]
    fn push_before_start_is_rejected() {
        if !media_runtime_available() {
            eprintln!("skipping: GStreamer plugins unavailable");
            return;
        }
        let mut encoder = GstChunkEncoder::new(config()).unwrap();
        let surface = CompositingSurface::new(64, 36);
        assert!(matches!(
            encoder.push_video(&surface).unwrap_err(),
            DuocastError::InvalidState { .. }
        ));
    }

    #[test]
    fn one_second_produces_ordered_matroska_chunks() {
        if !media_runtime_available() {
            eprintln!("skipping: GStreamer plugins unavailable");
            return;
        }
        let mut encoder = GstChunkEncoder::new(config()).unwrap();
        let mut surface = CompositingSurface::new(64, 36);
        encoder.start().unwrap();

        let mut chunks = Vec::new();
        for k in 0..30u8 {
            surface.fill_rect(Rect::new(0, 0, 64, 36), [k * 8, k * 8, k * 8, 255]);
            encoder.push_video(&surface).unwrap();
            encoder.push_audio(&[0.25; 266]).unwrap();
            chunks.extend(encoder.drain_chunks());
        }
        encoder.pause();
        encoder.push_video(&surface).unwrap();
        encoder.resume();
        chunks.extend(encoder.stop().unwrap());

        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 30);
        assert_eq!(stats.frames_ignored, 1);
        assert_eq!(stats.audio_samples_encoded, 30 * 266);
        assert_eq!(stats.chunks_dropped, 0);
        assert!(chunks.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let buffer = assemble_chunks(chunks);
        // EBML magic opens every Matroska stream.
        assert_eq!(&buffer[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        // Compressed: less than the raw frames alone.
        assert!(buffer.len() < 30 * 64 * 36 * 4, "{} bytes", buffer.len());
    }

    #[test]
    fn stop_twice_is_rejected() {
        if !media_runtime_available() {
            eprintln!("skipping: GStreamer plugins unavailable");
            return;
        }
        let mut encoder = GstChunkEncoder::new(config()).unwrap();
        encoder.start().unwrap();
        encoder.stop().unwrap();
        assert!(encoder.stop().is_err());
    }
}
