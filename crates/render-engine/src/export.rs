//! Frame-accurate export of an edited timeline.
//!
//! The renderer walks the timeline strictly in order. For every output
//! frame it seeks the source, waits (bounded) for the seek to land, draws
//! the frame and hands it to a fresh encoder. Nothing runs concurrently,
//! so the output is identical for identical inputs.

use std::time::Duration;

use duocast_common::config::ExportDefaults;
use duocast_common::error::{DuocastError, DuocastResult};
use duocast_platform_core::source::SeekableSource;
use duocast_project_model::layout::{Quality, Resolution};
use duocast_project_model::session::RecordingSession;
use duocast_project_model::store::RecordStore;
use duocast_project_model::timeline::{ns_to_secs, VirtualTimeline};
use serde::Serialize;

use crate::encoder::{assemble_chunks, EncoderConfig, StreamEncoder};
use crate::pipeline::GstChunkEncoder;
use crate::surface::{CompositingSurface, Rect};

/// Sample rate used when the source carries no audio.
const FALLBACK_SAMPLE_RATE: u32 = 48_000;

/// Export tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub fps: u32,
    /// Upper bound on a single seek.
    pub seek_timeout: Duration,
    /// Silence appended after the last frame.
    pub trailing_buffer: Duration,
    pub chunk_interval_ms: u32,
}

impl ExportOptions {
    pub fn from_defaults(defaults: &ExportDefaults) -> Self {
        Self {
            fps: defaults.fps,
            seek_timeout: Duration::from_millis(defaults.seek_timeout_ms),
            trailing_buffer: Duration::from_millis(defaults.trailing_buffer_ms),
            ..Self::default()
        }
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            fps: 30,
            seek_timeout: Duration::from_secs(5),
            trailing_buffer: Duration::from_millis(500),
            chunk_interval_ms: 1_000,
        }
    }
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send + Sync>;

/// Export progress report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportProgress {
    /// Frames rendered over total frames, in `[0.0, 1.0]`.
    pub progress: f64,

    pub frames_rendered: u64,

    pub total_frames: u64,

    pub stage: ExportStage,
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
}

/// What an export produced.
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// The finished output buffer.
    pub buffer: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames drawn for each segment, in timeline order.
    pub frames_per_segment: Vec<u64>,
    pub frames_rendered: u64,
    pub chunks_dropped: u64,
}

impl ExportReport {
    /// Playable duration of the output.
    pub fn duration_secs(&self) -> f64 {
        if self.fps == 0 {
            return 0.0;
        }
        self.frames_rendered as f64 / self.fps as f64
    }
}

/// Sequential, frame-exact renderer for a [`VirtualTimeline`].
pub struct ExportRenderer {
    options: ExportOptions,
    progress: Option<ProgressCallback>,
}

impl ExportRenderer {
    pub fn new(options: ExportOptions) -> Self {
        Self {
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Render `timeline` from `source` with a fresh GStreamer encoder sized
    /// to the source.
    pub async fn render(
        &self,
        source: &mut dyn SeekableSource,
        timeline: &VirtualTimeline,
    ) -> DuocastResult<ExportReport> {
        let config = EncoderConfig {
            width: source.native_width(),
            height: source.native_height(),
            fps: self.options.fps,
            sample_rate: source.audio_sample_rate().unwrap_or(FALLBACK_SAMPLE_RATE),
            chunk_interval_ms: self.options.chunk_interval_ms,
        };
        let mut encoder = GstChunkEncoder::new(config)?;
        self.render_with(source, timeline, &mut encoder).await
    }

    /// Render into a caller-supplied encoder. The encoder must be freshly
    /// created and sized to the source.
    pub async fn render_with(
        &self,
        source: &mut dyn SeekableSource,
        timeline: &VirtualTimeline,
        encoder: &mut dyn StreamEncoder,
    ) -> DuocastResult<ExportReport> {
        let fps = self.options.fps;
        if fps == 0 {
            return Err(DuocastError::export("export frame rate must be positive"));
        }
        let plan = timeline.frame_plan(fps);
        let total_frames: u64 = plan.iter().map(|segment| segment.frames).sum();
        if total_frames == 0 {
            return Err(DuocastError::export(format!(
                "timeline of {:.3}s yields no frames at {fps}fps",
                timeline.total_duration_secs()
            )));
        }

        let (width, height) = (source.native_width(), source.native_height());
        let sample_rate = source.audio_sample_rate().unwrap_or(FALLBACK_SAMPLE_RATE);
        tracing::info!(
            segments = plan.len(),
            total_frames,
            fps,
            width,
            height,
            duration_secs = timeline.total_duration_secs(),
            "Starting export"
        );
        self.report(0, total_frames, ExportStage::Preparing);

        let mut surface = CompositingSurface::new(width, height);
        let full = Rect::new(0, 0, width, height);
        let mut audio = Vec::new();
        let mut frames_rendered = 0u64;
        let mut frames_per_segment = Vec::with_capacity(plan.len());

        encoder.start()?;

        for segment in &plan {
            tracing::debug!(
                segment = segment.segment_index,
                start_secs = ns_to_secs(segment.source_start_ns),
                end_secs = ns_to_secs(segment.source_end_ns),
                frames = segment.frames,
                "Rendering segment"
            );
            for index in 0..segment.frames {
                let target = segment.source_time_secs(index);
                self.seek(source, target).await?;

                let frame = source.current_frame().ok_or_else(|| {
                    DuocastError::export(format!("no frame available at {target:.3}s"))
                })?;
                surface.clear();
                surface.draw_cover(&frame, full)?;
                encoder.push_video(&surface)?;

                // Audio for output frame k spans samples
                // [k * rate / fps, (k + 1) * rate / fps).
                let from = frames_rendered * sample_rate as u64 / fps as u64;
                let to = (frames_rendered + 1) * sample_rate as u64 / fps as u64;
                audio.resize((to - from) as usize, 0.0);
                source.read_audio(target, &mut audio);
                encoder.push_audio(&audio)?;

                frames_rendered += 1;
                self.report(frames_rendered, total_frames, ExportStage::Rendering);
            }
            frames_per_segment.push(segment.frames);
        }

        self.report(frames_rendered, total_frames, ExportStage::Finalizing);
        let trailing =
            (self.options.trailing_buffer.as_millis() as u64 * sample_rate as u64 / 1000) as usize;
        if trailing > 0 {
            encoder.push_audio(&vec![0.0; trailing])?;
        }
        let chunks = encoder.stop()?;
        let stats = encoder.stats();
        let buffer = assemble_chunks(chunks);

        tracing::info!(
            frames = frames_rendered,
            bytes = buffer.len(),
            chunks = stats.chunks_emitted,
            dropped = stats.chunks_dropped,
            "Export complete"
        );
        self.report(frames_rendered, total_frames, ExportStage::Complete);

        Ok(ExportReport {
            buffer,
            width,
            height,
            fps,
            frames_per_segment,
            frames_rendered,
            chunks_dropped: stats.chunks_dropped,
        })
    }

    async fn seek(&self, source: &mut dyn SeekableSource, target: f64) -> DuocastResult<()> {
        match tokio::time::timeout(self.options.seek_timeout, source.seek(target)).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.options.seek_timeout.as_millis() as u64;
                tracing::error!(target_secs = target, timeout_ms, "Seek did not complete");
                Err(DuocastError::SeekTimeout {
                    target_secs: target,
                    timeout_ms,
                })
            }
        }
    }

    fn report(&self, frames_rendered: u64, total_frames: u64, stage: ExportStage) {
        if let Some(callback) = &self.progress {
            let progress = if total_frames == 0 {
                0.0
            } else {
                frames_rendered as f64 / total_frames as f64
            };
            callback(ExportProgress {
                progress,
                frames_rendered,
                total_frames,
                stage,
            });
        }
    }
}

/// Turn an export into a new session derived from `source_session` and
/// hand it to `store`. The source session is left untouched.
pub fn export_session(
    store: &mut dyn RecordStore,
    source_session: &RecordingSession,
    report: ExportReport,
) -> DuocastResult<RecordingSession> {
    let quality = Quality::new(Resolution::new(report.width, report.height), report.fps);
    let duration_secs = report.duration_secs().floor() as u64;
    let session = source_session.derive_edit(duration_secs, report.buffer, quality);
    store
        .put(session.clone())
        .map_err(|e| DuocastError::store(e.to_string()))?;
    tracing::info!(
        id = %session.id,
        derived_from = %source_session.id,
        duration_secs,
        "Exported session stored"
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use duocast_platform_core::frame::VideoFrame;

    use crate::memory::{MemoryEncoder, MemoryTape};
    use crate::pipeline::media_runtime_available;
    use crate::playback::RecordingPlayback;

    /// Shows a frame whose red channel encodes the seek target in 10ms
    /// steps, and records every seek.
    struct StampSource {
        size: (u32, u32),
        seeks: Arc<Mutex<Vec<f64>>>,
        current: Option<Arc<VideoFrame>>,
    }

    impl StampSource {
        fn new(width: u32, height: u32) -> Self {
            Self {
                size: (width, height),
                seeks: Arc::new(Mutex::new(Vec::new())),
                current: None,
            }
        }
    }

    #[async_trait]
    impl SeekableSource for StampSource {
        fn native_width(&self) -> u32 {
            self.size.0
        }

        fn native_height(&self) -> u32 {
            self.size.1
        }

        fn duration_secs(&self) -> f64 {
            2.0
        }

        async fn seek(&mut self, secs: f64) -> DuocastResult<()> {
            self.seeks.lock().unwrap().push(secs);
            let stamp = ((secs * 100.0).round() as u64 % 256) as u8;
            let (width, height) = self.size;
            self.current = Some(Arc::new(VideoFrame::solid(width, height, [stamp, 0, 0, 255])));
            Ok(())
        }

        fn current_frame(&self) -> Option<Arc<VideoFrame>> {
            self.current.clone()
        }
    }

    struct StalledSource;

    #[async_trait]
    impl SeekableSource for StalledSource {
        fn native_width(&self) -> u32 {
            4
        }

        fn native_height(&self) -> u32 {
            2
        }

        fn duration_secs(&self) -> f64 {
            2.0
        }

        async fn seek(&mut self, _secs: f64) -> DuocastResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn current_frame(&self) -> Option<Arc<VideoFrame>> {
            None
        }
    }

    fn options() -> ExportOptions {
        ExportOptions {
            fps: 10,
            seek_timeout: Duration::from_millis(50),
            trailing_buffer: Duration::from_millis(100),
            chunk_interval_ms: 500,
        }
    }

    fn memory_encoder(tape: &MemoryTape, width: u32, height: u32) -> MemoryEncoder {
        MemoryEncoder::new(
            EncoderConfig {
                width,
                height,
                fps: 10,
                sample_rate: FALLBACK_SAMPLE_RATE,
                chunk_interval_ms: 500,
            },
            tape.clone(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn renders_reordered_segments_in_timeline_order() {
        let mut timeline = VirtualTimeline::new(2.0).unwrap();
        assert!(timeline.split(0.5).is_applied());
        assert!(timeline
            .move_segment(1, duocast_project_model::timeline::MoveDirection::Earlier)
            .is_applied());

        let mut source = StampSource::new(4, 2);
        let seeks = Arc::clone(&source.seeks);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let renderer = ExportRenderer::new(options())
            .with_progress(Box::new(move |p| sink.lock().unwrap().push(p)));

        let tape = MemoryTape::new();
        let mut encoder = memory_encoder(&tape, 4, 2);
        let report = renderer
            .render_with(&mut source, &timeline, &mut encoder)
            .await
            .unwrap();
        assert_eq!(report.frames_per_segment, vec![15, 5]);
        assert_eq!(report.frames_rendered, 20);
        assert_eq!(report.buffer.len(), 20 * 4 * 2 * 4);

        let seeks = seeks.lock().unwrap();
        assert_eq!(seeks.len(), 20);
        assert_eq!(seeks[0], 0.5);
        assert_eq!(seeks[14], 1.9);
        assert_eq!(seeks[15], 0.0);
        assert_eq!(seeks[19], 0.4);

        assert_eq!(tape.frame_count(), 20);
        assert_eq!(tape.frame(0).unwrap().pixel(0, 0), Some([50, 0, 0, 255]));
        assert_eq!(tape.frame(15).unwrap().pixel(0, 0), Some([0, 0, 0, 255]));
        // 20 frames of audio at 48kHz/10fps plus 100ms of trailing silence.
        assert_eq!(tape.audio().len(), 20 * 4_800 + 4_800);

        let events = events.lock().unwrap();
        assert_eq!(events.first().unwrap().stage, ExportStage::Preparing);
        assert_eq!(events.last().unwrap().stage, ExportStage::Complete);
        assert_eq!(events.last().unwrap().progress, 1.0);
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
    }

    #[tokio::test]
    async fn stalled_seek_times_out() {
        let timeline = VirtualTimeline::new(1.0).unwrap();
        let renderer = ExportRenderer::new(options());
        let mut encoder = memory_encoder(&MemoryTape::new(), 4, 2);
        let err = renderer
            .render_with(&mut StalledSource, &timeline, &mut encoder)
            .await
            .unwrap_err();
        match err {
            DuocastError::SeekTimeout {
                target_secs,
                timeout_ms,
            } => {
                assert_eq!(target_secs, 0.0);
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("expected seek timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeline_shorter_than_a_frame_is_rejected() {
        let timeline = VirtualTimeline::new(0.05).unwrap();
        let mut source = StampSource::new(4, 2);
        let mut encoder = memory_encoder(&MemoryTape::new(), 4, 2);
        let err = ExportRenderer::new(options())
            .render_with(&mut source, &timeline, &mut encoder)
            .await
            .unwrap_err();
        assert!(matches!(err, DuocastError::Export { .. }));
    }

    #[tokio::test]
    async fn odd_sized_source_cannot_use_the_default_encoder() {
        let timeline = VirtualTimeline::new(1.0).unwrap();
        let mut source = StampSource::new(5, 3);
        let err = ExportRenderer::new(options())
            .render(&mut source, &timeline)
            .await
            .unwrap_err();
        assert!(matches!(err, DuocastError::Unsupported { .. }));
        assert!(source.seeks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_encoder_output_plays_back() {
        if !media_runtime_available() {
            eprintln!("skipping: GStreamer plugins unavailable");
            return;
        }
        let timeline = VirtualTimeline::new(2.0).unwrap();
        let mut source = StampSource::new(64, 36);
        let report = ExportRenderer::new(options())
            .render(&mut source, &timeline)
            .await
            .unwrap();
        assert_eq!(report.frames_rendered, 20);

        let playback = RecordingPlayback::from_bytes(&report.buffer).unwrap();
        assert_eq!(playback.frame_count(), 20);
        assert_eq!(playback.audio_sample_rate(), Some(FALLBACK_SAMPLE_RATE));
        assert_eq!(playback.audio_len(), 20 * 4_800 + 4_800);
    }
}
