//! Seekable playback of a finished recording.
//!
//! The recording buffer is served to `decodebin` through a random-access
//! `appsrc`. Construction runs one full decode pass to learn the frame
//! count and to keep the (small) mono audio track in memory. Video is then
//! decoded on demand: every seek is a flushing, accurate seek on a paused
//! pipeline, and completes when the pipeline reports `AsyncDone` with the
//! target frame prerolled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duocast_common::error::{DuocastError, DuocastResult};
use duocast_platform_core::frame::VideoFrame;
use duocast_platform_core::source::SeekableSource;
use duocast_project_model::session::RecordingSession;
use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_audio as gst_audio;
use gstreamer_video as gst_video;
use gst_video::prelude::*;
use parking_lot::Mutex;

use crate::memory::copy_audio;
use crate::pipeline::{init_gstreamer, wait_on_bus};

/// Bytes handed to the demuxer per request when it does not ask for a size.
const READ_BLOCK: usize = 64 * 1024;
const SCAN_TIMEOUT: Duration = Duration::from_secs(60);
const PREROLL_TIMEOUT: Duration = Duration::from_secs(10);

fn render_error(msg: String) -> DuocastError {
    DuocastError::render(msg)
}

fn make(factory: &str) -> DuocastResult<gst::Element> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|_| DuocastError::render(format!("Failed to create {factory} element")))
}

/// `appsrc` serving `data` in random-access mode, so the demuxer can seek
/// within the buffer.
fn buffer_source(data: Arc<Vec<u8>>) -> gst_app::AppSrc {
    let src = gst_app::AppSrc::builder()
        .stream_type(gst_app::AppStreamType::RandomAccess)
        .format(gst::Format::Bytes)
        .build();
    src.set_size(data.len() as i64);

    let offset = Arc::new(Mutex::new(0usize));
    let seek_offset = Arc::clone(&offset);
    src.set_callbacks(
        gst_app::AppSrcCallbacks::builder()
            .need_data(move |src, length| {
                let mut offset = offset.lock();
                let start = (*offset).min(data.len());
                if start == data.len() {
                    let _ = src.end_of_stream();
                    return;
                }
                let want = match length {
                    0 | u32::MAX => READ_BLOCK,
                    n => n as usize,
                };
                let end = (start + want).min(data.len());
                let mut buffer = gst::Buffer::from_slice(data[start..end].to_vec());
                if let Some(buffer) = buffer.get_mut() {
                    buffer.set_offset(start as u64);
                }
                *offset = end;
                let _ = src.push_buffer(buffer);
            })
            .seek_data(move |_src, target| {
                *seek_offset.lock() = target as usize;
                true
            })
            .build(),
    );
    src
}

/// `appsrc ! decodebin` in a fresh pipeline. Decoded pads are linked to
/// `video` or `audio` as they appear; a kind with no stream is never added.
fn decode_pipeline(
    data: Arc<Vec<u8>>,
    video: Vec<gst::Element>,
    audio: Vec<gst::Element>,
) -> DuocastResult<gst::Pipeline> {
    let pipeline = gst::Pipeline::new();
    let src = buffer_source(data);
    let decode = make("decodebin")?;
    pipeline
        .add_many([src.upcast_ref(), &decode])
        .map_err(|e| DuocastError::render(format!("Failed to assemble decoder: {e}")))?;
    src.link(&decode)
        .map_err(|e| DuocastError::render(format!("Failed to link decoder: {e}")))?;

    let weak = pipeline.downgrade();
    decode.connect_pad_added(move |_, pad| {
        let Some(pipeline) = weak.upgrade() else {
            return;
        };
        let Some(caps) = pad.current_caps() else {
            return;
        };
        let Some(structure) = caps.structure(0) else {
            return;
        };
        let chain = if structure.name().starts_with("video/") {
            &video
        } else if structure.name().starts_with("audio/") {
            &audio
        } else {
            return;
        };
        if let Err(e) = link_branch(&pipeline, pad, chain) {
            tracing::warn!(stream = %structure.name(), error = %e, "Decoded stream left unlinked");
        }
    });
    Ok(pipeline)
}

fn link_branch(pipeline: &gst::Pipeline, pad: &gst::Pad, chain: &[gst::Element]) -> Result<(), String> {
    let Some(head) = chain.first() else {
        return Ok(());
    };
    if head.parent().is_some() {
        return Err("a stream of this kind is already linked".into());
    }
    pipeline.add_many(chain).map_err(|e| e.to_string())?;
    gst::Element::link_many(chain).map_err(|e| e.to_string())?;
    for element in chain {
        element.sync_state_with_parent().map_err(|e| e.to_string())?;
    }
    let sink_pad = head.static_pad("sink").ok_or("branch has no sink pad")?;
    pad.link(&sink_pad).map_err(|e| format!("{e:?}"))?;
    Ok(())
}

fn rgba_sink() -> gst_app::AppSink {
    let sink = gst_app::AppSink::builder()
        .caps(
            &gst_video::VideoCapsBuilder::new()
                .format(gst_video::VideoFormat::Rgba)
                .build(),
        )
        .build();
    sink.set_property("sync", false);
    sink
}

/// Copy a decoded RGBA sample into a tightly packed frame.
fn frame_from_sample(sample: &gst::Sample) -> DuocastResult<VideoFrame> {
    let caps = sample
        .caps()
        .ok_or_else(|| DuocastError::render("decoded frame has no caps"))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| DuocastError::render(format!("unreadable frame caps: {e}")))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| DuocastError::render("decoded sample has no buffer"))?;
    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
        .map_err(|e| DuocastError::render(format!("unmappable frame: {e}")))?;
    let data = frame
        .plane_data(0)
        .map_err(|e| DuocastError::render(format!("frame has no pixel plane: {e}")))?;

    let stride = frame.plane_stride()[0] as usize;
    let row = info.width() as usize * 4;
    let mut pixels = Vec::with_capacity(row * info.height() as usize);
    for y in 0..info.height() as usize {
        let line = data
            .get(y * stride..y * stride + row)
            .ok_or_else(|| DuocastError::render(format!("frame row {y} is truncated")))?;
        pixels.extend_from_slice(line);
    }
    VideoFrame::from_rgba(info.width(), info.height(), pixels)
}

#[derive(Debug, Default)]
struct VideoScan {
    frames: u64,
    end_ns: u64,
    width: u32,
    height: u32,
    fps: Option<(i32, i32)>,
}

#[derive(Debug, Default)]
struct AudioScan {
    sample_rate: Option<u32>,
    samples: Vec<f32>,
}

/// Decode the whole recording once, counting frames and keeping audio.
fn scan(data: Arc<Vec<u8>>) -> DuocastResult<(VideoScan, AudioScan)> {
    let video_scan = Arc::new(Mutex::new(VideoScan::default()));
    let audio_scan = Arc::new(Mutex::new(AudioScan::default()));

    let video_sink = rgba_sink();
    let seen = Arc::clone(&video_scan);
    video_sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let mut scan = seen.lock();
                if scan.frames == 0 {
                    if let Some(info) = sample
                        .caps()
                        .and_then(|caps| gst_video::VideoInfo::from_caps(caps).ok())
                    {
                        scan.width = info.width();
                        scan.height = info.height();
                        let fps = info.fps();
                        if fps.numer() > 0 && fps.denom() > 0 {
                            scan.fps = Some((fps.numer(), fps.denom()));
                        }
                    }
                }
                if let Some(buffer) = sample.buffer() {
                    let start = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
                    let length = buffer.duration().map(|t| t.nseconds()).unwrap_or(0);
                    scan.end_ns = scan.end_ns.max(start + length);
                }
                scan.frames += 1;
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    let audio_sink = gst_app::AppSink::builder()
        .caps(
            &gst_audio::AudioCapsBuilder::new_interleaved()
                .format(gst_audio::AudioFormat::F32le)
                .channels(1)
                .build(),
        )
        .build();
    audio_sink.set_property("sync", false);
    let heard = Arc::clone(&audio_scan);
    audio_sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let mut scan = heard.lock();
                if scan.sample_rate.is_none() {
                    scan.sample_rate = sample
                        .caps()
                        .and_then(|caps| gst_audio::AudioInfo::from_caps(caps).ok())
                        .map(|info| info.rate());
                }
                if let Some(map) = sample.buffer().and_then(|b| b.map_readable().ok()) {
                    scan.samples.extend(
                        map.as_slice()
                            .chunks_exact(4)
                            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                    );
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    let pipeline = decode_pipeline(
        data,
        vec![make("videoconvert")?, video_sink.upcast()],
        vec![make("audioconvert")?, audio_sink.upcast()],
    )?;
    let bus = pipeline
        .bus()
        .ok_or_else(|| DuocastError::render("decode pipeline has no bus"))?;
    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| DuocastError::render(format!("Failed to start decode pass: {e:?}")))?;
    let scanned = wait_on_bus(&bus, gst::MessageType::Eos, SCAN_TIMEOUT, render_error);
    let _ = pipeline.set_state(gst::State::Null);
    scanned?;

    let video = std::mem::take(&mut *video_scan.lock());
    let audio = std::mem::take(&mut *audio_scan.lock());
    Ok((video, audio))
}

/// A recording buffer exposed as a [`SeekableSource`].
///
/// Seeking shows the frame on screen at the target instant: the last
/// frame whose timestamp is at or before it.
#[derive(Debug)]
pub struct RecordingPlayback {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
    sink: gst_app::AppSink,
    width: u32,
    height: u32,
    fps: f64,
    frames: u64,
    sample_rate: Option<u32>,
    audio: Arc<Vec<f32>>,
    frame: Option<Arc<VideoFrame>>,
    position: Option<usize>,
}

impl RecordingPlayback {
    pub fn from_bytes(buffer: &[u8]) -> DuocastResult<Self> {
        if buffer.is_empty() {
            return Err(DuocastError::render("recording buffer is empty"));
        }
        init_gstreamer()?;
        let data = Arc::new(buffer.to_vec());

        let (video, audio) = scan(Arc::clone(&data))?;
        if video.frames == 0 {
            return Err(DuocastError::render("recording has no video frames"));
        }
        let fps = match video.fps {
            Some((numer, denom)) => numer as f64 / denom as f64,
            None if video.end_ns > 0 => video.frames as f64 * 1e9 / video.end_ns as f64,
            None => return Err(DuocastError::render("recording has no frame timing")),
        };

        let sink = rgba_sink();
        let silent = make("fakesink")?;
        silent.set_property("sync", false);
        silent.set_property("async", false);
        let pipeline = decode_pipeline(
            data,
            vec![make("videoconvert")?, sink.clone().upcast()],
            vec![silent],
        )?;
        let bus = pipeline
            .bus()
            .ok_or_else(|| DuocastError::render("playback pipeline has no bus"))?;
        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| DuocastError::render(format!("Failed to open recording: {e:?}")))?;
        if let Err(e) = wait_on_bus(&bus, gst::MessageType::AsyncDone, PREROLL_TIMEOUT, render_error) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(e);
        }

        tracing::debug!(
            width = video.width,
            height = video.height,
            fps,
            frames = video.frames,
            sample_rate = audio.sample_rate,
            audio_samples = audio.samples.len(),
            "Recording loaded for playback"
        );
        Ok(Self {
            pipeline,
            bus,
            sink,
            width: video.width,
            height: video.height,
            fps,
            frames: video.frames,
            sample_rate: audio.sample_rate,
            audio: Arc::new(audio.samples),
            frame: None,
            position: None,
        })
    }

    pub fn from_session(session: &RecordingSession) -> DuocastResult<Self> {
        Self::from_bytes(&session.video_buffer)
    }

    /// Index of the frame shown after the last seek.
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Length of the decoded audio track in samples.
    pub fn audio_len(&self) -> usize {
        self.audio.len()
    }

    /// Seek target for `secs`, kept inside the last frame.
    fn target_ns(&self, secs: f64) -> u64 {
        let last_start = (self.frames - 1) as f64 / self.fps;
        // A microsecond past the target absorbs float rounding at k/fps.
        let secs = (secs.max(0.0) + 1e-6).min(last_start + 1e-6);
        (secs * 1e9).round() as u64
    }
}

#[async_trait]
impl SeekableSource for RecordingPlayback {
    fn native_width(&self) -> u32 {
        self.width
    }

    fn native_height(&self) -> u32 {
        self.height
    }

    fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.fps
    }

    async fn seek(&mut self, secs: f64) -> DuocastResult<()> {
        if !secs.is_finite() {
            return Err(DuocastError::render(format!("cannot seek to {secs}")));
        }
        let target = gst::ClockTime::from_nseconds(self.target_ns(secs));
        self.pipeline
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE, target)
            .map_err(|e| DuocastError::render(format!("seek to {secs:.3}s rejected: {e}")))?;

        let bus = self.bus.clone();
        let sink = self.sink.clone();
        let sample = tokio::task::spawn_blocking(move || {
            wait_on_bus(&bus, gst::MessageType::AsyncDone, PREROLL_TIMEOUT, render_error)?;
            sink.pull_preroll()
                .map_err(|_| DuocastError::render("no frame prerolled after seek"))
        })
        .await
        .map_err(|e| DuocastError::render(format!("seek wait aborted: {e}")))??;

        let frame = frame_from_sample(&sample)?;
        self.position = sample
            .buffer()
            .and_then(|buffer| buffer.pts())
            .map(|pts| (pts.nseconds() as f64 * self.fps / 1e9).round() as usize);
        self.frame = Some(Arc::new(frame));
        Ok(())
    }

    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.frame.clone()
    }

    fn audio_sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    fn read_audio(&self, start_secs: f64, out: &mut [f32]) {
        match self.sample_rate {
            Some(rate) => copy_audio(&self.audio, rate, start_secs, out),
            None => out.fill(0.0),
        }
    }
}

impl Drop for RecordingPlayback {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
