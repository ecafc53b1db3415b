//! Recording state machine.
//!
//! ```text
//! Idle ──start──▶ Starting ──▶ Recording ◀──resume── Paused
//!  ▲                 │            │  └────pause────▶   │
//!  └──── failure ────┘            └──stop──▶ Stopping ◀┘
//!                                              │
//!  ◀───────────────────────────────────────────┘
//! ```
//!
//! Pausing suspends ticks, encoder emission and elapsed-time accounting
//! but keeps every capture source open. Only `stop` (or a failed start)
//! releases sources.

use duocast_common::clock::{DriftMeasurement, ElapsedTimer, RecordingClock};
use duocast_common::config::{RecordingDefaults, ScreenLossPolicy};
use duocast_common::error::{DuocastError, DuocastResult};
use duocast_platform_core::audio::AudioSignal;
use duocast_platform_core::device::{DeviceProvider, DeviceRef};
use duocast_platform_core::source::CaptureSource;
use duocast_project_model::layout::{
    Layout, OverlayCircleParams, OverlayPosition, Quality, Resolution,
};
use duocast_project_model::session::RecordingSession;
use duocast_render_engine::compositor::{Compositor, CompositorState, TickReport};
use duocast_render_engine::encoder::{
    assemble_chunks, EncodedChunk, EncoderConfig, EncoderFactory, EncoderStats, StreamEncoder,
};
use duocast_render_engine::pipeline::GstChunkEncoder;

use crate::audio::{AudioMixer, MixedTrack, SummingMixer};
use crate::scheduler::Scheduler;

/// Drift between the audio and video tracks above which a warning is
/// logged at stop.
const DRIFT_WARN_MS: f64 = 100.0;

/// Recorder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    /// Acquiring devices and building the pipeline.
    Starting,
    Recording,
    Paused,
    /// Flushing the encoder and releasing devices.
    Stopping,
}

/// Everything needed to begin a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub layout: Layout,
    pub quality: Quality,
    pub use_camera: bool,
    pub camera_device: DeviceRef,
    pub mic_device: DeviceRef,
    /// Ask the screen share for its audio track too.
    pub capture_system_audio: bool,
}

impl StartRequest {
    pub fn new(layout: Layout, quality: Quality) -> Self {
        Self {
            layout,
            quality,
            use_camera: true,
            camera_device: DeviceRef::Default,
            mic_device: DeviceRef::Default,
            capture_system_audio: false,
        }
    }

    /// Overlay-circle request sized from configuration.
    pub fn from_defaults(defaults: &RecordingDefaults) -> Self {
        let layout = Layout::OverlayCircle(OverlayCircleParams {
            diameter: defaults.overlay_diameter,
            ..OverlayCircleParams::default()
        });
        let quality = Quality::new(
            Resolution::new(defaults.width, defaults.height),
            defaults.fps,
        );
        Self::new(layout, quality)
    }

    pub fn without_camera(mut self) -> Self {
        self.use_camera = false;
        self
    }

    pub fn with_system_audio(mut self) -> Self {
        self.capture_system_audio = true;
        self
    }
}

/// Controller settings that outlive individual recordings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerOptions {
    pub chunk_interval_ms: u32,
    pub audio_sample_rate: u32,
    /// Overlay position each recording starts with.
    pub initial_overlay_position: OverlayPosition,
    pub screen_loss_policy: ScreenLossPolicy,
}

impl ControllerOptions {
    pub fn from_defaults(defaults: &RecordingDefaults) -> Self {
        Self {
            chunk_interval_ms: defaults.chunk_interval_ms,
            audio_sample_rate: defaults.audio_sample_rate,
            initial_overlay_position: OverlayPosition::new(
                defaults.overlay_x_percent,
                defaults.overlay_y_percent,
            ),
            screen_loss_policy: defaults.screen_loss_policy,
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_defaults(&RecordingDefaults::default())
    }
}

/// Output of a stopped recording.
#[derive(Debug, Clone)]
pub struct FinishedRecording {
    /// All emitted chunks, concatenated. Empty if nothing was encoded.
    pub buffer: Vec<u8>,
    /// Media time recorded while not paused.
    pub elapsed_secs: f64,
    pub overlay_position: OverlayPosition,
    pub layout: Layout,
    pub quality: Quality,
    pub stats: EncoderStats,
    /// Set when the recording ended because the screen feed was lost.
    pub auto_stopped: bool,
}

impl FinishedRecording {
    /// Whole seconds, rounded down.
    pub fn duration_secs(&self) -> u64 {
        self.elapsed_secs.floor() as u64
    }

    pub fn into_session(self) -> RecordingSession {
        RecordingSession::new(
            self.layout,
            self.quality,
            self.duration_secs(),
            self.buffer,
            self.overlay_position,
        )
    }
}

/// Handles acquired so far during `start`.
#[derive(Default)]
struct Acquired {
    screen: Option<Box<dyn CaptureSource>>,
    camera: Option<Box<dyn CaptureSource>>,
    audio: Vec<Box<dyn AudioSignal>>,
}

impl Acquired {
    fn release(&mut self) {
        if let Some(screen) = self.screen.as_mut() {
            screen.release();
        }
        if let Some(camera) = self.camera.as_mut() {
            camera.release();
        }
        for signal in &mut self.audio {
            signal.release();
        }
        self.screen = None;
        self.camera = None;
        self.audio.clear();
    }
}

/// A start in flight. If the `start` future is dropped before it settles,
/// the controller goes back to `Idle` and everything acquired is released.
struct PendingStart<'a> {
    state: &'a mut RecorderState,
    acquired: Acquired,
}

impl PendingStart<'_> {
    fn settle(mut self, state: RecorderState) {
        self.acquired.release();
        *self.state = state;
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if *self.state == RecorderState::Starting {
            tracing::warn!("Start abandoned before devices were ready; releasing");
            self.acquired.release();
            *self.state = RecorderState::Idle;
        }
    }
}

/// The pipeline of one running recording.
struct ActiveRecording {
    request: StartRequest,
    compositor_state: CompositorState,
    compositor: Compositor,
    screen: Box<dyn CaptureSource>,
    camera: Option<Box<dyn CaptureSource>>,
    mixer: SummingMixer,
    track: MixedTrack,
    encoder: Box<dyn StreamEncoder>,
    timer: ElapsedTimer,
    clock: RecordingClock,
    chunks: Vec<EncodedChunk>,
    audio_buffer: Vec<f32>,
    audio_samples: u64,
    sample_rate: u32,
    last_tick: Option<TickReport>,
    screen_loss_logged: bool,
}

impl ActiveRecording {
    fn tick(&mut self) -> DuocastResult<()> {
        let report = self.compositor.render_tick(
            &self.compositor_state,
            Some(self.screen.as_ref()),
            self.camera.as_deref(),
        );
        self.encoder.push_video(self.compositor.surface())?;

        // The mix is pulled in tick-sized blocks so the audio track keeps
        // pace with the frame count: tick k covers samples
        // [k * rate / fps, (k + 1) * rate / fps).
        let fps = self.compositor_state.target_fps.max(1) as u64;
        let tick = self.timer.ticks();
        let to = (tick + 1) * self.sample_rate as u64 / fps;
        let count = (to - self.audio_samples) as usize;
        self.audio_buffer.resize(count, 0.0);
        self.track.pull(&mut self.audio_buffer);
        self.encoder.push_audio(&self.audio_buffer)?;
        self.audio_samples = to;

        self.timer.advance(1);
        self.chunks.extend(self.encoder.drain_chunks());
        self.last_tick = Some(report);
        Ok(())
    }

    fn release(&mut self) {
        self.screen.release();
        if let Some(camera) = self.camera.as_mut() {
            camera.release();
        }
        self.mixer.teardown();
    }

    fn log_drift(&self) {
        let stats = self.encoder.stats();
        let fps = self.compositor_state.target_fps.max(1) as u128;
        let rate = self.sample_rate.max(1) as u128;
        let measurement = DriftMeasurement {
            reference_ns: (stats.frames_encoded as u128 * 1_000_000_000 / fps) as u64,
            measured_ns: (stats.audio_samples_encoded as u128 * 1_000_000_000 / rate) as u64,
        };
        let drift_ms = measurement.drift_ms();
        if measurement.exceeds_threshold_ms(DRIFT_WARN_MS) {
            tracing::warn!(drift_ms, "Audio/video drift exceeds 100ms");
        } else {
            tracing::debug!(drift_ms, "Audio/video drift within threshold");
        }
    }
}

impl Drop for ActiveRecording {
    fn drop(&mut self) {
        self.release();
    }
}

/// Acquire screen, camera and microphone in order, then bring up the
/// encoder. Handles land in `acquired` as they arrive so a failure (or a
/// dropped future) can release them.
async fn build(
    provider: &mut dyn DeviceProvider,
    options: &ControllerOptions,
    encoder_factory: &EncoderFactory,
    request: &StartRequest,
    acquired: &mut Acquired,
) -> DuocastResult<ActiveRecording> {
    let screen = provider.acquire_screen(request.capture_system_audio).await?;
    tracing::debug!(
        width = screen.video.native_width(),
        height = screen.video.native_height(),
        system_audio = screen.audio.is_some(),
        "Screen acquired"
    );
    acquired.screen = Some(screen.video);
    acquired.audio.extend(screen.audio);

    if request.use_camera {
        let camera = provider.acquire_camera(&request.camera_device).await?;
        tracing::debug!(
            width = camera.native_width(),
            height = camera.native_height(),
            "Camera acquired"
        );
        acquired.camera = Some(camera);
    }

    let mic = provider.acquire_microphone(&request.mic_device).await?;
    tracing::debug!(rate = mic.sample_rate(), "Microphone acquired");
    acquired.audio.insert(0, mic);

    let compositor_state = CompositorState::new(
        request.quality,
        request.layout,
        options.initial_overlay_position,
    );
    let mut encoder = encoder_factory(EncoderConfig {
        width: compositor_state.target_width,
        height: compositor_state.target_height,
        fps: compositor_state.target_fps,
        sample_rate: options.audio_sample_rate,
        chunk_interval_ms: options.chunk_interval_ms,
    })?;
    encoder.start()?;

    let screen = acquired
        .screen
        .take()
        .ok_or_else(|| DuocastError::render("screen handle missing after acquisition"))?;
    let camera = acquired.camera.take();

    let mut mixer = SummingMixer::new(options.audio_sample_rate);
    for signal in acquired.audio.drain(..) {
        mixer.connect_input(signal);
    }
    let track = mixer.output_track();

    Ok(ActiveRecording {
        request: request.clone(),
        compositor: Compositor::new(&compositor_state),
        compositor_state,
        screen,
        camera,
        mixer,
        track,
        encoder,
        timer: ElapsedTimer::new(request.quality.fps),
        clock: RecordingClock::start(),
        chunks: Vec::new(),
        audio_buffer: Vec::new(),
        audio_samples: 0,
        sample_rate: options.audio_sample_rate,
        last_tick: None,
        screen_loss_logged: false,
    })
}

/// Orchestrates sources, compositor, mixer and encoder for live recording.
pub struct RecordingController {
    provider: Box<dyn DeviceProvider>,
    scheduler: Box<dyn Scheduler>,
    options: ControllerOptions,
    encoder_factory: EncoderFactory,
    state: RecorderState,
    overlay_position: OverlayPosition,
    active: Option<ActiveRecording>,
}

impl RecordingController {
    pub fn new(
        provider: Box<dyn DeviceProvider>,
        scheduler: Box<dyn Scheduler>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            provider,
            scheduler,
            options,
            encoder_factory: Box::new(GstChunkEncoder::boxed),
            state: RecorderState::Idle,
            overlay_position: options.initial_overlay_position,
            active: None,
        }
    }

    /// Replace the encoder used for new recordings.
    pub fn with_encoder_factory(mut self, factory: EncoderFactory) -> Self {
        self.encoder_factory = factory;
        self
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Current overlay position (the last recording's, when idle).
    pub fn overlay_position(&self) -> OverlayPosition {
        self.overlay_position
    }

    /// Media time recorded so far, excluding pauses.
    pub fn elapsed_secs(&self) -> f64 {
        self.active
            .as_ref()
            .map(|active| active.timer.elapsed_secs())
            .unwrap_or(0.0)
    }

    /// Wall-clock time since the recording started, including pauses.
    pub fn wall_secs(&self) -> f64 {
        self.active
            .as_ref()
            .map(|active| active.clock.elapsed_secs())
            .unwrap_or(0.0)
    }

    pub fn encoder_stats(&self) -> Option<EncoderStats> {
        self.active.as_ref().map(|active| active.encoder.stats())
    }

    pub fn last_tick(&self) -> Option<TickReport> {
        self.active.as_ref().and_then(|active| active.last_tick)
    }

    /// Acquire devices and begin recording.
    ///
    /// Any failure returns the controller to `Idle` with every handle
    /// acquired so far released.
    pub async fn start(&mut self, request: StartRequest) -> DuocastResult<()> {
        if self.state != RecorderState::Idle {
            return Err(DuocastError::invalid_state("start", self.state));
        }
        self.state = RecorderState::Starting;
        tracing::info!(
            layout = ?request.layout.kind(),
            resolution = %request.quality.resolution.label(),
            fps = request.quality.fps,
            camera = request.use_camera,
            system_audio = request.capture_system_audio,
            "Starting recording"
        );

        let mut pending = PendingStart {
            state: &mut self.state,
            acquired: Acquired::default(),
        };
        let built = build(
            self.provider.as_mut(),
            &self.options,
            &self.encoder_factory,
            &request,
            &mut pending.acquired,
        )
        .await;

        match built {
            Ok(active) => {
                pending.settle(RecorderState::Recording);
                self.scheduler.schedule(active.compositor_state.tick_interval());
                self.overlay_position = active.compositor_state.overlay_position;
                self.active = Some(active);
                tracing::info!("Recording started");
                Ok(())
            }
            Err(e) => {
                pending.settle(RecorderState::Idle);
                if e.is_acquisition() {
                    tracing::warn!(error = %e, "Device acquisition failed, start aborted");
                } else {
                    tracing::error!(error = %e, "Recording failed to start");
                }
                Err(e)
            }
        }
    }

    /// Run every tick that has come due.
    ///
    /// Returns the finished recording if the screen feed ended and the
    /// policy is [`ScreenLossPolicy::AutoStop`].
    pub fn pump(&mut self) -> DuocastResult<Option<FinishedRecording>> {
        if self.state != RecorderState::Recording {
            return Ok(None);
        }
        let due = self.scheduler.due_ticks();
        for _ in 0..due {
            if self.screen_lost() {
                match self.options.screen_loss_policy {
                    ScreenLossPolicy::AutoStop => {
                        tracing::info!("Screen feed ended, stopping recording");
                        return self.finish(true).map(Some);
                    }
                    ScreenLossPolicy::KeepSampling => {
                        if let Some(active) = self.active.as_mut() {
                            if !active.screen_loss_logged {
                                active.screen_loss_logged = true;
                                tracing::warn!(
                                    "Screen feed ended, recording continues with the last frame"
                                );
                            }
                        }
                    }
                }
            }
            if let Some(active) = self.active.as_mut() {
                active.tick()?;
            }
        }
        Ok(None)
    }

    fn screen_lost(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.screen.is_live())
            .unwrap_or(false)
    }

    pub fn pause(&mut self) -> DuocastResult<()> {
        if self.state != RecorderState::Recording {
            return Err(DuocastError::invalid_state("pause", self.state));
        }
        let active = self.active_mut("pause")?;
        active.encoder.pause();
        active.timer.pause();
        self.scheduler.cancel();
        self.state = RecorderState::Paused;
        tracing::info!(elapsed_secs = self.elapsed_secs(), "Recording paused");
        Ok(())
    }

    pub fn resume(&mut self) -> DuocastResult<()> {
        if self.state != RecorderState::Paused {
            return Err(DuocastError::invalid_state("resume", self.state));
        }
        let active = self.active_mut("resume")?;
        active.encoder.resume();
        active.timer.resume();
        let interval = active.compositor_state.tick_interval();
        self.scheduler.schedule(interval);
        self.state = RecorderState::Recording;
        tracing::info!(elapsed_secs = self.elapsed_secs(), "Recording resumed");
        Ok(())
    }

    /// Move the camera bubble; visible on the next tick. Both axes are
    /// clamped to `[0, 100]`.
    pub fn update_overlay_position(&mut self, x_percent: f64, y_percent: f64) -> DuocastResult<()> {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Paused) {
            return Err(DuocastError::invalid_state("update overlay", self.state));
        }
        let active = self.active_mut("update overlay")?;
        active
            .compositor_state
            .set_overlay_position(x_percent, y_percent);
        let position = active.compositor_state.overlay_position;
        self.overlay_position = position;
        tracing::debug!(
            x = self.overlay_position.x(),
            y = self.overlay_position.y(),
            "Overlay moved"
        );
        Ok(())
    }

    /// Switch layouts mid-recording; the next tick draws the new one.
    pub fn set_layout(&mut self, layout: Layout) -> DuocastResult<()> {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Paused) {
            return Err(DuocastError::invalid_state("set layout", self.state));
        }
        let active = self.active_mut("set layout")?;
        let from = active.compositor_state.layout.kind();
        active.compositor_state.layout = layout;
        tracing::info!(?from, to = ?layout.kind(), "Layout switched");
        Ok(())
    }

    /// Finalize the encoder, release every device and return the output.
    pub fn stop(&mut self) -> DuocastResult<FinishedRecording> {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Paused) {
            return Err(DuocastError::invalid_state("stop", self.state));
        }
        self.finish(false)
    }

    fn finish(&mut self, auto_stopped: bool) -> DuocastResult<FinishedRecording> {
        self.state = RecorderState::Stopping;
        self.scheduler.cancel();

        let Some(mut active) = self.active.take() else {
            self.state = RecorderState::Idle;
            return Err(DuocastError::invalid_state("stop", "no active recording"));
        };

        let flushed = active.encoder.stop();
        active.release();
        self.state = RecorderState::Idle;

        let mut chunks = std::mem::take(&mut active.chunks);
        chunks.extend(flushed?);
        let stats = active.encoder.stats();
        active.log_drift();

        let finished = FinishedRecording {
            buffer: assemble_chunks(chunks),
            elapsed_secs: active.timer.elapsed_secs(),
            overlay_position: active.compositor_state.overlay_position,
            layout: active.compositor_state.layout,
            quality: active.request.quality,
            stats,
            auto_stopped,
        };
        tracing::info!(
            elapsed_secs = finished.elapsed_secs,
            wall_secs = active.clock.elapsed_secs(),
            frames = stats.frames_encoded,
            chunks = stats.chunks_emitted,
            dropped = stats.chunks_dropped,
            bytes = finished.buffer.len(),
            auto_stopped,
            "Recording stopped"
        );
        Ok(finished)
    }

    /// Sleep until the scheduler reports its next tick. Returns at once
    /// when nothing is scheduled or the scheduler cannot tell.
    pub async fn wait_for_tick(&self) {
        if let Some(delay) = self.scheduler.time_until_next_tick() {
            tokio::time::sleep(delay).await;
        }
    }

    fn active_mut(&mut self, operation: &str) -> DuocastResult<&mut ActiveRecording> {
        let state = self.state;
        self.active
            .as_mut()
            .ok_or_else(|| DuocastError::invalid_state(operation, state))
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if self.active.is_some() {
            tracing::warn!(
                state = ?self.state,
                "Controller dropped mid-recording; releasing devices"
            );
        }
    }
}
