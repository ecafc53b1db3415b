//! Synthetic capture devices.
//!
//! Deterministic stand-ins for real screens, cameras, and microphones.
//! Used by the test suites of every crate and handy for headless demos.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use duocast_common::error::{AcquisitionFailure, DuocastError, DuocastResult};

use crate::audio::AudioSignal;
use crate::device::{AcquiredScreen, DeviceProvider, DeviceRef};
use crate::frame::{Rgba, VideoFrame};
use crate::source::{CaptureSource, SourceKind};

/// Counts live handles; decremented when the handle is released or dropped.
#[derive(Debug)]
struct HeldToken {
    held: Arc<AtomicUsize>,
}

impl HeldToken {
    fn new(held: &Arc<AtomicUsize>) -> Self {
        held.fetch_add(1, Ordering::SeqCst);
        Self {
            held: Arc::clone(held),
        }
    }
}

impl Drop for HeldToken {
    fn drop(&mut self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Remote control for a synthetic video source.
#[derive(Debug, Clone)]
pub struct SyntheticControl {
    ready: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
}

impl SyntheticControl {
    fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Simulate the platform ending the feed ("stop sharing").
    pub fn end_feed(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// A video feed that always shows the same frame.
pub struct SyntheticVideoSource {
    kind: SourceKind,
    frame: Arc<VideoFrame>,
    control: SyntheticControl,
    token: Option<HeldToken>,
}

impl SyntheticVideoSource {
    /// A free-standing source filled with `color`.
    pub fn solid(kind: SourceKind, width: u32, height: u32, color: Rgba) -> Self {
        Self::with_frame(kind, VideoFrame::solid(width, height, color))
    }

    /// A free-standing source showing `frame`.
    pub fn with_frame(kind: SourceKind, frame: VideoFrame) -> Self {
        Self {
            kind,
            frame: Arc::new(frame),
            control: SyntheticControl::new(),
            token: None,
        }
    }

    /// Handle for toggling readiness/liveness after the source is boxed.
    pub fn control(&self) -> SyntheticControl {
        self.control.clone()
    }

    fn held(mut self, held: &Arc<AtomicUsize>, control: SyntheticControl) -> Self {
        self.token = Some(HeldToken::new(held));
        self.control = control;
        self
    }
}

impl CaptureSource for SyntheticVideoSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn is_ready(&self) -> bool {
        self.control.ready.load(Ordering::SeqCst) && !self.frame.is_empty()
    }

    fn native_width(&self) -> u32 {
        self.frame.width()
    }

    fn native_height(&self) -> u32 {
        self.frame.height()
    }

    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        Some(Arc::clone(&self.frame))
    }

    fn is_live(&self) -> bool {
        self.control.live.load(Ordering::SeqCst)
    }

    fn release(&mut self) {
        self.token = None;
    }
}

/// An audio feed emitting one constant sample value.
pub struct ConstantSignal {
    sample_rate: u32,
    value: f32,
    label: String,
    token: Option<HeldToken>,
}

impl ConstantSignal {
    pub fn new(label: impl Into<String>, sample_rate: u32, value: f32) -> Self {
        Self {
            sample_rate,
            value,
            label: label.into(),
            token: None,
        }
    }
}

impl AudioSignal for ConstantSignal {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self, out: &mut [f32]) {
        out.fill(self.value);
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn release(&mut self) {
        self.token = None;
    }
}

/// A sine tone, for checking that mixed audio actually varies.
pub struct ToneSignal {
    sample_rate: u32,
    frequency_hz: f32,
    amplitude: f32,
    phase: f32,
}

impl ToneSignal {
    pub fn new(sample_rate: u32, frequency_hz: f32, amplitude: f32) -> Self {
        Self {
            sample_rate,
            frequency_hz,
            amplitude,
            phase: 0.0,
        }
    }
}

impl AudioSignal for ToneSignal {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self, out: &mut [f32]) {
        let step = std::f32::consts::TAU * self.frequency_hz / self.sample_rate.max(1) as f32;
        for sample in out.iter_mut() {
            *sample = self.phase.sin() * self.amplitude;
            self.phase = (self.phase + step) % std::f32::consts::TAU;
        }
    }

    fn label(&self) -> &str {
        "tone"
    }
}

/// A device provider backed by synthetic sources.
///
/// Every handed-out handle is counted until released, so tests can assert
/// that a failed start leaves nothing held.
pub struct SyntheticDeviceProvider {
    screen_size: (u32, u32),
    camera_size: (u32, u32),
    screen_color: Rgba,
    camera_color: Rgba,
    sample_rate: u32,
    screen_has_audio: bool,
    denials: HashMap<SourceKind, AcquisitionFailure>,
    stalled: HashSet<SourceKind>,
    held: Arc<AtomicUsize>,
    screen_control: SyntheticControl,
    camera_control: SyntheticControl,
}

impl SyntheticDeviceProvider {
    pub const SCREEN_COLOR: Rgba = [30, 90, 200, 255];
    pub const CAMERA_COLOR: Rgba = [220, 60, 40, 255];
    pub const MIC_LEVEL: f32 = 0.25;
    pub const SYSTEM_LEVEL: f32 = 0.125;

    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            screen_size: (screen_width, screen_height),
            camera_size: (640, 480),
            screen_color: Self::SCREEN_COLOR,
            camera_color: Self::CAMERA_COLOR,
            sample_rate: 48_000,
            screen_has_audio: true,
            denials: HashMap::new(),
            stalled: HashSet::new(),
            held: Arc::new(AtomicUsize::new(0)),
            screen_control: SyntheticControl::new(),
            camera_control: SyntheticControl::new(),
        }
    }

    pub fn with_camera_size(mut self, width: u32, height: u32) -> Self {
        self.camera_size = (width, height);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Shares come back without an audio track even when requested.
    pub fn without_screen_audio(mut self) -> Self {
        self.screen_has_audio = false;
        self
    }

    /// Make every request for `kind` fail with `reason`.
    pub fn deny(mut self, kind: SourceKind, reason: AcquisitionFailure) -> Self {
        self.denials.insert(kind, reason);
        self
    }

    /// Make every request for `kind` wait forever, like a permission
    /// prompt nobody answers.
    pub fn stall(mut self, kind: SourceKind) -> Self {
        self.stalled.insert(kind);
        self
    }

    /// Number of handles currently held by callers.
    pub fn held_handles(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Shared counter, for observing releases after the provider is boxed.
    pub fn held_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.held)
    }

    pub fn screen_control(&self) -> SyntheticControl {
        self.screen_control.clone()
    }

    pub fn camera_control(&self) -> SyntheticControl {
        self.camera_control.clone()
    }

    async fn check(&self, kind: SourceKind) -> DuocastResult<()> {
        if self.stalled.contains(&kind) {
            tracing::debug!(%kind, "Synthetic device stalled");
            std::future::pending::<()>().await;
        }
        match self.denials.get(&kind) {
            Some(reason) => {
                tracing::debug!(%kind, %reason, "Synthetic device denied");
                Err(DuocastError::acquisition(
                    kind.to_string(),
                    *reason,
                    "synthetic provider configured to deny",
                ))
            }
            None => Ok(()),
        }
    }

    fn constant(&self, label: &str, value: f32) -> ConstantSignal {
        let mut signal = ConstantSignal::new(label, self.sample_rate, value);
        signal.token = Some(HeldToken::new(&self.held));
        signal
    }
}

#[async_trait::async_trait]
impl DeviceProvider for SyntheticDeviceProvider {
    async fn acquire_screen(
        &mut self,
        capture_system_audio: bool,
    ) -> DuocastResult<AcquiredScreen> {
        self.check(SourceKind::Screen).await?;
        let (width, height) = self.screen_size;
        let video =
            SyntheticVideoSource::solid(SourceKind::Screen, width, height, self.screen_color)
                .held(&self.held, self.screen_control.clone());
        let audio: Option<Box<dyn AudioSignal>> = if capture_system_audio && self.screen_has_audio
        {
            Some(Box::new(self.constant("system", Self::SYSTEM_LEVEL)))
        } else {
            None
        };
        Ok(AcquiredScreen {
            video: Box::new(video),
            audio,
        })
    }

    async fn acquire_camera(
        &mut self,
        device: &DeviceRef,
    ) -> DuocastResult<Box<dyn CaptureSource>> {
        self.check(SourceKind::Camera).await?;
        if let DeviceRef::Id(id) = device {
            if id.is_empty() {
                return Err(DuocastError::acquisition(
                    "camera",
                    AcquisitionFailure::DeviceNotFound,
                    "empty device id",
                ));
            }
        }
        let (width, height) = self.camera_size;
        let camera =
            SyntheticVideoSource::solid(SourceKind::Camera, width, height, self.camera_color)
                .held(&self.held, self.camera_control.clone());
        Ok(Box::new(camera))
    }

    async fn acquire_microphone(
        &mut self,
        _device: &DeviceRef,
    ) -> DuocastResult<Box<dyn AudioSignal>> {
        self.check(SourceKind::Microphone).await?;
        Ok(Box::new(self.constant("microphone", Self::MIC_LEVEL)))
    }
}
