//! Record, edit and export, end to end, on synthetic devices.
//!
//! Recordings go onto a [`MemoryTape`] so frames can be checked pixel for
//! pixel. The last test runs the same flow through GStreamer when the
//! runtime is installed.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use duocast_capture_engine::{
    ControllerOptions, ManualScheduler, ManualTicks, RecorderState, RecordingController,
    StartRequest,
};
use duocast_common::config::ScreenLossPolicy;
use duocast_common::error::{AcquisitionFailure, DuocastError};
use duocast_common::logging::init_test_logging;
use duocast_platform_core::source::{SeekableSource, SourceKind};
use duocast_platform_core::synthetic::SyntheticDeviceProvider;
use duocast_project_model::layout::{
    Layout, LayoutKind, OverlayCircleParams, OverlayPosition, Quality, Resolution,
};
use duocast_project_model::session::RecordingSession;
use duocast_project_model::store::{MemoryRecordStore, RecordStore};
use duocast_project_model::timeline::{
    EditOutcome, EditRejection, MoveDirection, VirtualTimeline,
};
use duocast_render_engine::export::{ExportOptions, ExportRenderer, ExportStage};
use duocast_render_engine::{
    media_runtime_available, EncoderConfig, MemoryEncoder, MemoryPlayback, MemoryTape,
    RecordingPlayback,
};

const RATE: u32 = 8_000;

fn provider() -> SyntheticDeviceProvider {
    SyntheticDeviceProvider::new(64, 36)
        .with_camera_size(16, 12)
        .with_sample_rate(RATE)
}

fn options() -> ControllerOptions {
    ControllerOptions {
        audio_sample_rate: RATE,
        chunk_interval_ms: 1_000,
        initial_overlay_position: OverlayPosition::default(),
        screen_loss_policy: ScreenLossPolicy::KeepSampling,
    }
}

fn recorder_with(
    provider: SyntheticDeviceProvider,
    options: ControllerOptions,
) -> (RecordingController, ManualTicks, MemoryTape) {
    init_test_logging();
    let (scheduler, ticks) = ManualScheduler::new();
    let tape = MemoryTape::new();
    let controller = RecordingController::new(Box::new(provider), Box::new(scheduler), options)
        .with_encoder_factory(tape.factory());
    (controller, ticks, tape)
}

fn recorder(provider: SyntheticDeviceProvider) -> (RecordingController, ManualTicks, MemoryTape) {
    recorder_with(provider, options())
}

fn bubble_layout() -> Layout {
    Layout::OverlayCircle(OverlayCircleParams {
        diameter: 12,
        border_width: 1,
        ..OverlayCircleParams::default()
    })
}

fn tiny_quality() -> Quality {
    Quality::new(Resolution::new(64, 36), 30)
}

async fn record(ticks_to_run: u64) -> (RecordingSession, MemoryPlayback) {
    let (mut controller, ticks, tape) = recorder(provider());
    controller
        .start(StartRequest::new(bubble_layout(), tiny_quality()))
        .await
        .unwrap();
    ticks.advance(ticks_to_run);
    controller.pump().unwrap();
    let session = controller.stop().unwrap().into_session();
    (session, tape.playback().unwrap())
}

/// Encoder for an export of `source`, taping onto `tape`.
fn export_encoder(source: &MemoryPlayback, tape: &MemoryTape) -> MemoryEncoder {
    let config = EncoderConfig {
        width: source.native_width(),
        height: source.native_height(),
        fps: 30,
        sample_rate: source.audio_sample_rate().unwrap(),
        chunk_interval_ms: 1_000,
    };
    MemoryEncoder::new(config, tape.clone()).unwrap()
}

#[tokio::test]
async fn five_second_overlay_recording() {
    let provider = provider();
    let held = provider.held_counter();
    let (mut controller, ticks, tape) = recorder(provider);

    controller
        .start(StartRequest::new(bubble_layout(), tiny_quality()).with_system_audio())
        .await
        .unwrap();
    assert_eq!(held.load(Ordering::SeqCst), 4);

    ticks.advance(150);
    controller.pump().unwrap();
    let finished = controller.stop().unwrap();
    assert_eq!(controller.state(), RecorderState::Idle);
    assert_eq!(held.load(Ordering::SeqCst), 0);
    assert_eq!(finished.stats.chunks_emitted, 5);

    let session = finished.into_session();
    assert_eq!(session.duration_secs, 5);
    assert_eq!(session.layout.kind(), LayoutKind::OverlayCircle);
    assert_eq!(session.metadata.overlay_position, OverlayPosition::new(85.0, 80.0));
    assert!(session.has_video());

    assert_eq!(tape.frame_count(), 150);
    assert_eq!(tape.duration_secs(), 5.0);
    let last = tape.frame(149).unwrap();
    assert_eq!(last.pixel(0, 0), Some(SyntheticDeviceProvider::SCREEN_COLOR));
    // Bubble center at (85%, 80%) of 64x36.
    assert_eq!(last.pixel(54, 28), Some(SyntheticDeviceProvider::CAMERA_COLOR));

    let mixed = SyntheticDeviceProvider::MIC_LEVEL + SyntheticDeviceProvider::SYSTEM_LEVEL;
    let audio = tape.audio();
    assert_eq!(audio.len(), 40_000);
    assert!(audio.iter().all(|sample| *sample == mixed));
}

#[tokio::test]
async fn stacked_recording_without_camera_shows_placeholder() {
    let (mut controller, ticks, tape) = recorder(provider());
    controller
        .start(StartRequest::new(Layout::stacked_vertical(), tiny_quality()).without_camera())
        .await
        .unwrap();
    ticks.advance(30);
    controller.pump().unwrap();
    controller.stop().unwrap();

    let frame = tape.frame(0).unwrap();
    assert_eq!(frame.pixel(0, 0), Some(SyntheticDeviceProvider::SCREEN_COLOR));
    assert_ne!(frame.pixel(0, 35), Some(SyntheticDeviceProvider::CAMERA_COLOR));
    assert_ne!(frame.pixel(0, 35), Some(SyntheticDeviceProvider::SCREEN_COLOR));
}

#[tokio::test]
async fn switching_layout_mid_recording_is_kept() {
    let (mut controller, ticks, tape) = recorder(provider());
    controller
        .start(StartRequest::new(bubble_layout(), tiny_quality()))
        .await
        .unwrap();
    ticks.advance(30);
    controller.pump().unwrap();

    controller.set_layout(Layout::stacked_vertical()).unwrap();
    ticks.advance(30);
    controller.pump().unwrap();
    let session = controller.stop().unwrap().into_session();

    assert_eq!(session.layout.kind(), LayoutKind::StackedVertical);
    assert_eq!(
        tape.frame(29).unwrap().pixel(0, 35),
        Some(SyntheticDeviceProvider::SCREEN_COLOR)
    );
    assert_eq!(
        tape.frame(30).unwrap().pixel(0, 35),
        Some(SyntheticDeviceProvider::CAMERA_COLOR)
    );
}

#[tokio::test]
async fn pause_keeps_sources_open_and_time_continuous() {
    let provider = provider();
    let held = provider.held_counter();
    let (mut controller, ticks, tape) = recorder(provider);
    controller
        .start(StartRequest::new(bubble_layout(), tiny_quality()))
        .await
        .unwrap();

    ticks.advance(60);
    controller.pump().unwrap();
    controller.pause().unwrap();
    assert_eq!(held.load(Ordering::SeqCst), 3);

    ticks.advance(600);
    controller.pump().unwrap();
    assert_eq!(tape.frame_count(), 60);
    controller.update_overlay_position(10.0, 20.0).unwrap();
    controller.resume().unwrap();
    ticks.advance(30);
    controller.pump().unwrap();

    let finished = controller.stop().unwrap();
    assert_eq!(finished.elapsed_secs, 3.0);
    assert_eq!(finished.overlay_position, OverlayPosition::new(10.0, 20.0));
    assert_eq!(finished.stats.frames_encoded, 90);
    assert_eq!(finished.stats.audio_samples_encoded, 3 * RATE as u64);

    // No frames for the paused stretch: the tape is 90 frames, 3 seconds.
    assert_eq!(tape.frame_count(), 90);
    assert_eq!(tape.duration_secs(), 3.0);

    // Bubble moved to (10%, 20%) after the pause.
    let after = tape.frame(89).unwrap();
    assert_eq!(after.pixel(6, 7), Some(SyntheticDeviceProvider::CAMERA_COLOR));
    let before = tape.frame(0).unwrap();
    assert_eq!(before.pixel(6, 7), Some(SyntheticDeviceProvider::SCREEN_COLOR));
}

#[tokio::test]
async fn screen_loss_can_end_the_recording() {
    let provider = provider();
    let screen = provider.screen_control();
    let held = provider.held_counter();
    let options = ControllerOptions {
        screen_loss_policy: ScreenLossPolicy::AutoStop,
        ..options()
    };
    let (mut controller, ticks, tape) = recorder_with(provider, options);
    controller
        .start(StartRequest::new(bubble_layout(), tiny_quality()))
        .await
        .unwrap();

    ticks.advance(90);
    controller.pump().unwrap();
    screen.end_feed();
    ticks.advance(1);
    let finished = controller.pump().unwrap().expect("recording should auto-stop");

    assert!(finished.auto_stopped);
    assert_eq!(finished.duration_secs(), 3);
    assert_eq!(tape.frame_count(), 90);
    assert_eq!(controller.state(), RecorderState::Idle);
    assert_eq!(held.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn denied_screen_leaves_recorder_idle() {
    let provider = provider().deny(SourceKind::Screen, AcquisitionFailure::PermissionDenied);
    let held = provider.held_counter();
    let (mut controller, ticks, _tape) = recorder(provider);

    let err = controller
        .start(StartRequest::new(bubble_layout(), tiny_quality()))
        .await
        .unwrap_err();

    assert!(matches!(err, DuocastError::Acquisition { .. }));
    assert_eq!(err.acquisition_reason(), Some(AcquisitionFailure::PermissionDenied));
    assert_eq!(controller.state(), RecorderState::Idle);
    assert_eq!(held.load(Ordering::SeqCst), 0);
    assert!(!ticks.is_active());
}

#[tokio::test]
async fn denied_microphone_releases_screen_and_camera() {
    let provider = provider().deny(SourceKind::Microphone, AcquisitionFailure::DeviceNotFound);
    let held = provider.held_counter();
    let (mut controller, _ticks, _tape) = recorder(provider);

    let err = controller
        .start(StartRequest::new(bubble_layout(), tiny_quality()).with_system_audio())
        .await
        .unwrap_err();

    assert_eq!(err.acquisition_reason(), Some(AcquisitionFailure::DeviceNotFound));
    assert_eq!(held.load(Ordering::SeqCst), 0);

    // The controller is reusable after a failed start.
    assert!(controller.stop().is_err());
}

#[tokio::test]
async fn split_export_renders_both_pieces_in_order() {
    let (source_session, mut playback) = record(300).await;
    assert_eq!(source_session.duration_secs, 10);

    let mut timeline = VirtualTimeline::new(10.0).unwrap();
    assert!(timeline.split(4.0).is_applied());
    let spans: Vec<(f64, f64)> = timeline
        .segments()
        .iter()
        .map(|s| (s.start_secs(), s.end_secs()))
        .collect();
    assert_eq!(spans, vec![(0.0, 4.0), (4.0, 10.0)]);
    assert_eq!(timeline.total_duration_secs(), 10.0);

    let stages = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&stages);
    let renderer = ExportRenderer::new(ExportOptions::default()).with_progress(Box::new(
        move |progress| seen.lock().unwrap().push(progress.stage),
    ));

    let output = MemoryTape::new();
    let mut encoder = export_encoder(&playback, &output);
    let report = renderer
        .render_with(&mut playback, &timeline, &mut encoder)
        .await
        .unwrap();
    assert_eq!(report.frames_per_segment, vec![120, 180]);
    assert_eq!(report.frames_rendered, 300);
    assert_eq!(report.duration_secs(), 10.0);

    let stages = stages.lock().unwrap();
    assert_eq!(stages.first(), Some(&ExportStage::Preparing));
    assert_eq!(stages.last(), Some(&ExportStage::Complete));

    let mut store = MemoryRecordStore::new();
    let exported =
        duocast_render_engine::export::export_session(&mut store, &source_session, report)
            .unwrap();
    assert_ne!(exported.id, source_session.id);
    assert_eq!(exported.duration_secs, 10);
    assert_eq!(
        exported.metadata.derived_from.as_deref(),
        Some(source_session.id.as_str())
    );
    assert_eq!(store.len(), 1);
    assert!(store.get(&exported.id).unwrap().is_some());

    assert_eq!(output.frame_count(), 300);
    assert_eq!(
        output.frame(299).unwrap().pixel(0, 0),
        Some(SyntheticDeviceProvider::SCREEN_COLOR)
    );
    // Half a second of trailing silence at the end of the audio track.
    let audio = output.audio();
    assert_eq!(audio.len(), 80_000 + 4_000);
    assert!(audio[..80_000]
        .iter()
        .all(|s| *s == SyntheticDeviceProvider::MIC_LEVEL));
    assert!(audio[80_000..].iter().all(|s| *s == 0.0));
}

#[tokio::test]
async fn deleting_a_segment_removes_it_from_the_export() {
    let (_session, mut playback) = record(300).await;

    let mut timeline = VirtualTimeline::new(10.0).unwrap();
    assert!(timeline.split(4.0).is_applied());
    let first = timeline.segments()[0].id();
    assert!(timeline.delete_segment(first).is_applied());
    assert_eq!(timeline.segments().len(), 1);
    assert_eq!(timeline.segments()[0].start_secs(), 4.0);
    assert_eq!(timeline.total_duration_secs(), 6.0);

    let remaining = timeline.segments()[0].id();
    assert_eq!(
        timeline.delete_segment(remaining),
        EditOutcome::Rejected(EditRejection::LastSegment)
    );

    let output = MemoryTape::new();
    let mut encoder = export_encoder(&playback, &output);
    let report = ExportRenderer::new(ExportOptions::default())
        .render_with(&mut playback, &timeline, &mut encoder)
        .await
        .unwrap();
    assert_eq!(report.frames_per_segment, vec![180]);
    assert_eq!(report.duration_secs(), 6.0);
    assert_eq!(output.frame_count(), 180);

    // The first exported frame comes from source second 4.
    let (_session, mut source) = record(300).await;
    source.seek(4.0).await.unwrap();
    assert_eq!(source.position(), Some(120));
}

#[tokio::test]
async fn default_encoder_records_and_exports() {
    if !media_runtime_available() {
        eprintln!("GStreamer runtime not available, skipping");
        return;
    }
    init_test_logging();
    let (scheduler, ticks) = ManualScheduler::new();
    let mut controller =
        RecordingController::new(Box::new(provider()), Box::new(scheduler), options());
    controller
        .start(StartRequest::new(bubble_layout(), tiny_quality()))
        .await
        .unwrap();
    ticks.advance(60);
    controller.pump().unwrap();
    let session = controller.stop().unwrap().into_session();
    assert!(session.has_video());
    assert_eq!(session.duration_secs, 2);

    let mut playback = RecordingPlayback::from_session(&session).unwrap();
    assert_eq!(playback.frame_count(), 60);

    let mut timeline = VirtualTimeline::new(2.0).unwrap();
    assert!(timeline.split(1.0).is_applied());
    assert!(timeline.move_segment(1, MoveDirection::Earlier).is_applied());

    let report = ExportRenderer::new(ExportOptions::default())
        .render(&mut playback, &timeline)
        .await
        .unwrap();
    assert_eq!(report.frames_per_segment, vec![30, 30]);
    assert!(!report.buffer.is_empty());
}
