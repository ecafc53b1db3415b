//! Live frame compositor.
//!
//! Each tick clears the surface to black and draws whatever the sources
//! currently hold according to the active [`Layout`]. Sources that are not
//! ready are skipped. A draw failure is logged and counted and never stops
//! the loop.

use std::sync::Arc;
use std::time::Duration;

use duocast_common::clock::frame_interval;
use duocast_common::error::DuocastResult;
use duocast_platform_core::frame::VideoFrame;
use duocast_platform_core::source::CaptureSource;
use duocast_project_model::layout::{
    Layout, OverlayCircleParams, OverlayPosition, Quality, StackedVerticalParams,
};

use crate::surface::{CompositingSurface, Rect};

/// Compositor parameters. Size and rate are fixed for a recording; layout
/// and overlay position may change between ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositorState {
    pub target_width: u32,
    pub target_height: u32,
    pub target_fps: u32,
    pub layout: Layout,
    pub overlay_position: OverlayPosition,
}

impl CompositorState {
    pub fn new(quality: Quality, layout: Layout, overlay_position: OverlayPosition) -> Self {
        Self {
            target_width: quality.resolution.width,
            target_height: quality.resolution.height,
            target_fps: quality.fps,
            layout,
            overlay_position,
        }
    }

    /// Move the camera bubble. Both axes are clamped to `[0, 100]`.
    pub fn set_overlay_position(&mut self, x_percent: f64, y_percent: f64) {
        self.overlay_position = OverlayPosition::new(x_percent, y_percent);
    }

    /// Time between ticks: `1000ms / fps`.
    pub fn tick_interval(&self) -> Duration {
        frame_interval(self.target_fps)
    }
}

/// What happened to one source during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn,
    /// The source had no decodable frame; its area kept the prior fill.
    NotReady,
    /// No source was supplied (camera turned off).
    Disabled,
    /// Drawing raised an error; logged and skipped.
    Failed,
}

/// Per-tick summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub screen: DrawOutcome,
    pub camera: DrawOutcome,
}

/// Owns the compositing surface and draws one frame per tick.
#[derive(Debug)]
pub struct Compositor {
    surface: CompositingSurface,
    ticks: u64,
    draw_failures: u64,
}

/// Sample a live source: its current frame if it is ready.
pub fn sample(source: &dyn CaptureSource) -> Option<Arc<VideoFrame>> {
    if !source.is_ready() {
        return None;
    }
    source.current_frame()
}

impl Compositor {
    pub fn new(state: &CompositorState) -> Self {
        Self {
            surface: CompositingSurface::new(state.target_width, state.target_height),
            ticks: 0,
            draw_failures: 0,
        }
    }

    pub fn surface(&self) -> &CompositingSurface {
        &self.surface
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn draw_failures(&self) -> u64 {
        self.draw_failures
    }

    /// Draw one frame. `camera` is `None` when the camera is turned off.
    pub fn render_tick(
        &mut self,
        state: &CompositorState,
        screen: Option<&dyn CaptureSource>,
        camera: Option<&dyn CaptureSource>,
    ) -> TickReport {
        self.ticks += 1;
        self.surface.clear();

        let screen_frame = screen.map(sample);
        let camera_frame = camera.map(sample);

        let (screen, camera) = match state.layout {
            Layout::OverlayCircle(params) => {
                self.overlay_circle(state, &params, screen_frame, camera_frame)
            }
            Layout::StackedVertical(params) => {
                self.stacked_vertical(state, &params, screen_frame, camera_frame)
            }
        };

        TickReport {
            tick: self.ticks,
            screen,
            camera,
        }
    }

    fn overlay_circle(
        &mut self,
        state: &CompositorState,
        params: &OverlayCircleParams,
        screen: Option<Option<Arc<VideoFrame>>>,
        camera: Option<Option<Arc<VideoFrame>>>,
    ) -> (DrawOutcome, DrawOutcome) {
        let full = Rect::new(0, 0, state.target_width, state.target_height);
        let screen_outcome = self.draw_source("screen", screen, |surface, frame| {
            surface.draw_cover(frame, full)
        });

        let center = state
            .overlay_position
            .to_pixels(state.target_width, state.target_height);
        let camera_outcome = self.draw_source("camera", camera, |surface, frame| {
            surface.draw_cover_in_circle(frame, center, params.diameter)
        });
        if camera_outcome == DrawOutcome::Drawn {
            self.surface.stroke_circle(
                center,
                params.diameter,
                params.border_width,
                params.border_color,
            );
        }

        (screen_outcome, camera_outcome)
    }

    fn stacked_vertical(
        &mut self,
        state: &CompositorState,
        params: &StackedVerticalParams,
        screen: Option<Option<Arc<VideoFrame>>>,
        camera: Option<Option<Arc<VideoFrame>>>,
    ) -> (DrawOutcome, DrawOutcome) {
        let mid = state.target_height / 2;
        let top = Rect::new(0, 0, state.target_width, mid);
        let bottom = Rect::new(0, mid as i64, state.target_width, state.target_height - mid);

        let screen_outcome = self.draw_source("screen", screen, |surface, frame| {
            surface.draw_cover(frame, top)
        });

        let camera_outcome = if camera.is_some() {
            self.draw_source("camera", camera, |surface, frame| {
                surface.draw_cover(frame, bottom)
            })
        } else {
            self.surface.draw_placeholder_badge(
                bottom,
                params.placeholder_color,
                params.divider_color,
            );
            DrawOutcome::Disabled
        };

        self.surface
            .draw_hline(mid, params.divider_width, params.divider_color);

        (screen_outcome, camera_outcome)
    }

    fn draw_source<F>(
        &mut self,
        label: &'static str,
        sampled: Option<Option<Arc<VideoFrame>>>,
        draw: F,
    ) -> DrawOutcome
    where
        F: FnOnce(&mut CompositingSurface, &VideoFrame) -> DuocastResult<()>,
    {
        let frame = match sampled {
            None => return DrawOutcome::Disabled,
            Some(None) => return DrawOutcome::NotReady,
            Some(Some(frame)) => frame,
        };
        match draw(&mut self.surface, &frame) {
            Ok(()) => DrawOutcome::Drawn,
            Err(e) => {
                self.draw_failures += 1;
                tracing::warn!(
                    source = label,
                    tick = self.ticks,
                    failures = self.draw_failures,
                    error = %e,
                    "Draw failed, skipping source for this tick"
                );
                DrawOutcome::Failed
            }
        }
    }
}
