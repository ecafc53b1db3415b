//! The compositing surface and its draw operations.
//!
//! Drawing is CPU work on an owned `RgbaImage`: cover crops are cut and
//! nearest-neighbour scaled with `image::imageops`, shapes come from
//! `imageproc::drawing`. The surface belongs to exactly one compositor (or
//! one export); nothing else writes into it.

use duocast_common::error::{DuocastError, DuocastResult};
use duocast_platform_core::frame::{Rgba, VideoFrame, BLACK};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_circle_mut};
use imageproc::rect::Rect as ImageRect;

/// Region of a source frame selected by aspect-fill, in source pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Destination box on the surface, in surface pixels. May extend past the
/// surface edges; drawing clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Square box of side `diameter` centered on `(cx, cy)`.
    pub fn centered_square(cx: f64, cy: f64, diameter: u32) -> Self {
        let half = diameter as f64 / 2.0;
        Self::new(
            (cx - half).round() as i64,
            (cy - half).round() as i64,
            diameter,
            diameter,
        )
    }
}

/// Aspect-fill ("cover") crop of a `src_w`×`src_h` source for a
/// `dst_w`×`dst_h` box.
///
/// The overflowing dimension is center-cropped so that the returned region
/// has exactly the destination's aspect ratio. Degenerate sizes return the
/// whole source.
pub fn cover_crop(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> CropRect {
    let (sw, sh) = (src_w as f64, src_h as f64);
    let full = CropRect {
        x: 0.0,
        y: 0.0,
        width: sw,
        height: sh,
    };
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return full;
    }

    let source_aspect = sw / sh;
    let dest_aspect = dst_w as f64 / dst_h as f64;

    if source_aspect > dest_aspect {
        let crop_w = sh * dest_aspect;
        CropRect {
            x: (sw - crop_w) / 2.0,
            width: crop_w,
            ..full
        }
    } else {
        let crop_h = sw / dest_aspect;
        CropRect {
            y: (sh - crop_h) / 2.0,
            height: crop_h,
            ..full
        }
    }
}

/// Owned RGBA drawing target.
#[derive(Debug, Clone)]
pub struct CompositingSurface {
    frame: VideoFrame,
}

impl CompositingSurface {
    /// A black surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: VideoFrame::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    /// Raw RGBA bytes of the current contents.
    pub fn as_bytes(&self) -> &[u8] {
        self.frame.pixels()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        self.frame.pixel(x, y)
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> VideoFrame {
        self.frame.clone()
    }

    pub fn clear(&mut self) {
        self.fill_rect(Rect::new(0, 0, self.width(), self.height()), BLACK);
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Rgba) {
        let Some((x0, y0, x1, y1)) = self.clip(rect) else {
            return;
        };
        let area = ImageRect::at(x0 as i32, y0 as i32).of_size(x1 - x0, y1 - y0);
        draw_filled_rect_mut(self.frame.image_mut(), area, image::Rgba(color));
    }

    /// Aspect-fill `frame` into `dest`.
    pub fn draw_cover(&mut self, frame: &VideoFrame, dest: Rect) -> DuocastResult<()> {
        let Some(scaled) = cover_scaled(frame, dest)? else {
            return Ok(());
        };
        imageops::replace(self.frame.image_mut(), &scaled, dest.x, dest.y);
        Ok(())
    }

    /// Aspect-fill `frame` into the square around `center`, keeping only
    /// pixels whose centers fall inside the circle of `diameter`.
    pub fn draw_cover_in_circle(
        &mut self,
        frame: &VideoFrame,
        center: (f64, f64),
        diameter: u32,
    ) -> DuocastResult<()> {
        let dest = Rect::centered_square(center.0, center.1, diameter);
        let Some(scaled) = cover_scaled(frame, dest)? else {
            return Ok(());
        };
        let Some((x0, y0, x1, y1)) = self.clip(dest) else {
            return Ok(());
        };

        let radius = diameter as f64 / 2.0;
        let r2 = radius * radius;
        let target = self.frame.image_mut();
        for y in y0..y1 {
            let dy = y as f64 + 0.5 - center.1;
            let sy = (y as i64 - dest.y) as u32;
            for x in x0..x1 {
                let dx = x as f64 + 0.5 - center.0;
                if dx * dx + dy * dy > r2 {
                    continue;
                }
                let sx = (x as i64 - dest.x) as u32;
                if let Some(pixel) = scaled.get_pixel_checked(sx, sy) {
                    target.put_pixel(x, y, *pixel);
                }
            }
        }
        Ok(())
    }

    /// Ring of `stroke` pixels centered on the circle's edge.
    pub fn stroke_circle(&mut self, center: (f64, f64), diameter: u32, stroke: u32, color: Rgba) {
        if stroke == 0 || diameter == 0 {
            return;
        }
        let radius = (diameter as f64 / 2.0).round() as i32;
        let inner = radius - (stroke / 2) as i32;
        let origin = (center.0.round() as i32, center.1.round() as i32);
        for r in inner.max(0)..inner.max(0) + stroke as i32 {
            draw_hollow_circle_mut(self.frame.image_mut(), origin, r, image::Rgba(color));
        }
    }

    /// Full-width horizontal line of `thickness` centered on row `y`.
    pub fn draw_hline(&mut self, y: u32, thickness: u32, color: Rgba) {
        let top = y as i64 - (thickness / 2) as i64;
        self.fill_rect(Rect::new(0, top, self.width(), thickness), color);
    }

    /// Fill `area` and draw a "camera off" badge in its center: a framed
    /// square crossed by a diagonal.
    pub fn draw_placeholder_badge(&mut self, area: Rect, background: Rgba, foreground: Rgba) {
        self.fill_rect(area, background);

        let side = (area.width.min(area.height) / 4).max(1);
        let cx = area.x as f64 + area.width as f64 / 2.0;
        let cy = area.y as f64 + area.height as f64 / 2.0;
        let badge = Rect::centered_square(cx, cy, side);
        let line = (side / 12).max(1);

        self.fill_rect(Rect::new(badge.x, badge.y, side, line), foreground);
        self.fill_rect(
            Rect::new(badge.x, badge.y + (side - line) as i64, side, line),
            foreground,
        );
        self.fill_rect(Rect::new(badge.x, badge.y, line, side), foreground);
        self.fill_rect(
            Rect::new(badge.x + (side - line) as i64, badge.y, line, side),
            foreground,
        );
        for step in 0..side as i64 {
            self.fill_rect(
                Rect::new(badge.x + step, badge.y + step, line, line),
                foreground,
            );
        }
    }

    /// Intersection of `rect` with the surface as `[x0, x1) × [y0, y1)`.
    fn clip(&self, rect: Rect) -> Option<(u32, u32, u32, u32)> {
        let x0 = rect.x.max(0);
        let y0 = rect.y.max(0);
        let x1 = (rect.x + rect.width as i64).min(self.width() as i64);
        let y1 = (rect.y + rect.height as i64).min(self.height() as i64);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

/// Crop `frame` to the cover region for `dest` and scale it to `dest`'s
/// size. `None` when `dest` has no area.
fn cover_scaled(frame: &VideoFrame, dest: Rect) -> DuocastResult<Option<RgbaImage>> {
    if frame.is_empty() {
        return Err(DuocastError::render(format!(
            "cannot draw an empty {}x{} frame",
            frame.width(),
            frame.height()
        )));
    }
    if dest.width == 0 || dest.height == 0 {
        return Ok(None);
    }

    let crop = cover_crop(frame.width(), frame.height(), dest.width, dest.height);
    let x = (crop.x.floor().max(0.0) as u32).min(frame.width() - 1);
    let y = (crop.y.floor().max(0.0) as u32).min(frame.height() - 1);
    let width = (crop.width.round() as u32).clamp(1, frame.width() - x);
    let height = (crop.height.round() as u32).clamp(1, frame.height() - y);

    let region = imageops::crop_imm(frame.as_image(), x, y, width, height).to_image();
    Ok(Some(imageops::resize(
        &region,
        dest.width,
        dest.height,
        FilterType::Nearest,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RED: Rgba = [255, 0, 0, 255];
    const BLUE: Rgba = [0, 0, 255, 255];

    #[test]
    fn wide_source_crops_width() {
        let crop = cover_crop(1920, 1080, 1000, 1000);
        assert_eq!(crop.width, 1080.0);
        assert_eq!(crop.height, 1080.0);
        assert_eq!(crop.x, 420.0);
        assert_eq!(crop.y, 0.0);
    }

    #[test]
    fn tall_source_crops_height() {
        let crop = cover_crop(640, 480, 1280, 360);
        assert_eq!(crop.width, 640.0);
        assert_eq!(crop.height, 180.0);
        assert_eq!(crop.y, 150.0);
    }

    #[test]
    fn cover_fills_destination_from_cropped_center() {
        // Left and right thirds red, middle blue: cover into a square keeps
        // only the blue middle third.
        let mut frame = VideoFrame::solid(9, 3, RED);
        for y in 0..3 {
            for x in 3..6 {
                frame.put_pixel(x, y, BLUE);
            }
        }
        let mut surface = CompositingSurface::new(6, 6);
        surface.draw_cover(&frame, Rect::new(0, 0, 6, 6)).unwrap();
        for y in 0..6 {
            for x in 0..6 {
                assert_eq!(surface.pixel(x, y), Some(BLUE), "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn circle_draw_leaves_corners_untouched() {
        let frame = VideoFrame::solid(4, 4, RED);
        let mut surface = CompositingSurface::new(20, 20);
        surface
            .draw_cover_in_circle(&frame, (10.0, 10.0), 16)
            .unwrap();
        assert_eq!(surface.pixel(10, 10), Some(RED));
        assert_eq!(surface.pixel(2, 2), Some(BLACK));
        assert_eq!(surface.pixel(17, 17), Some(BLACK));
        assert_eq!(surface.pixel(10, 3), Some(RED));
    }

    #[test]
    fn circle_partially_off_surface_is_clipped() {
        let frame = VideoFrame::solid(4, 4, RED);
        let mut surface = CompositingSurface::new(10, 10);
        surface.draw_cover_in_circle(&frame, (0.0, 0.0), 8).unwrap();
        assert_eq!(surface.pixel(0, 0), Some(RED));
        assert_eq!(surface.pixel(9, 9), Some(BLACK));
    }

    #[test]
    fn reading_past_the_edge_is_none() {
        let surface = CompositingSurface::new(4, 4);
        assert_eq!(surface.pixel(3, 3), Some(BLACK));
        assert_eq!(surface.pixel(4, 0), None);
        assert_eq!(surface.pixel(0, 400), None);
    }

    #[test]
    fn cover_draw_partially_off_surface_is_clipped() {
        let frame = VideoFrame::solid(8, 8, RED);
        let mut surface = CompositingSurface::new(10, 10);
        surface.draw_cover(&frame, Rect::new(-5, 6, 8, 8)).unwrap();
        assert_eq!(surface.pixel(0, 6), Some(RED));
        assert_eq!(surface.pixel(2, 9), Some(RED));
        assert_eq!(surface.pixel(3, 6), Some(BLACK));
        assert_eq!(surface.pixel(0, 5), Some(BLACK));
    }

    #[test]
    fn empty_frame_is_a_draw_error() {
        let frame = VideoFrame::new(0, 0);
        let mut surface = CompositingSurface::new(4, 4);
        assert!(surface.draw_cover(&frame, Rect::new(0, 0, 4, 4)).is_err());
    }

    #[test]
    fn hline_is_centered_on_row() {
        let mut surface = CompositingSurface::new(4, 10);
        surface.draw_hline(5, 2, RED);
        assert_eq!(surface.pixel(0, 4), Some(RED));
        assert_eq!(surface.pixel(3, 5), Some(RED));
        assert_eq!(surface.pixel(0, 6), Some(BLACK));
        assert_eq!(surface.pixel(0, 3), Some(BLACK));
    }

    #[test]
    fn stroke_circle_draws_ring_only() {
        let mut surface = CompositingSurface::new(40, 40);
        surface.stroke_circle((20.0, 20.0), 30, 2, RED);
        assert_eq!(surface.pixel(20, 20), Some(BLACK));
        assert_eq!(surface.pixel(20, 5), Some(RED));
    }

    #[test]
    fn placeholder_fills_area() {
        let mut surface = CompositingSurface::new(40, 20);
        let area = Rect::new(0, 10, 40, 10);
        surface.draw_placeholder_badge(area, BLUE, RED);
        assert_eq!(surface.pixel(0, 10), Some(BLUE));
        assert_eq!(surface.pixel(39, 19), Some(BLUE));
        assert_eq!(surface.pixel(0, 0), Some(BLACK));
    }

    proptest! {
        #[test]
        fn cover_crop_stays_in_bounds_with_destination_aspect(
            src_w in 1u32..4000, src_h in 1u32..4000,
            dst_w in 1u32..4000, dst_h in 1u32..4000,
        ) {
            let crop = cover_crop(src_w, src_h, dst_w, dst_h);
            let eps = 1e-6;
            prop_assert!(crop.x >= -eps && crop.y >= -eps);
            prop_assert!(crop.x + crop.width <= src_w as f64 + eps);
            prop_assert!(crop.y + crop.height <= src_h as f64 + eps);
            prop_assert!(crop.width > 0.0 && crop.height > 0.0);

            let crop_aspect = crop.width / crop.height;
            let dest_aspect = dst_w as f64 / dst_h as f64;
            prop_assert!((crop_aspect - dest_aspect).abs() <= dest_aspect * 1e-9);
        }

        #[test]
        fn cover_draw_covers_every_destination_pixel(
            src_w in 1u32..48, src_h in 1u32..48,
            dst_w in 1u32..48, dst_h in 1u32..48,
        ) {
            let frame = VideoFrame::solid(src_w, src_h, RED);
            let mut surface = CompositingSurface::new(dst_w, dst_h);
            surface.draw_cover(&frame, Rect::new(0, 0, dst_w, dst_h)).unwrap();
            for y in 0..dst_h {
                for x in 0..dst_w {
                    prop_assert_eq!(surface.pixel(x, y), Some(RED));
                }
            }
        }
    }
}
