//! Decoded video frames.

use duocast_common::error::{DuocastError, DuocastResult};
use image::RgbaImage;

/// An 8-bit RGBA color.
pub type Rgba = [u8; 4];

pub const BLACK: Rgba = [0, 0, 0, 255];

/// A decoded RGBA frame, row-major, no padding between rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    image: RgbaImage,
}

impl VideoFrame {
    /// An opaque black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self::solid(width, height, BLACK)
    }

    /// A frame filled with one color.
    pub fn solid(width: u32, height: u32, color: Rgba) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, image::Rgba(color)),
        }
    }

    /// Wrap an existing RGBA buffer, checking its length.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> DuocastResult<Self> {
        let expected = width as usize * height as usize * 4;
        let len = pixels.len();
        if len != expected {
            return Err(DuocastError::render(format!(
                "RGBA buffer for {width}x{height} must be {expected} bytes, got {len}"
            )));
        }
        let image = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
            DuocastError::render(format!("RGBA buffer for {width}x{height} is unusable"))
        })?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Whether the frame has no decodable area.
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Pixel at `(x, y)`, or `None` outside the frame.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Overwrite the pixel at `(x, y)`; out-of-bounds writes are ignored.
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgba) {
        if let Some(pixel) = self.image.get_pixel_mut_checked(x, y) {
            pixel.0 = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_frame_has_uniform_pixels() {
        let frame = VideoFrame::solid(4, 3, [10, 20, 30, 255]);
        assert_eq!(frame.pixels().len(), 4 * 3 * 4);
        assert_eq!(frame.pixel(3, 2), Some([10, 20, 30, 255]));
    }

    #[test]
    fn from_rgba_rejects_wrong_length() {
        let err = VideoFrame::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert!(err.to_string().contains("16 bytes"));
    }

    #[test]
    fn put_pixel_ignores_out_of_bounds() {
        let mut frame = VideoFrame::new(2, 2);
        frame.put_pixel(5, 5, [255, 0, 0, 255]);
        frame.put_pixel(1, 0, [255, 0, 0, 255]);
        assert_eq!(frame.pixel(1, 0), Some([255, 0, 0, 255]));
        assert_eq!(frame.pixel(0, 0), Some(BLACK));
    }

    #[test]
    fn reads_outside_the_frame_are_none() {
        let frame = VideoFrame::new(3, 2);
        assert_eq!(frame.pixel(3, 0), None);
        assert_eq!(frame.pixel(0, 2), None);
        assert_eq!(VideoFrame::new(0, 0).pixel(0, 0), None);
    }
}
