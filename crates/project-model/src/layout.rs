//! Layout variants, overlay placement, and output quality.

use serde::{Deserialize, Serialize};

/// An 8-bit RGBA color.
pub type Color = [u8; 4];

/// Output frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD_720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };

    pub const FULL_HD_1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Short label such as `1280x720`.
    pub fn label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Recording quality: resolution plus frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quality {
    pub resolution: Resolution,
    pub fps: u32,
}

impl Quality {
    pub fn new(resolution: Resolution, fps: u32) -> Self {
        Self { resolution, fps }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::new(Resolution::HD_720, 30)
    }
}

/// Center of the camera bubble, in percent of the output frame.
///
/// Both axes are always within `[0, 100]`, including after deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "OverlayPositionRepr")]
pub struct OverlayPosition {
    x: f64,
    y: f64,
}

impl OverlayPosition {
    /// Create a position, clamping both axes to `[0, 100]`. NaN maps to 0.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: clamp_percent(x),
            y: clamp_percent(y),
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    /// Pixel coordinates of the center on a `width`×`height` frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> (f64, f64) {
        (
            self.x / 100.0 * width as f64,
            self.y / 100.0 * height as f64,
        )
    }
}

impl Default for OverlayPosition {
    fn default() -> Self {
        Self::new(85.0, 80.0)
    }
}

#[derive(Deserialize)]
struct OverlayPositionRepr {
    x: f64,
    y: f64,
}

impl From<OverlayPositionRepr> for OverlayPosition {
    fn from(repr: OverlayPositionRepr) -> Self {
        Self::new(repr.x, repr.y)
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Layout discriminant, as it appears in bundle metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutKind {
    OverlayCircle,
    StackedVertical,
}

/// Draw parameters for the camera bubble layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayCircleParams {
    /// Bubble diameter in output pixels.
    pub diameter: u32,
    /// Border stroke width in output pixels.
    pub border_width: u32,
    pub border_color: Color,
}

impl Default for OverlayCircleParams {
    fn default() -> Self {
        Self {
            diameter: 240,
            border_width: 4,
            border_color: [255, 255, 255, 255],
        }
    }
}

/// Draw parameters for the split-screen layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackedVerticalParams {
    /// Divider thickness in output pixels.
    pub divider_width: u32,
    pub divider_color: Color,
    /// Fill for the bottom band when the camera is disabled.
    pub placeholder_color: Color,
}

impl Default for StackedVerticalParams {
    fn default() -> Self {
        Self {
            divider_width: 4,
            divider_color: [255, 255, 255, 255],
            placeholder_color: [38, 38, 46, 255],
        }
    }
}

/// How screen and camera share the output frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Layout {
    /// Screen fills the frame; camera is a clipped circle on top.
    OverlayCircle(OverlayCircleParams),
    /// Screen on the top half, camera on the bottom half.
    StackedVertical(StackedVerticalParams),
}

impl Layout {
    pub fn overlay_circle() -> Self {
        Self::OverlayCircle(OverlayCircleParams::default())
    }

    pub fn stacked_vertical() -> Self {
        Self::StackedVertical(StackedVerticalParams::default())
    }

    pub fn kind(&self) -> LayoutKind {
        match self {
            Self::OverlayCircle(_) => LayoutKind::OverlayCircle,
            Self::StackedVertical(_) => LayoutKind::StackedVertical,
        }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::overlay_circle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_position_clamps_both_axes() {
        let pos = OverlayPosition::new(-20.0, 140.0);
        assert_eq!(pos.x(), 0.0);
        assert_eq!(pos.y(), 100.0);

        let nan = OverlayPosition::new(f64::NAN, 50.0);
        assert_eq!(nan.x(), 0.0);
        assert_eq!(nan.y(), 50.0);
    }

    #[test]
    fn deserialized_overlay_position_is_clamped() {
        let pos: OverlayPosition = serde_json::from_str(r#"{"x":250.0,"y":-3.0}"#).unwrap();
        assert_eq!(pos, OverlayPosition::new(100.0, 0.0));
    }

    #[test]
    fn overlay_position_maps_to_pixels() {
        let pos = OverlayPosition::new(50.0, 25.0);
        assert_eq!(pos.to_pixels(1280, 720), (640.0, 180.0));
    }

    #[test]
    fn layout_serializes_with_screaming_tag() {
        let json = serde_json::to_value(Layout::stacked_vertical()).unwrap();
        assert_eq!(json["kind"], "STACKED_VERTICAL");
        assert_eq!(json["divider_width"], 4);

        let parsed: Layout =
            serde_json::from_str(r#"{"kind":"OVERLAY_CIRCLE","diameter":180}"#).unwrap();
        match parsed {
            Layout::OverlayCircle(params) => {
                assert_eq!(params.diameter, 180);
                assert_eq!(params.border_width, 4);
            }
            other => panic!("unexpected layout {other:?}"),
        }
    }

    #[test]
    fn layout_kind_names_match_metadata_format() {
        assert_eq!(
            serde_json::to_string(&LayoutKind::OverlayCircle).unwrap(),
            "\"OVERLAY_CIRCLE\""
        );
        assert_eq!(Layout::stacked_vertical().kind(), LayoutKind::StackedVertical);
    }

    #[test]
    fn resolution_label() {
        assert_eq!(Resolution::FULL_HD_1080.label(), "1920x1080");
    }
}
