//! Pure layout arithmetic shared by every backend.
//!
//! Output space is normalised device coordinates: `[-1, 1]` on both axes with
//! +y pointing up. Texture space is `[0, 1]` with v = 0 on the first row a
//! producer delivers.

use crate::types::{OverlayAnchor, Rotation, Size};

/// Axis-aligned rectangle in normalised device coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NdcRect {
    pub left: f32,
    pub bottom: f32,
    pub width: f32,
    pub height: f32,
}

impl NdcRect {
    pub const FULL: NdcRect = NdcRect {
        left: -1.0,
        bottom: -1.0,
        width: 2.0,
        height: 2.0,
    };

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn top(&self) -> f32 {
        self.bottom + self.height
    }

    /// Grows the rectangle by `dx`/`dy` on every side.
    pub fn inflate(&self, dx: f32, dy: f32) -> NdcRect {
        NdcRect {
            left: self.left - dx,
            bottom: self.bottom - dy,
            width: self.width + 2.0 * dx,
            height: self.height + 2.0 * dy,
        }
    }

    /// Corners in triangle-strip order: bottom-left, bottom-right, top-left, top-right.
    pub fn corners(&self) -> [[f32; 2]; 4] {
        [
            [self.left, self.bottom],
            [self.right(), self.bottom],
            [self.left, self.top()],
            [self.right(), self.top()],
        ]
    }

    /// Closed line strip around the rectangle.
    pub fn outline(&self) -> [[f32; 2]; 5] {
        [
            [self.left, self.bottom],
            [self.right(), self.bottom],
            [self.right(), self.top()],
            [self.left, self.top()],
            [self.left, self.bottom],
        ]
    }
}

/// Texture-coordinate window sampled from a source, before rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexWindow {
    pub u_min: f32,
    pub u_max: f32,
    pub v_min: f32,
    pub v_max: f32,
}

impl TexWindow {
    pub const FULL: TexWindow = TexWindow {
        u_min: 0.0,
        u_max: 1.0,
        v_min: 0.0,
        v_max: 1.0,
    };
}

/// Fractions of the source that stay visible when it fills an output of a
/// different shape, as `(width, height)`.
pub fn visible_fraction(source_aspect: f32, output_aspect: f32) -> (f32, f32) {
    if source_aspect >= output_aspect {
        (output_aspect / source_aspect, 1.0)
    } else {
        (1.0, source_aspect / output_aspect)
    }
}

/// Centered crop window that fills `output` with `source` without stretching.
///
/// Aspect ratios are compared after rotation so quarter turns swap the roles
/// of width and height.
pub fn fit_window(source: Size, output: Size, rotation: Rotation) -> TexWindow {
    let rotated = if rotation.swaps_axes() {
        Size::new(source.height, source.width)
    } else {
        source
    };
    let (visible_width, visible_height) = visible_fraction(rotated.aspect(), output.aspect());
    TexWindow {
        u_min: (0.5 - visible_width / 2.0).clamp(0.0, 1.0),
        u_max: (0.5 + visible_width / 2.0).clamp(0.0, 1.0),
        v_min: (0.5 - visible_height / 2.0).clamp(0.0, 1.0),
        v_max: (0.5 + visible_height / 2.0).clamp(0.0, 1.0),
    }
}

/// Maps an output-oriented texture coordinate onto the rotated source.
pub fn rotate_uv([u, v]: [f32; 2], rotation: Rotation) -> [f32; 2] {
    match rotation {
        Rotation::Deg0 => [u, v],
        Rotation::Deg90 => [v, 1.0 - u],
        Rotation::Deg180 => [1.0 - u, 1.0 - v],
        Rotation::Deg270 => [1.0 - v, u],
    }
}

/// Overlay placement computed straight from the anchor, ratios and margin.
///
/// Ratios are fractions of the full output, so both are doubled on the way
/// into the two-unit-wide device coordinate range.
pub fn overlay_rect(
    anchor: OverlayAnchor,
    width_ratio: f32,
    height_ratio: f32,
    margin_ratio: f32,
) -> NdcRect {
    let width = width_ratio * 2.0;
    let height = height_ratio * 2.0;
    let margin = margin_ratio * 2.0;

    let left_edge = -1.0 + margin;
    let right_edge = 1.0 - margin - width;
    let centered_x = -width / 2.0;
    let top_edge = 1.0 - margin - height;
    let bottom_edge = -1.0 + margin;
    let centered_y = -height / 2.0;

    let (left, bottom) = match anchor {
        OverlayAnchor::TopLeft => (left_edge, top_edge),
        OverlayAnchor::TopRight => (right_edge, top_edge),
        OverlayAnchor::BottomLeft => (left_edge, bottom_edge),
        OverlayAnchor::BottomRight => (right_edge, bottom_edge),
        OverlayAnchor::Center => (centered_x, centered_y),
        OverlayAnchor::TopCenter => (centered_x, top_edge),
        OverlayAnchor::BottomCenter => (centered_x, bottom_edge),
    };

    NdcRect {
        left,
        bottom,
        width,
        height,
    }
}

/// Textured rectangle ready for a triangle strip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub rect: NdcRect,
    /// Texture coordinates matching [`NdcRect::corners`].
    pub uvs: [[f32; 2]; 4],
}

impl Quad {
    pub fn new(rect: NdcRect, window: TexWindow, rotation: Rotation) -> Self {
        // The top of the output shows the first rows of the source.
        let corners = [
            [window.u_min, window.v_max],
            [window.u_max, window.v_max],
            [window.u_min, window.v_min],
            [window.u_max, window.v_min],
        ];
        Self {
            rect,
            uvs: corners.map(|uv| rotate_uv(uv, rotation)),
        }
    }

    /// Background quad covering the output with a centered crop.
    pub fn fill(source: Size, output: Size, rotation: Rotation) -> Self {
        Self::new(NdcRect::FULL, fit_window(source, output, rotation), rotation)
    }

    /// Interpolated texture coordinate at fractional position `s` (left to
    /// right) and `t` (bottom to top) inside the quad.
    pub fn uv_at(&self, s: f32, t: f32) -> [f32; 2] {
        let [bl, br, tl, tr] = self.uvs;
        let lerp = |a: f32, b: f32, k: f32| a + (b - a) * k;
        let bottom = [lerp(bl[0], br[0], s), lerp(bl[1], br[1], s)];
        let top = [lerp(tl[0], tr[0], s), lerp(tl[1], tr[1], s)];
        [lerp(bottom[0], top[0], t), lerp(bottom[1], top[1], t)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn wider_source_keeps_full_height() {
        let source_aspect = 16.0 / 9.0;
        let output_aspect = 4.0 / 3.0;
        let (width, height) = visible_fraction(source_aspect, output_aspect);
        assert!((height - 1.0).abs() < EPS);
        assert!((width - output_aspect / source_aspect).abs() < EPS);
    }

    #[test]
    fn taller_source_keeps_full_width() {
        let source_aspect = 3.0 / 4.0;
        let output_aspect = 16.0 / 9.0;
        let (width, height) = visible_fraction(source_aspect, output_aspect);
        assert!((width - 1.0).abs() < EPS);
        assert!((height - source_aspect / output_aspect).abs() < EPS);
    }

    #[test]
    fn fit_window_is_centered() {
        let window = fit_window(Size::new(640, 480), Size::new(1280, 720), Rotation::Deg0);
        assert!((window.u_min - 0.0).abs() < EPS);
        assert!((window.u_max - 1.0).abs() < EPS);
        let visible = (4.0 / 3.0) / (16.0 / 9.0);
        assert!((window.v_min - (0.5 - visible / 2.0)).abs() < EPS);
        assert!((window.v_max - (0.5 + visible / 2.0)).abs() < EPS);
    }

    #[test]
    fn quarter_turn_swaps_aspect_roles() {
        // A portrait 480x640 camera turned sideways fills a 4:3 output exactly.
        let window = fit_window(Size::new(480, 640), Size::new(640, 480), Rotation::Deg90);
        assert_eq!(window, TexWindow::FULL);
        let upright = fit_window(Size::new(480, 640), Size::new(640, 480), Rotation::Deg0);
        assert!(upright.v_max - upright.v_min < 1.0);
    }

    #[test]
    fn rotation_permutes_corners() {
        assert_eq!(rotate_uv([0.25, 0.75], Rotation::Deg90), [0.75, 0.75]);
        assert_eq!(rotate_uv([0.25, 0.75], Rotation::Deg180), [0.75, 0.25]);
        assert_eq!(rotate_uv([0.25, 0.75], Rotation::Deg270), [0.25, 0.25]);

        let quad = Quad::new(NdcRect::FULL, TexWindow::FULL, Rotation::Deg0);
        assert_eq!(quad.uvs, [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]]);
        let turned = Quad::new(NdcRect::FULL, TexWindow::FULL, Rotation::Deg180);
        assert_eq!(turned.uvs, [[1.0, 0.0], [0.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
    }

    #[test]
    fn bottom_right_overlay_matches_hand_computation() {
        let rect = overlay_rect(OverlayAnchor::BottomRight, 0.25, 0.25, 0.02);
        assert!((rect.left - 0.46).abs() < EPS);
        assert!((rect.bottom + 0.96).abs() < EPS);
        assert!((rect.right() - 0.96).abs() < EPS);
        assert!((rect.top() + 0.46).abs() < EPS);
    }

    #[test]
    fn other_anchors() {
        let rect = overlay_rect(OverlayAnchor::TopLeft, 0.4, 0.4, 0.02);
        assert!((rect.left + 0.96).abs() < EPS);
        assert!((rect.top() - 0.96).abs() < EPS);

        let rect = overlay_rect(OverlayAnchor::Center, 0.6, 0.8, 0.05);
        assert!((rect.left + 0.6).abs() < EPS);
        assert!((rect.bottom + 0.8).abs() < EPS);

        let rect = overlay_rect(OverlayAnchor::TopCenter, 0.5, 0.2, 0.1);
        assert!((rect.left + 0.5).abs() < EPS);
        assert!((rect.top() - 0.8).abs() < EPS);
    }

    #[test]
    fn uv_interpolation_hits_corners() {
        let quad = Quad::fill(Size::new(640, 480), Size::new(640, 480), Rotation::Deg0);
        assert_eq!(quad.uv_at(0.0, 0.0), [0.0, 1.0]);
        assert_eq!(quad.uv_at(1.0, 1.0), [1.0, 0.0]);
        let mid = quad.uv_at(0.5, 0.5);
        assert!((mid[0] - 0.5).abs() < EPS && (mid[1] - 0.5).abs() < EPS);
    }
}
