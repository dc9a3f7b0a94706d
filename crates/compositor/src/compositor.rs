use crate::config::CompositorConfig;
use crate::geometry::{overlay_rect, NdcRect, Quad, TexWindow};
use crate::types::{PixelLayout, Rotation, Size, SourceRole};

/// Fill colour behind the overlay when the debug frame is enabled.
pub const BACKING_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 0.35];
/// Outline colour around the overlay when the debug frame is enabled.
pub const BORDER_COLOR: [f32; 4] = [1.0, 1.0, 0.0, 0.9];
/// Distance in output pixels between the overlay edge and its debug frame.
const FRAME_PAD_PX: f32 = 2.0;

/// One textured layer of the composite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerPlan {
    pub role: SourceRole,
    pub layout: PixelLayout,
    pub quad: Quad,
    pub opacity: f32,
}

/// Debug backing and border drawn under the overlay image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayFrame {
    pub rect: NdcRect,
    pub backing: [f32; 4],
    pub border: [f32; 4],
}

/// Which sources have a texture resident on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Residency {
    resident: [bool; 2],
}

impl Residency {
    pub fn mark(&mut self, role: SourceRole) {
        self.resident[role.index()] = true;
    }

    pub fn contains(&self, role: SourceRole) -> bool {
        self.resident[role.index()]
    }

    pub fn any(&self) -> bool {
        self.resident.iter().any(|resident| *resident)
    }
}

/// A single primitive of the draw sequence, in submission order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawOp<'a> {
    /// Alpha-blended solid rectangle.
    Fill { rect: NdcRect, color: [f32; 4] },
    /// One-pixel outline around a rectangle.
    Outline { rect: NdcRect, color: [f32; 4] },
    /// Sampled source texture.
    Layer(&'a LayerPlan),
}

/// Static description of how the two sources are combined.
///
/// The plan is computed once per session; only texture contents change from
/// frame to frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositePlan {
    pub output: Size,
    pub background: LayerPlan,
    pub overlay: LayerPlan,
    pub frame: Option<OverlayFrame>,
}

impl CompositePlan {
    pub fn from_config(config: &CompositorConfig) -> Self {
        let layout = &config.layout;
        let background_role = layout.background;
        let overlay_role = layout.overlay();
        let background_source = config.source(background_role);
        let overlay_source = config.source(overlay_role);

        let background = LayerPlan {
            role: background_role,
            layout: background_source.format,
            quad: Quad::fill(background_source.size, config.output, layout.rotation),
            opacity: 1.0,
        };

        let rect = overlay_rect(
            layout.anchor,
            layout.width_ratio,
            layout.height_ratio,
            layout.margin_ratio,
        );
        let overlay = LayerPlan {
            role: overlay_role,
            layout: overlay_source.format,
            quad: Quad::new(rect, TexWindow::FULL, Rotation::Deg0),
            opacity: layout.overlay_opacity,
        };

        let frame = layout.overlay_frame.then(|| {
            let dx = FRAME_PAD_PX * 2.0 / config.output.width.max(1) as f32;
            let dy = FRAME_PAD_PX * 2.0 / config.output.height.max(1) as f32;
            OverlayFrame {
                rect: rect.inflate(dx, dy),
                backing: BACKING_COLOR,
                border: BORDER_COLOR,
            }
        });

        Self {
            output: config.output,
            background,
            overlay,
            frame,
        }
    }

    /// Draw sequence for the textures currently resident.
    ///
    /// Layers without a resident texture are left out, so the cleared black
    /// output shows through instead of undefined texture memory.
    pub fn draw_ops(&self, residency: Residency) -> Vec<DrawOp<'_>> {
        let mut ops = Vec::with_capacity(4);
        if residency.contains(self.background.role) {
            ops.push(DrawOp::Layer(&self.background));
        }
        if residency.contains(self.overlay.role) {
            if let Some(frame) = &self.frame {
                ops.push(DrawOp::Fill {
                    rect: frame.rect,
                    color: frame.backing,
                });
                ops.push(DrawOp::Outline {
                    rect: frame.rect,
                    color: frame.border,
                });
            }
            ops.push(DrawOp::Layer(&self.overlay));
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;

    fn residency(roles: &[SourceRole]) -> Residency {
        let mut residency = Residency::default();
        for role in roles {
            residency.mark(*role);
        }
        residency
    }

    #[test]
    fn default_plan_puts_planar_source_behind() {
        let plan = CompositePlan::from_config(&CompositorConfig::default());
        assert_eq!(plan.background.role, SourceRole::Secondary);
        assert!(plan.background.layout.is_planar());
        assert_eq!(plan.overlay.role, SourceRole::Primary);
        assert!((plan.overlay.quad.rect.left - 0.46).abs() < 1e-5);
        assert!(plan.frame.is_none());
    }

    #[test]
    fn draw_ops_skip_layers_without_texture() {
        let plan = CompositePlan::from_config(&CompositorConfig::default());
        assert!(plan.draw_ops(Residency::default()).is_empty());

        let ops = plan.draw_ops(residency(&[SourceRole::Secondary]));
        assert_eq!(ops, vec![DrawOp::Layer(&plan.background)]);

        let ops = plan.draw_ops(residency(&[SourceRole::Primary, SourceRole::Secondary]));
        assert_eq!(
            ops,
            vec![DrawOp::Layer(&plan.background), DrawOp::Layer(&plan.overlay)]
        );
    }

    #[test]
    fn debug_frame_precedes_overlay_image() {
        let config = CompositorConfig {
            layout: LayoutConfig::display_background(),
            ..CompositorConfig::default()
        };
        let plan = CompositePlan::from_config(&config);
        let ops = plan.draw_ops(residency(&[SourceRole::Primary, SourceRole::Secondary]));
        assert_eq!(ops.len(), 4);
        assert!(matches!(ops[1], DrawOp::Fill { color, .. } if color == BACKING_COLOR));
        assert!(matches!(ops[2], DrawOp::Outline { color, .. } if color == BORDER_COLOR));
        assert_eq!(ops[3], DrawOp::Layer(&plan.overlay));

        let frame = plan.frame.expect("debug frame");
        assert!(frame.rect.left < plan.overlay.quad.rect.left);
    }
}
