//! CPU rasterizer that executes the same draw sequence as the wgpu backend.
//!
//! Finished composites are sent to a channel instead of a swapchain, which
//! makes it usable as a headless output and lets the whole session be
//! exercised without GPU hardware. Sampling is nearest-texel with edge
//! clamping. Blending matches `wgpu::BlendState::ALPHA_BLENDING`: color uses
//! `SRC_ALPHA, ONE_MINUS_SRC_ALPHA`, alpha uses `ONE, ONE_MINUS_SRC_ALPHA`.

use crossbeam_channel::Sender;

use crate::backend::{BackendFactory, FrameOutcome, RenderBackend};
use crate::buffer::{SourceFrame, PACKED_CHANNELS};
use crate::compositor::{CompositePlan, DrawOp, LayerPlan};
use crate::config::{CompositorConfig, SourceConfig};
use crate::error::{BufferError, CompositorError, Result};
use crate::geometry::NdcRect;
use crate::runtime::FrameStamp;
use crate::types::{ChannelOrder, PixelLayout, Size, SourceRole};

/// A composited RGBA8 frame, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub size: Size,
    pub stamp: FrameStamp,
    pub pixels: Vec<u8>,
}

impl OutputFrame {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.size.width as usize + x as usize) * 4;
        let mut texel = [0u8; 4];
        texel.copy_from_slice(&self.pixels[offset..offset + 4]);
        texel
    }
}

/// Creates [`SoftwareBackend`]s that deliver frames to `sink`.
pub struct SoftwareFactory {
    sink: Sender<OutputFrame>,
}

impl SoftwareFactory {
    pub fn new(sink: Sender<OutputFrame>) -> Self {
        Self { sink }
    }
}

impl BackendFactory for SoftwareFactory {
    fn create(
        self: Box<Self>,
        config: &CompositorConfig,
        _plan: &CompositePlan,
    ) -> Result<Box<dyn RenderBackend>> {
        Ok(Box::new(SoftwareBackend::new(config, self.sink)))
    }
}

struct Plane {
    size: Size,
    samples: Vec<u8>,
}

impl Plane {
    fn new(size: Size) -> Self {
        Self {
            size,
            samples: vec![0; size.area()],
        }
    }

    fn sample(&self, [u, v]: [f32; 2]) -> f32 {
        let (x, y) = texel_coords(self.size, u, v);
        self.samples[y * self.size.width as usize + x] as f32 / 255.0
    }
}

enum SourceTexture {
    Packed {
        size: Size,
        order: ChannelOrder,
        texels: Vec<u8>,
    },
    Planar {
        y: Plane,
        u: Plane,
        v: Plane,
    },
}

impl SourceTexture {
    fn allocate(source: &SourceConfig) -> Self {
        match source.format {
            PixelLayout::Packed { order } => SourceTexture::Packed {
                size: source.size,
                order,
                texels: vec![0; source.size.area() * PACKED_CHANNELS],
            },
            PixelLayout::Planar { subsampling } => {
                let chroma = subsampling.chroma_size(source.size);
                SourceTexture::Planar {
                    y: Plane::new(source.size),
                    u: Plane::new(chroma),
                    v: Plane::new(chroma),
                }
            }
        }
    }

    /// Straight RGB with the global opacity as alpha; packed alpha is ignored.
    fn sample(&self, uv: [f32; 2], opacity: f32) -> [f32; 4] {
        match self {
            SourceTexture::Packed {
                size,
                order,
                texels,
            } => {
                let (x, y) = texel_coords(*size, uv[0], uv[1]);
                let offset = (y * size.width as usize + x) * PACKED_CHANNELS;
                let texel = &texels[offset..offset + PACKED_CHANNELS];
                let (r, b) = match order {
                    ChannelOrder::Rgba => (texel[0], texel[2]),
                    ChannelOrder::Bgra => (texel[2], texel[0]),
                };
                [
                    r as f32 / 255.0,
                    texel[1] as f32 / 255.0,
                    b as f32 / 255.0,
                    opacity,
                ]
            }
            SourceTexture::Planar { y, u, v } => {
                let [r, g, b] = yuv_to_rgb(y.sample(uv), u.sample(uv), v.sample(uv));
                [r, g, b, opacity]
            }
        }
    }
}

/// Full-range BT.601 conversion with chroma centered on 0.5.
pub fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [f32; 3] {
    let u = u - 0.5;
    let v = v - 0.5;
    [
        (y + 1.402 * v).clamp(0.0, 1.0),
        (y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 1.0),
        (y + 1.772 * u).clamp(0.0, 1.0),
    ]
}

fn texel_coords(size: Size, u: f32, v: f32) -> (usize, usize) {
    let x = (u * size.width as f32).floor() as i64;
    let y = (v * size.height as f32).floor() as i64;
    (
        x.clamp(0, size.width as i64 - 1) as usize,
        y.clamp(0, size.height as i64 - 1) as usize,
    )
}

/// Pixel span covered by a rectangle, as half-open column and row ranges.
struct Span {
    columns: std::ops::Range<u32>,
    rows: std::ops::Range<u32>,
}

impl Span {
    fn of(rect: &NdcRect, output: Size) -> Self {
        let column = |ndc: f32| {
            let edge = ((ndc + 1.0) / 2.0 * output.width as f32 - 0.5).ceil();
            edge.clamp(0.0, output.width as f32) as u32
        };
        let row = |ndc: f32| {
            let edge = ((1.0 - ndc) / 2.0 * output.height as f32 - 0.5).ceil();
            edge.clamp(0.0, output.height as f32) as u32
        };
        Self {
            columns: column(rect.left)..column(rect.right()),
            rows: row(rect.top())..row(rect.bottom),
        }
    }
}

pub struct SoftwareBackend {
    output: Size,
    declared: [SourceConfig; 2],
    textures: [SourceTexture; 2],
    target: Vec<[f32; 4]>,
    sink: Sender<OutputFrame>,
}

impl SoftwareBackend {
    pub fn new(config: &CompositorConfig, sink: Sender<OutputFrame>) -> Self {
        tracing::debug!(output = %config.output, "software compositor ready");
        Self {
            output: config.output,
            declared: [config.primary, config.secondary],
            textures: [
                SourceTexture::allocate(&config.primary),
                SourceTexture::allocate(&config.secondary),
            ],
            target: vec![[0.0, 0.0, 0.0, 1.0]; config.output.area()],
            sink,
        }
    }

    fn blend(&mut self, x: u32, y: u32, src: [f32; 4]) {
        let dst = &mut self.target[y as usize * self.output.width as usize + x as usize];
        let alpha = src[3];
        for channel in 0..3 {
            dst[channel] = src[channel] * alpha + dst[channel] * (1.0 - alpha);
        }
        dst[3] = alpha + dst[3] * (1.0 - alpha);
    }

    fn fill(&mut self, rect: &NdcRect, color: [f32; 4]) {
        let span = Span::of(rect, self.output);
        for y in span.rows.clone() {
            for x in span.columns.clone() {
                self.blend(x, y, color);
            }
        }
    }

    fn outline(&mut self, rect: &NdcRect, color: [f32; 4]) {
        let span = Span::of(rect, self.output);
        if span.columns.is_empty() || span.rows.is_empty() {
            return;
        }
        let (left, right) = (span.columns.start, span.columns.end - 1);
        let (top, bottom) = (span.rows.start, span.rows.end - 1);
        for x in span.columns.clone() {
            self.blend(x, top, color);
            if bottom != top {
                self.blend(x, bottom, color);
            }
        }
        for y in (top + 1)..bottom {
            self.blend(left, y, color);
            if right != left {
                self.blend(right, y, color);
            }
        }
    }

    fn draw_layer(&mut self, layer: &LayerPlan) {
        let rect = layer.quad.rect;
        let span = Span::of(&rect, self.output);
        let (width, height) = (self.output.width as f32, self.output.height as f32);
        for y in span.rows.clone() {
            let ndc_y = 1.0 - (y as f32 + 0.5) / height * 2.0;
            let t = (ndc_y - rect.bottom) / rect.height;
            for x in span.columns.clone() {
                let ndc_x = (x as f32 + 0.5) / width * 2.0 - 1.0;
                let s = (ndc_x - rect.left) / rect.width;
                let uv = layer.quad.uv_at(s, t);
                let color = self.textures[layer.role.index()].sample(uv, layer.opacity);
                self.blend(x, y, color);
            }
        }
    }

    fn snapshot(&self, stamp: FrameStamp) -> OutputFrame {
        let to_byte = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        let pixels = self
            .target
            .iter()
            .flat_map(|pixel| pixel.map(to_byte))
            .collect();
        OutputFrame {
            size: self.output,
            stamp,
            pixels,
        }
    }
}

impl RenderBackend for SoftwareBackend {
    fn upload(&mut self, role: SourceRole, frame: &SourceFrame) -> Result<()> {
        frame.validate_for(role, &self.declared[role.index()])?;
        match (&mut self.textures[role.index()], frame) {
            (SourceTexture::Packed { texels, .. }, SourceFrame::Packed(buffer)) => {
                texels.copy_from_slice(&buffer.tight_bytes(PACKED_CHANNELS)?);
            }
            (SourceTexture::Planar { y, u, v }, SourceFrame::Planar(planes)) => {
                y.samples.copy_from_slice(&planes.y.tight_bytes(1)?);
                u.samples.copy_from_slice(&planes.u.tight_bytes(1)?);
                v.samples.copy_from_slice(&planes.v.tight_bytes(1)?);
            }
            (_, frame) => {
                return Err(BufferError::LayoutMismatch {
                    role,
                    expected: self.declared[role.index()].format.name(),
                    actual: frame.layout_name(),
                }
                .into())
            }
        }
        Ok(())
    }

    fn render(&mut self, ops: &[DrawOp<'_>], stamp: FrameStamp) -> Result<FrameOutcome> {
        self.target.fill([0.0, 0.0, 0.0, 1.0]);
        for op in ops {
            match op {
                DrawOp::Fill { rect, color } => self.fill(rect, *color),
                DrawOp::Outline { rect, color } => self.outline(rect, *color),
                DrawOp::Layer(layer) => self.draw_layer(layer),
            }
        }
        self.sink
            .send(self.snapshot(stamp))
            .map_err(|_| CompositorError::GpuOperation("software output sink disconnected".into()))?;
        Ok(FrameOutcome::Presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{PixelBuffer, PlanarFrame};
    use crate::compositor::Residency;
    use crate::config::LayoutConfig;
    use crate::types::{ChromaSubsampling, Rotation};
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    fn stamp() -> FrameStamp {
        FrameStamp {
            timestamp: Duration::ZERO,
            frame_index: 0,
        }
    }

    #[test]
    fn neutral_chroma_is_gray() {
        let [r, g, b] = yuv_to_rgb(0.5, 0.5, 0.5);
        assert!((r - 0.5).abs() < 1e-6 && (g - 0.5).abs() < 1e-6 && (b - 0.5).abs() < 1e-6);
        let [r, _, b] = yuv_to_rgb(1.0, 1.0, 1.0);
        assert_eq!((r, b), (1.0, 1.0));
    }

    #[test]
    fn empty_draw_list_clears_to_black() {
        let (tx, rx) = unbounded();
        let config = CompositorConfig::with_sizes(Size::new(4, 4), Size::new(4, 4), Size::new(8, 4));
        let mut backend = SoftwareBackend::new(&config, tx);
        backend.render(&[], stamp()).expect("render");
        let frame = rx.try_recv().expect("frame");
        assert!(frame.pixels.chunks(4).all(|pixel| pixel == [0, 0, 0, 255]));
    }

    #[test]
    fn translucent_packed_overlay_blends_and_ignores_source_alpha() {
        let (tx, rx) = unbounded();
        let mut config =
            CompositorConfig::with_sizes(Size::new(4, 4), Size::new(4, 4), Size::new(16, 16));
        config.layout = LayoutConfig {
            overlay_opacity: 0.5,
            width_ratio: 1.0,
            height_ratio: 1.0,
            margin_ratio: 0.0,
            ..LayoutConfig::default()
        };
        let plan = CompositePlan::from_config(&config);
        let mut backend = SoftwareBackend::new(&config, tx);
        // Fully transparent texels must still show up: packed alpha is forced opaque.
        backend
            .upload(
                SourceRole::Primary,
                &SourceFrame::Packed(PixelBuffer::filled(4, 4, &[255, 255, 255, 0])),
            )
            .expect("upload");
        let mut residency = Residency::default();
        residency.mark(SourceRole::Primary);
        backend
            .render(&plan.draw_ops(residency), stamp())
            .expect("render");
        let frame = rx.try_recv().expect("frame");
        let [r, g, b, a] = frame.pixel(8, 8);
        assert!((127..=128).contains(&r) && r == g && g == b);
        assert_eq!(a, 255);
    }

    #[test]
    fn translucent_layers_keep_the_output_opaque() {
        let (tx, rx) = unbounded();
        let mut config =
            CompositorConfig::with_sizes(Size::new(4, 4), Size::new(4, 4), Size::new(40, 40));
        config.layout = LayoutConfig {
            rotation: Rotation::Deg0,
            overlay_frame: true,
            ..LayoutConfig::camera_background()
        };
        let plan = CompositePlan::from_config(&config);
        let mut backend = SoftwareBackend::new(&config, tx);
        backend
            .upload(
                SourceRole::Secondary,
                &SourceFrame::Planar(PlanarFrame::filled(
                    Size::new(4, 4),
                    ChromaSubsampling::Yuv420,
                    128,
                    128,
                    128,
                )),
            )
            .expect("upload");
        backend
            .upload(
                SourceRole::Primary,
                &SourceFrame::Packed(PixelBuffer::filled(4, 4, &[255, 0, 0, 255])),
            )
            .expect("upload");
        let mut residency = Residency::default();
        residency.mark(SourceRole::Primary);
        residency.mark(SourceRole::Secondary);
        backend
            .render(&plan.draw_ops(residency), stamp())
            .expect("render");

        let frame = rx.try_recv().expect("frame");
        let [r, g, b, _] = frame.pixel(20, 20);
        assert!(r > g + 100 && g.abs_diff(b) <= 2, "expected a red tint, got {r} {g} {b}");
        assert!(frame.pixels.chunks(4).all(|pixel| pixel[3] == 255));
    }

    #[test]
    fn bgra_texels_are_swizzled() {
        let (tx, rx) = unbounded();
        let mut config =
            CompositorConfig::with_sizes(Size::new(2, 2), Size::new(2, 2), Size::new(4, 4));
        config.primary.format = PixelLayout::Packed {
            order: ChannelOrder::Bgra,
        };
        config.layout.background = SourceRole::Primary;
        let plan = CompositePlan::from_config(&config);
        let mut backend = SoftwareBackend::new(&config, tx);
        backend
            .upload(
                SourceRole::Primary,
                &SourceFrame::Packed(PixelBuffer::filled(2, 2, &[255, 0, 0, 255])),
            )
            .expect("upload");
        let mut residency = Residency::default();
        residency.mark(SourceRole::Primary);
        backend
            .render(&plan.draw_ops(residency), stamp())
            .expect("render");
        assert_eq!(rx.try_recv().expect("frame").pixel(0, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn upload_rejects_wrong_layout() {
        let (tx, _rx) = unbounded();
        let config = CompositorConfig::with_sizes(Size::new(4, 4), Size::new(4, 4), Size::new(8, 8));
        let mut backend = SoftwareBackend::new(&config, tx);
        let frame = PlanarFrame::filled(Size::new(4, 4), ChromaSubsampling::Yuv420, 0, 0, 0);
        let err = backend
            .upload(SourceRole::Primary, &SourceFrame::Planar(frame))
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn debug_frame_outlines_overlay() {
        let (tx, rx) = unbounded();
        let mut config =
            CompositorConfig::with_sizes(Size::new(4, 4), Size::new(4, 4), Size::new(100, 100));
        config.layout = LayoutConfig::display_background();
        let plan = CompositePlan::from_config(&config);
        let mut backend = SoftwareBackend::new(&config, tx);
        backend
            .upload(
                SourceRole::Secondary,
                &SourceFrame::Planar(PlanarFrame::filled(
                    Size::new(4, 4),
                    ChromaSubsampling::Yuv420,
                    255,
                    128,
                    128,
                )),
            )
            .expect("upload");
        let mut residency = Residency::default();
        residency.mark(SourceRole::Secondary);
        backend
            .render(&plan.draw_ops(residency), stamp())
            .expect("render");
        let frame = rx.try_recv().expect("frame");
        let frame_rect = plan.frame.expect("debug frame").rect;
        let span = Span::of(&frame_rect, frame.size);
        // The border row is yellow, the overlay interior is white.
        let [r, g, b, _] = frame.pixel(span.columns.start + 1, span.rows.start);
        assert!(r > 200 && g > 200 && b < 30);
        let [r, g, b, _] = frame.pixel((span.columns.start + span.columns.end) / 2, (span.rows.start + span.rows.end) / 2);
        assert!(r > 250 && g > 250 && b > 250);
    }
}
