use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::backend::{BackendFactory, FrameOutcome, RenderBackend};
use crate::buffer::SourceFrame;
use crate::compositor::{CompositePlan, DrawOp};
use crate::config::{CompositorConfig, SourceConfig};
use crate::error::{CompositorError, Result};
use crate::runtime::FrameStamp;
use crate::types::{Size, SourceRole};

use super::context::GpuContext;
use super::pipeline::Pipelines;
use super::textures::{create_sampler, SourceTextures};
use super::uniforms::{
    fill_vertices, outline_vertices, quad_vertices, LayerUniforms, QuadVertex, MAX_VERTICES,
};

const FILL_SLOT: usize = 2;
const OUTLINE_SLOT: usize = 3;
const SLOT_LABELS: [&str; 4] = ["primary layer", "secondary layer", "overlay backing", "overlay border"];

/// Builds a wgpu backend presenting to a window or surface handle.
///
/// The handle is shared with the caller and must stay valid for as long as
/// the session runs; it is released when the session stops.
pub struct WgpuFactory<W> {
    target: Arc<W>,
}

impl<W> WgpuFactory<W>
where
    W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
{
    pub fn new(target: Arc<W>) -> Self {
        Self { target }
    }
}

impl<W> BackendFactory for WgpuFactory<W>
where
    W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
{
    fn create(
        self: Box<Self>,
        config: &CompositorConfig,
        _plan: &CompositePlan,
    ) -> Result<Box<dyn RenderBackend>> {
        Ok(Box::new(WgpuBackend::new(self.target, config)?))
    }
}

/// Vertex and uniform storage for one kind of draw, rewritten every frame.
struct DrawSlot {
    vertices: wgpu::Buffer,
    uniforms: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl DrawSlot {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, label: &str) -> Self {
        let vertices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (MAX_VERTICES * std::mem::size_of::<QuadVertex>()) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<LayerUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }],
        });
        Self {
            vertices,
            uniforms,
            bind_group,
        }
    }
}

struct Draw<'p> {
    slot: usize,
    pipeline: &'p wgpu::RenderPipeline,
    source: Option<SourceRole>,
    vertex_count: u32,
}

pub(crate) struct WgpuBackend {
    slots: [DrawSlot; 4],
    source_groups: [wgpu::BindGroup; 2],
    sources: [SourceTextures; 2],
    declared: [SourceConfig; 2],
    pipelines: Pipelines,
    output: Size,
    context: GpuContext,
}

impl WgpuBackend {
    pub(crate) fn new<W>(target: Arc<W>, config: &CompositorConfig) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let context = GpuContext::new(target, config)?;
        let device = &context.device;
        let pipelines = Pipelines::new(device, context.format())?;
        let sampler = create_sampler(device);

        let sources =
            SourceRole::ALL.map(|role| SourceTextures::allocate(device, role, config.source(role)));
        let source_groups = std::array::from_fn(|index| {
            let label = format!("{} source", SourceRole::ALL[index]);
            pipelines.source_bind_group(device, &label, &sources[index], &sampler)
        });
        let slots = SLOT_LABELS.map(|label| DrawSlot::new(device, &pipelines.layer_layout, label));

        if let Some(message) = context.take_uncaptured_error() {
            return Err(CompositorError::GpuOperation(message));
        }
        info!(
            format = ?context.format(),
            present_mode = ?context.config.present_mode,
            output = %config.output,
            "wgpu backend ready"
        );

        Ok(Self {
            slots,
            source_groups,
            sources,
            declared: [config.primary, config.secondary],
            pipelines,
            output: config.output,
            context,
        })
    }

    fn stage(&self, slot: usize, vertices: &[QuadVertex], uniforms: LayerUniforms) {
        let queue = &self.context.queue;
        let slot = &self.slots[slot];
        queue.write_buffer(&slot.vertices, 0, bytemuck::cast_slice(vertices));
        queue.write_buffer(&slot.uniforms, 0, bytemuck::bytes_of(&uniforms));
    }

    /// Writes per-draw buffers and resolves each op to its pipeline.
    fn prepare(&self, ops: &[DrawOp<'_>]) -> Vec<Draw<'_>> {
        ops.iter()
            .map(|op| match op {
                DrawOp::Fill { rect, color } => {
                    self.stage(FILL_SLOT, &fill_vertices(rect), LayerUniforms::solid(*color));
                    Draw {
                        slot: FILL_SLOT,
                        pipeline: &self.pipelines.fill,
                        source: None,
                        vertex_count: 4,
                    }
                }
                DrawOp::Outline { rect, color } => {
                    self.stage(OUTLINE_SLOT, &outline_vertices(rect), LayerUniforms::solid(*color));
                    Draw {
                        slot: OUTLINE_SLOT,
                        pipeline: &self.pipelines.outline,
                        source: None,
                        vertex_count: 5,
                    }
                }
                DrawOp::Layer(layer) => {
                    let slot = layer.role.index();
                    self.stage(slot, &quad_vertices(&layer.quad), LayerUniforms::textured(layer.opacity));
                    Draw {
                        slot,
                        pipeline: self.pipelines.textured(layer.layout),
                        source: Some(layer.role),
                        vertex_count: 4,
                    }
                }
            })
            .collect()
    }
}

impl RenderBackend for WgpuBackend {
    fn upload(&mut self, role: SourceRole, frame: &SourceFrame) -> Result<()> {
        frame.validate_for(role, &self.declared[role.index()])?;
        self.sources[role.index()].upload(&self.context.queue, role, frame)
    }

    fn render(&mut self, ops: &[DrawOp<'_>], stamp: FrameStamp) -> Result<FrameOutcome> {
        let frame = match self.context.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                warn!(frame = stamp.frame_index, "output surface lost; reconfiguring");
                self.context.reconfigure();
                return Ok(FrameOutcome::Skipped);
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!(frame = stamp.frame_index, "timed out acquiring output frame");
                return Ok(FrameOutcome::Skipped);
            }
            Err(err) => {
                return Err(CompositorError::GpuOperation(format!(
                    "failed to acquire output frame: {err}"
                )))
            }
        };

        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(self.context.format()),
            ..Default::default()
        });
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("composite encoder"),
                });

        let draws = self.prepare(ops);
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(
                0.0,
                0.0,
                self.output.width as f32,
                self.output.height as f32,
                0.0,
                1.0,
            );
            for draw in &draws {
                let slot = &self.slots[draw.slot];
                pass.set_pipeline(draw.pipeline);
                pass.set_bind_group(0, &slot.bind_group, &[]);
                if let Some(role) = draw.source {
                    pass.set_bind_group(1, &self.source_groups[role.index()], &[]);
                }
                pass.set_vertex_buffer(0, slot.vertices.slice(..));
                pass.draw(0..draw.vertex_count, 0..1);
            }
        }

        self.context.queue.submit(Some(encoder.finish()));
        if let Some(message) = self.context.take_uncaptured_error() {
            return Err(CompositorError::GpuOperation(message));
        }
        frame.present();
        debug!(
            frame = stamp.frame_index,
            timestamp_us = stamp.timestamp.as_micros() as u64,
            draws = draws.len(),
            "presented composite"
        );
        Ok(FrameOutcome::Presented)
    }
}
