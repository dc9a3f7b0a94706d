use wgpu::naga::ShaderStage;

use crate::error::CompositorError;
use crate::types::PixelLayout;

use super::shaders::{self, compile};
use super::textures::SourceTextures;
use super::uniforms::QuadVertex;

/// Every program and bind group layout a session draws with.
///
/// Set 0 holds the per-draw [`LayerUniforms`](super::uniforms::LayerUniforms);
/// set 1 holds a source's sampler followed by its plane textures.
pub(crate) struct Pipelines {
    pub layer_layout: wgpu::BindGroupLayout,
    packed_layout: wgpu::BindGroupLayout,
    planar_layout: wgpu::BindGroupLayout,
    pub packed: wgpu::RenderPipeline,
    pub planar: wgpu::RenderPipeline,
    pub fill: wgpu::RenderPipeline,
    pub outline: wgpu::RenderPipeline,
}

impl Pipelines {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Result<Self, CompositorError> {
        let vertex = compile(device, "quad vertex", ShaderStage::Vertex, shaders::QUAD_VERTEX)?;
        let packed_fragment = compile(
            device,
            "packed fragment",
            ShaderStage::Fragment,
            shaders::PACKED_FRAGMENT,
        )?;
        let planar_fragment = compile(
            device,
            "planar fragment",
            ShaderStage::Fragment,
            shaders::PLANAR_FRAGMENT,
        )?;
        let solid_fragment = compile(
            device,
            "solid fragment",
            ShaderStage::Fragment,
            shaders::SOLID_FRAGMENT,
        )?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let layer_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("layer uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let packed_layout = source_layout(device, "packed source layout", 1);
        let planar_layout = source_layout(device, "planar source layout", 3);

        let textured = |label: &str, source_layout: &wgpu::BindGroupLayout, fragment: &wgpu::ShaderModule| {
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&layer_layout, source_layout],
                push_constant_ranges: &[],
            });
            create_pipeline(
                device,
                label,
                &layout,
                &vertex,
                fragment,
                format,
                wgpu::PrimitiveTopology::TriangleStrip,
            )
        };
        let packed = textured("packed pipeline", &packed_layout, &packed_fragment);
        let planar = textured("planar pipeline", &planar_layout, &planar_fragment);

        let solid_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("solid pipeline layout"),
            bind_group_layouts: &[&layer_layout],
            push_constant_ranges: &[],
        });
        let fill = create_pipeline(
            device,
            "fill pipeline",
            &solid_layout,
            &vertex,
            &solid_fragment,
            format,
            wgpu::PrimitiveTopology::TriangleStrip,
        );
        let outline = create_pipeline(
            device,
            "outline pipeline",
            &solid_layout,
            &vertex,
            &solid_fragment,
            format,
            wgpu::PrimitiveTopology::LineStrip,
        );

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(CompositorError::ShaderCompilation {
                program: "composite pipelines",
                message: error.to_string(),
            });
        }

        Ok(Self {
            layer_layout,
            packed_layout,
            planar_layout,
            packed,
            planar,
            fill,
            outline,
        })
    }

    pub fn textured(&self, layout: PixelLayout) -> &wgpu::RenderPipeline {
        if layout.is_planar() {
            &self.planar
        } else {
            &self.packed
        }
    }

    /// Binds a source's sampler and plane views for the matching pipeline.
    pub fn source_bind_group(
        &self,
        device: &wgpu::Device,
        label: &str,
        textures: &SourceTextures,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        let layout = match textures {
            SourceTextures::Packed(_) => &self.packed_layout,
            SourceTextures::Planar { .. } => &self.planar_layout,
        };
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Sampler(sampler),
        }];
        entries.extend(textures.views().into_iter().enumerate().map(|(index, view)| {
            wgpu::BindGroupEntry {
                binding: index as u32 + 1,
                resource: wgpu::BindingResource::TextureView(view),
            }
        }));
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        })
    }
}

fn source_layout(device: &wgpu::Device, label: &str, planes: u32) -> wgpu::BindGroupLayout {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }];
    entries.extend((1..=planes).map(|binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }));
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    vertex: &wgpu::ShaderModule,
    fragment: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
    topology: wgpu::PrimitiveTopology,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex,
            entry_point: Some("main"),
            buffers: &[QuadVertex::layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}
