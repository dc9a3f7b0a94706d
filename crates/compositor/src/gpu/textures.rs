use crate::buffer::{PixelBuffer, SourceFrame};
use crate::config::SourceConfig;
use crate::error::{BufferError, CompositorError};
use crate::types::{ChannelOrder, PixelLayout, Size, SourceRole};

/// One sampled texture, allocated once at its declared size.
pub(crate) struct PlaneTexture {
    texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    plane: &'static str,
    size: Size,
    channels: usize,
}

impl PlaneTexture {
    fn new(
        device: &wgpu::Device,
        label: &str,
        plane: &'static str,
        size: Size,
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let channels = format.block_copy_size(None).unwrap_or(1) as usize;
        Self {
            texture,
            view,
            plane,
            size,
            channels,
        }
    }

    /// Overwrites the whole texture in place; strided buffers are packed first.
    fn write(&self, queue: &wgpu::Queue, buffer: &PixelBuffer) -> Result<(), CompositorError> {
        check_plane(self.plane, self.size, buffer)?;
        let bytes = buffer.tight_bytes(self.channels)?;
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.size.width * self.channels as u32),
                rows_per_image: Some(self.size.height),
            },
            extent(self.size),
        );
        Ok(())
    }
}

/// A texture is only ever overwritten by a buffer of exactly its size.
fn check_plane(plane: &'static str, expected: Size, buffer: &PixelBuffer) -> Result<(), BufferError> {
    if buffer.size() == expected {
        Ok(())
    } else {
        Err(BufferError::DimensionMismatch {
            plane,
            expected,
            actual: buffer.size(),
        })
    }
}

fn check_layout(role: SourceRole, expected: &'static str, frame: &SourceFrame) -> Result<(), BufferError> {
    if frame.layout_name() == expected {
        Ok(())
    } else {
        Err(BufferError::LayoutMismatch {
            role,
            expected,
            actual: frame.layout_name(),
        })
    }
}

fn extent(size: Size) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

/// Texture set for one source, matching its declared layout.
pub(crate) enum SourceTextures {
    Packed(PlaneTexture),
    Planar {
        y: PlaneTexture,
        u: PlaneTexture,
        v: PlaneTexture,
    },
}

impl SourceTextures {
    pub(crate) fn allocate(device: &wgpu::Device, role: SourceRole, source: &SourceConfig) -> Self {
        match source.format {
            PixelLayout::Packed { order } => {
                // Sampling a BGRA texture already yields RGB in the shader.
                let format = match order {
                    ChannelOrder::Rgba => wgpu::TextureFormat::Rgba8Unorm,
                    ChannelOrder::Bgra => wgpu::TextureFormat::Bgra8Unorm,
                };
                SourceTextures::Packed(PlaneTexture::new(
                    device,
                    &format!("{role} packed"),
                    "packed",
                    source.size,
                    format,
                ))
            }
            PixelLayout::Planar { subsampling } => {
                let chroma = subsampling.chroma_size(source.size);
                let plane = |name: &'static str, size| {
                    PlaneTexture::new(
                        device,
                        &format!("{role} {name} plane"),
                        name,
                        size,
                        wgpu::TextureFormat::R8Unorm,
                    )
                };
                SourceTextures::Planar {
                    y: plane("y", source.size),
                    u: plane("u", chroma),
                    v: plane("v", chroma),
                }
            }
        }
    }

    pub(crate) fn upload(
        &self,
        queue: &wgpu::Queue,
        role: SourceRole,
        frame: &SourceFrame,
    ) -> Result<(), CompositorError> {
        check_layout(role, self.layout_name(), frame)?;
        match (self, frame) {
            (SourceTextures::Packed(texture), SourceFrame::Packed(buffer)) => texture.write(queue, buffer),
            (SourceTextures::Planar { y, u, v }, SourceFrame::Planar(planes)) => {
                y.write(queue, &planes.y)?;
                u.write(queue, &planes.u)?;
                v.write(queue, &planes.v)
            }
            (textures, frame) => Err(BufferError::LayoutMismatch {
                role,
                expected: textures.layout_name(),
                actual: frame.layout_name(),
            }
            .into()),
        }
    }

    fn layout_name(&self) -> &'static str {
        match self {
            SourceTextures::Packed(_) => "packed",
            SourceTextures::Planar { .. } => "planar",
        }
    }

    pub(crate) fn views(&self) -> Vec<&wgpu::TextureView> {
        match self {
            SourceTextures::Packed(texture) => vec![&texture.view],
            SourceTextures::Planar { y, u, v } => vec![&y.view, &u.view, &v.view],
        }
    }
}

/// Bilinear, clamped at the edges so cropped windows never wrap.
pub(crate) fn create_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("source sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}
