use bytemuck::{Pod, Zeroable};

use crate::geometry::{NdcRect, Quad};

/// Interleaved position and texture coordinate, matching the vertex shader inputs.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl QuadVertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Largest vertex list any draw uses: a closed outline.
pub(crate) const MAX_VERTICES: usize = 5;

/// Triangle-strip vertices for a textured quad.
pub(crate) fn quad_vertices(quad: &Quad) -> [QuadVertex; 4] {
    let corners = quad.rect.corners();
    std::array::from_fn(|index| QuadVertex {
        position: corners[index],
        uv: quad.uvs[index],
    })
}

/// Triangle-strip vertices for an untextured rectangle.
pub(crate) fn fill_vertices(rect: &NdcRect) -> [QuadVertex; 4] {
    rect.corners().map(|position| QuadVertex {
        position,
        uv: [0.0, 0.0],
    })
}

/// Line-strip vertices tracing a rectangle.
pub(crate) fn outline_vertices(rect: &NdcRect) -> [QuadVertex; 5] {
    rect.outline().map(|position| QuadVertex {
        position,
        uv: [0.0, 0.0],
    })
}

/// Per-draw uniform block shared by every program (`LayerParams` in GLSL).
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct LayerUniforms {
    /// Solid colour for fills and outlines.
    pub color: [f32; 4],
    /// `x` carries the layer opacity; the rest is padding.
    pub params: [f32; 4],
}

impl LayerUniforms {
    pub fn textured(opacity: f32) -> Self {
        Self {
            color: [0.0; 4],
            params: [opacity, 0.0, 0.0, 0.0],
        }
    }

    pub fn solid(color: [f32; 4]) -> Self {
        Self {
            color,
            params: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TexWindow;
    use crate::types::Rotation;

    #[test]
    fn uniform_block_matches_std140_size() {
        assert_eq!(std::mem::size_of::<LayerUniforms>(), 32);
        assert_eq!(std::mem::size_of::<QuadVertex>(), 16);
    }

    #[test]
    fn quad_vertices_pair_corners_with_uvs() {
        let quad = Quad::new(NdcRect::FULL, TexWindow::FULL, Rotation::Deg0);
        let vertices = quad_vertices(&quad);
        assert_eq!(vertices[0].position, [-1.0, -1.0]);
        assert_eq!(vertices[0].uv, [0.0, 1.0]);
        assert_eq!(vertices[3].position, [1.0, 1.0]);
        assert_eq!(vertices[3].uv, [1.0, 0.0]);
        assert_eq!(outline_vertices(&NdcRect::FULL)[4].position, [-1.0, -1.0]);
    }
}
