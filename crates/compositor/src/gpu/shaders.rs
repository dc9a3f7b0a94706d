use std::borrow::Cow;

use wgpu::naga::ShaderStage;

use crate::error::CompositorError;

/// Compiles one of the GLSL programs below through naga's GLSL frontend.
///
/// Validation errors are captured in an error scope so a broken program
/// surfaces as [`CompositorError::ShaderCompilation`] instead of a panic in
/// the device error handler.
pub(crate) fn compile(
    device: &wgpu::Device,
    program: &'static str,
    stage: ShaderStage,
    source: &'static str,
) -> Result<wgpu::ShaderModule, CompositorError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(program),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(source),
            stage,
            defines: &[],
        },
    });
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(CompositorError::ShaderCompilation {
            program,
            message: error.to_string(),
        });
    }
    tracing::debug!(program, ?stage, "compiled shader");
    Ok(module)
}

/// Shared vertex stage: positions arrive in device coordinates.
pub(crate) const QUAD_VERTEX: &str = r"#version 450
layout(location = 0) in vec2 a_position;
layout(location = 1) in vec2 a_uv;
layout(location = 0) out vec2 v_uv;

void main() {
    v_uv = a_uv;
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";

/// Packed colour with source alpha discarded in favour of the layer opacity.
pub(crate) const PACKED_FRAGMENT: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 out_color;

layout(set = 0, binding = 0) uniform LayerParams {
    vec4 color;
    vec4 params;
} layer;
layout(set = 1, binding = 0) uniform sampler source_sampler;
layout(set = 1, binding = 1) uniform texture2D packed_texture;

void main() {
    vec3 rgb = texture(sampler2D(packed_texture, source_sampler), v_uv).rgb;
    out_color = vec4(rgb, layer.params.x);
}
";

/// Full-range BT.601 from three single-channel planes.
pub(crate) const PLANAR_FRAGMENT: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 out_color;

layout(set = 0, binding = 0) uniform LayerParams {
    vec4 color;
    vec4 params;
} layer;
layout(set = 1, binding = 0) uniform sampler source_sampler;
layout(set = 1, binding = 1) uniform texture2D y_plane;
layout(set = 1, binding = 2) uniform texture2D u_plane;
layout(set = 1, binding = 3) uniform texture2D v_plane;

void main() {
    float y = texture(sampler2D(y_plane, source_sampler), v_uv).r;
    float u = texture(sampler2D(u_plane, source_sampler), v_uv).r - 0.5;
    float v = texture(sampler2D(v_plane, source_sampler), v_uv).r - 0.5;
    vec3 rgb = vec3(
        y + 1.402 * v,
        y - 0.344136 * u - 0.714136 * v,
        y + 1.772 * u
    );
    out_color = vec4(clamp(rgb, 0.0, 1.0), layer.params.x);
}
";

/// Flat colour for the overlay backing and border.
pub(crate) const SOLID_FRAGMENT: &str = r"#version 450
layout(location = 0) out vec4 out_color;

layout(set = 0, binding = 0) uniform LayerParams {
    vec4 color;
    vec4 params;
} layer;

void main() {
    out_color = layer.color;
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::naga::front::glsl::{Frontend, Options};
    use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

    fn parse_and_validate(stage: ShaderStage, source: &str) {
        let mut frontend = Frontend::default();
        let module = frontend
            .parse(&Options::from(stage), source)
            .expect("GLSL should parse");
        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .expect("module should validate");
    }

    #[test]
    fn programs_parse_and_validate() {
        parse_and_validate(ShaderStage::Vertex, QUAD_VERTEX);
        parse_and_validate(ShaderStage::Fragment, PACKED_FRAGMENT);
        parse_and_validate(ShaderStage::Fragment, PLANAR_FRAGMENT);
        parse_and_validate(ShaderStage::Fragment, SOLID_FRAGMENT);
    }

    #[test]
    fn planar_program_uses_bt601_coefficients() {
        for coefficient in ["1.402", "0.344136", "0.714136", "1.772"] {
            assert!(PLANAR_FRAGMENT.contains(coefficient));
        }
    }
}
