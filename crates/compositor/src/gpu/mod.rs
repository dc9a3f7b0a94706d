//! wgpu presentation backend.
//!
//! - `context` owns instance, device and surface wiring, including format and
//!   present-mode selection and recovery after the swapchain is lost.
//! - `textures` allocates each source's planes once at its declared size and
//!   overwrites them in place.
//! - `shaders` holds the GLSL programs and compiles them through naga.
//! - `pipeline` builds the textured, fill and outline pipelines with their
//!   bind group layouts.
//! - `uniforms` mirrors the vertex layout and the per-draw uniform block.
//! - `state` turns draw ops into a render pass and exposes [`WgpuFactory`].

mod context;
mod pipeline;
mod shaders;
mod state;
mod textures;
mod uniforms;

pub use state::WgpuFactory;
