//! Seam between the render loop and whatever rasterizes the composite.
//!
//! Backends are created on the GPU thread by a [`BackendFactory`] and never
//! leave it. Dropping a backend releases its textures, pipelines and surface.

use crate::buffer::SourceFrame;
use crate::compositor::{CompositePlan, DrawOp};
use crate::config::CompositorConfig;
use crate::error::Result;
use crate::runtime::FrameStamp;
use crate::types::SourceRole;

/// Result of one render attempt that reached the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The composite was drawn and handed to the output.
    Presented,
    /// The output could not take a frame right now; nothing was drawn.
    Skipped,
}

pub trait RenderBackend {
    /// Overwrites the texture(s) owned by `role` with an already validated frame.
    fn upload(&mut self, role: SourceRole, frame: &SourceFrame) -> Result<()>;

    /// Clears to opaque black, executes `ops` with alpha blending and presents
    /// the result stamped with `stamp`.
    fn render(&mut self, ops: &[DrawOp<'_>], stamp: FrameStamp) -> Result<FrameOutcome>;
}

/// Builds a backend bound to an output on the GPU thread.
pub trait BackendFactory: Send {
    fn create(
        self: Box<Self>,
        config: &CompositorConfig,
        plan: &CompositePlan,
    ) -> Result<Box<dyn RenderBackend>>;
}

impl<F> BackendFactory for F
where
    F: FnOnce(&CompositorConfig, &CompositePlan) -> Result<Box<dyn RenderBackend>> + Send,
{
    fn create(
        self: Box<Self>,
        config: &CompositorConfig,
        plan: &CompositePlan,
    ) -> Result<Box<dyn RenderBackend>> {
        (*self)(config, plan)
    }
}
