//! Two-source video compositor.
//!
//! Two producers (typically a camera and a screen capture) push frames into a
//! [`CompositorSession`]; a dedicated GPU thread keeps the latest frame of each
//! resident as a texture and redraws a picture-in-picture composite onto one
//! output surface whenever either source changes.
//!
//! ```text
//!   producer A ──▶ SourceInput ─┐                    ┌─▶ upload ─▶ textures
//!                               ├─▶ latest-frame slot ┤
//!   producer B ──▶ SourceInput ─┘    + FrameReady     └─▶ RenderGate ─▶ draw ops
//!                                        │                              │
//!                                        ▼                              ▼
//!                                 "compositor-gpu" thread ──▶ RenderBackend::render
//! ```
//!
//! Layout is computed once per session from [`CompositorConfig`] into a
//! [`CompositePlan`]: one source fills the output with aspect-preserving crop
//! and optional rotation, the other sits in an anchored overlay window. Only
//! texture contents change frame to frame.
//!
//! Rendering sits behind [`RenderBackend`]. [`WgpuFactory`] presents to a
//! window handle through `wgpu`; [`SoftwareFactory`] rasterizes on the CPU and
//! hands out [`OutputFrame`]s, which is what the tests drive.

mod backend;
mod buffer;
mod compositor;
mod config;
mod error;
mod geometry;
mod gpu;
mod ingest;
mod runtime;
mod session;
mod software;
mod types;

pub use backend::{BackendFactory, FrameOutcome, RenderBackend};
pub use buffer::{repack, PixelBuffer, PlanarFrame, SourceFrame, PACKED_CHANNELS};
pub use compositor::{
    CompositePlan, DrawOp, LayerPlan, OverlayFrame, Residency, BACKING_COLOR, BORDER_COLOR,
};
pub use config::{CompositorConfig, ConfigError, GpuConfig, LayoutConfig, SourceConfig};
pub use error::{BufferError, CompositorError, InitStage, Result};
pub use geometry::{fit_window, overlay_rect, rotate_uv, visible_fraction, NdcRect, Quad, TexWindow};
pub use gpu::WgpuFactory;
pub use ingest::{InputEndpoints, SessionStats, SourceInput, SourceStats, Submission};
pub use runtime::{BoxedClock, FrameStamp, MonotonicClock, PresentationClock};
pub use session::CompositorSession;
pub use software::{yuv_to_rgb, OutputFrame, SoftwareBackend, SoftwareFactory};
pub use types::{
    ChannelOrder, ChromaSubsampling, GpuPowerPreference, OverlayAnchor, PixelLayout,
    PresentPreference, Rotation, Size, SourceRole, StartupPolicy,
};
