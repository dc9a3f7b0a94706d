use std::fmt;

use crate::config::ConfigError;
use crate::types::{Size, SourceRole};

/// Step of GPU initialization that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// The dedicated GPU thread could not be spawned or died mid-handshake.
    Thread,
    /// Binding the output surface handle.
    Surface,
    /// Finding a GPU configuration with an 8-bit RGBA surface format.
    Adapter,
    /// Creating the device and queue.
    Device,
    /// Configuring the surface for presentation.
    Configure,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitStage::Thread => "GPU thread",
            InitStage::Surface => "output surface",
            InitStage::Adapter => "GPU configuration",
            InitStage::Device => "GPU context",
            InitStage::Configure => "surface configuration",
        })
    }
}

/// Why a producer buffer was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("buffer has a zero dimension ({0})")]
    ZeroDimension(Size),
    #[error("pixel stride {pixel_stride} is smaller than {channels} channel(s)")]
    PixelStrideTooSmall { pixel_stride: usize, channels: usize },
    #[error("row stride {row_stride} is smaller than width {width} x pixel stride {pixel_stride}")]
    RowStrideTooSmall {
        row_stride: usize,
        width: u32,
        pixel_stride: usize,
    },
    #[error("buffer holds {actual} bytes but {required} are needed")]
    Truncated { required: usize, actual: usize },
    #[error("{plane} plane is {actual} but {expected} was declared")]
    DimensionMismatch {
        plane: &'static str,
        expected: Size,
        actual: Size,
    },
    #[error("{role} source expects {expected} frames, got {actual}")]
    LayoutMismatch {
        role: SourceRole,
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    #[error("initialization failed at {stage}: {message}")]
    Initialization { stage: InitStage, message: String },
    #[error("failed to compile {program} shader: {message}")]
    ShaderCompilation {
        program: &'static str,
        message: String,
    },
    #[error("invalid buffer: {0}")]
    InvalidBuffer(#[from] BufferError),
    #[error("GPU operation failed: {0}")]
    GpuOperation(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("compositor session is already running")]
    AlreadyStarted,
}

impl CompositorError {
    pub(crate) fn init(stage: InitStage, message: impl fmt::Display) -> Self {
        Self::Initialization {
            stage,
            message: message.to_string(),
        }
    }

    /// Invalid buffers cost one frame; everything else ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CompositorError::InvalidBuffer(_))
    }
}

pub type Result<T, E = CompositorError> = std::result::Result<T, E>;
