use std::fmt;

use serde::{Deserialize, Serialize};

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width divided by height. Callers validate against empty sizes first.
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Identifies one of the two independently clocked producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRole {
    Primary,
    Secondary,
}

impl SourceRole {
    pub const ALL: [SourceRole; 2] = [SourceRole::Primary, SourceRole::Secondary];

    pub fn other(self) -> Self {
        match self {
            SourceRole::Primary => SourceRole::Secondary,
            SourceRole::Secondary => SourceRole::Primary,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            SourceRole::Primary => 0,
            SourceRole::Secondary => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceRole::Primary => "primary",
            SourceRole::Secondary => "secondary",
        }
    }
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte order of a packed four-channel source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgba,
    Bgra,
}

/// Chroma plane resolution relative to the luma plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChromaSubsampling {
    /// Half resolution on both axes.
    #[default]
    #[serde(rename = "420")]
    Yuv420,
    /// Half horizontal resolution, full vertical resolution.
    #[serde(rename = "422")]
    Yuv422,
    #[serde(rename = "444")]
    Yuv444,
}

impl ChromaSubsampling {
    /// Size of each chroma plane for the given luma size, rounding odd sizes up.
    pub fn chroma_size(self, luma: Size) -> Size {
        let half = |value: u32| value.div_ceil(2);
        match self {
            ChromaSubsampling::Yuv420 => Size::new(half(luma.width), half(luma.height)),
            ChromaSubsampling::Yuv422 => Size::new(half(luma.width), luma.height),
            ChromaSubsampling::Yuv444 => luma,
        }
    }
}

/// Pixel layout a producer delivers for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PixelLayout {
    /// One interleaved buffer with four bytes per pixel.
    Packed {
        #[serde(default)]
        order: ChannelOrder,
    },
    /// Separate Y, U and V single-channel planes.
    Planar {
        #[serde(default)]
        subsampling: ChromaSubsampling,
    },
}

impl PixelLayout {
    pub const PACKED_RGBA: PixelLayout = PixelLayout::Packed {
        order: ChannelOrder::Rgba,
    };
    pub const PLANAR_420: PixelLayout = PixelLayout::Planar {
        subsampling: ChromaSubsampling::Yuv420,
    };

    pub fn is_planar(&self) -> bool {
        matches!(self, PixelLayout::Planar { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelLayout::Packed { .. } => "packed",
            PixelLayout::Planar { .. } => "planar",
        }
    }
}

impl Default for PixelLayout {
    fn default() -> Self {
        Self::PACKED_RGBA
    }
}

/// Rotation of the background source relative to the output, clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// 90 and 270 degree rotations exchange the roles of width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(format!(
                "rotation must be one of 0, 90, 180 or 270 degrees, got {other}"
            )),
        }
    }
}

impl From<Rotation> for u32 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

/// Where the overlay rectangle is pinned inside the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayAnchor {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
    TopCenter,
    BottomCenter,
}

/// Decides whether a render attempt may run before every source has delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartupPolicy {
    /// Withhold rendering until the background source has delivered a frame.
    #[default]
    Strict,
    /// Render as soon as either source has delivered, clearing to black
    /// wherever a layer has nothing resident yet.
    BestEffort,
}

/// GPU adapter power preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

/// Preferred swapchain presentation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentPreference {
    /// Tear-free without blocking the GPU thread; falls back to FIFO.
    #[default]
    Mailbox,
    Fifo,
}
