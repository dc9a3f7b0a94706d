use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{
    ChromaSubsampling, GpuPowerPreference, OverlayAnchor, PixelLayout, PresentPreference,
    Rotation, Size, SourceRole, StartupPolicy,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration at {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Declared geometry and pixel layout of one producer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub size: Size,
    #[serde(default)]
    pub format: PixelLayout,
}

impl SourceConfig {
    pub fn packed(size: Size) -> Self {
        Self {
            size,
            format: PixelLayout::PACKED_RGBA,
        }
    }

    pub fn planar(size: Size, subsampling: ChromaSubsampling) -> Self {
        Self {
            size,
            format: PixelLayout::Planar { subsampling },
        }
    }
}

/// Placement of the two sources inside the output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Source that fills the output; the other one becomes the overlay.
    pub background: SourceRole,
    pub anchor: OverlayAnchor,
    /// Overlay width as a fraction of the output width, in (0, 1].
    pub width_ratio: f32,
    /// Overlay height as a fraction of the output height, in (0, 1].
    pub height_ratio: f32,
    /// Gap between the overlay and the output edge, in [0, 1).
    pub margin_ratio: f32,
    /// Rotation applied to the background source.
    pub rotation: Rotation,
    /// Global opacity of the overlay layer, in [0, 1].
    pub overlay_opacity: f32,
    /// Draws a translucent backing and a border around the overlay.
    pub overlay_frame: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            background: SourceRole::Secondary,
            anchor: OverlayAnchor::BottomRight,
            width_ratio: 0.25,
            height_ratio: 0.25,
            margin_ratio: 0.02,
            rotation: Rotation::Deg0,
            overlay_opacity: 1.0,
            overlay_frame: false,
        }
    }
}

impl LayoutConfig {
    /// Camera fills the output, rotated into landscape, with a translucent
    /// mirrored display centered on top.
    pub fn camera_background() -> Self {
        Self {
            background: SourceRole::Secondary,
            anchor: OverlayAnchor::Center,
            width_ratio: 0.60,
            height_ratio: 0.80,
            margin_ratio: 0.05,
            rotation: Rotation::Deg270,
            overlay_opacity: 0.6,
            overlay_frame: false,
        }
    }

    /// Display fills the output with an opaque camera picture-in-picture.
    pub fn display_background() -> Self {
        Self {
            background: SourceRole::Primary,
            anchor: OverlayAnchor::BottomRight,
            width_ratio: 0.25,
            height_ratio: 0.25,
            margin_ratio: 0.03,
            rotation: Rotation::Deg0,
            overlay_opacity: 1.0,
            overlay_frame: true,
        }
    }

    pub fn overlay(&self) -> SourceRole {
        self.background.other()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ratio("layout.width_ratio", self.width_ratio)?;
        check_ratio("layout.height_ratio", self.height_ratio)?;
        if !(0.0..1.0).contains(&self.margin_ratio) {
            return Err(ConfigError::Invalid(format!(
                "layout.margin_ratio must be in [0, 1), got {}",
                self.margin_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.overlay_opacity) {
            return Err(ConfigError::Invalid(format!(
                "layout.overlay_opacity must be in [0, 1], got {}",
                self.overlay_opacity
            )));
        }
        Ok(())
    }
}

fn check_ratio(name: &str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be in (0, 1], got {value}"
        )))
    }
}

/// Adapter and swapchain knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub power: GpuPowerPreference,
    /// Frames the swapchain may queue ahead; clamped to 1-3 at surface setup.
    pub max_frame_latency: u32,
    pub present_mode: PresentPreference,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            power: GpuPowerPreference::default(),
            max_frame_latency: 2,
            present_mode: PresentPreference::default(),
        }
    }
}

/// Everything a session needs at `start`, apart from the output surface.
///
/// Loaded from TOML or built in code; [`CompositorConfig::validate`] runs
/// again when a session starts, so hand-built values are checked too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    pub primary: SourceConfig,
    pub secondary: SourceConfig,
    pub output: Size,
    pub layout: LayoutConfig,
    pub startup: StartupPolicy,
    pub gpu: GpuConfig,
    /// Log per-source counters every N frames; zero disables.
    pub diagnostics_interval: u64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            primary: SourceConfig::packed(Size::new(1280, 720)),
            secondary: SourceConfig::planar(Size::new(640, 480), ChromaSubsampling::Yuv420),
            output: Size::new(1280, 720),
            layout: LayoutConfig::default(),
            startup: StartupPolicy::default(),
            gpu: GpuConfig::default(),
            diagnostics_interval: 30,
        }
    }
}

impl CompositorConfig {
    /// Default layout with the three sizes given at start.
    pub fn with_sizes(primary: Size, secondary: Size, output: Size) -> Self {
        let mut config = Self::default();
        config.primary.size = primary;
        config.secondary.size = secondary;
        config.output = output;
        config
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: CompositorConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn source(&self, role: SourceRole) -> &SourceConfig {
        match role {
            SourceRole::Primary => &self.primary,
            SourceRole::Secondary => &self.secondary,
        }
    }

    /// The source that must deliver before strict startup lets a frame through.
    pub fn mandatory_source(&self) -> SourceRole {
        self.layout.background
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, size) in [
            ("primary.size", self.primary.size),
            ("secondary.size", self.secondary.size),
            ("output", self.output),
        ] {
            if size.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be non-empty, got {size}"
                )));
            }
        }
        self.layout.validate()
    }
}
