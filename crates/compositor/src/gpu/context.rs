use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context as AnyhowContext};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::config::{CompositorConfig, GpuConfig};
use crate::error::{CompositorError, InitStage};
use crate::types::{GpuPowerPreference, PresentPreference};

/// Surface, device and swapchain configuration for one session.
///
/// Fields drop in declaration order, the reverse of creation.
pub(crate) struct GpuContext {
    pub config: wgpu::SurfaceConfiguration,
    pub queue: wgpu::Queue,
    pub device: wgpu::Device,
    pub surface: wgpu::Surface<'static>,
    _instance: wgpu::Instance,
    uncaptured: Arc<Mutex<Option<String>>>,
}

impl GpuContext {
    pub(crate) fn new<W>(target: Arc<W>, config: &CompositorConfig) -> Result<Self, CompositorError>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let surface = instance
            .create_surface(target)
            .context("failed to create rendering surface")
            .map_err(|err| stage_error(InitStage::Surface, err))?;

        let power_preference = match config.gpu.power {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")
        .map_err(|err| stage_error(InitStage::Adapter, err))?;

        let info = adapter.get_info();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let limits = adapter.limits();
        let caps = surface.get_capabilities(&adapter);
        let surface_format = check_limits(&limits, config)
            .and_then(|()| select_surface_format(&caps.formats))
            .map_err(|err| stage_error(InitStage::Adapter, err))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("compositor device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")
        .map_err(|err| stage_error(InitStage::Device, err))?;

        let uncaptured = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&uncaptured);
        device.on_uncaptured_error(Box::new(move |error: wgpu::Error| {
            tracing::error!(%error, "uncaptured GPU error");
            if let Ok(mut slot) = sink.lock() {
                slot.get_or_insert_with(|| error.to_string());
            }
        }));

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: config.output.width,
            height: config.output.height,
            present_mode: select_present_mode(&caps.present_modes, config.gpu.present_mode),
            alpha_mode: select_alpha_mode(&caps.alpha_modes),
            view_formats: linear_view_formats(surface_format),
            desired_maximum_frame_latency: frame_latency(&config.gpu),
        };

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        surface.configure(&device, &surface_config);
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(CompositorError::init(
                InitStage::Configure,
                format!("failed to configure surface: {error}"),
            ));
        }
        tracing::debug!(
            format = ?surface_config.format,
            present_mode = ?surface_config.present_mode,
            latency = surface_config.desired_maximum_frame_latency,
            "configured output surface"
        );

        Ok(Self {
            config: surface_config,
            queue,
            device,
            surface,
            _instance: instance,
            uncaptured,
        })
    }

    /// Format the composite is rendered in.
    ///
    /// sRGB surfaces are drawn through a linear view so the already
    /// gamma-encoded source values are not encoded a second time.
    pub(crate) fn format(&self) -> wgpu::TextureFormat {
        self.config.format.remove_srgb_suffix()
    }

    /// Re-applies the surface configuration after the swapchain was lost.
    pub(crate) fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    /// First GPU error raised outside an error scope since the last call.
    pub(crate) fn take_uncaptured_error(&self) -> Option<String> {
        self.uncaptured.lock().ok().and_then(|mut slot| slot.take())
    }
}

fn stage_error(stage: InitStage, err: anyhow::Error) -> CompositorError {
    CompositorError::init(stage, format!("{err:#}"))
}

fn check_limits(limits: &wgpu::Limits, config: &CompositorConfig) -> anyhow::Result<()> {
    let max_dimension = limits.max_texture_dimension_2d;
    let sizes = [
        ("output", config.output),
        ("primary", config.primary.size),
        ("secondary", config.secondary.size),
    ];
    for (name, size) in sizes {
        if size.width > max_dimension || size.height > max_dimension {
            bail!("GPU max texture dimension is {max_dimension}, {name} is {size}");
        }
    }
    Ok(())
}

/// Picks an 8-bit four-channel surface format, preferring non-sRGB so the
/// blend math runs on the same values the sources carry.
fn select_surface_format(formats: &[wgpu::TextureFormat]) -> anyhow::Result<wgpu::TextureFormat> {
    use wgpu::TextureFormat::{Bgra8Unorm, Bgra8UnormSrgb, Rgba8Unorm, Rgba8UnormSrgb};

    let candidates: Vec<_> = formats
        .iter()
        .copied()
        .filter(|format| matches!(format, Rgba8Unorm | Bgra8Unorm | Rgba8UnormSrgb | Bgra8UnormSrgb))
        .collect();
    if let Some(format) = candidates.iter().copied().find(|format| !format.is_srgb()) {
        return Ok(format);
    }
    let fallback = candidates
        .first()
        .copied()
        .ok_or_else(|| anyhow!("no 8-bit RGBA surface format among {formats:?}"))?;
    tracing::warn!(
        ?fallback,
        "no linear (non-sRGB) surface format available; rendering through a linear view"
    );
    Ok(fallback)
}

fn linear_view_formats(format: wgpu::TextureFormat) -> Vec<wgpu::TextureFormat> {
    if format.is_srgb() {
        vec![format.remove_srgb_suffix()]
    } else {
        Vec::new()
    }
}

fn select_present_mode(
    modes: &[wgpu::PresentMode],
    preference: PresentPreference,
) -> wgpu::PresentMode {
    let preferred = match preference {
        PresentPreference::Mailbox => wgpu::PresentMode::Mailbox,
        PresentPreference::Fifo => wgpu::PresentMode::Fifo,
    };
    if modes.contains(&preferred) {
        preferred
    } else {
        tracing::debug!(?preferred, "present mode unavailable; using FIFO");
        wgpu::PresentMode::Fifo
    }
}

fn select_alpha_mode(modes: &[wgpu::CompositeAlphaMode]) -> wgpu::CompositeAlphaMode {
    if modes.contains(&wgpu::CompositeAlphaMode::Opaque) {
        wgpu::CompositeAlphaMode::Opaque
    } else {
        modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto)
    }
}

fn frame_latency(gpu: &GpuConfig) -> u32 {
    let latency = gpu.max_frame_latency.clamp(1, 3);
    if latency != gpu.max_frame_latency {
        tracing::warn!(
            requested = gpu.max_frame_latency,
            clamped = latency,
            "GPU frame latency clamped to valid range (1-3)"
        );
    }
    latency
}
