//! Shared GPU context for wgpu resources.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use winit::window::Window;

/// Why the GPU could not be brought up.
#[derive(Debug, Error)]
pub enum GpuInitError {
    #[error("failed to create window surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no compatible GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to open GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

/// Device, queue and adapter shared by the registry, processor and presenter.
///
/// wgpu handles are internally reference counted, so cloning is cheap.
#[derive(Clone)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: wgpu::Adapter,
}

impl GpuContext {
    /// Initialize a context able to present to `window`, returning its surface.
    pub fn new(window: Arc<Window>) -> Result<(Self, wgpu::Surface<'static>), GpuInitError> {
        let instance = Self::instance();
        let surface = instance.create_surface(window)?;
        let ctx = Self::with_instance(instance, Some(&surface))?;
        Ok((ctx, surface))
    }

    /// Initialize for off-screen use.
    pub fn headless() -> Result<Self, GpuInitError> {
        Self::with_instance(Self::instance(), None)
    }

    fn instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    }

    fn with_instance(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'static>>) -> Result<Self, GpuInitError> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Lumen Device"),
            required_features: wgpu::Features::empty(),
            required_limits: if surface.is_some() {
                wgpu::Limits::default()
            } else {
                wgpu::Limits::downlevel_defaults()
            },
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;

        let info = adapter.get_info();
        info!("Using GPU adapter {} ({:?})", info.name, info.backend);

        Ok(Self {
            device,
            queue,
            adapter,
        })
    }
}
