//! Vulkan renderer orchestration.
//!
//! This module provides the [`Renderer`] struct that creates the Vulkan
//! context for a window and drives a [`RenderLoop`] on it.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use tracing::{error, info};

use frameloop_platform::{Surface, Window, get_required_extensions};
use frameloop_rhi::device::Device;
use frameloop_rhi::instance::Instance;
use frameloop_rhi::physical_device::select_physical_device;
use frameloop_rhi::swapchain::Swapchain;
use frameloop_rhi::{
    ClearColor, ColorFormat, Extent, PresentRequest, PresentStatus, RhiError, RhiResult,
};

use crate::DEFAULT_BUFFER_COUNT;
use crate::frame_loop::RenderLoop;

/// Options used to create a [`Renderer`].
#[derive(Clone, Debug)]
pub struct RendererSettings {
    /// Select a software adapter instead of hardware
    pub use_warp: bool,
    /// Enable the Vulkan validation layer when installed
    pub validation: bool,
    /// Requested number of swap chain images
    pub buffer_count: u32,
    pub color_format: ColorFormat,
    pub clear_color: ClearColor,
    /// Initial vsync state, used to pick the first present mode
    pub vsync: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            use_warp: false,
            validation: cfg!(debug_assertions),
            buffer_count: DEFAULT_BUFFER_COUNT,
            color_format: ColorFormat::default(),
            clear_color: ClearColor::default(),
            vsync: true,
        }
    }
}

/// Renderer that owns the Vulkan context of one window.
///
/// # Resource Destruction Order
///
/// Vulkan objects must be destroyed in the correct order:
/// 1. Drain the queue, then destroy the command list, frame slots,
///    swapchain and fence (done by [`RenderLoop`]'s drop)
/// 2. Destroy surface
/// 3. Destroy device
/// 4. Destroy instance
///
/// ManuallyDrop is used to ensure correct destruction order.
pub struct Renderer {
    /// Frame loop (destroyed first, after draining the queue).
    frame_loop: ManuallyDrop<RenderLoop<Arc<Device>>>,
    /// Window surface (destroyed after the swapchain).
    surface: ManuallyDrop<Surface>,
    /// Logical device (destroyed after the surface).
    device: ManuallyDrop<Arc<Device>>,
    /// Vulkan instance (destroyed last).
    instance: ManuallyDrop<Instance>,

    adapter_name: String,
}

impl Renderer {
    /// Creates the Vulkan context and frame loop for `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter fits, or any Vulkan object cannot be
    /// created.
    pub fn new(window: &Window, settings: &RendererSettings) -> RhiResult<Self> {
        info!("Initializing renderer...");

        let display_handle = window
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let extensions = get_required_extensions(display_handle.as_raw())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let instance = Instance::new(settings.validation, &extensions)?;
        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let adapter = select_physical_device(
            instance.handle(),
            surface.handle(),
            surface.loader(),
            settings.use_warp,
        )?;
        let adapter_name = adapter.device_name().to_string();

        let device = Device::new(&instance, &adapter)?;

        let extent = Extent::clamped(window.width(), window.height());
        let request = PresentRequest::negotiate(settings.vsync, device.tearing_supported());
        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            extent,
            settings.buffer_count,
            settings.color_format,
            request,
        )?;

        let frame_loop = RenderLoop::new(device.clone(), swapchain, settings.clear_color)?;

        info!("Renderer initialized on {}", adapter_name);

        Ok(Self {
            frame_loop: ManuallyDrop::new(frame_loop),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            instance: ManuallyDrop::new(instance),
            adapter_name,
        })
    }

    /// Renders and presents one frame.
    pub fn render_frame(&mut self, vsync: bool) -> RhiResult<PresentStatus> {
        self.frame_loop.render(vsync)
    }

    /// Handles a new client size.
    ///
    /// Returns whether the swapchain was rebuilt.
    pub fn resize(&mut self, width: u32, height: u32) -> RhiResult<bool> {
        self.frame_loop.resize(width, height)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame_loop.frames_rendered()
    }

    pub fn extent(&self) -> Extent {
        self.frame_loop.extent()
    }

    pub fn tearing_supported(&self) -> bool {
        self.device.tearing_supported()
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        info!("Destroying renderer...");

        // SAFETY: Each field is dropped exactly once, here, in dependency
        // order. The frame loop drains the queue before releasing its objects.
        unsafe {
            ManuallyDrop::drop(&mut self.frame_loop);
            ManuallyDrop::drop(&mut self.surface);

            if Arc::strong_count(&*self.device) > 1 {
                error!("Device still referenced during renderer teardown");
            }
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Renderer destroyed");
    }
}
