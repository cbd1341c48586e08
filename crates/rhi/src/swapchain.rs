//! Swapchain management.
//!
//! This module handles VkSwapchainKHR creation, image acquisition, and presentation.
//!
//! # Overview
//!
//! The [`Swapchain`] owns the presentable image ring of one surface and the
//! binary semaphores that order acquire, render and present. After every
//! present it immediately acquires the next image, so
//! [`current_index`](PresentChain::current_index) always reflects what the
//! presentation engine handed out.
//!
//! Present modes map onto the frame loop's present requests:
//! - synchronized present: FIFO, always available
//! - tearing allowed: IMMEDIATE, when the surface reports it
//!
//! A present whose requested mode differs from the active one reports
//! [`PresentStatus::Stale`]; the chain picks up the new mode on rebuild.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameloop_rhi::backend::{ColorFormat, Extent, PresentChain, PresentRequest};
//! use frameloop_rhi::device::Device;
//! use frameloop_rhi::instance::Instance;
//! use frameloop_rhi::swapchain::Swapchain;
//! use frameloop_rhi::vk;
//!
//! # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR)
//! # -> Result<(), frameloop_rhi::RhiError> {
//! let mut swapchain = Swapchain::new(
//!     instance,
//!     device,
//!     surface,
//!     Extent::new(1280, 720),
//!     2,
//!     ColorFormat::Srgb,
//!     PresentRequest::VSYNC,
//! )?;
//!
//! let index = swapchain.current_index();
//! // ... record and submit work for swapchain.back_buffer(index)? ...
//! swapchain.present(PresentRequest::VSYNC)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::{ColorFormat, Extent, PresentChain, PresentRequest, PresentStatus};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::sync::Semaphore;

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// Whether the surface can present without waiting for vertical blank.
    #[inline]
    pub fn supports_tearing(&self) -> bool {
        self.present_modes.contains(&vk::PresentModeKHR::IMMEDIATE)
    }
}

/// The image currently owned by the application.
#[derive(Clone, Copy, Debug)]
struct Acquired {
    /// Index into the image ring
    index: u32,
    /// Index into `acquire_semaphores` of the semaphore signaled by the acquire
    semaphore: usize,
}

/// Vulkan swapchain wrapper.
///
/// # Thread Safety
///
/// The swapchain is not thread-safe. Only the rendering thread presents and
/// rebuilds it.
pub struct Swapchain {
    device: Arc<Device>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    /// Swapchain images (owned by the swapchain)
    images: Vec<vk::Image>,
    color_format: ColorFormat,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    /// Image count asked for at creation
    requested_count: u32,
    tearing_supported: bool,
    /// Ring of image count + 1 semaphores; one is always free for the next acquire
    acquire_semaphores: Vec<Semaphore>,
    next_acquire: usize,
    /// One per image, signaled by the rendering batch and waited by present
    render_finished: Vec<Semaphore>,
    acquired: Option<Acquired>,
    /// Last index handed out; kept while no image is acquired
    current_index: usize,
}

impl Swapchain {
    /// Creates a swapchain and acquires its first image.
    ///
    /// Image usage includes TRANSFER_DST so back buffers can be cleared
    /// directly.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `device` - The logical device
    /// * `surface` - The window surface
    /// * `extent` - Desired image size, used when the surface does not dictate one
    /// * `buffer_count` - Desired number of images
    /// * `color_format` - Color encoding of the images
    /// * `request` - Initial present parameters, selecting the present mode
    ///
    /// # Errors
    ///
    /// Returns an error if surface queries fail, the surface cannot be
    /// cleared by transfer, or swapchain creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        extent: Extent,
        buffer_count: u32,
        color_format: ColorFormat,
        request: PresentRequest,
    ) -> Result<Self, RhiError> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let mut swapchain = Self {
            device,
            surface_loader,
            swapchain_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            color_format,
            extent: extent.into(),
            present_mode: vk::PresentModeKHR::FIFO,
            requested_count: buffer_count,
            tearing_supported: false,
            acquire_semaphores: Vec::new(),
            next_acquire: 0,
            render_finished: Vec::new(),
            acquired: None,
            current_index: 0,
        };

        swapchain.create(extent, request)?;
        swapchain.acquire()?;

        Ok(swapchain)
    }

    /// Builds a new swapchain handle (retiring the current one, if any) and
    /// the per-image semaphores.
    fn create(&mut self, extent: Extent, request: PresentRequest) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        if !support
            .capabilities
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            return Err(RhiError::SwapchainError(
                "Surface images cannot be used as transfer destinations".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats, self.color_format);
        let present_mode = choose_present_mode(&support.present_modes, request);
        let image_extent = choose_extent(&support.capabilities, extent.width, extent.height);
        let image_count = determine_image_count(&support.capabilities, self.requested_count);

        if image_extent.width == 0 || image_extent.height == 0 {
            return Err(RhiError::SwapchainError(format!(
                "Surface reports a zero-sized extent ({}x{})",
                image_extent.width, image_extent.height
            )));
        }

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            image_extent.width,
            image_extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };

        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.acquired = None;
        self.current_index = 0;

        let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        info!("Swapchain created with {} images", images.len());

        self.render_finished = (0..images.len())
            .map(|_| Semaphore::new(self.device.clone()))
            .collect::<RhiResult<_>>()?;
        self.acquire_semaphores = (0..=images.len())
            .map(|_| Semaphore::new(self.device.clone()))
            .collect::<RhiResult<_>>()?;
        self.next_acquire = 0;

        self.images = images;
        self.extent = image_extent;
        self.present_mode = present_mode;
        self.tearing_supported = support.supports_tearing();

        Ok(())
    }

    /// Acquires the next image. Returns true when the chain should be rebuilt.
    fn acquire(&mut self) -> RhiResult<bool> {
        let slot = self.next_acquire;
        let semaphore = self.acquire_semaphores[slot].handle();

        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                self.acquired = Some(Acquired {
                    index,
                    semaphore: slot,
                });
                self.current_index = index as usize;
                self.next_acquire = (slot + 1) % self.acquire_semaphores.len();
                Ok(suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during acquire");
                self.acquired = None;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Semaphore the rendering batch must wait on before writing the current image.
    ///
    /// `None` when no image is acquired.
    #[inline]
    pub fn acquire_semaphore(&self) -> Option<vk::Semaphore> {
        self.acquired
            .map(|acquired| self.acquire_semaphores[acquired.semaphore].handle())
    }

    /// Semaphore the rendering batch signals for the current image.
    #[inline]
    pub fn render_finished_semaphore(&self) -> vk::Semaphore {
        self.render_finished[self.current_index].handle()
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl PresentChain for Swapchain {
    type Image = vk::Image;

    fn current_index(&self) -> usize {
        self.current_index
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn extent(&self) -> Extent {
        self.extent.into()
    }

    fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }

    fn is_ready(&self) -> bool {
        self.acquired.is_some()
    }

    fn back_buffer(&self, index: usize) -> RhiResult<vk::Image> {
        self.images.get(index).copied().ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "back buffer {} out of range ({} images)",
                index,
                self.images.len()
            ))
        })
    }

    fn present(&mut self, request: PresentRequest) -> RhiResult<PresentStatus> {
        let Some(acquired) = self.acquired.take() else {
            return Ok(PresentStatus::Stale);
        };

        let swapchains = [self.swapchain];
        let image_indices = [acquired.index];
        let wait_semaphores = [self.render_finished[acquired.index as usize].handle()];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let mut stale = match unsafe {
            self.swapchain_loader
                .queue_present(self.device.queue(), &present_info)
        } {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(e.into()),
        };

        let wanted_mode = if request.allow_tearing && self.tearing_supported {
            vk::PresentModeKHR::IMMEDIATE
        } else {
            vk::PresentModeKHR::FIFO
        };
        if wanted_mode != self.present_mode {
            debug!(
                "Present mode change requested: {:?} -> {:?}",
                self.present_mode, wanted_mode
            );
            stale = true;
        }

        if stale {
            return Ok(PresentStatus::Stale);
        }

        if self.acquire()? {
            Ok(PresentStatus::Stale)
        } else {
            Ok(PresentStatus::Presented)
        }
    }

    fn rebuild(&mut self, extent: Extent, request: PresentRequest) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!("Rebuilding swapchain at {}", extent);

        self.create(extent, request)?;
        let suboptimal = self.acquire()?;
        if self.acquired.is_none() {
            warn!("No image acquired after rebuild, the surface changed again");
        } else if suboptimal {
            debug!("Swapchain is suboptimal right after rebuild");
        }
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }

            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

/// Chooses the surface format matching the configured color encoding.
///
/// Falls back to the first available format if neither BGRA nor RGBA
/// variants of the requested encoding are available.
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    color_format: ColorFormat,
) -> vk::SurfaceFormatKHR {
    let candidates: [vk::Format; 2] = match color_format {
        ColorFormat::Srgb => [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB],
        ColorFormat::Unorm => [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM],
    };

    for candidate in candidates {
        if let Some(&format) = formats.iter().find(|f| {
            f.format == candidate && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            debug!("Selected surface format: {:?}", candidate);
            return format;
        }
    }

    warn!(
        "No {:?} surface format available, using {:?}",
        color_format, formats[0].format
    );
    formats[0]
}

/// Chooses the present mode for a request.
///
/// IMMEDIATE when tearing is allowed and available, FIFO otherwise.
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    request: PresentRequest,
) -> vk::PresentModeKHR {
    if request.allow_tearing && present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        return vk::PresentModeKHR::IMMEDIATE;
    }

    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent.
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, width, height
    );

    extent
}

/// Determines the number of swapchain images.
///
/// Uses the requested count, raised to the surface minimum and capped by
/// its maximum if set.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);

    // max_image_count of 0 means no maximum
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}
