//! Vulkan logical device and its single submission queue.
//!
//! # Example
//!
//! ```no_run
//! use frameloop_rhi::instance::Instance;
//! use frameloop_rhi::physical_device::select_physical_device;
//! use frameloop_rhi::device::Device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let adapter = select_physical_device(instance.handle(), surface, &surface_loader, false)
//!     .expect("No suitable GPU found");
//!
//! let device = Device::new(&instance, &adapter).expect("Failed to create logical device");
//! let queue = device.queue();
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::PhysicalDeviceInfo;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// Owns one queue that is used for command submission, fence signals and
/// presentation. Shared through `Arc` by every object created from it; the
/// device is destroyed after the last of them.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    queue: vk::Queue,
    queue_family: u32,
    tearing_supported: bool,
}

impl Device {
    /// Creates the logical device with timeline semaphores enabled and
    /// retrieves its queue.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation fails.
    pub fn new(
        instance: &Instance,
        adapter: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(adapter.queue_family)
            .queue_priorities(&queue_priorities)];

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2);

        let device = unsafe {
            instance
                .handle()
                .create_device(adapter.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let queue = unsafe { device.get_device_queue(adapter.queue_family, 0) };
        debug!("Queue retrieved from family {}", adapter.queue_family);

        Ok(Arc::new(Self {
            device,
            physical_device: adapter.device,
            queue,
            queue_family: adapter.queue_family,
            tearing_supported: adapter.tearing_supported,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the queue used for rendering and presentation.
    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Whether the adapter reported an immediate present mode at selection.
    #[inline]
    pub fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }

    /// Blocks until all outstanding queue work has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits batches to the queue.
    ///
    /// # Safety
    ///
    /// The caller must ensure every referenced command buffer is fully
    /// recorded and every referenced semaphore stays alive until the batch
    /// retires.
    pub unsafe fn submit(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        unsafe {
            self.device.queue_submit(self.queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send + Sync and the remaining fields are plain
// handles. Queue access is serialized by the single rendering thread.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
