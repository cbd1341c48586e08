//! Physical device (adapter) selection.
//!
//! The selection process:
//! 1. Enumerate all available adapters
//! 2. Reject adapters without Vulkan 1.2, timeline semaphores, the swapchain
//!    extension, or a queue family that can both render and present
//! 3. Pick the software adapter when one is requested, otherwise the hardware
//!    adapter with the most device-local memory
//!
//! # Example
//!
//! ```no_run
//! use frameloop_rhi::instance::Instance;
//! use frameloop_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let adapter = select_physical_device(instance.handle(), surface, &surface_loader, false)
//!     .expect("Failed to select physical device");
//!
//! println!("Selected GPU: {:?}", adapter.device_name());
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Information about the selected adapter.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family used for both rendering and presentation.
    pub queue_family: u32,
    /// Whether the surface offers an immediate (tearing) present mode.
    pub tearing_supported: bool,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        device_local_memory(&self.memory_properties)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_family", &self.queue_family)
            .field("tearing_supported", &self.tearing_supported)
            .finish()
    }
}

/// Selects the adapter to render with.
///
/// # Arguments
///
/// * `instance` - The Vulkan instance
/// * `surface` - The window surface for present support checking
/// * `surface_loader` - The surface extension loader
/// * `use_warp` - Select a software (CPU) adapter instead of hardware
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no adapter meets the requirements.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    use_warp: bool,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable adapters found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} adapter(s)", devices.len());

    let mut best: Option<(PhysicalDeviceInfo, u64)> = None;

    for device in devices {
        let Some(info) = check_device_suitability(instance, device, surface, surface_loader)
        else {
            continue;
        };

        let Some(rank) = adapter_rank(
            info.properties.device_type,
            info.device_local_memory(),
            use_warp,
        ) else {
            debug!(
                "Adapter '{}' ({}) skipped: {} adapter requested",
                info.device_name(),
                info.device_type_name(),
                if use_warp { "software" } else { "hardware" }
            );
            continue;
        };

        debug!(
            "Adapter '{}' ({}) - {} MiB device-local",
            info.device_name(),
            info.device_type_name(),
            info.device_local_memory() / (1024 * 1024)
        );

        if best.as_ref().is_none_or(|(_, best_rank)| rank > *best_rank) {
            best = Some((info, rank));
        }
    }

    let Some((selected, _)) = best else {
        warn!("No suitable adapter found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected adapter: '{}' ({}) - Vulkan {}.{}.{}, tearing {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        if selected.tearing_supported {
            "supported"
        } else {
            "unsupported"
        }
    );

    Ok(selected)
}

/// Ranks an adapter for selection; `None` excludes it.
///
/// Software adapters are only accepted when requested and hardware adapters
/// only when not. Among accepted adapters, more device-local memory wins.
fn adapter_rank(
    device_type: vk::PhysicalDeviceType,
    device_local_memory: u64,
    use_warp: bool,
) -> Option<u64> {
    let is_software = device_type == vk::PhysicalDeviceType::CPU;
    (is_software == use_warp).then_some(device_local_memory)
}

/// Returns `Some` if the device meets every requirement.
fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let device_name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown")
    };

    let major = vk::api_version_major(properties.api_version);
    let minor = vk::api_version_minor(properties.api_version);
    if major < 1 || (major == 1 && minor < 2) {
        debug!(
            "Adapter '{}' skipped: Vulkan 1.2 not supported (version: {}.{})",
            device_name, major, minor
        );
        return None;
    }

    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features_1_2);
    unsafe { instance.get_physical_device_features2(device, &mut features) };
    if features_1_2.timeline_semaphore == vk::FALSE {
        debug!(
            "Adapter '{}' skipped: timeline semaphores not supported",
            device_name
        );
        return None;
    }

    if !supports_swapchain(instance, device) {
        debug!(
            "Adapter '{}' skipped: swapchain extension not supported",
            device_name
        );
        return None;
    }

    let Some(queue_family) = find_queue_family(instance, device, surface, surface_loader) else {
        debug!(
            "Adapter '{}' skipped: no queue family supports both graphics and present",
            device_name
        );
        return None;
    };

    let present_modes = unsafe {
        surface_loader
            .get_physical_device_surface_present_modes(device, surface)
            .unwrap_or_default()
    };
    let tearing_supported = present_modes.contains(&vk::PresentModeKHR::IMMEDIATE);

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_family,
        tearing_supported,
    })
}

fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let extensions = unsafe {
        instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_default()
    };

    extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == ash::khr::swapchain::NAME
    })
}

/// Finds the first queue family that supports graphics and can present to
/// `surface`.
fn find_queue_family(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    families
        .iter()
        .enumerate()
        .filter(|(_, family)| {
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|(i, _)| i as u32)
        .find(|&i| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        })
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

fn device_local_memory(memory_properties: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory_properties
        .memory_heaps
        .iter()
        .take(memory_properties.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_hardware_selection_rejects_software_adapters() {
        assert_eq!(
            adapter_rank(vk::PhysicalDeviceType::CPU, 64 * GIB, false),
            None
        );
        assert_eq!(
            adapter_rank(vk::PhysicalDeviceType::DISCRETE_GPU, 8 * GIB, false),
            Some(8 * GIB)
        );
    }

    #[test]
    fn test_warp_selection_accepts_only_software_adapters() {
        assert_eq!(
            adapter_rank(vk::PhysicalDeviceType::DISCRETE_GPU, 8 * GIB, true),
            None
        );
        assert!(adapter_rank(vk::PhysicalDeviceType::CPU, 0, true).is_some());
    }

    #[test]
    fn test_more_device_local_memory_ranks_higher() {
        let integrated = adapter_rank(vk::PhysicalDeviceType::INTEGRATED_GPU, GIB, false);
        let discrete = adapter_rank(vk::PhysicalDeviceType::DISCRETE_GPU, 12 * GIB, false);
        assert!(discrete > integrated);
    }

    #[test]
    fn test_device_local_memory_counts_only_local_heaps() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 2,
            ..Default::default()
        };
        props.memory_heaps[0] = vk::MemoryHeap {
            size: 4 * GIB,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        props.memory_heaps[1] = vk::MemoryHeap {
            size: 16 * GIB,
            flags: vk::MemoryHeapFlags::empty(),
        };
        // Heaps past the count are ignored
        props.memory_heaps[2] = vk::MemoryHeap {
            size: GIB,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };

        assert_eq!(device_local_memory(&props), 4 * GIB);
    }
}
