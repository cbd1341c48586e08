//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// A handle that no longer refers to a live object was used
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// An object was used in a state that does not allow the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An object cannot be released or reused while GPU work or other
    /// references still hold it
    #[error("Resource in use: {0}")]
    ResourceInUse(String),

    /// The logical device was lost; the device must be recreated
    #[error("Device lost")]
    DeviceLost,
}

impl RhiError {
    /// Returns true for errors after which the device cannot be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::LoadingError(_))
    }
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::VulkanError(other),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_maps_to_dedicated_variant() {
        let err: RhiError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, RhiError::DeviceLost));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_other_results_stay_vulkan_errors() {
        let err: RhiError = vk::Result::ERROR_OUT_OF_HOST_MEMORY.into();
        assert!(matches!(
            err,
            RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
        ));
        assert!(!err.is_fatal());
    }
}
