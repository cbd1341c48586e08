//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides the GPU side of the frame loop:
//! - The [`backend`] seam the renderer core is generic over
//! - Instance, adapter and device creation
//! - Swapchain management
//! - Command pool and command list recording
//! - Timeline-semaphore completion fence
//! - A simulated GPU for tests (`headless` feature)

mod error;
mod vulkan;

pub mod backend;
pub mod command;
pub mod device;
#[cfg(any(test, feature = "headless"))]
pub mod headless;
pub mod instance;
pub mod physical_device;
pub mod swapchain;
pub mod sync;

pub use backend::{
    Backend, ClearColor, ColorFormat, CommandAllocator, CommandRecorder, CompletionFence, Extent,
    FenceValue, PresentChain, PresentRequest, PresentStatus, ResourceState, WaitStatus,
};
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
