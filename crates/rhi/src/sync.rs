//! Synchronization primitives for Vulkan.
//!
//! This module provides wrappers for Vulkan synchronization objects:
//! - [`Semaphore`] - binary semaphore ordering acquire, render and present
//! - [`TimelineFence`] - 64-bit monotonic completion counter for host waits
//!
//! # Overview
//!
//! The frame loop uses a single timeline semaphore as its completion fence.
//! The queue writes increasing values into it after each frame's work and
//! the host reads or waits for those values before reusing per-frame
//! resources. Binary semaphores only order the swapchain acquire and present
//! against the rendering batch.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use frameloop_rhi::backend::CompletionFence;
//! use frameloop_rhi::device::Device;
//! use frameloop_rhi::sync::TimelineFence;
//!
//! # fn example(device: Arc<Device>) -> Result<(), frameloop_rhi::RhiError> {
//! let fence = TimelineFence::new(device)?;
//!
//! // Ask the queue to write 1 once all prior work is done, then wait for it
//! fence.enqueue_signal(1)?;
//! fence.block_until(1, Some(Duration::from_secs(1)))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::backend::{CompletionFence, FenceValue, WaitStatus};
use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan binary semaphore wrapper.
///
/// Used for GPU-to-GPU ordering between swapchain image acquisition,
/// command submission and presentation.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new unsignaled binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Timeline semaphore used as the frame loop's completion fence.
///
/// The counter starts at 0 and only ever grows. A value is reached once the
/// queue has retired all work submitted before the signal of that value.
///
/// # Thread Safety
///
/// Reading and waiting are safe from any thread. Signals go through the
/// device queue and must come from the thread that owns submission.
pub struct TimelineFence {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl TimelineFence {
    /// Creates a timeline semaphore with an initial value of 0.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created timeline fence");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl CompletionFence for TimelineFence {
    fn completed_value(&self) -> RhiResult<FenceValue> {
        let value = unsafe {
            self.device
                .handle()
                .get_semaphore_counter_value(self.semaphore)?
        };
        Ok(value)
    }

    /// Submits an empty batch whose only effect is the timeline write.
    fn enqueue_signal(&self, value: FenceValue) -> RhiResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);

        unsafe { self.device.submit(&[submit_info], vk::Fence::null()) }
    }

    fn block_until(
        &self,
        value: FenceValue,
        timeout: Option<Duration>,
    ) -> RhiResult<WaitStatus> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        match unsafe {
            self.device
                .handle()
                .wait_semaphores(&wait_info, timeout_nanos(timeout))
        } {
            Ok(()) => Ok(WaitStatus::Reached),
            Err(vk::Result::TIMEOUT) => Ok(WaitStatus::TimedOut),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for TimelineFence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed timeline fence");
    }
}

/// Converts an optional timeout to the nanosecond value Vulkan expects,
/// where `u64::MAX` means no timeout.
fn timeout_nanos(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| {
        u64::try_from(t.as_nanos()).unwrap_or(u64::MAX)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_nanos(None), u64::MAX);
        assert_eq!(timeout_nanos(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_nanos(Some(Duration::from_millis(2))), 2_000_000);
        assert_eq!(timeout_nanos(Some(Duration::MAX)), u64::MAX);
    }

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }

    #[test]
    fn test_timeline_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TimelineFence>();
    }
}
