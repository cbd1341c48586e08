//! [`Backend`] implementation for the Vulkan device.

use std::sync::Arc;

use ash::vk;

use crate::backend::{Backend, CommandRecorder};
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::swapchain::Swapchain;
use crate::sync::TimelineFence;

impl Backend for Arc<Device> {
    type Image = vk::Image;
    type Allocator = CommandPool;
    type CommandList = CommandBuffer;
    type Fence = TimelineFence;
    type SwapChain = Swapchain;

    fn create_allocator(&self) -> RhiResult<CommandPool> {
        CommandPool::new(self.clone(), self.queue_family())
    }

    fn create_command_list(&self, allocator: &CommandPool) -> RhiResult<CommandBuffer> {
        Ok(CommandBuffer::new(self.clone(), allocator))
    }

    fn create_fence(&self) -> RhiResult<TimelineFence> {
        TimelineFence::new(self.clone())
    }

    /// Submits the list as one batch that waits for the current image's
    /// acquire and signals its render-finished semaphore.
    fn execute(&self, list: &CommandBuffer, chain: &Swapchain) -> RhiResult<()> {
        if !list.is_closed() {
            return Err(RhiError::InvalidState(
                "command list must be closed before submission".to_string(),
            ));
        }

        let Some(acquire_semaphore) = chain.acquire_semaphore() else {
            return Err(RhiError::InvalidState(
                "no swapchain image is acquired".to_string(),
            ));
        };

        let command_buffers = [list.handle()];
        let wait_semaphores = [acquire_semaphore];
        // Matches the source stage of the first back-buffer transition
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let signal_semaphores = [chain.render_finished_semaphore()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe { self.submit(&[submit_info], vk::Fence::null()) }
    }

    fn wait_idle(&self) -> RhiResult<()> {
        Device::wait_idle(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CompletionFence, PresentChain};

    #[test]
    fn test_vulkan_backend_types() {
        fn assert_backend<B: Backend>() {}
        fn assert_fence<F: CompletionFence>() {}
        fn assert_chain<C: PresentChain>() {}

        assert_backend::<Arc<Device>>();
        assert_fence::<TimelineFence>();
        assert_chain::<Swapchain>();
    }
}
