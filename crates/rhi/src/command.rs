//! Command pool and command buffer management.
//!
//! - [`CommandPool`] owns one frame's command memory and the primary buffer
//!   allocated from it
//! - [`CommandBuffer`] is the frame loop's single reusable recorder; each
//!   recording targets the buffer of the pool it was reset against
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameloop_rhi::backend::{ClearColor, CommandRecorder, ResourceState};
//! use frameloop_rhi::device::Device;
//! use frameloop_rhi::command::{CommandPool, CommandBuffer};
//! use frameloop_rhi::vk;
//!
//! # fn example(device: Arc<Device>, image: vk::Image) -> Result<(), frameloop_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.queue_family())?;
//! let mut cmd = CommandBuffer::new(device, &pool);
//!
//! cmd.reset(&pool)?;
//! cmd.transition(&image, ResourceState::Present, ResourceState::RenderTarget)?;
//! cmd.clear(&image, ClearColor::default())?;
//! cmd.transition(&image, ResourceState::RenderTarget, ResourceState::Present)?;
//! cmd.close()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::backend::{ClearColor, CommandAllocator, CommandRecorder, ResourceState};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Color subresource covering the single mip and layer of a swapchain image.
const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Vulkan command pool wrapper.
///
/// Each frame slot owns one pool. Resetting the pool reclaims the memory of
/// everything recorded into its buffer, so it may only happen once the queue
/// has finished that work.
///
/// # Thread Safety
///
/// Command pools are not thread-safe; the pool is used only by the
/// rendering thread.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    /// Primary buffer allocated from `pool`, freed with it
    buffer: vk::CommandBuffer,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a command pool for the queue family and allocates its
    /// primary command buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation or buffer allocation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = match unsafe { device.handle().allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.handle().destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };

        debug!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            buffer,
            queue_family_index,
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the primary command buffer owned by this pool.
    #[inline]
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
}

impl CommandAllocator for CommandPool {
    fn reset(&mut self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Recording state of a [`CommandBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordState {
    Closed,
    Recording,
}

impl RecordState {
    fn open(&mut self) -> RhiResult<()> {
        match self {
            Self::Closed => {
                *self = Self::Recording;
                Ok(())
            }
            Self::Recording => Err(RhiError::InvalidState(
                "command list must be closed before it is reset".to_string(),
            )),
        }
    }

    fn close(&mut self) -> RhiResult<()> {
        match self {
            Self::Recording => {
                *self = Self::Closed;
                Ok(())
            }
            Self::Closed => Err(RhiError::InvalidState(
                "command list is already closed".to_string(),
            )),
        }
    }

    fn ensure_recording(self) -> RhiResult<()> {
        match self {
            Self::Recording => Ok(()),
            Self::Closed => Err(RhiError::InvalidState(
                "command list is not recording".to_string(),
            )),
        }
    }
}

/// The reusable command list.
///
/// Does NOT own a `VkCommandBuffer`: every [`reset`](CommandRecorder::reset)
/// binds it to the buffer of the given [`CommandPool`]. Created closed.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
    state: RecordState,
}

impl CommandBuffer {
    /// Creates a closed command list bound to `pool`'s buffer.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> Self {
        Self {
            device,
            buffer: pool.buffer(),
            state: RecordState::Closed,
        }
    }

    /// Returns the command buffer of the last recording.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }
}

impl CommandRecorder for CommandBuffer {
    type Allocator = CommandPool;
    type Image = vk::Image;

    fn reset(&mut self, allocator: &CommandPool) -> RhiResult<()> {
        self.state.open()?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let result = unsafe {
            self.device
                .handle()
                .begin_command_buffer(allocator.buffer(), &begin_info)
        };
        if let Err(e) = result {
            self.state = RecordState::Closed;
            return Err(e.into());
        }

        self.buffer = allocator.buffer();
        Ok(())
    }

    fn transition(
        &mut self,
        image: &vk::Image,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()> {
        self.state.ensure_recording()?;

        let Some(params) = BarrierParams::between(before, after) else {
            return Ok(());
        };

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(params.old_layout)
            .new_layout(params.new_layout)
            .src_access_mask(params.src_access)
            .dst_access_mask(params.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(*image)
            .subresource_range(COLOR_RANGE);

        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                params.src_stage,
                params.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }

    fn clear(&mut self, image: &vk::Image, color: ClearColor) -> RhiResult<()> {
        self.state.ensure_recording()?;

        let clear_value = vk::ClearColorValue { float32: color.0 };
        unsafe {
            self.device.handle().cmd_clear_color_image(
                self.buffer,
                *image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[COLOR_RANGE],
            );
        }
        Ok(())
    }

    fn close(&mut self) -> RhiResult<()> {
        self.state.ensure_recording()?;
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        self.state.close()
    }

    fn is_closed(&self) -> bool {
        self.state == RecordState::Closed
    }
}

/// Layouts, access masks and stages of one back-buffer transition.
///
/// The render-target state is the transfer destination layout because the
/// only write is a clear. Leaving the present state discards the previous
/// contents.
#[derive(Debug, PartialEq, Eq)]
struct BarrierParams {
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

impl BarrierParams {
    /// Returns `None` when no barrier is needed.
    fn between(before: ResourceState, after: ResourceState) -> Option<Self> {
        match (before, after) {
            (ResourceState::Present, ResourceState::RenderTarget) => Some(Self {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                // Chains with the acquire semaphore wait at the same stage
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            }),
            (ResourceState::RenderTarget, ResourceState::Present) => Some(Self {
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::empty(),
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            }),
            _ => None,
        }
    }
}
