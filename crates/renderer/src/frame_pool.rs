//! Per-image frame resources.
//!
//! One slot exists for each swap chain image. A slot holds the command
//! allocator its frame records into, a handle to the matching back buffer and
//! the fence value that marks the end of its last submission.

use tracing::debug;

use frameloop_rhi::{Backend, CommandAllocator, FenceValue, RhiError, RhiResult};

use crate::swapchain::{BackBuffer, SwapchainManager};

struct FrameSlot<B: Backend> {
    allocator: B::Allocator,
    back_buffer: Option<BackBuffer<B::Image>>,
    /// Fence value signaled after this slot's last submission
    watermark: FenceValue,
}

impl<B: Backend> FrameSlot<B> {
    fn new(backend: &B) -> RhiResult<Self> {
        Ok(Self {
            allocator: backend.create_allocator()?,
            back_buffer: None,
            watermark: 0,
        })
    }
}

/// Frame slots indexed by swap chain image.
pub struct FramePool<B: Backend> {
    slots: Vec<FrameSlot<B>>,
}

impl<B: Backend> FramePool<B> {
    /// Creates one slot per image of `swapchain`, all with watermark 0.
    pub fn new(backend: &B, swapchain: &SwapchainManager<B::SwapChain>) -> RhiResult<Self> {
        let mut pool = Self { slots: Vec::new() };
        pool.rebuild_backbuffers(backend, swapchain)?;
        debug!("Frame pool created with {} slot(s)", pool.len());
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the allocator and back buffer of slot `index`.
    ///
    /// Fails when the index is out of range or the slot's back buffer has
    /// been released for a rebuild.
    pub fn acquire(&self, index: usize) -> RhiResult<(&B::Allocator, &BackBuffer<B::Image>)> {
        let slot = self.slot(index)?;
        let back_buffer = slot.back_buffer.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle(format!("back buffer of frame slot {} is released", index))
        })?;
        Ok((&slot.allocator, back_buffer))
    }

    /// Resets the allocator of slot `index`.
    ///
    /// The caller must have waited for the slot's watermark.
    pub fn reset(&mut self, index: usize) -> RhiResult<()> {
        self.slot_mut(index)?.allocator.reset()
    }

    pub fn watermark(&self, index: usize) -> RhiResult<FenceValue> {
        Ok(self.slot(index)?.watermark)
    }

    pub fn set_watermark(&mut self, index: usize, value: FenceValue) -> RhiResult<()> {
        self.slot_mut(index)?.watermark = value;
        Ok(())
    }

    /// Drops every back-buffer handle held by the pool.
    pub fn release_backbuffers(&mut self) {
        for slot in &mut self.slots {
            slot.back_buffer = None;
        }
    }

    /// Matches the slot count to the chain's image count and takes a handle
    /// to each image.
    ///
    /// New slots get a fresh allocator and watermark 0. Slots beyond the new
    /// image count are dropped, so the queue must not reference them.
    pub fn rebuild_backbuffers(
        &mut self,
        backend: &B,
        swapchain: &SwapchainManager<B::SwapChain>,
    ) -> RhiResult<()> {
        let count = swapchain.image_count();
        if count != self.slots.len() {
            debug!(
                "Frame slots: {} -> {}",
                self.slots.len(),
                count
            );
        }

        self.slots.truncate(count);
        while self.slots.len() < count {
            self.slots.push(FrameSlot::new(backend)?);
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.back_buffer = Some(swapchain.back_buffer(index)?);
        }
        Ok(())
    }

    fn slot(&self, index: usize) -> RhiResult<&FrameSlot<B>> {
        let len = self.slots.len();
        self.slots.get(index).ok_or_else(|| out_of_range(index, len))
    }

    fn slot_mut(&mut self, index: usize) -> RhiResult<&mut FrameSlot<B>> {
        let len = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or_else(|| out_of_range(index, len))
    }
}

fn out_of_range(index: usize, len: usize) -> RhiError {
    RhiError::InvalidHandle(format!("frame slot {} out of range ({} slots)", index, len))
}
