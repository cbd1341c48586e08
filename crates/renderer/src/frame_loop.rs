//! The per-frame record, submit and present cycle.

use tracing::{debug, error, info, trace, warn};

use frameloop_rhi::{
    Backend, ClearColor, CommandRecorder, Extent, FenceValue, PresentStatus, ResourceState,
    RhiError, RhiResult,
};

use crate::fence::FenceTracker;
use crate::frame_pool::FramePool;
use crate::swapchain::SwapchainManager;

/// Rebuilds tried in one frame when the chain comes back without an image.
const MAX_REBUILD_ATTEMPTS: usize = 3;

/// Drives frames against one backend and its swap chain.
///
/// Each frame records a clear of the current back buffer into the slot of
/// that image, submits it, presents, and signals the fence. Before a slot is
/// reused its previous submission must have completed, which bounds the CPU
/// to at most one frame ahead per swap chain image.
///
/// Fields are declared in teardown order: the command list goes first and
/// the backend last.
pub struct RenderLoop<B: Backend> {
    command_list: B::CommandList,
    frames: FramePool<B>,
    swapchain: SwapchainManager<B::SwapChain>,
    fence: FenceTracker<B::Fence>,
    backend: B,

    clear_color: ClearColor,
    /// Slot submitted but not yet presented
    pending: Option<usize>,
    vsync: bool,
    frames_rendered: u64,
}

impl<B: Backend> RenderLoop<B> {
    /// Takes ownership of the backend and its swap chain.
    pub fn new(backend: B, chain: B::SwapChain, clear_color: ClearColor) -> RhiResult<Self> {
        let swapchain = SwapchainManager::new(chain)?;
        let fence = FenceTracker::new(backend.create_fence()?);
        let frames = FramePool::new(&backend, &swapchain)?;
        let command_list = {
            let (allocator, _) = frames.acquire(swapchain.current_index())?;
            backend.create_command_list(allocator)?
        };

        info!(
            "Render loop created: {} frame slot(s), extent {}",
            frames.len(),
            swapchain.extent()
        );

        Ok(Self {
            command_list,
            frames,
            swapchain,
            fence,
            backend,
            clear_color,
            pending: None,
            vsync: true,
            frames_rendered: 0,
        })
    }

    /// Renders and presents one frame.
    ///
    /// When the swap chain has no image acquired and rebuilding does not
    /// produce one, the frame is skipped and `Stale` is returned. The next
    /// call tries again.
    pub fn render(&mut self, vsync: bool) -> RhiResult<PresentStatus> {
        if self.pending.is_none() && !self.ensure_ready()? {
            debug!("Skipping frame, swap chain has no image");
            return Ok(PresentStatus::Stale);
        }

        self.submit_frame()?;
        self.present_frame(vsync)
    }

    /// Records and submits the current image's frame without presenting it.
    ///
    /// Returns the slot index used. A second call before
    /// [`present_frame`](Self::present_frame) is rejected.
    pub fn submit_frame(&mut self) -> RhiResult<usize> {
        if let Some(index) = self.pending {
            return Err(RhiError::InvalidState(format!(
                "frame for image {} was submitted but not presented",
                index
            )));
        }
        if !self.ensure_ready()? {
            return Err(RhiError::InvalidState(format!(
                "no swap chain image acquired after {} rebuild(s)",
                MAX_REBUILD_ATTEMPTS
            )));
        }

        let index = self.swapchain.current_index();
        let watermark = self.frames.watermark(index)?;
        self.fence.wait_for(watermark, None)?;
        self.frames.reset(index)?;

        let (allocator, back_buffer) = self.frames.acquire(index)?;
        let list = &mut self.command_list;
        list.reset(allocator)?;
        list.transition(
            back_buffer.image(),
            ResourceState::Present,
            ResourceState::RenderTarget,
        )?;
        list.clear(back_buffer.image(), self.clear_color)?;
        list.transition(
            back_buffer.image(),
            ResourceState::RenderTarget,
            ResourceState::Present,
        )?;
        list.close()?;

        self.backend.execute(&self.command_list, self.swapchain.chain())?;
        self.pending = Some(index);
        trace!("Frame submitted for image {}", index);
        Ok(index)
    }

    /// Presents the submitted frame and advances to the next image.
    ///
    /// The fence is signaled after the present and its value becomes the
    /// watermark of the presented slot. A stale chain is rebuilt at the
    /// current size before returning. On return the next image's slot is free
    /// for recording.
    pub fn present_frame(&mut self, vsync: bool) -> RhiResult<PresentStatus> {
        let Some(index) = self.pending.take() else {
            return Err(RhiError::InvalidState(
                "no submitted frame to present".to_string(),
            ));
        };

        self.vsync = vsync;
        let status = self.swapchain.present(vsync)?;
        let value = self.fence.signal()?;
        self.frames.set_watermark(index, value)?;
        self.frames_rendered += 1;

        if status == PresentStatus::Stale {
            warn!("Swap chain is stale after present, rebuilding");
            self.rebuild_swapchain(|swapchain| swapchain.rebuild())?;
        }

        let next = self.swapchain.current_index();
        let watermark = self.frames.watermark(next)?;
        self.fence.wait_for(watermark, None)?;
        Ok(status)
    }

    /// Resizes the swap chain to the new client size.
    ///
    /// Zero dimensions are raised to 1, and a size equal to the current one
    /// does nothing. A submitted frame is presented first. Returns whether
    /// the chain was rebuilt.
    pub fn resize(&mut self, width: u32, height: u32) -> RhiResult<bool> {
        if !self.swapchain.needs_resize(width, height) {
            return Ok(false);
        }

        if self.pending.is_some() {
            debug!("Presenting pending frame before resize");
            self.present_frame(self.vsync)?;
        }

        let resized = self.rebuild_swapchain(|swapchain| swapchain.resize(width, height))?;
        Ok(resized)
    }

    /// Blocks until the queue has finished all submitted work.
    pub fn flush(&mut self) -> RhiResult<FenceValue> {
        self.fence.flush()
    }

    /// Rebuilds the chain until it holds an acquired image. Returns whether
    /// it does.
    fn ensure_ready(&mut self) -> RhiResult<bool> {
        for attempt in 1..=MAX_REBUILD_ATTEMPTS {
            if self.swapchain.is_ready() {
                return Ok(true);
            }
            warn!(
                "Swap chain has no image acquired, rebuilding ({}/{})",
                attempt, MAX_REBUILD_ATTEMPTS
            );
            self.rebuild_swapchain(|swapchain| swapchain.rebuild())?;
        }
        Ok(self.swapchain.is_ready())
    }

    fn rebuild_swapchain<T>(
        &mut self,
        rebuild: impl FnOnce(&mut SwapchainManager<B::SwapChain>) -> RhiResult<T>,
    ) -> RhiResult<T> {
        self.fence.flush()?;
        self.frames.release_backbuffers();
        let result = rebuild(&mut self.swapchain)?;
        self.frames
            .rebuild_backbuffers(&self.backend, &self.swapchain)?;
        Ok(result)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn extent(&self) -> Extent {
        self.swapchain.extent()
    }

    pub fn current_index(&self) -> usize {
        self.swapchain.current_index()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn recreate_count(&self) -> u64 {
        self.swapchain.recreate_count()
    }

    pub fn tearing_supported(&self) -> bool {
        self.swapchain.tearing_supported()
    }

    /// Value of the last fence signal.
    pub fn fence_value(&self) -> FenceValue {
        self.fence.last_signaled()
    }

    pub fn completed_value(&self) -> RhiResult<FenceValue> {
        self.fence.completed_value()
    }

    /// Watermark of frame slot `index`.
    pub fn watermark(&self, index: usize) -> RhiResult<FenceValue> {
        self.frames.watermark(index)
    }
}

impl<B: Backend> Drop for RenderLoop<B> {
    fn drop(&mut self) {
        if let Err(e) = self.fence.flush() {
            error!("Failed to flush queue on shutdown: {}", e);
            if let Err(e) = self.backend.wait_idle() {
                error!("Failed to wait for device idle: {}", e);
            }
        }

        info!(
            "Render loop destroyed after {} frame(s)",
            self.frames_rendered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::headless::{GpuEvent, HeadlessConfig, HeadlessGpu};

    fn render_loop(config: HeadlessConfig) -> (HeadlessGpu, RenderLoop<HeadlessGpu>) {
        render_loop_with_color(config, ClearColor::default())
    }

    fn render_loop_with_color(
        config: HeadlessConfig,
        color: ClearColor,
    ) -> (HeadlessGpu, RenderLoop<HeadlessGpu>) {
        let gpu = HeadlessGpu::new(config);
        let chain = gpu.swapchain();
        let render_loop = RenderLoop::new(gpu.clone(), chain, color).unwrap();
        (gpu, render_loop)
    }

    #[test]
    fn test_second_submit_without_present_rejected() {
        let (_gpu, mut render_loop) = render_loop(HeadlessConfig::default());

        render_loop.submit_frame().unwrap();
        assert!(matches!(
            render_loop.submit_frame(),
            Err(RhiError::InvalidState(_))
        ));
        render_loop.present_frame(true).unwrap();
    }

    #[test]
    fn test_present_without_submit_rejected() {
        let (_gpu, mut render_loop) = render_loop(HeadlessConfig::default());
        assert!(render_loop.present_frame(true).is_err());
    }

    #[test]
    fn test_render_records_clear_between_transitions() {
        let (gpu, mut render_loop) =
            render_loop_with_color(HeadlessConfig::default(), ClearColor([1.0, 0.0, 0.0, 1.0]));

        render_loop.render(true).unwrap();

        let commands = gpu
            .events()
            .into_iter()
            .find_map(|event| match event {
                GpuEvent::Execute { commands, .. } => Some(commands),
                _ => None,
            })
            .unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[1],
            frameloop_rhi::headless::RecordedCommand::Clear {
                image: 0,
                color: ClearColor([1.0, 0.0, 0.0, 1.0]),
            }
        );
    }

    #[test]
    fn test_submit_fails_while_chain_stays_unacquired() {
        let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
        gpu.set_stale_rebuilds(MAX_REBUILD_ATTEMPTS + 1);
        render_loop.resize(640, 480).unwrap();
        gpu.clear_events();

        assert!(matches!(
            render_loop.submit_frame(),
            Err(RhiError::InvalidState(_))
        ));
        assert!(!gpu
            .events()
            .iter()
            .any(|event| matches!(event, GpuEvent::Execute { .. })));
        assert_eq!(render_loop.recreate_count(), 1 + MAX_REBUILD_ATTEMPTS as u64);

        render_loop.submit_frame().unwrap();
        render_loop.present_frame(true).unwrap();
    }

    #[test]
    fn test_drop_drains_queue() {
        let (gpu, mut render_loop) = render_loop(HeadlessConfig {
            latency: 3,
            ..Default::default()
        });
        render_loop.render(true).unwrap();
        render_loop.render(true).unwrap();
        assert!(gpu.pending_work() > 0);

        drop(render_loop);
        assert_eq!(gpu.pending_work(), 0);
    }

    #[test]
    fn test_drop_falls_back_to_wait_idle() {
        let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
        render_loop.render(true).unwrap();
        gpu.set_stalled(true);

        drop(render_loop);
        assert_eq!(gpu.events().last(), Some(&GpuEvent::Idle));
    }
}
