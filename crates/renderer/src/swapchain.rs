//! Swap chain ownership, back-buffer handles, presentation and resize.

use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, info, trace};

use frameloop_rhi::{Extent, PresentChain, PresentRequest, PresentStatus, RhiError, RhiResult};

/// Shared handle to one swap chain image.
///
/// The manager keeps one handle per image and hands out clones. The chain
/// can only be rebuilt once every clone has been dropped.
#[derive(Debug)]
pub struct BackBuffer<I>(Arc<I>);

impl<I> BackBuffer<I> {
    fn new(image: I) -> Self {
        Self(Arc::new(image))
    }

    pub fn image(&self) -> &I {
        &self.0
    }

    fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }
}

impl<I> Clone for BackBuffer<I> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<I> Deref for BackBuffer<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.0
    }
}

/// Owns the presentation chain and tracks the extent it was requested at.
pub struct SwapchainManager<S: PresentChain> {
    chain: S,
    back_buffers: Vec<BackBuffer<S::Image>>,
    requested: Extent,
    last_request: PresentRequest,
    recreate_count: u64,
}

impl<S: PresentChain> SwapchainManager<S> {
    pub fn new(chain: S) -> RhiResult<Self> {
        let back_buffers = import_back_buffers(&chain)?;
        let requested = chain.extent();

        info!(
            "Swap chain ready: {} image(s) at {}, tearing {}",
            back_buffers.len(),
            requested,
            if chain.tearing_supported() {
                "supported"
            } else {
                "unsupported"
            }
        );

        Ok(Self {
            chain,
            back_buffers,
            requested,
            last_request: PresentRequest::VSYNC,
            recreate_count: 0,
        })
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.chain.current_index()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.chain.image_count()
    }

    #[inline]
    pub fn extent(&self) -> Extent {
        self.chain.extent()
    }

    #[inline]
    pub fn tearing_supported(&self) -> bool {
        self.chain.tearing_supported()
    }

    /// Whether the chain holds an image to render the next frame into.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.chain.is_ready()
    }

    /// Number of rebuilds since creation.
    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }

    pub fn chain(&self) -> &S {
        &self.chain
    }

    /// Returns a new handle to the image at `index`.
    pub fn back_buffer(&self, index: usize) -> RhiResult<BackBuffer<S::Image>> {
        self.back_buffers.get(index).cloned().ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "back buffer {} out of range ({} images)",
                index,
                self.back_buffers.len()
            ))
        })
    }

    /// Presents the current image.
    ///
    /// Tearing is requested only when `vsync` is off and the display
    /// supports it; otherwise the present waits for one vertical blank.
    pub fn present(&mut self, vsync: bool) -> RhiResult<PresentStatus> {
        let request = PresentRequest::negotiate(vsync, self.chain.tearing_supported());
        self.last_request = request;

        let status = self.chain.present(request)?;
        trace!(
            "Presented (interval {}, tearing {}), next image {}",
            request.sync_interval,
            request.allow_tearing,
            self.chain.current_index()
        );
        Ok(status)
    }

    /// Returns true when a window of `width` x `height` needs a different
    /// chain than the one last requested.
    pub fn needs_resize(&self, width: u32, height: u32) -> bool {
        Extent::clamped(width, height) != self.requested
    }

    /// Rebuilds the chain for a new client size.
    ///
    /// Zero dimensions are raised to 1. Returns `Ok(false)` without touching
    /// the chain when the clamped size equals the current request.
    ///
    /// The queue must be drained and every [`BackBuffer`] clone released
    /// beforehand.
    pub fn resize(&mut self, width: u32, height: u32) -> RhiResult<bool> {
        let extent = Extent::clamped(width, height);
        if extent == self.requested {
            debug!("Resize to {} ignored, size unchanged", extent);
            return Ok(false);
        }

        self.ensure_released()?;
        self.requested = extent;
        self.rebuild_chain()?;
        Ok(true)
    }

    /// Rebuilds the chain at the current requested size.
    ///
    /// Used when a present reports the chain as stale.
    pub fn rebuild(&mut self) -> RhiResult<()> {
        self.ensure_released()?;
        self.rebuild_chain()
    }

    fn ensure_released(&self) -> RhiResult<()> {
        let in_use = self
            .back_buffers
            .iter()
            .filter(|buffer| buffer.is_shared())
            .count();
        if in_use > 0 {
            return Err(RhiError::ResourceInUse(format!(
                "{} back buffer(s) still referenced",
                in_use
            )));
        }
        Ok(())
    }

    fn rebuild_chain(&mut self) -> RhiResult<()> {
        self.chain.rebuild(self.requested, self.last_request)?;
        self.back_buffers = import_back_buffers(&self.chain)?;
        self.recreate_count += 1;

        info!(
            "Swap chain rebuilt: {} image(s) at {}",
            self.back_buffers.len(),
            self.chain.extent()
        );
        Ok(())
    }
}

fn import_back_buffers<S: PresentChain>(chain: &S) -> RhiResult<Vec<BackBuffer<S::Image>>> {
    (0..chain.image_count())
        .map(|index| chain.back_buffer(index).map(BackBuffer::new))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::headless::{GpuEvent, HeadlessConfig, HeadlessGpu, HeadlessSwapchain};

    fn manager(config: HeadlessConfig) -> (HeadlessGpu, SwapchainManager<HeadlessSwapchain>) {
        let gpu = HeadlessGpu::new(config);
        let manager = SwapchainManager::new(gpu.swapchain()).unwrap();
        (gpu, manager)
    }

    #[test]
    fn test_back_buffers_cover_every_image() {
        let (_gpu, manager) = manager(HeadlessConfig {
            image_count: 3,
            ..Default::default()
        });

        assert_eq!(manager.image_count(), 3);
        assert_eq!(manager.back_buffer(2).unwrap().index, 2);
        assert!(matches!(
            manager.back_buffer(3),
            Err(RhiError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_present_negotiates_interval() {
        let (gpu, mut manager) = manager(HeadlessConfig {
            tearing_supported: true,
            ..Default::default()
        });

        manager.present(true).unwrap();
        manager.present(false).unwrap();

        let requests: Vec<_> = gpu
            .events()
            .into_iter()
            .filter_map(|event| match event {
                GpuEvent::Present { request, .. } => Some(request),
                _ => None,
            })
            .collect();
        assert_eq!(requests[0], PresentRequest::VSYNC);
        assert_eq!(requests[1].sync_interval, 0);
        assert!(requests[1].allow_tearing);
    }

    #[test]
    fn test_present_follows_runtime_tearing_support() {
        let (gpu, mut manager) = manager(HeadlessConfig::default());

        manager.present(false).unwrap();
        gpu.set_tearing_supported(true);
        assert!(manager.tearing_supported());
        manager.present(false).unwrap();

        let requests: Vec<_> = gpu
            .events()
            .into_iter()
            .filter_map(|event| match event {
                GpuEvent::Present { request, .. } => Some(request),
                _ => None,
            })
            .collect();
        assert_eq!(requests[0], PresentRequest::VSYNC);
        assert_eq!(
            requests[1],
            PresentRequest {
                sync_interval: 0,
                allow_tearing: true
            }
        );
    }

    #[test]
    fn test_stale_rebuild_is_not_ready() {
        let (gpu, mut manager) = manager(HeadlessConfig::default());
        assert!(manager.is_ready());

        gpu.set_stale_rebuilds(1);
        assert!(manager.resize(640, 480).unwrap());
        assert!(!manager.is_ready());

        manager.rebuild().unwrap();
        assert!(manager.is_ready());
        assert_eq!(manager.recreate_count(), 2);
    }

    #[test]
    fn test_resize_to_same_size_is_noop() {
        let (gpu, mut manager) = manager(HeadlessConfig::default());

        assert!(!manager.needs_resize(1280, 720));
        assert!(!manager.resize(1280, 720).unwrap());
        assert_eq!(manager.recreate_count(), 0);
        assert_eq!(gpu.generation(), 0);
    }

    #[test]
    fn test_resize_clamps_zero_extent() {
        let (_gpu, mut manager) = manager(HeadlessConfig::default());

        assert!(manager.resize(0, 0).unwrap());
        assert_eq!(manager.extent(), Extent::new(1, 1));
        assert!(!manager.resize(0, 1).unwrap());
    }

    #[test]
    fn test_resize_rejected_while_back_buffer_held() {
        let (_gpu, mut manager) = manager(HeadlessConfig::default());
        let held = manager.back_buffer(0).unwrap();

        assert!(matches!(
            manager.resize(640, 480),
            Err(RhiError::ResourceInUse(_))
        ));

        drop(held);
        assert!(manager.resize(640, 480).unwrap());
        assert_eq!(manager.recreate_count(), 1);
        assert_eq!(manager.back_buffer(0).unwrap().generation, 1);
    }

    #[test]
    fn test_rebuild_picks_up_new_image_count() {
        let (gpu, mut manager) = manager(HeadlessConfig::default());
        gpu.set_image_count_on_rebuild(3);

        manager.rebuild().unwrap();
        assert_eq!(manager.image_count(), 3);
        assert!(manager.back_buffer(2).is_ok());
    }
}
