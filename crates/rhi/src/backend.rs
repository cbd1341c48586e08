//! Backend seam used by the frame loop.
//!
//! The renderer core is generic over [`Backend`] so the same synchronization
//! logic drives the Vulkan device and the simulated GPU used in tests.
//! Each trait covers one GPU object the frame loop touches:
//!
//! - [`CompletionFence`] - monotonic completion counter written by the queue
//! - [`CommandAllocator`] - backing memory for one frame's commands
//! - [`CommandRecorder`] - the single reusable command list
//! - [`PresentChain`] - the presentable image ring
//!
//! The value types in this module carry no GPU handles and are shared by all
//! backends.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RhiError, RhiResult};

/// Monotonically increasing value written by the queue into a fence.
pub type FenceValue = u64;

/// Two-dimensional size of a presentable surface, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    /// Creates an extent from its dimensions.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Creates an extent with each dimension raised to at least 1.
    ///
    /// A minimized window reports a zero-sized client area; the swap chain
    /// never holds a zero-sized image.
    pub fn clamped(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Returns true when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<ash::vk::Extent2D> for Extent {
    fn from(extent: ash::vk::Extent2D) -> Self {
        Self::new(extent.width, extent.height)
    }
}

impl From<Extent> for ash::vk::Extent2D {
    fn from(extent: Extent) -> Self {
        ash::vk::Extent2D {
            width: extent.width,
            height: extent.height,
        }
    }
}

/// Usage state of a back buffer as seen by recorded commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    /// Owned by the presentation engine
    Present,
    /// Writable by the queue
    RenderTarget,
}

/// Linear RGBA clear color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearColor(pub [f32; 4]);

impl Default for ClearColor {
    fn default() -> Self {
        Self([0.4, 0.6, 0.9, 1.0])
    }
}

impl From<[f32; 4]> for ClearColor {
    fn from(rgba: [f32; 4]) -> Self {
        Self(rgba)
    }
}

/// Color encoding of the swap chain images.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorFormat {
    /// 8-bit per channel with sRGB transfer
    #[default]
    Srgb,
    /// 8-bit per channel, linear
    Unorm,
}

impl FromStr for ColorFormat {
    type Err = RhiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "srgb" => Ok(Self::Srgb),
            "unorm" => Ok(Self::Unorm),
            other => Err(RhiError::InvalidState(format!(
                "unknown color format '{other}'"
            ))),
        }
    }
}

/// Parameters of a single present call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentRequest {
    /// Number of vertical blanks to wait for; 0 only when tearing is allowed
    pub sync_interval: u32,
    /// Display the image immediately, even mid-scanout
    pub allow_tearing: bool,
}

impl PresentRequest {
    /// Synchronized present, one vertical blank.
    pub const VSYNC: Self = Self {
        sync_interval: 1,
        allow_tearing: false,
    };

    /// Chooses the present parameters for the vsync flag.
    ///
    /// Tearing is only requested when vsync is off and the display supports
    /// it. Every other combination presents with an interval of 1.
    pub fn negotiate(vsync: bool, tearing_supported: bool) -> Self {
        if !vsync && tearing_supported {
            Self {
                sync_interval: 0,
                allow_tearing: true,
            }
        } else {
            Self::VSYNC
        }
    }
}

impl Default for PresentRequest {
    fn default() -> Self {
        Self::VSYNC
    }
}

/// Outcome of a present call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    /// The image was queued for display and a new current image is ready
    Presented,
    /// The image was handled but the chain no longer matches the surface or
    /// the requested mode; it must be rebuilt before the next frame
    Stale,
}

/// Outcome of a bounded fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    Reached,
    TimedOut,
}

/// A 64-bit completion counter written by the queue.
pub trait CompletionFence {
    /// Highest value the queue has finished.
    fn completed_value(&self) -> RhiResult<FenceValue>;

    /// Enqueues a queue-side write of `value`, ordered after all previously
    /// submitted work.
    fn enqueue_signal(&self, value: FenceValue) -> RhiResult<()>;

    /// Blocks the calling thread until `value` is reached or `timeout`
    /// elapses. `None` waits indefinitely.
    fn block_until(&self, value: FenceValue, timeout: Option<Duration>)
    -> RhiResult<WaitStatus>;
}

/// Backing memory for recorded commands.
pub trait CommandAllocator {
    /// Reclaims all memory used by previous recordings.
    ///
    /// The caller guarantees that the queue has finished every command
    /// recorded from this allocator.
    fn reset(&mut self) -> RhiResult<()>;
}

/// A reusable command list.
///
/// The list starts closed. `reset` opens it against an allocator and
/// `close` finishes recording; it must be closed again before the next
/// reset or before submission.
pub trait CommandRecorder {
    type Allocator: CommandAllocator;
    type Image;

    /// Opens the list for recording into `allocator`.
    fn reset(&mut self, allocator: &Self::Allocator) -> RhiResult<()>;

    /// Records a state transition of `image`.
    fn transition(
        &mut self,
        image: &Self::Image,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()>;

    /// Records a full clear of `image`, which must be in the render target state.
    fn clear(&mut self, image: &Self::Image, color: ClearColor) -> RhiResult<()>;

    /// Finishes recording.
    fn close(&mut self) -> RhiResult<()>;

    fn is_closed(&self) -> bool;
}

/// A ring of presentable images bound to one window.
pub trait PresentChain {
    type Image;

    /// Index of the image the next frame renders into.
    ///
    /// Always the value reported by the presentation engine after the last
    /// present or rebuild.
    fn current_index(&self) -> usize;

    fn image_count(&self) -> usize;

    fn extent(&self) -> Extent;

    /// Whether the display can present without waiting for vertical blank.
    fn tearing_supported(&self) -> bool;

    /// Whether an image is acquired for the next frame.
    ///
    /// A rebuild can finish without one when the surface changed again
    /// meanwhile. Work must not be submitted until another rebuild succeeds.
    fn is_ready(&self) -> bool;

    /// Returns the image at `index`.
    fn back_buffer(&self, index: usize) -> RhiResult<Self::Image>;

    /// Queues the current image for display and advances to the next one.
    fn present(&mut self, request: PresentRequest) -> RhiResult<PresentStatus>;

    /// Recreates every image at `extent` using `request` for the new mode.
    ///
    /// The queue must be idle and no image handed out by
    /// [`back_buffer`](Self::back_buffer) may still be in use.
    fn rebuild(&mut self, extent: Extent, request: PresentRequest) -> RhiResult<()>;
}

/// A GPU device with a single submission queue.
pub trait Backend {
    type Image;
    type Allocator: CommandAllocator;
    type CommandList: CommandRecorder<Allocator = Self::Allocator, Image = Self::Image>;
    type Fence: CompletionFence;
    type SwapChain: PresentChain<Image = Self::Image>;

    fn create_allocator(&self) -> RhiResult<Self::Allocator>;

    /// Creates a closed command list whose first recording uses `allocator`.
    fn create_command_list(&self, allocator: &Self::Allocator) -> RhiResult<Self::CommandList>;

    /// Creates a fence whose completed value starts at 0.
    fn create_fence(&self) -> RhiResult<Self::Fence>;

    /// Submits a closed command list as one batch that renders into the
    /// current image of `chain`.
    fn execute(&self, list: &Self::CommandList, chain: &Self::SwapChain) -> RhiResult<()>;

    /// Blocks until the queue has no outstanding work.
    fn wait_idle(&self) -> RhiResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_clamps_zero_dimensions() {
        assert_eq!(Extent::clamped(0, 0), Extent::new(1, 1));
        assert_eq!(Extent::clamped(0, 600), Extent::new(1, 600));
        assert_eq!(Extent::clamped(800, 600), Extent::new(800, 600));
        assert!(Extent::new(0, 5).is_empty());
        assert!(!Extent::clamped(0, 5).is_empty());
    }

    #[test]
    fn test_negotiate_tears_only_without_vsync_when_supported() {
        assert_eq!(
            PresentRequest::negotiate(false, true),
            PresentRequest {
                sync_interval: 0,
                allow_tearing: true
            }
        );
        assert_eq!(PresentRequest::negotiate(true, true), PresentRequest::VSYNC);
        assert_eq!(PresentRequest::negotiate(true, false), PresentRequest::VSYNC);
    }

    #[test]
    fn test_negotiate_without_tearing_support_stays_synchronized() {
        let request = PresentRequest::negotiate(false, false);
        assert_eq!(request.sync_interval, 1);
        assert!(!request.allow_tearing);
    }

    #[test]
    fn test_color_format_parsing() {
        assert_eq!("srgb".parse::<ColorFormat>().unwrap(), ColorFormat::Srgb);
        assert_eq!(" UNORM ".parse::<ColorFormat>().unwrap(), ColorFormat::Unorm);
        assert!("rgba16".parse::<ColorFormat>().is_err());
        assert_eq!(ColorFormat::default(), ColorFormat::Srgb);
    }

    #[test]
    fn test_extent_vk_conversion() {
        let vk_extent: ash::vk::Extent2D = Extent::new(640, 480).into();
        assert_eq!(vk_extent.width, 640);
        assert_eq!(Extent::from(vk_extent), Extent::new(640, 480));
    }
}
