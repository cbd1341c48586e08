//! Frame lifecycle and GPU/CPU synchronization.
//!
//! This crate drives the per-frame cycle on top of the RHI:
//! - Completion fence tracking
//! - Per-image frame slots
//! - Swap chain presentation and resize
//! - The render loop tying them together
//! - Vsync and fullscreen state

pub mod fence;
pub mod frame_loop;
pub mod frame_pool;
pub mod presentation;
pub mod renderer;
pub mod swapchain;

pub use fence::FenceTracker;
pub use frame_loop::RenderLoop;
pub use frame_pool::FramePool;
pub use presentation::{DisplayMode, ModeChange, PresentationController};
pub use renderer::{Renderer, RendererSettings};
pub use swapchain::{BackBuffer, SwapchainManager};

/// Default number of swap chain images.
pub const DEFAULT_BUFFER_COUNT: u32 = 2;
