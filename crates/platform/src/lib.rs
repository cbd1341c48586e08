//! Platform abstraction layer for the frame loop host.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit
//! - Window geometry access for fullscreen transitions
//! - Keyboard input and key-to-action mapping
//! - Vulkan surface creation from raw window handles

mod input;
mod window;

pub use input::{InputState, KeyAction, KeyCode, map_key};
pub use window::{Surface, Window, WindowGeometry, WindowRect, get_required_extensions};

// Re-export winit types that users might need
pub use winit::event::{Event, WindowEvent};
pub use winit::event_loop::EventLoop;
