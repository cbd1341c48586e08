//! Window management using winit.
//!
//! This module provides window creation, geometry access for fullscreen
//! transitions and Vulkan surface creation.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::monitor::MonitorHandle;
use winit::window::{Window as WinitWindow, WindowAttributes};

use frameloop_core::{Error, Result};

/// Screen-space rectangle of a window or monitor, in physical pixels.
///
/// For a window, the origin is the outer (decorated) position and the size
/// is the client area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl WindowRect {
    /// Origin that centres a `width` x `height` window on this rectangle,
    /// never left of or above its top-left corner.
    pub fn centered_origin(&self, width: u32, height: u32) -> (i32, i32) {
        let offset = |outer: u32, inner: u32| {
            let free = (i64::from(outer) - i64::from(inner)) / 2;
            i32::try_from(free.max(0)).unwrap_or(i32::MAX)
        };

        (
            self.x.saturating_add(offset(self.width, width)),
            self.y.saturating_add(offset(self.height, height)),
        )
    }
}

impl From<&MonitorHandle> for WindowRect {
    fn from(monitor: &MonitorHandle) -> Self {
        let position = monitor.position();
        let size = monitor.size();
        Self {
            x: position.x,
            y: position.y,
            width: size.width,
            height: size.height,
        }
    }
}

/// Window operations needed to switch between windowed and fullscreen.
pub trait WindowGeometry {
    /// Current outer position and client size.
    fn rect(&self) -> WindowRect;

    /// Moves the window and requests a new client size.
    ///
    /// Returns the client size when the window system applied it
    /// immediately. `None` means the size arrives later as a resize event.
    fn set_rect(&mut self, rect: WindowRect) -> Option<(u32, u32)>;

    /// Shows or hides the title bar and border.
    fn set_decorated(&mut self, decorated: bool);

    /// Bounds of the monitor the window is on, if known.
    fn monitor_rect(&self) -> Option<WindowRect>;
}

/// RAII wrapper for a Vulkan surface.
///
/// # Ownership
/// The surface is destroyed automatically when this struct is dropped.
/// The caller must ensure that the Vulkan instance outlives this surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Get the raw Vulkan surface handle.
    ///
    /// The handle is valid only as long as this `Surface` exists.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Get a reference to the surface loader.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: The handle was created by ash_window::create_surface with the
        // instance the loader was built from, and is destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// A window wrapper that provides access to the underlying winit window
/// and raw handles for Vulkan surface creation.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    /// Create a window with the given client size, centred on the primary
    /// monitor.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let mut attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        if let Some(monitor) = event_loop.primary_monitor() {
            let (x, y) = WindowRect::from(&monitor).centered_origin(width, height);
            attrs = attrs.with_position(PhysicalPosition::new(x, y));
        }

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", width, height);

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
        })
    }

    /// Get the last known client width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Get the last known client height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Update the stored dimensions (call this when handling resize events).
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    /// True while the client area has no pixels, e.g. when minimized.
    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Get the display handle for Vulkan surface creation.
    pub fn display_handle(
        &self,
    ) -> std::result::Result<raw_window_handle::DisplayHandle<'_>, raw_window_handle::HandleError>
    {
        self.window.display_handle()
    }

    /// Create a Vulkan surface for this window.
    ///
    /// # Arguments
    /// * `entry` - The Vulkan entry point
    /// * `instance` - The Vulkan instance (must outlive the returned `Surface`)
    ///
    /// # Errors
    /// Returns an error if the window handles are unavailable or surface
    /// creation fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: The entry and instance are valid references provided by the caller.
        // The display and window handles come from the live winit window.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Surface(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

impl WindowGeometry for Window {
    fn rect(&self) -> WindowRect {
        let position = self.window.outer_position().unwrap_or_default();
        let size = self.window.inner_size();
        WindowRect {
            x: position.x,
            y: position.y,
            width: size.width,
            height: size.height,
        }
    }

    fn set_rect(&mut self, rect: WindowRect) -> Option<(u32, u32)> {
        self.window
            .set_outer_position(PhysicalPosition::new(rect.x, rect.y));
        self.window
            .request_inner_size(PhysicalSize::new(rect.width, rect.height))
            .map(|size| (size.width, size.height))
    }

    fn set_decorated(&mut self, decorated: bool) {
        self.window.set_decorations(decorated);
    }

    fn monitor_rect(&self) -> Option<WindowRect> {
        self.window
            .current_monitor()
            .or_else(|| self.window.primary_monitor())
            .map(|monitor| WindowRect::from(&monitor))
    }
}

/// Get the required Vulkan instance extensions for surface creation on the
/// current platform.
///
/// The returned pointers refer to static, null-terminated strings.
///
/// # Errors
/// Returns an error if the display is not supported by `ash-window`.
pub fn get_required_extensions(
    display_handle: raw_window_handle::RawDisplayHandle,
) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| Error::Surface(format!("Failed to enumerate required extensions: {}", e)))?;

    tracing::debug!(
        "Required Vulkan extensions for surface: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns pointers to static C strings.
            .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(x: i32, y: i32, width: u32, height: u32) -> WindowRect {
        WindowRect {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn test_centered_origin() {
        assert_eq!(
            monitor(0, 0, 1920, 1080).centered_origin(1280, 720),
            (320, 180)
        );
    }

    #[test]
    fn test_centered_origin_respects_monitor_offset() {
        assert_eq!(
            monitor(1920, -200, 1920, 1080).centered_origin(1280, 720),
            (2240, -20)
        );
    }

    #[test]
    fn test_oversized_window_clamps_to_top_left() {
        assert_eq!(
            monitor(0, 0, 1024, 768).centered_origin(1280, 1024),
            (0, 0)
        );
    }
}
