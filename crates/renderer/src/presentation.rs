//! Vsync and borderless fullscreen state.

use tracing::{info, warn};

use frameloop_platform::{WindowGeometry, WindowRect};

/// Whether the window covers its monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayMode {
    #[default]
    Windowed,
    /// Borderless window sized to the monitor
    Fullscreen,
}

/// A completed switch between windowed and fullscreen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeChange {
    pub mode: DisplayMode,
    /// Client size the window system applied immediately, if it did
    pub applied_size: Option<(u32, u32)>,
}

/// Tracks the vsync flag and switches the window between windowed and
/// borderless fullscreen.
///
/// Entering fullscreen saves the windowed rectangle, and leaving restores
/// it. The resize that follows arrives through the window's normal resize
/// path.
#[derive(Debug)]
pub struct PresentationController {
    mode: DisplayMode,
    saved_rect: Option<WindowRect>,
    vsync: bool,
}

impl PresentationController {
    pub fn new(vsync: bool) -> Self {
        Self {
            mode: DisplayMode::Windowed,
            saved_rect: None,
            vsync,
        }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn is_fullscreen(&self) -> bool {
        self.mode == DisplayMode::Fullscreen
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
            info!("VSync {}", if vsync { "enabled" } else { "disabled" });
        }
        self.vsync = vsync;
    }

    /// Flips vsync and returns the new value.
    pub fn toggle_vsync(&mut self) -> bool {
        self.set_vsync(!self.vsync);
        self.vsync
    }

    /// Enters or leaves fullscreen.
    ///
    /// Requesting the mode already active leaves the window untouched and
    /// returns `None`, as does entering fullscreen without a known monitor.
    pub fn set_fullscreen<W: WindowGeometry>(
        &mut self,
        window: &mut W,
        fullscreen: bool,
    ) -> Option<ModeChange> {
        let applied_size = match (self.mode, fullscreen) {
            (DisplayMode::Windowed, true) => {
                let Some(monitor) = window.monitor_rect() else {
                    warn!("No monitor found for the window, staying windowed");
                    return None;
                };

                self.saved_rect = Some(window.rect());
                window.set_decorated(false);
                let applied = window.set_rect(monitor);
                self.mode = DisplayMode::Fullscreen;
                info!(
                    "Entered fullscreen: {}x{} at ({}, {})",
                    monitor.width, monitor.height, monitor.x, monitor.y
                );
                applied
            }
            (DisplayMode::Fullscreen, false) => {
                window.set_decorated(true);
                let applied = self
                    .saved_rect
                    .take()
                    .and_then(|rect| window.set_rect(rect));
                self.mode = DisplayMode::Windowed;
                info!("Left fullscreen");
                applied
            }
            _ => return None,
        };

        Some(ModeChange {
            mode: self.mode,
            applied_size,
        })
    }

    pub fn toggle_fullscreen<W: WindowGeometry>(&mut self, window: &mut W) -> Option<ModeChange> {
        let fullscreen = !self.is_fullscreen();
        self.set_fullscreen(window, fullscreen)
    }
}

impl Default for PresentationController {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeWindow {
        rect: WindowRect,
        decorated: bool,
        monitor: Option<WindowRect>,
        applies_immediately: bool,
        mutations: usize,
    }

    impl WindowGeometry for FakeWindow {
        fn rect(&self) -> WindowRect {
            self.rect
        }

        fn set_rect(&mut self, rect: WindowRect) -> Option<(u32, u32)> {
            self.mutations += 1;
            self.rect = rect;
            self.applies_immediately.then_some((rect.width, rect.height))
        }

        fn set_decorated(&mut self, decorated: bool) {
            self.mutations += 1;
            self.decorated = decorated;
        }

        fn monitor_rect(&self) -> Option<WindowRect> {
            self.monitor
        }
    }

    const WINDOWED: WindowRect = WindowRect {
        x: 100,
        y: 80,
        width: 1280,
        height: 720,
    };

    const MONITOR: WindowRect = WindowRect {
        x: 0,
        y: 0,
        width: 2560,
        height: 1440,
    };

    fn window(monitor: Option<WindowRect>) -> FakeWindow {
        FakeWindow {
            rect: WINDOWED,
            decorated: true,
            monitor,
            applies_immediately: false,
            mutations: 0,
        }
    }

    #[test]
    fn test_toggle_vsync() {
        let mut controller = PresentationController::default();
        assert!(controller.vsync());
        assert!(!controller.toggle_vsync());
        assert!(controller.toggle_vsync());
    }

    #[test]
    fn test_fullscreen_covers_monitor_without_decorations() {
        let mut controller = PresentationController::default();
        let mut window = window(Some(MONITOR));

        let change = controller.set_fullscreen(&mut window, true).unwrap();
        assert_eq!(change.mode, DisplayMode::Fullscreen);
        assert_eq!(change.applied_size, None);
        assert_eq!(controller.mode(), DisplayMode::Fullscreen);
        assert_eq!(window.rect, MONITOR);
        assert!(!window.decorated);
    }

    #[test]
    fn test_leaving_fullscreen_restores_windowed_rect() {
        let mut controller = PresentationController::default();
        let mut window = window(Some(MONITOR));

        controller.toggle_fullscreen(&mut window).unwrap();
        let change = controller.toggle_fullscreen(&mut window).unwrap();
        assert_eq!(change.mode, DisplayMode::Windowed);
        assert_eq!(window.rect, WINDOWED);
        assert!(window.decorated);
    }

    #[test]
    fn test_immediately_applied_size_is_reported() {
        let mut controller = PresentationController::default();
        let mut window = window(Some(MONITOR));
        window.applies_immediately = true;

        let change = controller.toggle_fullscreen(&mut window).unwrap();
        assert_eq!(change.applied_size, Some((2560, 1440)));
        let change = controller.toggle_fullscreen(&mut window).unwrap();
        assert_eq!(change.applied_size, Some((1280, 720)));
    }

    #[test]
    fn test_repeated_request_leaves_window_untouched() {
        let mut controller = PresentationController::default();
        let mut window = window(Some(MONITOR));

        assert_eq!(controller.set_fullscreen(&mut window, false), None);
        assert_eq!(window.mutations, 0);

        controller.set_fullscreen(&mut window, true).unwrap();
        let mutations = window.mutations;
        assert_eq!(controller.set_fullscreen(&mut window, true), None);
        assert_eq!(window.mutations, mutations);
        assert_eq!(window.rect, MONITOR);
    }

    #[test]
    fn test_missing_monitor_stays_windowed() {
        let mut controller = PresentationController::default();
        let mut window = window(None);

        assert_eq!(controller.toggle_fullscreen(&mut window), None);
        assert_eq!(controller.mode(), DisplayMode::Windowed);
        assert_eq!(window.mutations, 0);
    }
}
