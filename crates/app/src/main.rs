//! frameloop - Main Entry Point
//!
//! Opens a window, clears it every frame and presents, keeping the CPU at
//! most one frame ahead of the GPU per swap chain image.
//!
//! Keys: V toggles vsync, Alt+Enter or F11 toggles fullscreen, Escape exits.

mod config;

use anyhow::{Result, anyhow};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use frameloop_core::{FrameCounter, Timer};
use frameloop_platform::{InputState, KeyAction, Window};
use frameloop_renderer::{PresentationController, Renderer};
use frameloop_rhi::{RhiError, RhiResult};

use crate::config::Config;

/// Consecutive failed frames tolerated before giving up.
const MAX_FRAME_FAILURES: u32 = 3;

/// Counts frames that failed in a row.
#[derive(Debug, Default)]
struct FailureBudget {
    consecutive: u32,
}

impl FailureBudget {
    fn succeeded(&mut self) {
        self.consecutive = 0;
    }

    /// Records a failed frame. Returns true when the run must stop.
    fn failed(&mut self, err: &RhiError) -> bool {
        self.consecutive += 1;
        err.is_fatal() || self.consecutive >= MAX_FRAME_FAILURES
    }
}

struct App {
    config: Config,
    // Dropped before the window it renders into
    renderer: Option<Renderer>,
    window: Option<Window>,
    input: InputState,
    presentation: PresentationController,
    timer: Timer,
    fps: FrameCounter,
    failures: FailureBudget,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let presentation = PresentationController::new(config.vsync);
        Self {
            config,
            renderer: None,
            window: None,
            input: InputState::new(),
            presentation,
            timer: Timer::new(),
            fps: FrameCounter::default(),
            failures: FailureBudget::default(),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.fatal = Some(err);
        event_loop.exit();
    }

    /// Skips the frame on a recoverable error, and exits on a fatal one or
    /// after too many failures in a row.
    fn frame_result<T>(
        &mut self,
        event_loop: &ActiveEventLoop,
        what: &str,
        result: RhiResult<T>,
    ) {
        let err = match result {
            Ok(_) => {
                self.failures.succeeded();
                return;
            }
            Err(e) => e,
        };

        if self.failures.failed(&err) {
            self.fail(event_loop, anyhow!("{} failed: {}", what, err));
        } else {
            warn!(
                "{} failed ({}/{}), skipping frame: {}",
                what, self.failures.consecutive, MAX_FRAME_FAILURES, err
            );
        }
    }

    fn handle_action(&mut self, event_loop: &ActiveEventLoop, action: KeyAction) {
        match action {
            KeyAction::ToggleVsync => {
                self.presentation.toggle_vsync();
            }
            KeyAction::Exit => {
                info!("Exit requested");
                event_loop.exit();
            }
            KeyAction::ToggleFullscreen => {
                let Some(window) = self.window.as_mut() else {
                    return;
                };
                let Some(change) = self.presentation.toggle_fullscreen(window) else {
                    return;
                };

                // Sizes applied immediately do not always produce a Resized event
                if let Some((width, height)) = change.applied_size {
                    self.resize(event_loop, width, height);
                }
            }
        }
    }

    fn resize(&mut self, event_loop: &ActiveEventLoop, width: u32, height: u32) {
        let Some(window) = self.window.as_mut() else {
            return;
        };
        window.resize(width, height);
        if window.is_minimized() {
            return;
        }

        let result = match self.renderer.as_mut() {
            Some(renderer) => renderer.resize(width, height),
            None => return,
        };
        self.frame_result(event_loop, "Swap chain resize", result);
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        let delta = self.timer.tick();
        if let Some(fps) = self.fps.record(delta) {
            info!("{:.1} fps", fps);
        }

        if self.window.as_ref().is_none_or(Window::is_minimized) {
            return;
        }

        let vsync = self.presentation.vsync();
        let result = match self.renderer.as_mut() {
            Some(renderer) => renderer.render_frame(vsync),
            None => return,
        };
        self.frame_result(event_loop, "Render", result);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, self.config.width, self.config.height, "frameloop")
        {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow!("Failed to create window: {}", e));
                return;
            }
        };

        match Renderer::new(&window, &self.config.renderer_settings()) {
            Ok(renderer) => {
                info!(
                    "Initialization complete on {} (tearing {}), entering main loop",
                    renderer.adapter_name(),
                    if renderer.tearing_supported() {
                        "supported"
                    } else {
                        "unsupported"
                    }
                );
                self.renderer = Some(renderer);
                self.window = Some(window);
                self.timer.reset();
            }
            Err(e) => {
                self.fail(event_loop, anyhow!("Failed to create renderer: {}", e));
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.resize(event_loop, size.width, size.height);
            }
            WindowEvent::Focused(false) => {
                self.input.clear();
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.input.on_modifiers_changed(modifiers.state().alt_key());
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                if !event.state.is_pressed() {
                    self.input.on_key_released(key);
                } else if let Some(action) = self.input.on_key_pressed(key) {
                    self.handle_action(event_loop, action);
                }
            }
            WindowEvent::RedrawRequested => {
                self.render(event_loop);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            info!("{} frame(s) rendered", renderer.frames_rendered());
        }
    }
}

fn main() -> Result<()> {
    frameloop_core::init_logging();
    info!("Starting frameloop");

    let config = Config::from_env();
    info!(
        "Window {}x{}, {} adapter, {:?} color format",
        config.width,
        config.height,
        if config.use_warp { "software" } else { "hardware" },
        config.color_format
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_stops_immediately() {
        let mut failures = FailureBudget::default();
        assert!(failures.failed(&RhiError::DeviceLost));
    }

    #[test]
    fn test_recoverable_errors_stop_after_budget() {
        let mut failures = FailureBudget::default();
        let err = RhiError::InvalidState("no swapchain image is acquired".into());

        for _ in 1..MAX_FRAME_FAILURES {
            assert!(!failures.failed(&err));
        }
        assert!(failures.failed(&err));
    }

    #[test]
    fn test_success_resets_budget() {
        let mut failures = FailureBudget::default();
        let err = RhiError::SwapchainError("surface changed".into());

        for _ in 0..MAX_FRAME_FAILURES * 2 {
            assert!(!failures.failed(&err));
            failures.succeeded();
        }
    }
}
