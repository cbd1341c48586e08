//! High-resolution timer and frame-rate counter.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Get the delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates frame deltas and reports the frame rate once per window.
#[derive(Debug)]
pub struct FrameCounter {
    window: Duration,
    accumulated: Duration,
    frames: u32,
}

impl FrameCounter {
    /// Creates a counter that reports every `window` of accumulated time.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accumulated: Duration::ZERO,
            frames: 0,
        }
    }

    /// Records one frame. Returns the frames-per-second figure when a full
    /// window has elapsed, then starts a new window.
    pub fn record(&mut self, delta: Duration) -> Option<f64> {
        self.frames += 1;
        self.accumulated += delta;

        if self.accumulated < self.window {
            return None;
        }

        let fps = f64::from(self.frames) / self.accumulated.as_secs_f64();
        self.frames = 0;
        self.accumulated = Duration::ZERO;
        Some(fps)
    }
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
