// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

/// Install the global `tracing` subscriber. `RUST_LOG` wins when set,
/// otherwise everything at `info` and above is printed.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Per-tick delta time plus a frames-per-second sample refreshed once a second.
#[derive(Debug)]
pub struct FrameClock {
    last_tick: Instant,
    window_start: Instant,
    frames_in_window: u32,
    fps: u32,
    delta: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            last_tick: now,
            window_start: now,
            frames_in_window: 0,
            fps: 0,
            delta: Duration::ZERO,
        }
    }

    /// Advance the clock. Returns `Some(fps)` when a new one-second sample completed.
    pub fn tick(&mut self) -> Option<u32> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<u32> {
        self.delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.frames_in_window = self.frames_in_window.saturating_add(1);

        if now.saturating_duration_since(self.window_start) >= Duration::from_secs(1) {
            self.fps = self.frames_in_window;
            self.frames_in_window = 0;
            self.window_start = now;
            return Some(self.fps);
        }
        None
    }

    /// Drop the frames counted so far (used while rendering is paused).
    pub fn reset_window(&mut self) {
        let now = Instant::now();
        self.frames_in_window = 0;
        self.window_start = now;
        self.last_tick = now;
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
