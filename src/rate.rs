//! Events-per-second counters for diagnostics.

use crate::consts::RATE_WINDOW_US;

/// Counts events and publishes the total once per second.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateCounter {
    window_start_us: u64,
    count: u32,
    rate: u32,
}

impl RateCounter {
    pub const fn new() -> Self {
        Self { window_start_us: 0, count: 0, rate: 0 }
    }

    pub fn record(&mut self, now_us: u64) {
        self.add(1, now_us);
    }

    /// Adds `n` events; returns the new rate when a window closed.
    pub fn add(&mut self, n: u32, now_us: u64) -> Option<u32> {
        self.count = self.count.saturating_add(n);
        self.roll(now_us)
    }

    /// Closes the window if it has elapsed.
    pub fn roll(&mut self, now_us: u64) -> Option<u32> {
        let elapsed = now_us.saturating_sub(self.window_start_us);
        if elapsed < RATE_WINDOW_US {
            return None;
        }
        // scale so a late roll still reports per-second figures
        self.rate = (u64::from(self.count) * RATE_WINDOW_US / elapsed) as u32;
        self.count = 0;
        self.window_start_us = now_us;
        Some(self.rate)
    }

    /// Events in the last completed window.
    pub const fn rate(&self) -> u32 {
        self.rate
    }
}
