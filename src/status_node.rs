//! Animated per-component position indicator

use crate::colour::Colour;
use embassy_time::{Duration, Instant};

/// Fixed-interval frame timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTimer {
    pub interval: Duration,
    pub last_tick: Instant,
    pub frame: u32,
}

impl TickTimer {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_tick: Instant::from_ticks(0),
            frame: 0,
        }
    }

    /// Returns true (and advances the frame) when `interval` has elapsed since the last tick
    pub fn poll(&mut self, now: Instant) -> bool {
        match now.checked_duration_since(self.last_tick) {
            Some(elapsed) if elapsed >= self.interval => {
                self.frame = self.frame.wrapping_add(1);
                self.last_tick = now;
                true
            }
            _ => false,
        }
    }
}

/// Indicator node drawn on the strip for one component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusNode {
    pub position: u16,
    pub colour: Colour,
    /// Signed delta applied each time the timer fires
    pub step: i16,
    pub enabled: bool,
    /// Disable instead of wrapping once the node runs off the strip
    pub disable_on_complete: bool,
    pub timer: TickTimer,
}

impl StatusNode {
    pub const fn new(position: u16, colour: Colour) -> Self {
        Self {
            position,
            colour,
            step: 0,
            enabled: false,
            disable_on_complete: false,
            timer: TickTimer::new(Duration::from_millis(100)),
        }
    }

    /// Advance the timer and move the node when it fires
    pub fn tick(&mut self, now: Instant, strip_length: usize) {
        if !self.enabled || !self.timer.poll(now) {
            return;
        }
        self.advance(strip_length);
    }

    /// Move by one step
    ///
    /// The displayed position is clamped to the strip, but wrapping or
    /// disabling is decided on the unclamped target so that reaching the last
    /// pixel is not mistaken for running past it.
    pub fn advance(&mut self, strip_length: usize) {
        let last = strip_length.saturating_sub(1) as i32;
        let new_position = self.position as i32 + self.step as i32;

        self.position = new_position.clamp(0, last) as u16;

        let overshoot = if self.step >= 0 {
            new_position > last
        } else {
            new_position < 0
        };
        if !overshoot {
            return;
        }

        if self.disable_on_complete {
            self.enabled = false;
        } else if self.step >= 0 {
            self.position = 0;
        } else {
            self.position = last as u16;
        }
    }
}
