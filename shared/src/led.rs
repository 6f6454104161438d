//! LED blink schedule
//!
//! The LED flips on wall-clock seconds divisible by the blink period, at most
//! once per second. The committed state only changes after a successful write.

use crate::timing;

/// Tracks the remote LED state and when it last changed
#[derive(Debug, Clone, Default)]
pub struct LedBlinker {
    on: bool,
    last_toggle_sec: Option<u64>,
    toggles: u64,
}

impl LedBlinker {
    /// Create a blinker with the LED assumed off
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Number of committed toggles
    pub fn toggles(&self) -> u64 {
        self.toggles
    }

    /// Whether a toggle is due at the given wall-clock second
    pub fn is_due(&self, now_secs: u64) -> bool {
        now_secs % timing::LED_PERIOD_SECS == 0 && self.last_toggle_sec != Some(now_secs)
    }

    /// The state a toggle would move to
    pub fn next_state(&self) -> bool {
        !self.on
    }

    /// Record that the LED was written to `next_state()` at `now_secs`
    pub fn commit(&mut self, now_secs: u64) -> bool {
        self.on = !self.on;
        self.last_toggle_sec = Some(now_secs);
        self.toggles += 1;
        self.on
    }
}
