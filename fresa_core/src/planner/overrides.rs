//! Runtime feed/rapid/spindle override percentages.

use fresa_common::grbl::{
    FEED_OVR_MAX, FEED_OVR_MIN, RAPID_OVR1, RAPID_OVR2, SPINDLE_OVR_MAX, SPINDLE_OVR_MIN,
};

/// Override percentages applied on top of programmed feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overrides {
    /// Feed override [%], clamped to `[FEED_OVR_MIN, FEED_OVR_MAX]`.
    pub feed: u8,
    /// Rapid override [%], one of 25/50/100.
    pub rapid: u8,
    /// Spindle override [%], clamped to `[SPINDLE_OVR_MIN, SPINDLE_OVR_MAX]`.
    pub spindle: u8,
    /// Master enable; when false, programmed values apply unscaled.
    pub enabled: bool,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            feed: 100,
            rapid: 100,
            spindle: 100,
            enabled: true,
        }
    }
}

impl Overrides {
    /// Nudge the feed override, clamping into range.
    pub fn feed_inc(&mut self, delta: i16) {
        let value = (self.feed as i16 + delta).clamp(FEED_OVR_MIN as i16, FEED_OVR_MAX as i16);
        self.feed = value as u8;
    }

    /// Select a rapid override step; anything but the defined reduced
    /// steps restores 100%.
    pub fn rapid_set(&mut self, pct: u8) {
        self.rapid = match pct {
            RAPID_OVR1 => RAPID_OVR1,
            RAPID_OVR2 => RAPID_OVR2,
            _ => 100,
        };
    }

    /// Nudge the spindle override, clamping into range.
    pub fn spindle_inc(&mut self, delta: i16) {
        let value =
            (self.spindle as i16 + delta).clamp(SPINDLE_OVR_MIN as i16, SPINDLE_OVR_MAX as i16);
        self.spindle = value as u8;
    }

    /// Squared scale factor for a percentage (speeds are kept squared).
    #[inline]
    pub(crate) fn sqr_factor(pct: u8) -> f32 {
        let pct = pct as f32;
        pct * pct * 1e-4
    }
}
