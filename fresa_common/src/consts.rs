//! System-wide constants for the Fresa workspace.
//!
//! Single source of truth for all numeric limits and buffer capacities.
//! Imported by all crates — no duplication permitted.

use static_assertions::const_assert;

/// Number of driven axes (compile-time; X, Y, Z).
pub const AXIS_COUNT: usize = 3;

/// Capacity of the look-ahead planner ring.
pub const PLANNER_BUFFER_SIZE: usize = 15;

/// Capacity of the interpolator step-segment queue.
pub const ITP_SEGMENT_BUFFER_SIZE: usize = 8;

/// Interpolator time-quantum rate [Hz]. Each generated segment covers at
/// most one quantum of motion at the current velocity.
pub const ITP_FREQ: f32 = 100.0;

/// Serial receive ring capacity [bytes].
pub const RX_BUFFER_SIZE: usize = 128;

/// Serial transmit ring capacity [bytes].
pub const TX_BUFFER_SIZE: usize = 112;

/// Simulated CPU clock [Hz] used for timer programming.
pub const F_CPU: u32 = 16_000_000;

/// Minimum step frequency [Hz]. Feeds that fall below are clamped up.
pub const F_STEP_MIN: f32 = 4.0;

/// Maximum step frequency [Hz]. Feeds above clamp and raise
/// `Status::MaxStepRateExceeded`.
pub const F_STEP_MAX: f32 = 30_000.0;

/// Step pulse width [µs] between the step and step-reset interrupts.
pub const MIN_PULSE_WIDTH_US: u32 = 10;

/// Conversion factor from mm/min (protocol feeds) to mm/s (planner feeds).
pub const MIN_SEC_MULT: f32 = 1.0 / 60.0;

/// Conversion factor from mm to inches for inch-mode reports.
pub const MM_INCH_MULT: f32 = 1.0 / 25.4;

/// Spindle resume dwell after a hold [s].
pub const DELAY_ON_RESUME_S: u16 = 4;

// Step bitmasks are u8; the axis count must fit.
const_assert!(AXIS_COUNT <= 8);
// Ring indices are stored as u8-sized counters.
const_assert!(PLANNER_BUFFER_SIZE < 256);
const_assert!(RX_BUFFER_SIZE < 256 && TX_BUFFER_SIZE < 256);
