//! I/O control: classify raw pin banks into logical inputs, drive the
//! tool outputs.
//!
//! Inputs are read through the HAL and corrected by the per-bank invert
//! masks from settings; reads are idempotent. Output writes are the only
//! side effects here.

use bitflags::bitflags;
use fresa_common::consts::AXIS_COUNT;
use fresa_common::hal::Mcu;
use fresa_common::settings::Settings;

bitflags! {
    /// Logical control inputs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Controls: u8 {
        const ESTOP       = 0x01;
        const SAFETY_DOOR = 0x02;
        const FHOLD       = 0x04;
        const CYCLE_START = 0x08;
    }
}

/// Aggregate digital output assignments.
pub mod outputs {
    /// Spindle direction line (set = reverse).
    pub const SPINDLE_DIR: u32 = 1 << 0;
    pub const COOLANT_FLOOD: u32 = 1 << 1;
    pub const COOLANT_MIST: u32 = 1 << 2;
}

/// PWM channel driving the spindle.
pub const SPINDLE_PWM_CHANNEL: u8 = 0;

/// Mask covering one limit bit per axis.
pub const LIMITS_MASK: u8 = (1 << AXIS_COUNT) - 1;

/// Read the control inputs, invert-corrected, filtered by `mask`.
pub fn get_controls<M: Mcu>(mcu: &M, settings: &Settings, mask: Controls) -> Controls {
    let raw = mcu.get_controls() ^ settings.control_invert_mask;
    Controls::from_bits_truncate(raw) & mask
}

/// Read the per-axis limit inputs, invert-corrected.
pub fn get_limits<M: Mcu>(mcu: &M, settings: &Settings) -> u8 {
    (mcu.get_limits() ^ settings.limits_invert_mask) & LIMITS_MASK
}

/// Read the probe input, invert-corrected.
pub fn get_probe<M: Mcu>(mcu: &M, settings: &Settings) -> bool {
    mcu.get_probe() ^ settings.probe_invert
}

/// Program the spindle outputs for a signed RPM (sign selects the
/// direction line). Returns the PWM duty written.
///
/// A nonzero RPM is clamped into `[spindle_min_rpm, spindle_max_rpm]`
/// and never maps below duty 1, so an engaged spindle cannot be silently
/// parked by rounding.
pub fn update_spindle<M: Mcu>(rpm: f32, settings: &Settings, mcu: &mut M) -> u8 {
    if rpm >= 0.0 {
        mcu.clear_outputs(outputs::SPINDLE_DIR);
    } else {
        mcu.set_outputs(outputs::SPINDLE_DIR);
    }

    let mut duty = 0u8;
    if rpm != 0.0 && settings.spindle_max_rpm > 0.0 {
        let magnitude = rpm
            .abs()
            .clamp(settings.spindle_min_rpm, settings.spindle_max_rpm);
        duty = ((255.0 * magnitude / settings.spindle_max_rpm).round() as u8).max(1);
    }
    mcu.set_pwm(SPINDLE_PWM_CHANNEL, duty);
    duty
}

/// Drive the coolant outputs.
pub fn set_coolant<M: Mcu>(mcu: &mut M, flood: bool, mist: bool) {
    if flood {
        mcu.set_outputs(outputs::COOLANT_FLOOD);
    } else {
        mcu.clear_outputs(outputs::COOLANT_FLOOD);
    }
    if mist {
        mcu.set_outputs(outputs::COOLANT_MIST);
    } else {
        mcu.clear_outputs(outputs::COOLANT_MIST);
    }
}

/// Stop all tools: spindle parked, coolant off.
pub fn stop_tools<M: Mcu>(mcu: &mut M) {
    mcu.set_pwm(SPINDLE_PWM_CHANNEL, 0);
    mcu.clear_outputs(outputs::SPINDLE_DIR | outputs::COOLANT_FLOOD | outputs::COOLANT_MIST);
}

// ─── Tests ──────────────────────────────────────────────────────────
