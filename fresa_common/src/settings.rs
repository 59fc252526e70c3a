//! Machine settings: the `$N=value` record.
//!
//! Settings live in three representations with one schema:
//! - a plain struct used at runtime,
//! - a TOML document loadable at startup on hosted platforms,
//! - a checksummed byte record in the EEPROM store (`$N=value` writes
//!   persist through it; a checksum mismatch restores defaults).
//!
//! Setting numbers follow the Grbl convention so existing senders can
//! read and write them: `$100+i` steps/mm, `$110+i` max rate, `$120+i`
//! acceleration, `$130+i` travel, plus the scalar switches below.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::consts::AXIS_COUNT;
use crate::grbl::Status;
use crate::hal::Mcu;

/// EEPROM address of the settings record.
pub const SETTINGS_ADDR: u16 = 0;

/// Record schema version; bumped on layout changes.
const RECORD_VERSION: u8 = 1;

/// Errors from the persistence layer (not protocol-visible).
#[derive(Debug, Clone, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(String),
    #[error("settings parse error: {0}")]
    Parse(String),
    #[error("settings record checksum mismatch")]
    Checksum,
    #[error("settings record truncated or wrong version")]
    BadRecord,
}

/// All machine settings consumed by the motion core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Steps per millimetre, per axis (`$100`–`$102`).
    pub step_per_mm: [f32; AXIS_COUNT],
    /// Maximum feed rate per axis [mm/min] (`$110`–`$112`).
    pub max_feed_rate: [f32; AXIS_COUNT],
    /// Acceleration per axis [mm/s²] (`$120`–`$122`).
    pub acceleration: [f32; AXIS_COUNT],
    /// Maximum travel per axis [mm] (`$130`–`$132`).
    pub max_distance: [f32; AXIS_COUNT],
    /// Direction output invert mask (`$3`).
    pub dir_invert_mask: u8,
    /// Limit input invert mask (`$5`).
    pub limits_invert_mask: u8,
    /// Probe input invert (`$6`).
    pub probe_invert: bool,
    /// Control input invert mask (`$7`).
    pub control_invert_mask: u8,
    /// Report positions in inches (`$13`).
    pub report_inches: bool,
    /// Soft limit checks enabled (`$20`).
    pub soft_limits_enabled: bool,
    /// Hard limit inputs enabled (`$21`).
    pub hard_limits_enabled: bool,
    /// Homing cycle enabled (`$22`).
    pub homing_enabled: bool,
    /// Homing direction invert mask (`$23`); a set bit seeks positive.
    pub homing_dir_invert_mask: u8,
    /// Homing slow (locate) feed rate [mm/min] (`$24`).
    pub homing_slow_feed_rate: f32,
    /// Homing fast (seek) feed rate [mm/min] (`$25`).
    pub homing_fast_feed_rate: f32,
    /// Homing pull-off / reference offset [mm] (`$27`).
    pub homing_offset: f32,
    /// Maximum spindle speed [RPM] (`$30`).
    pub spindle_max_rpm: f32,
    /// Minimum spindle speed [RPM] (`$31`).
    pub spindle_min_rpm: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            step_per_mm: [250.0; AXIS_COUNT],
            max_feed_rate: [500.0; AXIS_COUNT],
            acceleration: [10.0; AXIS_COUNT],
            max_distance: [200.0; AXIS_COUNT],
            dir_invert_mask: 0,
            limits_invert_mask: 0,
            probe_invert: false,
            control_invert_mask: 0,
            report_inches: false,
            soft_limits_enabled: false,
            hard_limits_enabled: false,
            homing_enabled: false,
            homing_dir_invert_mask: 0,
            homing_slow_feed_rate: 100.0,
            homing_fast_feed_rate: 500.0,
            homing_offset: 2.0,
            spindle_max_rpm: 1000.0,
            spindle_min_rpm: 0.0,
        }
    }
}

impl Settings {
    // ── TOML ────────────────────────────────────────────────────────

    /// Parse settings from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        toml::from_str(text).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Load settings from a TOML file.
    pub fn load_toml(path: &std::path::Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    // ── EEPROM record ───────────────────────────────────────────────

    /// Serialized record length: version byte, four per-axis f32
    /// arrays, five scalar f32s, four mask bytes, one flag byte and
    /// the checksum.
    pub const RECORD_LEN: usize = 1 + 4 * 4 * AXIS_COUNT + 5 * 4 + 4 + 1 + 1;

    /// Pack into the contiguous EEPROM record. Fixed field order is the
    /// persistence schema; the trailing byte is the complement of the
    /// byte sum.
    pub fn to_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::RECORD_LEN);
        out.push(RECORD_VERSION);
        for arr in [
            &self.step_per_mm,
            &self.max_feed_rate,
            &self.acceleration,
            &self.max_distance,
        ] {
            for v in arr.iter() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        for v in [
            self.homing_slow_feed_rate,
            self.homing_fast_feed_rate,
            self.homing_offset,
            self.spindle_max_rpm,
            self.spindle_min_rpm,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.push(self.dir_invert_mask);
        out.push(self.limits_invert_mask);
        out.push(self.control_invert_mask);
        out.push(self.homing_dir_invert_mask);
        out.push(flags_byte(&[
            self.probe_invert,
            self.report_inches,
            self.soft_limits_enabled,
            self.hard_limits_enabled,
            self.homing_enabled,
        ]));
        let checksum = !out.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        out.push(checksum);
        debug_assert_eq!(out.len(), Self::RECORD_LEN);
        out
    }

    /// Unpack from an EEPROM record, verifying version and checksum.
    pub fn from_record(record: &[u8]) -> Result<Self, SettingsError> {
        if record.len() < Self::RECORD_LEN || record[0] != RECORD_VERSION {
            return Err(SettingsError::BadRecord);
        }
        let body = &record[..Self::RECORD_LEN - 1];
        let checksum = !body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if checksum != record[Self::RECORD_LEN - 1] {
            return Err(SettingsError::Checksum);
        }

        let mut s = Self::default();
        let mut at = 1usize;
        let next_f32 = |at: &mut usize| {
            let v = f32::from_le_bytes(record[*at..*at + 4].try_into().unwrap());
            *at += 4;
            v
        };
        for i in 0..AXIS_COUNT {
            s.step_per_mm[i] = next_f32(&mut at);
        }
        for i in 0..AXIS_COUNT {
            s.max_feed_rate[i] = next_f32(&mut at);
        }
        for i in 0..AXIS_COUNT {
            s.acceleration[i] = next_f32(&mut at);
        }
        for i in 0..AXIS_COUNT {
            s.max_distance[i] = next_f32(&mut at);
        }
        s.homing_slow_feed_rate = next_f32(&mut at);
        s.homing_fast_feed_rate = next_f32(&mut at);
        s.homing_offset = next_f32(&mut at);
        s.spindle_max_rpm = next_f32(&mut at);
        s.spindle_min_rpm = next_f32(&mut at);
        s.dir_invert_mask = record[at];
        s.limits_invert_mask = record[at + 1];
        s.control_invert_mask = record[at + 2];
        s.homing_dir_invert_mask = record[at + 3];
        let flags = record[at + 4];
        s.probe_invert = flags & 0x01 != 0;
        s.report_inches = flags & 0x02 != 0;
        s.soft_limits_enabled = flags & 0x04 != 0;
        s.hard_limits_enabled = flags & 0x08 != 0;
        s.homing_enabled = flags & 0x10 != 0;
        Ok(s)
    }

    /// Write the record to the EEPROM store.
    pub fn save<M: Mcu>(&self, mcu: &mut M) {
        for (i, byte) in self.to_record().iter().enumerate() {
            mcu.eeprom_put(SETTINGS_ADDR + i as u16, *byte);
        }
    }

    /// Read settings from the EEPROM store. On any record failure the
    /// caller gets defaults and should emit the restoring-defaults
    /// feedback message.
    pub fn load<M: Mcu>(mcu: &M) -> Result<Self, SettingsError> {
        let mut record = vec![0u8; Self::RECORD_LEN];
        for (i, byte) in record.iter_mut().enumerate() {
            *byte = mcu.eeprom_get(SETTINGS_ADDR + i as u16);
        }
        let loaded = Self::from_record(&record);
        if let Err(ref e) = loaded {
            warn!(error = %e, "settings record invalid, defaults apply");
        }
        loaded
    }

    // ── $N=value ────────────────────────────────────────────────────

    /// Apply one numbered setting write.
    pub fn set_numbered(&mut self, number: u16, value: f32) -> Result<(), Status> {
        if value < 0.0 {
            return Err(Status::NegativeValue);
        }
        match number {
            3 => self.dir_invert_mask = value as u8,
            5 => self.limits_invert_mask = value as u8,
            6 => self.probe_invert = value != 0.0,
            7 => self.control_invert_mask = value as u8,
            13 => self.report_inches = value != 0.0,
            20 => self.soft_limits_enabled = value != 0.0,
            21 => self.hard_limits_enabled = value != 0.0,
            22 => self.homing_enabled = value != 0.0,
            23 => self.homing_dir_invert_mask = value as u8,
            24 => self.homing_slow_feed_rate = value,
            25 => self.homing_fast_feed_rate = value,
            27 => self.homing_offset = value,
            30 => self.spindle_max_rpm = value,
            31 => self.spindle_min_rpm = value,
            100..=102 => self.step_per_mm[(number - 100) as usize] = value,
            110..=112 => self.max_feed_rate[(number - 110) as usize] = value,
            120..=122 => self.acceleration[(number - 120) as usize] = value,
            130..=132 => self.max_distance[(number - 130) as usize] = value,
            _ => return Err(Status::InvalidStatement),
        }
        Ok(())
    }

    /// Enumerate `(number, value)` pairs for the `$$` dump, in number
    /// order.
    pub fn numbered(&self) -> Vec<(u16, f32)> {
        let mut out = vec![
            (3, self.dir_invert_mask as f32),
            (5, self.limits_invert_mask as f32),
            (6, self.probe_invert as u8 as f32),
            (7, self.control_invert_mask as f32),
            (13, self.report_inches as u8 as f32),
            (20, self.soft_limits_enabled as u8 as f32),
            (21, self.hard_limits_enabled as u8 as f32),
            (22, self.homing_enabled as u8 as f32),
            (23, self.homing_dir_invert_mask as f32),
            (24, self.homing_slow_feed_rate),
            (25, self.homing_fast_feed_rate),
            (27, self.homing_offset),
            (30, self.spindle_max_rpm),
            (31, self.spindle_min_rpm),
        ];
        for i in 0..AXIS_COUNT {
            out.push((100 + i as u16, self.step_per_mm[i]));
            out.push((110 + i as u16, self.max_feed_rate[i]));
            out.push((120 + i as u16, self.acceleration[i]));
            out.push((130 + i as u16, self.max_distance[i]));
        }
        out.sort_by_key(|(n, _)| *n);
        out
    }
}

fn flags_byte(flags: &[bool]) -> u8 {
    flags
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, f)| acc | ((*f as u8) << i))
}

// ─── Tests ──────────────────────────────────────────────────────────
