//! Minimal line interpreter: the `$` system grammar and a small G-code
//! subset.
//!
//! This is deliberately not a full parser — just enough vocabulary
//! (G0/G1/G4/G90/G91, F/S/XYZ words, spindle and coolant M-codes, the
//! `$` system commands) to drive the motion pipeline end to end. Codes
//! and responses follow the Grbl tables.

use fresa_common::grbl::{Status, StatusResult};
use fresa_common::hal::Mcu;
use fresa_common::state::ExecState;

use crate::cnc::Cnc;
use crate::io_control;

/// Modal interpreter state.
#[derive(Debug, Clone, Copy)]
pub struct GcodeState {
    /// G90 absolute (true) or G91 relative addressing.
    pub absolute: bool,
    /// Modal motion mode: 0 = rapid, 1 = feed.
    pub motion: u8,
    /// Programmed feed [mm/min].
    pub feed: f32,
    /// Programmed spindle magnitude [RPM].
    pub spindle_rpm: f32,
    /// Spindle direction: 1 = M3, -1 = M4, 0 = M5.
    pub spindle_dir: i8,
}

impl GcodeState {
    pub const fn new() -> Self {
        Self {
            absolute: true,
            motion: 0,
            feed: 0.0,
            spindle_rpm: 0.0,
            spindle_dir: 0,
        }
    }

    /// Signed spindle speed currently programmed.
    pub fn spindle(&self) -> f32 {
        self.spindle_dir as f32 * self.spindle_rpm
    }
}

impl Default for GcodeState {
    fn default() -> Self {
        Self::new()
    }
}

/// One `letter + value` word.
type Word = (char, f32);

fn parse_words(line: &str) -> Result<Vec<Word>, Status> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ' ' || c == '\t' {
            continue;
        }
        let letter = c.to_ascii_uppercase();
        if !letter.is_ascii_alphabetic() {
            return Err(Status::ExpectedCommandLetter);
        }
        let mut number = String::new();
        while let Some(&n) = chars.peek() {
            if n.is_ascii_digit() || n == '.' || n == '-' || n == '+' {
                number.push(n);
                chars.next();
            } else {
                break;
            }
        }
        let value: f32 = number.parse().map_err(|_| Status::BadNumberFormat)?;
        words.push((letter, value));
    }
    Ok(words)
}

/// A G/M word value must be integral.
fn integral(value: f32) -> Result<u16, Status> {
    if value.fract() != 0.0 || value < 0.0 {
        return Err(Status::GcodeCommandValueNotInteger);
    }
    Ok(value as u16)
}

impl<M: Mcu> Cnc<M> {
    /// Consume the rest of the current line from the RX ring.
    fn read_line(&mut self) -> String {
        let mut line = String::new();
        loop {
            match self.serial.getc() {
                0 | b'\n' => break,
                byte => line.push(byte as char),
            }
        }
        line
    }

    // ── G-code lines ────────────────────────────────────────────────

    pub(crate) fn gcode_command(&mut self) -> StatusResult {
        let line = self.read_line();
        self.execute_gcode(&line)
    }

    fn execute_gcode(&mut self, line: &str) -> StatusResult {
        let words = parse_words(line)?;

        let mut axes: [Option<f32>; 3] = [None; 3];
        let mut dwell = false;
        let mut p_word: Option<f32> = None;
        let mut tool_change = false;

        for (letter, value) in words {
            match letter {
                'G' => match integral(value)? {
                    0 => self.gcode.motion = 0,
                    1 => self.gcode.motion = 1,
                    4 => dwell = true, // takes P below
                    21 => {} // millimetres, the native unit
                    90 => self.gcode.absolute = true,
                    91 => self.gcode.absolute = false,
                    _ => return Err(Status::GcodeUnsupportedCommand),
                },
                'M' => match integral(value)? {
                    3 => {
                        self.gcode.spindle_dir = 1;
                        tool_change = true;
                    }
                    4 => {
                        self.gcode.spindle_dir = -1;
                        tool_change = true;
                    }
                    5 => {
                        self.gcode.spindle_dir = 0;
                        tool_change = true;
                    }
                    8 => {
                        self.coolant_flood = true;
                        tool_change = true;
                    }
                    9 => {
                        self.coolant_flood = false;
                        self.coolant_mist = false;
                        tool_change = true;
                    }
                    _ => return Err(Status::GcodeUnsupportedCommand),
                },
                'F' => {
                    if value <= 0.0 {
                        return Err(Status::NegativeValue);
                    }
                    self.gcode.feed = value;
                }
                'S' => {
                    if value < 0.0 {
                        return Err(Status::NegativeValue);
                    }
                    self.gcode.spindle_rpm = value;
                }
                'P' => p_word = Some(value),
                'X' => axes[0] = Some(value),
                'Y' => axes[1] = Some(value),
                'Z' => axes[2] = Some(value),
                _ => return Err(Status::GcodeUnsupportedCommand),
            }
        }

        io_control::set_coolant(&mut self.mcu, self.coolant_flood, self.coolant_mist);

        if dwell {
            let seconds = p_word.ok_or(Status::GcodeValueWordMissing)?;
            if seconds < 0.0 {
                return Err(Status::NegativeValue);
            }
            return self.mc_dwell((seconds * 100.0) as u16, self.gcode.spindle());
        }

        if axes.iter().any(Option::is_some) {
            let feed = match self.gcode.motion {
                0 => f32::INFINITY, // rapid: bounded by the machine ceilings
                _ => {
                    if self.gcode.feed <= 0.0 {
                        return Err(Status::GcodeUndefinedFeedRate);
                    }
                    self.gcode.feed
                }
            };

            let from = self.planner.get_position();
            let mut target = from;
            for i in 0..3 {
                if let Some(value) = axes[i] {
                    target[i] = if self.gcode.absolute {
                        value
                    } else {
                        from[i] + value
                    };
                }
            }
            return self.mc_line(target, feed, self.gcode.spindle());
        }

        if tool_change {
            // Spindle/coolant-only lines ride a zero-length dwell so the
            // new tool state flows through the planner in order.
            return self.mc_dwell(0, self.gcode.spindle());
        }

        Ok(())
    }

    // ── `$` system lines ────────────────────────────────────────────

    pub(crate) fn grbl_command(&mut self) -> StatusResult {
        let line = self.read_line();

        match line.as_str() {
            "" => {
                self.send_str(fresa_common::grbl::MSG_HELP);
                Ok(())
            }
            "$" => {
                self.dump_settings();
                Ok(())
            }
            "H" | "h" => {
                if !self.settings.homing_enabled {
                    return Err(Status::SettingDisabled);
                }
                self.home()
            }
            "X" | "x" => {
                self.unlock();
                Ok(())
            }
            _ => {
                if let Some(rest) = line.strip_prefix("J=").or_else(|| line.strip_prefix("j=")) {
                    return self.jog_command(rest);
                }
                self.numbered_setting(&line)
            }
        }
    }

    fn dump_settings(&mut self) {
        for (number, value) in self.settings.numbered() {
            let line = format!("${number}={value:.3}\n");
            self.send_str(&line);
        }
    }

    /// `$N=value`: apply and persist one numbered setting.
    fn numbered_setting(&mut self, line: &str) -> StatusResult {
        let (number, value) = line.split_once('=').ok_or(Status::InvalidStatement)?;
        let number: u16 = number.trim().parse().map_err(|_| Status::InvalidStatement)?;
        let value: f32 = value.trim().parse().map_err(|_| Status::BadNumberFormat)?;

        // Settings are frozen while motion could consume them.
        if self.state.contains_any(ExecState::RUN | ExecState::HOLD) {
            return Err(Status::IdleError);
        }

        self.settings.set_numbered(number, value)?;
        self.settings.save(&mut self.mcu);
        Ok(())
    }

    /// `$J=<axes> F<feed>`: an immediate jog motion.
    fn jog_command(&mut self, rest: &str) -> StatusResult {
        if self.state.get().has_alarm() {
            return Err(Status::SystemGcLock);
        }

        let words = parse_words(rest)?;
        let mut axes: [Option<f32>; 3] = [None; 3];
        let mut feed: Option<f32> = None;
        for (letter, value) in words {
            match letter {
                'X' => axes[0] = Some(value),
                'Y' => axes[1] = Some(value),
                'Z' => axes[2] = Some(value),
                'F' => feed = Some(value),
                _ => return Err(Status::InvalidJogCommand),
            }
        }
        let feed = feed.ok_or(Status::InvalidJogCommand)?;
        if feed <= 0.0 || !axes.iter().any(Option::is_some) {
            return Err(Status::InvalidJogCommand);
        }

        let from = self.planner.get_position();
        let mut target = from;
        for i in 0..3 {
            if let Some(value) = axes[i] {
                target[i] = if self.gcode.absolute {
                    value
                } else {
                    from[i] + value
                };
            }
        }

        self.state.set(ExecState::JOG);
        self.mc_line(target, feed, self.gcode.spindle())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
