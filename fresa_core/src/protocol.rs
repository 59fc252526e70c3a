//! Line protocol: `ok`/`error:`/`ALARM:` responses, feedback messages
//! and the `?` status report, Grbl 1.1 schema.

use fresa_common::consts::{MM_INCH_MULT, RX_BUFFER_SIZE};
use fresa_common::grbl::{self, Alarm, Status};
use fresa_common::hal::Mcu;
use fresa_common::state::ExecState;

use crate::cnc::Cnc;
use crate::serial::TxPush;

impl<M: Mcu> Cnc<M> {
    // ── Byte path ───────────────────────────────────────────────────

    /// Push one byte toward the host. On a full TX ring the supervisor
    /// event pump keeps running while we wait, so real-time commands
    /// are never starved by reporting.
    pub(crate) fn write_byte(&mut self, byte: u8) {
        loop {
            match self.serial.try_putc(byte) {
                TxPush::Stored => return,
                TxPush::StoredKick => {
                    self.mcu.uart_start_send();
                    self.drain_tx();
                    return;
                }
                TxPush::Full => {
                    self.mcu.uart_start_send();
                    self.drain_tx();
                    self.doevents();
                }
            }
        }
    }

    /// Run the transmit interrupt chain to completion (the hosted
    /// equivalent of the TX-ready interrupt draining the ring).
    pub(crate) fn drain_tx(&mut self) {
        while let Some(byte) = self.serial.tx_isr() {
            self.mcu.uart_write(byte);
        }
    }

    /// Flush everything buffered for transmission.
    pub fn flush(&mut self) {
        self.mcu.uart_start_send();
        self.drain_tx();
    }

    pub(crate) fn send_str(&mut self, text: &str) {
        for byte in text.bytes() {
            self.write_byte(byte);
        }
    }

    // ── Line responses ──────────────────────────────────────────────

    pub(crate) fn send_ok(&mut self) {
        self.send_str(grbl::MSG_OK);
    }

    pub(crate) fn send_error(&mut self, status: Status) {
        let line = format!("{}{}\n", grbl::MSG_ERROR, status.code());
        self.send_str(&line);
    }

    pub(crate) fn send_alarm(&mut self, alarm: Alarm) {
        let line = format!("{}{}\n", grbl::MSG_ALARM, alarm.code());
        self.send_str(&line);
    }

    // ── Status report ───────────────────────────────────────────────

    /// Emit one `<...>` status line; does not interrupt motion.
    pub(crate) fn send_status(&mut self) {
        let state = self.state.get();
        let label = state_label(state);

        let mpos = self.itp.get_rt_position(&self.settings);
        let inches = self.settings.report_inches;
        let feed = self.itp.rt_feed() * 60.0;
        let spindle = self.planner.spindle_rpm().abs();
        let planner_free = self.planner.free_slots();
        let rx_free = RX_BUFFER_SIZE;
        let ovr = self.planner.overrides();

        let mut line = format!("<{label}|MPos:");
        push_axes(&mut line, &mpos, inches);
        // No work offsets in the core: work position equals machine
        // position.
        line.push_str("|WPos:");
        push_axes(&mut line, &mpos, inches);
        line.push_str(&format!(
            "|FS:{:.0},{:.0}|Bf:{},{}|Ov:{},{},{}>\n",
            feed, spindle, planner_free, rx_free, ovr.feed, ovr.rapid, ovr.spindle
        ));
        self.send_str(&line);
    }
}

fn push_axes(line: &mut String, axes: &[f32], inches: bool) {
    for (i, value) in axes.iter().enumerate() {
        let value = if inches { value * MM_INCH_MULT } else { *value };
        if i > 0 {
            line.push(',');
        }
        line.push_str(&format!("{value:.3}"));
    }
}

/// Report label for the current execution flags.
fn state_label(state: ExecState) -> &'static str {
    if state.intersects(ExecState::ABORT | ExecState::ALARM) {
        "Alarm"
    } else if state.contains(ExecState::DOOR) {
        "Door"
    } else if state.contains(ExecState::HOMING) {
        "Home"
    } else if state.contains(ExecState::JOG) {
        "Jog"
    } else if state.contains(ExecState::HOLD) {
        "Hold"
    } else if state.contains(ExecState::RUN) {
        "Run"
    } else if state.intersects(ExecState::NOHOME | ExecState::LOCKED) {
        "Alarm"
    } else {
        "Idle"
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
