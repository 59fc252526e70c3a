//! CNC supervisor: state machine, real-time command dispatch and
//! interlocks.
//!
//! The supervisor owns every subsystem (HAL, serial, planner,
//! interpolator, settings) and arbitrates between motion, operator
//! real-time commands, safety inputs and the line interpreter. The main
//! entry point is [`Cnc::run`], the cooperative firmware loop;
//! [`Cnc::doevents`] is the event pump invoked from every busy-wait in
//! the system, so real-time commands are serviced within one pump cycle
//! of arrival.

use tracing::{info, warn};

use fresa_common::consts::DELAY_ON_RESUME_S;
use fresa_common::grbl::{self, rt, Alarm, Status};
use fresa_common::hal::Mcu;
use fresa_common::settings::Settings;
use fresa_common::state::{AtomicExecState, ExecState};

use crate::gcode::GcodeState;
use crate::interpolator::Interpolator;
use crate::io_control::{self, Controls};
use crate::planner::Planner;
use crate::serial::SerialPort;

/// The CNC core aggregate.
pub struct Cnc<M: Mcu> {
    pub(crate) mcu: M,
    pub(crate) serial: SerialPort,
    pub(crate) planner: Planner,
    pub(crate) itp: Interpolator,
    pub(crate) settings: Settings,
    pub(crate) state: AtomicExecState,
    pub(crate) active_alarm: Option<Alarm>,
    pub(crate) gcode: GcodeState,
    pub(crate) coolant_flood: bool,
    pub(crate) coolant_mist: bool,
    /// Defaults were restored after a bad settings record; announce it
    /// on the next reset.
    settings_msg_pending: bool,
}

impl<M: Mcu> Cnc<M> {
    /// Initialize all systems. Settings come from the EEPROM record;
    /// on a bad record the provided fallback applies and the restore
    /// feedback message is queued.
    pub fn new(mcu: M, fallback: Settings) -> Self {
        let (settings, settings_msg_pending) = match Settings::load(&mcu) {
            Ok(settings) => (settings, false),
            Err(e) => {
                warn!(error = %e, "settings restore to defaults");
                (fallback, true)
            }
        };
        Self {
            mcu,
            serial: SerialPort::new(),
            planner: Planner::new(),
            itp: Interpolator::new(),
            settings,
            state: AtomicExecState::new(),
            active_alarm: None,
            gcode: GcodeState::new(),
            coolant_flood: false,
            coolant_mist: false,
            settings_msg_pending,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn exec_state(&self) -> ExecState {
        self.state.get()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.itp
    }

    pub fn mcu(&self) -> &M {
        &self.mcu
    }

    pub fn mcu_mut(&mut self) -> &mut M {
        &mut self.mcu
    }

    pub fn active_alarm(&self) -> Option<Alarm> {
        self.active_alarm
    }

    // ── Interrupt entry points (invoked by the platform) ────────────

    /// UART RX interrupt. A reset byte also latches ABORT here, so a
    /// reset can never be shadowed by an earlier pending command.
    pub fn rx_isr(&mut self, byte: u8) {
        self.serial.rx_isr(byte);
        if byte == rt::RESET {
            self.state.set(ExecState::ABORT);
        }
    }

    /// Step timer interrupt pair, exposed for platforms with real
    /// interrupt dispatch and for step-exact tests.
    pub fn step_isr(&mut self) {
        self.itp.step_isr(&self.settings, &mut self.mcu);
    }

    pub fn step_reset_isr(&mut self) {
        self.itp.step_reset_isr(&mut self.mcu);
    }

    // ── Main loop ───────────────────────────────────────────────────

    /// The firmware loop: reset, then pump lines and events until an
    /// abort, then handle the terminal fault state. The `platform`
    /// callback runs once per iteration and delivers platform work
    /// (received bytes, transmit draining, pacing).
    pub fn run<F: FnMut(&mut Self)>(&mut self, mut platform: F) {
        self.reset();

        loop {
            platform(self);
            self.poll_command();
            self.doevents();
            if self.state.contains_any(ExecState::ABORT) {
                break;
            }
        }

        self.flush();
        self.state.clear(ExecState::ABORT);

        // With a fault input still held the machine parks until a
        // reset command arrives.
        if self.check_fault_systems() {
            self.send_str(grbl::MSG_RESET_TO_CONTINUE);
            self.flush();
            loop {
                platform(self);
                if self.serial.rt().peek() == rt::RESET {
                    self.serial.rt().clear();
                    break;
                }
            }
        }
    }

    /// Dispatch one buffered command line, answering `ok`/`error:`.
    pub fn poll_command(&mut self) {
        if self.serial.rx_is_empty() {
            return;
        }

        let result = match self.serial.peek() {
            b'\n' => {
                self.serial.getc();
                Ok(())
            }
            b'$' => {
                self.serial.getc();
                self.grbl_command()
            }
            _ => {
                if self.state.contains_any(ExecState::LOCKED) {
                    // Rejected before any byte was consumed: flush the
                    // offending line.
                    self.serial.discard_current_line();
                    Err(Status::SystemGcLock)
                } else {
                    self.gcode_command()
                }
            }
        };

        match result {
            Ok(()) => self.send_ok(),
            // The interpreter consumes through the terminator even on
            // failure, so the offending line is already gone and
            // execution continues with the next one.
            Err(status) => self.send_error(status),
        }
    }

    /// Main event pump: fire due step interrupts, sample safety inputs,
    /// dispatch any latched real-time command, check interlocks, then
    /// let the interpolator advance.
    pub fn doevents(&mut self) {
        let fires = self.mcu.step_timer_pending();
        for _ in 0..fires {
            self.itp.step_isr(&self.settings, &mut self.mcu);
            self.itp.step_reset_isr(&mut self.mcu);
        }

        self.poll_inputs();

        if let Some(cmd) = self.serial.rt().take() {
            self.exec_rt_command(cmd);
        }

        if !self.check_interlocking() {
            return;
        }

        if let Err(status) = self
            .itp
            .run(&mut self.planner, &self.settings, &self.state, &mut self.mcu)
        {
            self.send_error(status);
        }

        // A finished jog falls back to normal state.
        if self.state.contains_any(ExecState::JOG)
            && self.planner.is_empty()
            && self.itp.is_idle()
        {
            self.state.clear(ExecState::JOG);
        }

        // Tool outputs follow the executing block, except while held
        // (the spindle-toggle override owns them there).
        if !self
            .state
            .contains_any(ExecState::HOLD | ExecState::DOOR | ExecState::ABORT)
        {
            self.apply_spindle();
        }
    }

    // ── Safety inputs ───────────────────────────────────────────────

    /// Sample control and limit inputs into supervisor flags, the
    /// polling counterpart of the trigger interrupts on real boards.
    fn poll_inputs(&mut self) {
        let controls = io_control::get_controls(&self.mcu, &self.settings, Controls::all());

        if controls.contains(Controls::ESTOP) && !self.state.contains_any(ExecState::ABORT) {
            self.stop();
            self.alarm(Alarm::AbortCycle);
            return;
        }
        if controls.contains(Controls::SAFETY_DOOR)
            && !self.state.contains_any(ExecState::DOOR)
        {
            self.state.set(ExecState::DOOR | ExecState::HOLD);
        }
        if controls.contains(Controls::FHOLD) && !self.state.contains_any(ExecState::HOMING) {
            self.state.set(ExecState::HOLD);
        }
        // Hard limits are suspended while homing drives into the
        // switches on purpose.
        if self.settings.hard_limits_enabled
            && !self.state.contains_any(ExecState::HOMING)
            && io_control::get_limits(&self.mcu, &self.settings) != 0
        {
            self.state.set(ExecState::LIMITS);
        }
    }

    /// Interlock check. Returns false when motion must not advance.
    fn check_interlocking(&mut self) -> bool {
        let state = self.state.get();

        if state.contains(ExecState::ABORT) {
            if let Some(alarm) = self.active_alarm.take() {
                self.send_alarm(alarm);
            }
            return false;
        }

        if state.intersects(ExecState::DOOR | ExecState::HOLD) {
            if state.contains(ExecState::RUN) {
                // Still decelerating into the hold.
                return true;
            }

            self.itp.stop(&mut self.mcu);
            if state.contains(ExecState::DOOR) {
                self.stop();
            }

            if state.contains(ExecState::HOMING) && state.contains(ExecState::DOOR) {
                self.alarm(Alarm::HomingFailDoor);
            }

            if state.intersects(ExecState::HOMING | ExecState::JOG) {
                // Homing and jog motions do not survive a hold.
                self.itp.clear(&mut self.mcu);
                self.planner.clear();
                self.planner
                    .resync_position(self.itp.get_rt_position(&self.settings));
                self.state
                    .clear(ExecState::HOMING | ExecState::JOG | ExecState::HOLD);
            }

            return false;
        }

        if state.contains(ExecState::LIMITS) {
            if !state.contains(ExecState::HOMING) {
                // Crash stop: position can no longer be trusted.
                self.stop();
                self.alarm(Alarm::HardLimit);
            }
            return false;
        }

        true
    }

    /// Emit a diagnostic for every fault system whose input is still
    /// asserted. Returns true when any was.
    pub(crate) fn check_fault_systems(&mut self) -> bool {
        let controls = io_control::get_controls(
            &self.mcu,
            &self.settings,
            Controls::ESTOP | Controls::SAFETY_DOOR,
        );
        let mut fault = false;
        if controls.contains(Controls::ESTOP) {
            self.send_str(grbl::MSG_CHECK_ESTOP);
            fault = true;
        }
        if controls.contains(Controls::SAFETY_DOOR) {
            self.send_str(grbl::MSG_CHECK_DOOR);
            fault = true;
        }
        if self.settings.hard_limits_enabled
            && io_control::get_limits(&self.mcu, &self.settings) != 0
        {
            self.send_str(grbl::MSG_CHECK_LIMITS);
            fault = true;
        }
        fault
    }

    // ── State transitions ───────────────────────────────────────────

    /// Raise an alarm: latch the code, lock the machine and abort.
    pub fn alarm(&mut self, code: Alarm) {
        self.active_alarm = Some(code);
        self.state
            .set(ExecState::ABORT | ExecState::ALARM | ExecState::LOCKED);
    }

    /// Halt motion and tools. A halt during motion loses the reference
    /// on homed machines.
    pub fn stop(&mut self) {
        if self.state.contains_any(ExecState::RUN) && self.settings.homing_enabled {
            self.state.set(ExecState::NOHOME);
        }
        self.itp.stop(&mut self.mcu);
        io_control::stop_tools(&mut self.mcu);
        self.coolant_flood = false;
        self.coolant_mist = false;
    }

    /// `$X`: clear reference/limit alarms at the user's request. Flags
    /// whose root cause is still asserted stay set. A pending hold is
    /// untouched; only a cycle start resumes motion.
    pub fn unlock(&mut self) {
        self.state.clear(ExecState::NOHOME | ExecState::LIMITS);
        self.clear_exec_state(ExecState::LOCKED | ExecState::ALARM);
        self.active_alarm = None;
        self.send_str(grbl::MSG_CAUTION_UNLOCKED);
    }

    /// Clear execution flags, except those whose root cause remains:
    /// a held fault input, or a missing home reference on a machine
    /// that requires homing.
    pub fn clear_exec_state(&mut self, mask: ExecState) {
        let mut mask = mask;
        let controls = io_control::get_controls(&self.mcu, &self.settings, Controls::all());

        if controls.contains(Controls::ESTOP) {
            mask.remove(ExecState::ABORT | ExecState::ALARM | ExecState::LOCKED);
        }
        if controls.contains(Controls::SAFETY_DOOR) {
            mask.remove(ExecState::DOOR);
        }
        if controls.contains(Controls::FHOLD) {
            mask.remove(ExecState::HOLD);
        }
        if self.settings.hard_limits_enabled
            && io_control::get_limits(&self.mcu, &self.settings) != 0
        {
            mask.remove(ExecState::LIMITS);
        }
        if self.settings.homing_enabled && self.state.contains_any(ExecState::NOHOME) {
            // No reference: stay locked until `$H` or `$X`.
            mask.remove(ExecState::NOHOME | ExecState::LOCKED | ExecState::ALARM);
        }

        self.state.clear(mask);
    }

    /// Reset to the initial state: all alarms latched, queues cleared,
    /// then a best-effort unlock that leaves root-caused flags set.
    pub fn reset(&mut self) {
        info!("cnc reset");
        self.serial.rt().clear();
        self.active_alarm = None;
        self.state.store(
            ExecState::ALARM | ExecState::HOLD | ExecState::NOHOME | ExecState::LOCKED,
        );

        self.mcu.disable_interrupts();
        self.itp.clear(&mut self.mcu);
        self.planner.clear();
        self.planner
            .resync_position(self.itp.get_rt_position(&self.settings));
        self.serial.clear();
        self.mcu.enable_interrupts();

        self.send_str(grbl::MSG_STARTUP);
        if self.settings_msg_pending {
            self.settings_msg_pending = false;
            self.send_str(grbl::MSG_RESTORING_DEFAULTS);
        }

        self.clear_exec_state(
            ExecState::ALARM | ExecState::HOLD | ExecState::NOHOME | ExecState::LOCKED,
        );

        if self.state.get().has_alarm() {
            self.check_fault_systems();
            if !self.state.contains_any(ExecState::ABORT) {
                self.send_str(grbl::MSG_UNLOCK);
            }
        }
    }

    // ── Real-time command dispatch ──────────────────────────────────

    fn exec_rt_command(&mut self, cmd: u8) {
        match cmd {
            rt::REPORT => self.send_status(),
            rt::RESET => {
                self.stop();
                self.alarm(Alarm::Reset);
            }
            rt::SAFETY_DOOR => {
                self.state.set(ExecState::DOOR | ExecState::HOLD);
                self.send_str(grbl::MSG_CHECK_DOOR);
            }
            rt::FEED_HOLD | rt::JOG_CANCEL => {
                if !self.state.contains_any(ExecState::HOMING) {
                    self.state.set(ExecState::HOLD);
                }
            }
            rt::CYCLE_START => {
                // Ignored while an alarm or lock is present. An open
                // door is not an alarm by itself: once the input has
                // cleared, cycle start is the resume path.
                if self
                    .state
                    .contains_any(ExecState::ALARM | ExecState::ABORT | ExecState::LOCKED)
                {
                    return;
                }
                // Restore the spindle before motion resumes. The door
                // flag only clears if the input itself has cleared.
                self.apply_spindle();
                self.send_str(grbl::MSG_RESTORING_SPINDLE);
                self.itp.delay(DELAY_ON_RESUME_S * 100);
                self.clear_exec_state(ExecState::DOOR | ExecState::HOLD);
            }

            rt::FEED_100 => self.feed_ovr(|p| p.feed_ovr_reset()),
            rt::FEED_INC_COARSE => self.feed_ovr(|p| p.feed_ovr_inc(grbl::FEED_OVR_COARSE)),
            rt::FEED_DEC_COARSE => self.feed_ovr(|p| p.feed_ovr_inc(-grbl::FEED_OVR_COARSE)),
            rt::FEED_INC_FINE => self.feed_ovr(|p| p.feed_ovr_inc(grbl::FEED_OVR_FINE)),
            rt::FEED_DEC_FINE => self.feed_ovr(|p| p.feed_ovr_inc(-grbl::FEED_OVR_FINE)),

            rt::RAPID_100 => self.feed_ovr(|p| p.rapid_ovr_reset()),
            rt::RAPID_50 => self.feed_ovr(|p| p.rapid_ovr_set(grbl::RAPID_OVR1)),
            rt::RAPID_25 => self.feed_ovr(|p| p.rapid_ovr_set(grbl::RAPID_OVR2)),

            rt::SPINDLE_100 => self.planner.spindle_ovr_reset(),
            rt::SPINDLE_INC_COARSE => self.planner.spindle_ovr_inc(grbl::SPINDLE_OVR_COARSE),
            rt::SPINDLE_DEC_COARSE => self.planner.spindle_ovr_inc(-grbl::SPINDLE_OVR_COARSE),
            rt::SPINDLE_INC_FINE => self.planner.spindle_ovr_inc(grbl::SPINDLE_OVR_FINE),
            rt::SPINDLE_DEC_FINE => self.planner.spindle_ovr_inc(-grbl::SPINDLE_OVR_FINE),

            rt::SPINDLE_TOGGLE => {
                if self.state.contains_any(ExecState::HOLD) {
                    if self.mcu.get_pwm(io_control::SPINDLE_PWM_CHANNEL) != 0 {
                        self.mcu.set_pwm(io_control::SPINDLE_PWM_CHANNEL, 0);
                    } else {
                        self.send_str(grbl::MSG_RESTORING_SPINDLE);
                        self.apply_spindle();
                    }
                }
            }

            rt::COOLANT_FLOOD_TOGGLE | rt::COOLANT_MIST_TOGGLE => {
                if !self.state.get().has_alarm() {
                    if cmd == rt::COOLANT_FLOOD_TOGGLE {
                        self.coolant_flood = !self.coolant_flood;
                    } else {
                        self.coolant_mist = !self.coolant_mist;
                    }
                    io_control::set_coolant(&mut self.mcu, self.coolant_flood, self.coolant_mist);
                }
            }

            _ => {}
        }

        // Spindle override changes re-program the output immediately.
        if (rt::SPINDLE_100..=rt::SPINDLE_DEC_FINE).contains(&cmd) {
            self.apply_spindle();
        }
    }

    /// Apply a feed/rapid override mutator; refresh the executing
    /// profile when the planner asks for it.
    fn feed_ovr(&mut self, mutate: impl FnOnce(&mut Planner) -> bool) {
        if mutate(&mut self.planner) {
            self.itp.update();
        }
    }

    pub(crate) fn apply_spindle(&mut self) {
        let rpm = self.planner.spindle_rpm();
        io_control::update_spindle(rpm, &self.settings, &mut self.mcu);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fresa_hal::VirtualMcu;

    fn test_cnc() -> Cnc<VirtualMcu> {
        let mut cnc = Cnc::new(VirtualMcu::new(), Settings::default());
        cnc.reset();
        cnc.mcu_mut().take_uart_output();
        cnc
    }

    #[test]
    fn reset_without_homing_unlocks() {
        let cnc = test_cnc();
        assert!(!cnc.exec_state().has_alarm());
        assert!(!cnc.exec_state().contains(ExecState::LOCKED));
    }

    #[test]
    fn reset_with_homing_stays_locked_until_unlock() {
        let mut cnc = Cnc::new(VirtualMcu::new(), Settings::default());
        cnc.settings_mut().homing_enabled = true;
        cnc.reset();
        let state = cnc.exec_state();
        assert!(state.contains(ExecState::NOHOME));
        assert!(state.contains(ExecState::LOCKED));
        assert!(state.contains(ExecState::ALARM));
        let out = cnc.mcu_mut().take_uart_output();
        assert!(out.contains("'$H'|'$X' to unlock"));

        cnc.unlock();
        let state = cnc.exec_state();
        assert!(!state.contains(ExecState::NOHOME));
        assert!(!state.contains(ExecState::LOCKED));
        assert!(!state.contains(ExecState::ALARM));
    }

    #[test]
    fn unlock_does_not_clear_hold() {
        let mut cnc = test_cnc();
        // A safety-door hold survives the door closing; `$X` must not
        // bypass the cycle-start resume path.
        cnc.rx_isr(rt::SAFETY_DOOR);
        cnc.doevents();
        assert!(cnc.exec_state().contains(ExecState::HOLD));

        cnc.unlock();
        let state = cnc.exec_state();
        assert!(state.contains(ExecState::HOLD), "$X cleared a pending hold");
        assert!(state.contains(ExecState::DOOR));

        // Cycle start is the sanctioned resume: it restores the
        // spindle, schedules the resume dwell, then clears the hold.
        cnc.mcu_mut().take_uart_output();
        cnc.rx_isr(rt::CYCLE_START);
        cnc.doevents();
        let state = cnc.exec_state();
        assert!(!state.contains(ExecState::HOLD));
        assert!(!state.contains(ExecState::DOOR));
        let out = cnc.mcu_mut().take_uart_output();
        assert!(out.contains("Restoring spindle"), "{out:?}");
    }

    #[test]
    fn clear_exec_state_respects_held_inputs() {
        let mut cnc = test_cnc();
        cnc.mcu_mut().inject_controls(Controls::FHOLD.bits());
        cnc.state.set(ExecState::HOLD);
        cnc.clear_exec_state(ExecState::HOLD);
        assert!(cnc.exec_state().contains(ExecState::HOLD));

        cnc.mcu_mut().inject_controls(0);
        cnc.clear_exec_state(ExecState::HOLD);
        assert!(!cnc.exec_state().contains(ExecState::HOLD));
    }

    #[test]
    fn estop_blocks_alarm_clearing() {
        let mut cnc = test_cnc();
        cnc.mcu_mut().inject_controls(Controls::ESTOP.bits());
        cnc.alarm(Alarm::AbortCycle);
        cnc.clear_exec_state(ExecState::ABORT | ExecState::ALARM | ExecState::LOCKED);
        let state = cnc.exec_state();
        assert!(state.contains(ExecState::ABORT));
        assert!(state.contains(ExecState::ALARM));
    }

    #[test]
    fn rx_reset_byte_aborts_immediately() {
        let mut cnc = test_cnc();
        cnc.rx_isr(rt::RESET);
        assert!(cnc.exec_state().contains(ExecState::ABORT));
    }

    #[test]
    fn feed_hold_rt_sets_hold() {
        let mut cnc = test_cnc();
        cnc.rx_isr(rt::FEED_HOLD);
        cnc.doevents();
        assert!(cnc.exec_state().contains(ExecState::HOLD));
    }

    #[test]
    fn feed_hold_ignored_while_homing() {
        let mut cnc = test_cnc();
        cnc.state.set(ExecState::HOMING);
        cnc.rx_isr(rt::FEED_HOLD);
        cnc.doevents();
        assert!(!cnc.exec_state().contains(ExecState::HOLD));
    }

    #[test]
    fn cycle_start_clears_hold_and_schedules_resume_delay() {
        let mut cnc = test_cnc();
        cnc.state.set(ExecState::HOLD);
        cnc.rx_isr(rt::CYCLE_START);
        cnc.doevents();
        assert!(!cnc.exec_state().contains(ExecState::HOLD));
        assert!(!cnc.interpolator().is_idle()); // resume dwell queued
    }

    #[test]
    fn cycle_start_ignored_in_alarm() {
        let mut cnc = test_cnc();
        cnc.alarm(Alarm::HardLimit);
        cnc.state.set(ExecState::HOLD);
        cnc.rx_isr(rt::CYCLE_START);
        cnc.doevents();
        assert!(cnc.exec_state().contains(ExecState::HOLD));
    }

    #[test]
    fn door_rt_sets_door_and_hold() {
        let mut cnc = test_cnc();
        cnc.rx_isr(rt::SAFETY_DOOR);
        cnc.doevents();
        let state = cnc.exec_state();
        assert!(state.contains(ExecState::DOOR));
        assert!(state.contains(ExecState::HOLD));
        let out = cnc.mcu_mut().take_uart_output();
        assert!(out.contains("Check Door"));
    }

    #[test]
    fn feed_override_bytes_update_planner() {
        let mut cnc = test_cnc();
        for _ in 0..3 {
            cnc.rx_isr(rt::FEED_DEC_COARSE);
            cnc.doevents();
        }
        assert_eq!(cnc.planner().overrides().feed, 70);

        cnc.rx_isr(rt::FEED_100);
        cnc.doevents();
        assert_eq!(cnc.planner().overrides().feed, 100);

        cnc.rx_isr(rt::RAPID_25);
        cnc.doevents();
        assert_eq!(cnc.planner().overrides().rapid, 25);
    }

    #[test]
    fn coolant_toggle_flips_outputs() {
        let mut cnc = test_cnc();
        cnc.rx_isr(rt::COOLANT_FLOOD_TOGGLE);
        cnc.doevents();
        assert_ne!(cnc.mcu().get_outputs() & io_control::outputs::COOLANT_FLOOD, 0);
        cnc.rx_isr(rt::COOLANT_FLOOD_TOGGLE);
        cnc.doevents();
        assert_eq!(cnc.mcu().get_outputs() & io_control::outputs::COOLANT_FLOOD, 0);
    }

    #[test]
    fn limit_input_raises_hard_limit_alarm() {
        let mut cnc = test_cnc();
        cnc.settings_mut().hard_limits_enabled = true;
        cnc.mcu_mut().inject_limits(0b001);
        cnc.doevents();
        let state = cnc.exec_state();
        assert!(state.contains(ExecState::LIMITS));
        assert!(state.contains(ExecState::ABORT));
        cnc.doevents();
        let out = cnc.mcu_mut().take_uart_output();
        assert!(out.contains("ALARM:1"), "missing hard-limit alarm in {out:?}");
    }

    #[test]
    fn limit_input_ignored_while_homing() {
        let mut cnc = test_cnc();
        cnc.settings_mut().hard_limits_enabled = true;
        cnc.state.set(ExecState::HOMING);
        cnc.mcu_mut().inject_limits(0b001);
        cnc.doevents();
        assert!(!cnc.exec_state().contains(ExecState::LIMITS));
        assert!(!cnc.exec_state().contains(ExecState::ABORT));
    }

    #[test]
    fn estop_input_aborts() {
        let mut cnc = test_cnc();
        cnc.mcu_mut().inject_controls(Controls::ESTOP.bits());
        cnc.doevents();
        assert!(cnc.exec_state().contains(ExecState::ABORT));
    }

    #[test]
    fn interlock_decision_table() {
        // {DOOR, HOLD, LIMITS, HOMING, RUN, JOG} subsets against the
        // specified outcomes.
        let cases: &[(ExecState, bool)] = &[
            (ExecState::empty(), true),
            (ExecState::RUN, true),
            (ExecState::HOLD | ExecState::RUN, true), // decelerating
            (ExecState::HOLD, false),
            (ExecState::DOOR | ExecState::HOLD, false),
            (ExecState::DOOR | ExecState::HOLD | ExecState::RUN, true),
            (ExecState::LIMITS, false),
            (ExecState::LIMITS | ExecState::HOMING, false),
            (ExecState::ABORT, false),
            (ExecState::HOLD | ExecState::JOG, false),
        ];
        for (flags, expect) in cases {
            let mut cnc = test_cnc();
            cnc.state.store(*flags);
            assert_eq!(
                cnc.check_interlocking(),
                *expect,
                "interlock mismatch for {flags:?}"
            );
        }
    }

    #[test]
    fn interlock_hold_flushes_jog_and_homing() {
        let mut cnc = test_cnc();
        cnc.state.store(ExecState::HOLD | ExecState::JOG);
        assert!(!cnc.check_interlocking());
        let state = cnc.exec_state();
        assert!(!state.contains(ExecState::JOG));
        assert!(!state.contains(ExecState::HOLD));
        assert!(cnc.planner().is_empty());
    }

    #[test]
    fn door_during_homing_raises_alarm() {
        let mut cnc = test_cnc();
        cnc.state
            .store(ExecState::DOOR | ExecState::HOLD | ExecState::HOMING);
        assert!(!cnc.check_interlocking());
        assert!(cnc.exec_state().contains(ExecState::ABORT));
        assert_eq!(cnc.active_alarm(), Some(Alarm::HomingFailDoor));
    }

    #[test]
    fn stop_during_run_loses_home_reference() {
        let mut cnc = test_cnc();
        cnc.settings_mut().homing_enabled = true;
        cnc.state.set(ExecState::RUN);
        cnc.stop();
        assert!(cnc.exec_state().contains(ExecState::NOHOME));
    }

    #[test]
    fn locked_machine_rejects_gcode() {
        let mut cnc = test_cnc();
        cnc.state.set(ExecState::LOCKED);
        cnc.serial.rx_inject("G1X10F100\n");
        cnc.poll_command();
        let out = cnc.mcu_mut().take_uart_output();
        assert!(out.contains("error:9"), "expected lock error, got {out:?}");
    }

    #[test]
    fn alarm_message_emitted_once() {
        let mut cnc = test_cnc();
        cnc.alarm(Alarm::SoftLimit);
        cnc.doevents();
        cnc.doevents();
        let out = cnc.mcu_mut().take_uart_output();
        assert_eq!(out.matches("ALARM:2").count(), 1);
    }
}
