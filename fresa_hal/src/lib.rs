//! Virtual MCU — the simulation implementation of the [`Mcu`] contract.
//!
//! Runs the motion core on a PC for testing and bench work. All port
//! state is held in plain registers; the test rig injects control,
//! limit and probe inputs, and observes step edges, PWM duties, the
//! captured UART stream and the EEPROM array.
//!
//! The step timer is polled: every [`Mcu::step_timer_pending`] call
//! reports one due period while the timer runs, so one supervisor
//! event-pump cycle advances exactly one step interrupt pair. Tests may
//! also fire the interpolator interrupts directly for step-exact
//! assertions.

use fresa_common::consts::{AXIS_COUNT, F_CPU};
use fresa_common::hal::{clamp_step_freq, Mcu, TimerPreset};
use tracing::debug;

/// Prescaler ladder, indexed by `TimerPreset::prescaler`.
const PRESCALERS: [u32; 5] = [1, 8, 64, 256, 1024];

/// Simulated EEPROM capacity [bytes].
const EEPROM_SIZE: usize = 1024;

/// Virtual port map plus recorded observations for tests.
pub struct VirtualMcu {
    // ── Port registers ──
    steps: u8,
    dirs: u8,
    outputs: u32,
    pwm: [u8; 4],

    // ── Injectable inputs ──
    controls: u8,
    limits: u8,
    probe: bool,

    // ── Step timer ──
    timer: TimerPreset,
    timer_running: bool,

    // ── UART ──
    uart_out: Vec<u8>,
    tx_kicked: bool,

    // ── EEPROM ──
    eeprom: [u8; EEPROM_SIZE],

    irq_depth: i32,

    // ── Simulated axis model ──
    /// Signed position per axis [steps], integrated from step edges
    /// (a set direction line reads as negative travel).
    sim_positions: [i64; AXIS_COUNT],
    /// Optional limit switch per axis: asserted while the simulated
    /// position sits at or below the threshold [steps].
    limit_trips: [Option<i64>; AXIS_COUNT],

    // ── Observations ──
    /// Rising step edges seen per axis since the last [`Self::reset_observations`].
    step_edges: [u64; AXIS_COUNT],
    /// Direction mask latched at the most recent step edge, per axis.
    edge_dirs: u8,
}

impl Default for VirtualMcu {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMcu {
    pub fn new() -> Self {
        Self {
            steps: 0,
            dirs: 0,
            outputs: 0,
            pwm: [0; 4],
            controls: 0,
            limits: 0,
            probe: false,
            timer: TimerPreset::default(),
            timer_running: false,
            uart_out: Vec::new(),
            tx_kicked: false,
            eeprom: [0xFF; EEPROM_SIZE],
            irq_depth: 0,
            sim_positions: [0; AXIS_COUNT],
            limit_trips: [None; AXIS_COUNT],
            step_edges: [0; AXIS_COUNT],
            edge_dirs: 0,
        }
    }

    // ── Test-rig input injection ──

    pub fn inject_controls(&mut self, mask: u8) {
        self.controls = mask;
    }

    pub fn inject_limits(&mut self, mask: u8) {
        self.limits = mask;
    }

    pub fn inject_probe(&mut self, active: bool) {
        self.probe = active;
    }

    /// Model a physical minimum-end limit switch: the limit bit for
    /// `axis` asserts while the simulated position is at or below
    /// `threshold_steps`. Used by homing tests.
    pub fn set_limit_trip(&mut self, axis: usize, threshold_steps: i64) {
        self.limit_trips[axis] = Some(threshold_steps);
    }

    /// Simulated axis positions integrated from step/direction edges.
    pub fn sim_positions(&self) -> [i64; AXIS_COUNT] {
        self.sim_positions
    }

    // ── Test-rig observation ──

    /// Rising step edges recorded per axis.
    pub fn step_edges(&self) -> [u64; AXIS_COUNT] {
        self.step_edges
    }

    /// Direction mask present at the last recorded step edge.
    pub fn last_edge_dirs(&self) -> u8 {
        self.edge_dirs
    }

    pub fn reset_observations(&mut self) {
        self.step_edges = [0; AXIS_COUNT];
    }

    /// Everything written to the UART so far.
    pub fn uart_output(&self) -> &[u8] {
        &self.uart_out
    }

    /// Drain and return the captured UART stream as text.
    pub fn take_uart_output(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.uart_out).into_owned();
        self.uart_out.clear();
        text
    }

    /// Whether a TX kick is pending; clears the flag.
    pub fn take_tx_kick(&mut self) -> bool {
        core::mem::take(&mut self.tx_kicked)
    }

    pub fn timer_running(&self) -> bool {
        self.timer_running
    }

    pub fn timer_preset(&self) -> TimerPreset {
        self.timer
    }
}

impl Mcu for VirtualMcu {
    fn set_steps(&mut self, mask: u8) {
        // Count rising edges only; the reset interrupt writes zero.
        let rising = mask & !self.steps;
        for axis in 0..AXIS_COUNT {
            if rising & (1 << axis) != 0 {
                self.step_edges[axis] += 1;
                if self.dirs & (1 << axis) != 0 {
                    self.sim_positions[axis] -= 1;
                } else {
                    self.sim_positions[axis] += 1;
                }
            }
        }
        if rising != 0 {
            self.edge_dirs = self.dirs;
        }
        self.steps = mask;
    }

    fn set_dirs(&mut self, mask: u8) {
        self.dirs = mask;
    }

    fn set_outputs(&mut self, mask: u32) {
        self.outputs |= mask;
    }

    fn clear_outputs(&mut self, mask: u32) {
        self.outputs &= !mask;
    }

    fn get_outputs(&self) -> u32 {
        self.outputs
    }

    fn set_pwm(&mut self, channel: u8, duty: u8) {
        if let Some(slot) = self.pwm.get_mut(channel as usize) {
            *slot = duty;
        }
    }

    fn get_pwm(&self, channel: u8) -> u8 {
        self.pwm.get(channel as usize).copied().unwrap_or(0)
    }

    fn get_controls(&self) -> u8 {
        self.controls
    }

    fn get_limits(&self) -> u8 {
        let mut mask = self.limits;
        for (axis, trip) in self.limit_trips.iter().enumerate() {
            if let Some(threshold) = trip {
                if self.sim_positions[axis] <= *threshold {
                    mask |= 1 << axis;
                }
            }
        }
        mask
    }

    fn get_probe(&self) -> bool {
        self.probe
    }

    fn start_step_isr(&mut self, preset: TimerPreset) {
        debug!(clocks = preset.clocks, prescaler = preset.prescaler, "step timer start");
        self.timer = preset;
        self.timer_running = true;
    }

    fn change_step_isr(&mut self, preset: TimerPreset) {
        self.timer = preset;
    }

    fn stop_step_isr(&mut self) {
        self.timer_running = false;
    }

    fn step_timer_pending(&mut self) -> u32 {
        // One due period per poll keeps the simulation deterministic.
        if self.timer_running { 1 } else { 0 }
    }

    fn freq_to_clocks(&self, freq: f32) -> TimerPreset {
        let freq = clamp_step_freq(freq);
        let total = (F_CPU as f32 / freq) as u32;
        for (index, prescaler) in PRESCALERS.iter().enumerate() {
            let clocks = total / prescaler;
            if clocks <= u16::MAX as u32 {
                return TimerPreset {
                    clocks: clocks.max(1) as u16,
                    prescaler: index as u8,
                };
            }
        }
        // Slower than the largest prescaler can express: saturate.
        TimerPreset {
            clocks: u16::MAX,
            prescaler: (PRESCALERS.len() - 1) as u8,
        }
    }

    fn clocks_to_freq(&self, preset: TimerPreset) -> f32 {
        let prescaler = PRESCALERS[preset.prescaler as usize % PRESCALERS.len()];
        F_CPU as f32 / (prescaler as f32 * preset.clocks.max(1) as f32)
    }

    fn uart_write(&mut self, byte: u8) {
        self.uart_out.push(byte);
    }

    fn uart_start_send(&mut self) {
        self.tx_kicked = true;
    }

    fn eeprom_get(&self, address: u16) -> u8 {
        self.eeprom.get(address as usize).copied().unwrap_or(0xFF)
    }

    fn eeprom_put(&mut self, address: u16, value: u8) {
        if let Some(slot) = self.eeprom.get_mut(address as usize) {
            *slot = value;
        }
    }

    fn enable_interrupts(&mut self) {
        self.irq_depth -= 1;
    }

    fn disable_interrupts(&mut self) {
        self.irq_depth += 1;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
