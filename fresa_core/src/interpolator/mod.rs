//! Step interpolator: converts planner blocks into timer-paced step
//! pulses with a trapezoidal velocity profile.
//!
//! The generation side (`run`, called from the supervisor event pump)
//! pulls the head planner block, fits its profile between the planned
//! entry speed, top speed and exit speed, and slices it into bounded
//! *segments* — a step count at a fixed timer period, one interpolator
//! time quantum each. The interrupt side (`step_isr`/`step_reset_isr`)
//! consumes segments and emits the actual pulses with a Bresenham
//! accumulator per axis, the dominant axis pacing the others.
//!
//! The planner block is discarded once fully sliced; override and
//! recalculation refreshes (`update`) therefore retime only the block
//! still being sliced, never pulses already committed to segments.

pub mod profile;

use heapless::Deque;
use static_assertions::const_assert;

use fresa_common::consts::{
    AXIS_COUNT, F_STEP_MAX, ITP_FREQ, ITP_SEGMENT_BUFFER_SIZE,
};
use fresa_common::grbl::Status;
use fresa_common::hal::{clamp_step_freq, Mcu, TimerPreset};
use fresa_common::settings::Settings;
use fresa_common::state::{AtomicExecState, ExecState};

use crate::planner::{MotionMode, Planner};
use profile::{advance_towards, compute, Profile};

// A hold ramp needs at least one segment in flight while the next is
// being retimed.
const_assert!(ITP_SEGMENT_BUFFER_SIZE >= 2);

/// Squared-speed floor below which a held axis counts as stationary.
const HOLD_STOP_EPS: f32 = 1e-6;

/// Upper bound on dwell ticks per segment.
const MAX_DWELL_TICKS: u32 = 100;

/// Per-block data handed to the interrupt side with the first segment.
#[derive(Debug, Clone, Copy)]
struct BlockLoad {
    steps: [u32; AXIS_COUNT],
    total: u32,
    dirbits: u8,
}

/// One step-domain work item.
#[derive(Debug, Clone, Copy)]
struct Segment {
    /// Present on the first segment of each block.
    load: Option<BlockLoad>,
    /// Timer fires covered by this segment (steps, or dwell ticks).
    ticks: u32,
    preset: TimerPreset,
    /// Path speed during this segment [mm/s]; 0 for dwell.
    feed: f32,
    /// False for dwell segments (no pulses).
    motion: bool,
}

/// Interrupt-side Bresenham state for the executing block.
#[derive(Debug, Clone, Copy)]
struct ExecBlock {
    steps: [u32; AXIS_COUNT],
    total: u32,
    acc: [u32; AXIS_COUNT],
    dirbits: u8,
}

impl From<BlockLoad> for ExecBlock {
    fn from(load: BlockLoad) -> Self {
        Self {
            steps: load.steps,
            total: load.total,
            acc: [0; AXIS_COUNT],
            dirbits: load.dirbits,
        }
    }
}

/// Generation-side state of the block currently being sliced.
#[derive(Debug, Clone, Copy)]
struct Tracker {
    total: u32,
    remaining: u32,
    accel: f32,
    /// Steps per millimetre along the path (master-axis pacing).
    step_per_dist: f32,
    /// v² at the slicing frontier.
    speed_sqr: f32,
    top_sqr: f32,
    exit_sqr: f32,
    /// Absolute step index where the first ramp ends.
    ramp1_until: u32,
    /// Absolute step index where the cruise ends.
    cruise_until: u32,
    /// Dwell ticks to emit before the motion.
    dwell_ticks: u32,
    pending_load: Option<BlockLoad>,
    hold_applied: bool,
    rate_error_sent: bool,
}

impl Tracker {
    #[inline]
    fn processed(&self) -> u32 {
        self.total - self.remaining
    }

    /// Fit a new profile over the remaining distance, starting from the
    /// frontier speed.
    fn retarget(&mut self, top_sqr: f32, exit_sqr: f32) {
        let remaining_dist = if self.step_per_dist > 0.0 {
            self.remaining as f32 / self.step_per_dist
        } else {
            0.0
        };
        let profile: Profile = compute(self.speed_sqr, exit_sqr, top_sqr, self.accel, remaining_dist);
        self.top_sqr = profile.top_sqr;
        self.exit_sqr = exit_sqr.min(profile.top_sqr);

        let processed = self.processed();
        let ramp1 = (profile.ramp_dist * self.step_per_dist).round() as u32;
        let cruise = (profile.cruise_dist * self.step_per_dist).round() as u32;
        self.ramp1_until = (processed + ramp1).min(self.total);
        self.cruise_until = (self.ramp1_until + cruise).min(self.total);
    }
}

/// The step interpolator.
pub struct Interpolator {
    segments: Deque<Segment, ITP_SEGMENT_BUFFER_SIZE>,
    tracker: Option<Tracker>,
    current: Option<Segment>,
    exec: Option<ExecBlock>,
    /// Real-time machine position [steps], owned by the interrupt side.
    rt_steps: [i32; AXIS_COUNT],
    /// Absolute step targets committed to segments so far.
    target_steps: [i32; AXIS_COUNT],
    rt_feed: f32,
    needs_update: bool,
    timer_running: bool,
    /// Exit speed actually reached by the last completed block; bounds
    /// the next entry when a hold lowered it below plan.
    exit_carry_sqr: f32,
    extra_dwell: u32,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpolator {
    pub const fn new() -> Self {
        Self {
            segments: Deque::new(),
            tracker: None,
            current: None,
            exec: None,
            rt_steps: [0; AXIS_COUNT],
            target_steps: [0; AXIS_COUNT],
            rt_feed: 0.0,
            needs_update: false,
            timer_running: false,
            exit_carry_sqr: f32::INFINITY,
            extra_dwell: 0,
        }
    }

    // ── Generation side ─────────────────────────────────────────────

    /// Pull planner blocks and enqueue step segments. Idempotent when
    /// the queue is full or no block is ready. Invoked from the
    /// supervisor event pump.
    pub fn run<M: Mcu>(
        &mut self,
        planner: &mut Planner,
        settings: &Settings,
        state: &AtomicExecState,
        mcu: &mut M,
    ) -> Result<(), Status> {
        let hold = state.contains_any(ExecState::HOLD);
        let mut result = Ok(());

        while !self.segments.is_full() {
            // Scheduled dwell (resume delay) runs ahead of any motion.
            if self.extra_dwell > 0 {
                let ticks = self.extra_dwell.min(MAX_DWELL_TICKS);
                self.push_dwell(ticks, mcu);
                self.extra_dwell -= ticks;
                continue;
            }

            if self.tracker.is_none() && !self.load_next_block(planner, settings) {
                break;
            }
            let tracker = self.tracker.as_mut().expect("tracker loaded above");

            // Per-block dwell first.
            if tracker.dwell_ticks > 0 {
                let ticks = tracker.dwell_ticks.min(MAX_DWELL_TICKS);
                tracker.dwell_ticks -= ticks;
                let seg = Segment {
                    load: None,
                    ticks,
                    preset: mcu.freq_to_clocks(ITP_FREQ),
                    feed: 0.0,
                    motion: false,
                };
                self.segments.push_back(seg).ok();
                continue;
            }

            // Dwell-only or sub-step blocks finish here; position was
            // snapped when the block loaded.
            if tracker.total == 0 {
                self.exit_carry_sqr = 0.0;
                self.tracker = None;
                planner.discard_block();
                continue;
            }

            // Profile refresh requests: hold retarget wins, then
            // override/recalculation updates, then hold release.
            if hold && !tracker.hold_applied {
                tracker.hold_applied = true;
                let current = tracker.speed_sqr;
                tracker.retarget(current, 0.0);
                self.needs_update = false;
            } else if !hold && tracker.hold_applied {
                tracker.hold_applied = false;
                tracker.retarget(
                    planner.get_block_top_speed_sqr(),
                    planner.get_exit_speed_sqr(),
                );
                self.needs_update = false;
            } else if self.needs_update {
                self.needs_update = false;
                tracker.retarget(
                    planner.get_block_top_speed_sqr(),
                    planner.get_exit_speed_sqr(),
                );
            }

            // A held block that has ramped to zero stalls until resume.
            if tracker.hold_applied && tracker.speed_sqr <= HOLD_STOP_EPS {
                break;
            }

            // ── Slice one segment ──
            let processed = tracker.processed();
            let (phase_end, target_sqr) = if processed < tracker.ramp1_until {
                (tracker.ramp1_until, tracker.top_sqr)
            } else if processed < tracker.cruise_until {
                (tracker.cruise_until, tracker.top_sqr)
            } else {
                (tracker.total, tracker.exit_sqr)
            };

            let speed = tracker.speed_sqr.max(0.0).sqrt();
            let freq = speed * tracker.step_per_dist;
            if freq > F_STEP_MAX && !tracker.rate_error_sent {
                tracker.rate_error_sent = true;
                result = Err(Status::MaxStepRateExceeded);
            }
            // Underflow clamps up silently; overflow clamps down after
            // reporting.
            let freq = clamp_step_freq(freq);

            let quantum = (freq / ITP_FREQ).ceil() as u32;
            let ticks = quantum.max(1).min(phase_end - processed);
            let preset = mcu.freq_to_clocks(freq);

            let seg = Segment {
                load: tracker.pending_load.take(),
                ticks,
                preset,
                feed: speed,
                motion: true,
            };
            self.segments.push_back(seg).ok();

            let delta_sqr =
                2.0 * tracker.accel * (ticks as f32 / tracker.step_per_dist);
            tracker.speed_sqr = advance_towards(tracker.speed_sqr, target_sqr, delta_sqr);
            tracker.remaining -= ticks;

            if tracker.remaining == 0 {
                self.exit_carry_sqr = tracker.speed_sqr;
                self.tracker = None;
                planner.discard_block();
            }
        }

        // Start stepping when work is queued; report idle otherwise.
        if !self.timer_running {
            if let Some(front) = self.segments.front() {
                self.timer_running = true;
                state.set(ExecState::RUN);
                mcu.start_step_isr(front.preset);
            } else if self.current.is_none() && self.extra_dwell == 0 {
                let stalled = self
                    .tracker
                    .as_ref()
                    .is_none_or(|t| t.hold_applied && t.speed_sqr <= HOLD_STOP_EPS);
                if stalled {
                    state.clear(ExecState::RUN);
                }
            }
        }

        result
    }

    /// Snapshot the head planner block into a fresh tracker. Returns
    /// false when the planner is empty.
    fn load_next_block(&mut self, planner: &mut Planner, settings: &Settings) -> bool {
        let Some(block) = planner.get_block() else {
            return false;
        };

        let mut steps = [0u32; AXIS_COUNT];
        let mut dirbits = 0u8;
        let mut total = 0u32;

        if block.motion_mode == MotionMode::Linear {
            for i in 0..AXIS_COUNT {
                let goal = (block.target[i] * settings.step_per_mm[i]).round() as i64;
                let delta = goal - self.target_steps[i] as i64;
                if delta < 0 {
                    dirbits |= 1 << i;
                }
                steps[i] = delta.unsigned_abs() as u32;
                total = total.max(steps[i]);
                self.target_steps[i] = goal as i32;
            }
        }

        let entry_sqr = block.entry_feed_sqr.min(self.exit_carry_sqr);
        let step_per_dist = if block.distance > 0.0 {
            total as f32 / block.distance
        } else {
            0.0
        };

        let mut tracker = Tracker {
            total,
            remaining: total,
            accel: block.acceleration,
            step_per_dist,
            speed_sqr: entry_sqr,
            top_sqr: 0.0,
            exit_sqr: 0.0,
            ramp1_until: 0,
            cruise_until: 0,
            dwell_ticks: block.dwell as u32,
            pending_load: (total > 0).then_some(BlockLoad {
                steps,
                total,
                dirbits,
            }),
            hold_applied: false,
            rate_error_sent: false,
        };

        if total > 0 {
            tracker.retarget(
                planner.get_block_top_speed_sqr(),
                planner.get_exit_speed_sqr(),
            );
        }
        self.tracker = Some(tracker);
        true
    }

    fn push_dwell<M: Mcu>(&mut self, ticks: u32, mcu: &mut M) {
        let seg = Segment {
            load: None,
            ticks,
            preset: mcu.freq_to_clocks(ITP_FREQ),
            feed: 0.0,
            motion: false,
        };
        self.segments.push_back(seg).ok();
    }

    /// Request a profile refresh of the block being sliced (override
    /// change or planner recomputation of the head).
    #[inline]
    pub fn update(&mut self) {
        self.needs_update = true;
    }

    /// Halt stepping, keeping queues and position (feed hold at rest).
    pub fn stop<M: Mcu>(&mut self, mcu: &mut M) {
        mcu.stop_step_isr();
        self.timer_running = false;
        self.rt_feed = 0.0;
    }

    /// Drop all queued work and stop the timer. Position is preserved;
    /// only `reset_rt_position` rewrites it.
    pub fn clear<M: Mcu>(&mut self, mcu: &mut M) {
        mcu.stop_step_isr();
        self.timer_running = false;
        self.segments.clear();
        self.tracker = None;
        self.current = None;
        self.exec = None;
        self.rt_feed = 0.0;
        self.needs_update = false;
        self.exit_carry_sqr = f32::INFINITY;
        self.extra_dwell = 0;
        // Re-anchor the step grid on the actual position.
        self.target_steps = self.rt_steps;
    }

    /// Scheduled dwell [centiseconds] that blocks interpolator advance
    /// without stopping the step interrupts.
    pub fn delay(&mut self, centiseconds: u16) {
        self.extra_dwell += centiseconds as u32;
    }

    /// Real-time machine position in user units.
    pub fn get_rt_position(&self, settings: &Settings) -> [f32; AXIS_COUNT] {
        let mut out = [0.0; AXIS_COUNT];
        for i in 0..AXIS_COUNT {
            out[i] = self.rt_steps[i] as f32 / settings.step_per_mm[i];
        }
        out
    }

    /// Zero the step counters (homing established a new reference).
    pub fn reset_rt_position(&mut self) {
        self.rt_steps = [0; AXIS_COUNT];
        self.target_steps = [0; AXIS_COUNT];
        self.exit_carry_sqr = f32::INFINITY;
    }

    /// Current path speed [mm/s].
    #[inline]
    pub fn rt_feed(&self) -> f32 {
        self.rt_feed
    }

    /// True when nothing is queued, executing or pending.
    pub fn is_idle(&self) -> bool {
        !self.timer_running
            && self.segments.is_empty()
            && self.current.is_none()
            && self.tracker.is_none()
            && self.extra_dwell == 0
    }

    /// Queued planner-visible depth for status reports.
    pub fn segment_depth(&self) -> usize {
        self.segments.len()
    }

    // ── Interrupt side ──────────────────────────────────────────────

    /// Step interrupt: assert step lines for the due axes and advance
    /// the real-time position.
    pub fn step_isr<M: Mcu>(&mut self, settings: &Settings, mcu: &mut M) {
        if !self.timer_running {
            return;
        }

        if self.current.is_none() {
            match self.segments.pop_front() {
                Some(seg) => {
                    if let Some(load) = seg.load {
                        // Direction lines settle before the first pulse.
                        mcu.set_dirs(load.dirbits ^ settings.dir_invert_mask);
                        self.exec = Some(ExecBlock::from(load));
                    }
                    mcu.change_step_isr(seg.preset);
                    self.rt_feed = seg.feed;
                    self.current = Some(seg);
                }
                None => {
                    self.timer_running = false;
                    self.rt_feed = 0.0;
                    mcu.stop_step_isr();
                    return;
                }
            }
        }

        let seg = self.current.as_mut().expect("segment loaded above");
        if seg.motion {
            if let Some(block) = self.exec.as_mut() {
                let mut mask = 0u8;
                for i in 0..AXIS_COUNT {
                    block.acc[i] += block.steps[i];
                    if block.acc[i] >= block.total {
                        block.acc[i] -= block.total;
                        mask |= 1 << i;
                        if block.dirbits & (1 << i) != 0 {
                            self.rt_steps[i] -= 1;
                        } else {
                            self.rt_steps[i] += 1;
                        }
                    }
                }
                mcu.set_steps(mask);
            }
        }

        seg.ticks -= 1;
        if seg.ticks == 0 {
            self.current = None;
        }
    }

    /// Step-reset interrupt: deassert all step lines after the pulse
    /// width has elapsed.
    pub fn step_reset_isr<M: Mcu>(&mut self, mcu: &mut M) {
        mcu.set_steps(0);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
