//! Homing cycle: drive each axis into its limit switch to establish
//! machine zero.
//!
//! Per axis: a fast seek into the switch, a pull-off, then a slow
//! re-approach for a precise trigger, then a final pull-off. Afterwards
//! the machine moves to the reference offset and the planner and
//! interpolator positions are zeroed there. Hard-limit interpretation
//! is suspended for the whole cycle — driving into the switches is the
//! point.

use tracing::info;

use fresa_common::consts::AXIS_COUNT;
use fresa_common::grbl::{Alarm, StatusResult};
use fresa_common::hal::Mcu;
use fresa_common::state::ExecState;

use crate::cnc::Cnc;
use crate::io_control;
use crate::planner::{BlockData, MotionMode};

/// Seek travel margin beyond the configured axis length.
const SEEK_MARGIN: f32 = 1.5;

impl<M: Mcu> Cnc<M> {
    /// `$H`: run the homing cycle. Failures raise the matching homing
    /// alarm; the line itself still completes.
    pub fn home(&mut self) -> StatusResult {
        info!("homing cycle start");
        self.state.set(ExecState::HOMING);

        if let Err(code) = self.home_all_axes() {
            self.state.clear(ExecState::HOMING);
            if !self.state.contains_any(ExecState::ABORT) {
                self.alarm(code);
            }
            return Ok(());
        }

        // Machine zero established: release the reference alarms and
        // park at the reference offset.
        self.unlock();

        let mut target = self.planner.get_position();
        for i in 0..AXIS_COUNT {
            target[i] += self.homing_offset_direction(i) * self.settings.homing_offset;
        }
        let feed = self.settings.homing_fast_feed_rate;
        self.homing_move(target, feed);
        self.wait_motion_end();

        self.itp.reset_rt_position();
        self.planner
            .resync_position(self.itp.get_rt_position(&self.settings));
        self.state.clear(ExecState::HOMING);
        info!("homing cycle complete");
        Ok(())
    }

    fn home_all_axes(&mut self) -> Result<(), Alarm> {
        for axis in 0..AXIS_COUNT {
            self.home_axis(axis)?;
        }
        Ok(())
    }

    /// Direction of travel toward the switch for `axis`: negative by
    /// default, positive when the invert mask selects the far end.
    fn homing_seek_direction(&self, axis: usize) -> f32 {
        if self.settings.homing_dir_invert_mask & (1 << axis) != 0 {
            1.0
        } else {
            -1.0
        }
    }

    /// The reference offset moves away from the switch.
    fn homing_offset_direction(&self, axis: usize) -> f32 {
        -self.homing_seek_direction(axis)
    }

    fn home_axis(&mut self, axis: usize) -> Result<(), Alarm> {
        let seek_dir = self.homing_seek_direction(axis);
        let seek_travel = self.settings.max_distance[axis] * SEEK_MARGIN;
        let offset = self.settings.homing_offset;
        let fast = self.settings.homing_fast_feed_rate;
        let slow = self.settings.homing_slow_feed_rate;

        // Phase 1: fast seek into the switch.
        let hit = self.move_until_limit(axis, seek_dir * seek_travel, fast)?;
        if !hit {
            return Err(Alarm::HomingFailApproach);
        }

        // Pull off; the switch must release.
        self.axis_relative_move(axis, -seek_dir * offset, fast)?;
        if self.limit_active(axis) {
            return Err(Alarm::HomingFailPulloff);
        }

        // Phase 2: slow re-approach for a precise trigger point. The
        // axis ends on the switch; the collective offset move after
        // all axes pulls everything off to the reference position.
        let hit = self.move_until_limit(axis, seek_dir * 2.0 * offset, slow)?;
        if !hit {
            return Err(Alarm::HomingFailApproach);
        }
        Ok(())
    }

    fn limit_active(&self, axis: usize) -> bool {
        io_control::get_limits(&self.mcu, &self.settings) & (1 << axis) != 0
    }

    /// Drive `axis` by `delta`, halting the instant its limit trips.
    /// Returns whether the switch was hit.
    fn move_until_limit(&mut self, axis: usize, delta: f32, feed: f32) -> Result<bool, Alarm> {
        let mut target = self.planner.get_position();
        target[axis] += delta;
        self.homing_move(target, feed);

        loop {
            self.doevents();
            if self.state.contains_any(ExecState::ABORT) {
                return Err(Alarm::HomingFailReset);
            }
            if !self.state.contains_any(ExecState::HOMING) {
                // An interlock (door, hold) flushed the cycle.
                return Err(Alarm::HomingFailReset);
            }
            if self.limit_active(axis) {
                // Hard stop: the switch position is the reference.
                self.itp.clear(&mut self.mcu);
                self.planner.clear();
                self.planner
                    .resync_position(self.itp.get_rt_position(&self.settings));
                self.state.clear(ExecState::RUN);
                return Ok(true);
            }
            if self.motion_finished() {
                return Ok(false);
            }
        }
    }

    /// Drive `axis` by `delta` to completion (no limit expectation).
    fn axis_relative_move(&mut self, axis: usize, delta: f32, feed: f32) -> Result<(), Alarm> {
        let mut target = self.planner.get_position();
        target[axis] += delta;
        self.homing_move(target, feed);
        self.wait_motion_end();
        if self.state.contains_any(ExecState::ABORT) {
            return Err(Alarm::HomingFailReset);
        }
        Ok(())
    }

    /// Enqueue a homing motion directly: soft limits do not apply to a
    /// machine that is establishing its reference.
    fn homing_move(&mut self, target: [f32; AXIS_COUNT], feed_mm_min: f32) {
        let from = self.planner.get_position();
        let mut dir_vect = [0.0f32; AXIS_COUNT];
        let mut distance_sqr = 0.0f32;
        for i in 0..AXIS_COUNT {
            dir_vect[i] = target[i] - from[i];
            distance_sqr += dir_vect[i] * dir_vect[i];
        }
        let distance = distance_sqr.sqrt();
        if distance == 0.0 {
            return;
        }
        let data = BlockData {
            dir_vect,
            distance,
            feed: feed_mm_min * fresa_common::consts::MIN_SEC_MULT,
            spindle: 0.0,
            dwell: 0,
            motion_mode: MotionMode::Linear,
        };
        let outcome = self.planner.add_line(&target, data, &self.settings);
        if outcome.head_touched {
            self.itp.update();
        }
    }

    fn motion_finished(&self) -> bool {
        !self.state.contains_any(ExecState::RUN)
            && self.planner.is_empty()
            && self.itp.is_idle()
    }

    fn wait_motion_end(&mut self) {
        loop {
            self.doevents();
            if self.state.contains_any(ExecState::ABORT) || self.motion_finished() {
                return;
            }
        }
    }
}
