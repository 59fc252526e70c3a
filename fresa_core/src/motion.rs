//! Motion control shim: the bridge from parsed motion requests to
//! planner blocks.
//!
//! Applies the kinematics mapping (identity for a Cartesian machine),
//! enforces the soft-limit envelope, and converts targets into planner
//! block data. When the ring is full the shim busy-yields through the
//! supervisor event pump, the only other suspension point in the system
//! besides a full TX ring.

use fresa_common::consts::{AXIS_COUNT, MIN_SEC_MULT};
use fresa_common::grbl::{Status, StatusResult};
use fresa_common::hal::Mcu;
use fresa_common::state::ExecState;

use crate::cnc::Cnc;
use crate::planner::{BlockData, MotionMode};

impl<M: Mcu> Cnc<M> {
    /// Queue one linear motion to `target` (machine units) at
    /// `feed` [mm/min], carrying the current spindle programming.
    pub fn mc_line(&mut self, target: [f32; AXIS_COUNT], feed: f32, spindle: f32) -> StatusResult {
        // Tool space and actuator space coincide on a Cartesian
        // machine; a kinematics port maps between them here.
        if self.settings.soft_limits_enabled {
            for i in 0..AXIS_COUNT {
                if target[i] < 0.0 || target[i] > self.settings.max_distance[i] {
                    return Err(Status::SoftLimitError);
                }
            }
        }

        let from = self.planner.get_position();
        let mut dir_vect = [0.0f32; AXIS_COUNT];
        let mut distance_sqr = 0.0f32;
        for i in 0..AXIS_COUNT {
            dir_vect[i] = target[i] - from[i];
            distance_sqr += dir_vect[i] * dir_vect[i];
        }
        let distance = distance_sqr.sqrt();
        if distance == 0.0 {
            return Err(Status::GcodeInvalidTarget);
        }

        let data = BlockData {
            dir_vect,
            distance,
            feed: feed * MIN_SEC_MULT,
            spindle,
            dwell: 0,
            motion_mode: MotionMode::Linear,
        };
        self.mc_enqueue(target, data)
    }

    /// Queue a pure dwell (and/or tool-state carrier) block.
    pub fn mc_dwell(&mut self, centiseconds: u16, spindle: f32) -> StatusResult {
        let data = BlockData {
            dwell: centiseconds,
            spindle,
            motion_mode: MotionMode::NoMotion,
            ..BlockData::default()
        };
        self.mc_enqueue(self.planner.get_position(), data)
    }

    fn mc_enqueue(&mut self, target: [f32; AXIS_COUNT], data: BlockData) -> StatusResult {
        // Busy-yield on a full ring; the pump keeps real-time commands
        // and the interpolator alive while we wait.
        while self.planner.is_full() {
            self.doevents();
            if self.state.contains_any(ExecState::ABORT) {
                return Ok(());
            }
        }

        let outcome = self.planner.add_line(&target, data, &self.settings);
        if outcome.head_touched {
            self.itp.update();
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fresa_common::settings::Settings;
    use fresa_hal::VirtualMcu;

    fn test_cnc() -> Cnc<VirtualMcu> {
        let mut cnc = Cnc::new(VirtualMcu::new(), Settings::default());
        cnc.reset();
        cnc.mcu_mut().take_uart_output();
        cnc
    }

    #[test]
    fn line_lands_in_planner() {
        let mut cnc = test_cnc();
        cnc.mc_line([10.0, 0.0, 0.0], 300.0, 0.0).unwrap();
        assert_eq!(cnc.planner().inflight(), 1);
        let block = cnc.planner().get_block().unwrap();
        assert!((block.distance - 10.0).abs() < 1e-4);
        // 300 mm/min → 5 mm/s.
        assert!((block.feed_sqr - 25.0).abs() < 1e-3);
    }

    #[test]
    fn zero_distance_rejected() {
        let mut cnc = test_cnc();
        assert_eq!(
            cnc.mc_line([0.0, 0.0, 0.0], 300.0, 0.0),
            Err(Status::GcodeInvalidTarget)
        );
    }

    #[test]
    fn soft_limits_enforced_when_enabled() {
        let mut cnc = test_cnc();
        cnc.settings_mut().soft_limits_enabled = true;
        cnc.settings_mut().max_distance = [100.0; AXIS_COUNT];
        assert_eq!(
            cnc.mc_line([150.0, 0.0, 0.0], 300.0, 0.0),
            Err(Status::SoftLimitError)
        );
        assert_eq!(
            cnc.mc_line([-1.0, 0.0, 0.0], 300.0, 0.0),
            Err(Status::SoftLimitError)
        );
        assert!(cnc.mc_line([50.0, 0.0, 0.0], 300.0, 0.0).is_ok());
    }

    #[test]
    fn soft_limits_ignored_when_disabled() {
        let mut cnc = test_cnc();
        assert!(cnc.mc_line([1000.0, 0.0, 0.0], 300.0, 0.0).is_ok());
    }

    #[test]
    fn dwell_enqueues_nomotion_block() {
        let mut cnc = test_cnc();
        cnc.mc_dwell(250, 0.0).unwrap();
        let block = cnc.planner().get_block().unwrap();
        assert_eq!(block.motion_mode, MotionMode::NoMotion);
        assert_eq!(block.dwell, 250);
    }

    #[test]
    fn full_ring_waits_and_recovers() {
        let mut cnc = test_cnc();
        // Fill the ring past capacity; the shim pumps events (which
        // drain blocks into the interpolator) instead of failing.
        for i in 1..=40 {
            cnc.mc_line([i as f32, 0.0, 0.0], 600.0, 0.0).unwrap();
        }
        assert!(cnc.planner().inflight() > 0);
    }
}
