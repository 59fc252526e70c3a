//! Chain planner for linear motions and acceleration profiles.
//!
//! Keeps a bounded ring of motion blocks and retimes them so adjacent
//! segments join at feasible speeds. All speed limits are expressed
//! *squared*: the governing relation `v² = v₀² + 2·a·d` is linear in
//! v², which saves a square root per block.
//!
//! The ring is single-producer (motion shim) / single-consumer
//! (interpolator); the re-optimization pass mutates queued blocks in
//! place but never raises the entry speed of the block currently at the
//! read index, which the interpolator has already committed to.

pub mod overrides;

pub use overrides::Overrides;

use fresa_common::consts::{AXIS_COUNT, MIN_SEC_MULT, PLANNER_BUFFER_SIZE};
use fresa_common::settings::Settings;

/// Motion mode of a planner block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    /// Coordinated linear motion to the block target.
    #[default]
    Linear,
    /// No motion: dwell and/or tool-state change only.
    NoMotion,
}

/// Input of one motion request, as produced by the motion shim.
#[derive(Debug, Clone, Copy)]
pub struct BlockData {
    /// Un-normalized direction vector (per-axis deltas) [mm].
    pub dir_vect: [f32; AXIS_COUNT],
    /// Euclidean length of the segment [mm].
    pub distance: f32,
    /// Requested feed [mm/s].
    pub feed: f32,
    /// Signed spindle speed [RPM]; sign selects direction.
    pub spindle: f32,
    /// Dwell before the motion [centiseconds].
    pub dwell: u16,
    pub motion_mode: MotionMode,
}

impl Default for BlockData {
    fn default() -> Self {
        Self {
            dir_vect: [0.0; AXIS_COUNT],
            distance: 0.0,
            feed: 0.0,
            spindle: 0.0,
            dwell: 0,
            motion_mode: MotionMode::Linear,
        }
    }
}

/// One element of the planner ring.
#[derive(Debug, Clone, Copy)]
pub struct PlannerBlock {
    /// End position in machine units.
    pub target: [f32; AXIS_COUNT],
    /// Per-axis sign bitmask (set = negative traversal).
    pub dirbits: u8,
    /// Segment length [mm].
    pub distance: f32,
    /// Largest acceleration all axes can sustain along this direction
    /// [mm/s²]: the axis-wise minimum of `setting / |dir|`.
    pub acceleration: f32,
    /// Cached reciprocal of `acceleration`.
    pub accel_inv: f32,
    /// Target speed squared, after clamping to the rapid ceiling.
    pub feed_sqr: f32,
    /// Maximum rapid speed along this direction, squared.
    pub rapid_feed_sqr: f32,
    /// Planned entry speed squared; mutated during re-optimization.
    pub entry_feed_sqr: f32,
    /// Entry-speed ceiling imposed by the junction angle.
    pub entry_max_feed_sqr: f32,
    /// `tan(θ/2)` proxy for the turn from the previous segment; values
    /// ≥ 1 force a full stop at the junction.
    pub angle_factor: f32,
    /// Set once the backward pass proved the entry speed cannot rise.
    pub optimal: bool,
    /// Signed spindle speed carried by this block [RPM].
    pub spindle: f32,
    /// Dwell executed before the motion [centiseconds].
    pub dwell: u16,
    pub motion_mode: MotionMode,
}

impl PlannerBlock {
    const EMPTY: Self = Self {
        target: [0.0; AXIS_COUNT],
        dirbits: 0,
        distance: 0.0,
        acceleration: 0.0,
        accel_inv: 0.0,
        feed_sqr: 0.0,
        rapid_feed_sqr: 0.0,
        entry_feed_sqr: 0.0,
        entry_max_feed_sqr: 0.0,
        angle_factor: 1.0,
        optimal: false,
        spindle: 0.0,
        dwell: 0,
        motion_mode: MotionMode::Linear,
    };
}

/// Outcome of an `add_line` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddLineOutcome {
    /// The re-optimization touched the block at the read index; the
    /// interpolator must refresh its profile.
    pub head_touched: bool,
}

/// The look-ahead planner ring.
pub struct Planner {
    coord: [f32; AXIS_COUNT],
    prev_dir: [f32; AXIS_COUNT],
    spindle: f32,
    blocks: [PlannerBlock; PLANNER_BUFFER_SIZE],
    read: usize,
    write: usize,
    slots: usize,
    overrides: Overrides,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub const fn new() -> Self {
        Self {
            coord: [0.0; AXIS_COUNT],
            prev_dir: [0.0; AXIS_COUNT],
            spindle: 0.0,
            blocks: [PlannerBlock::EMPTY; PLANNER_BUFFER_SIZE],
            read: 0,
            write: 0,
            slots: PLANNER_BUFFER_SIZE,
            overrides: Overrides {
                feed: 100,
                rapid: 100,
                spindle: 100,
                enabled: true,
            },
        }
    }

    // ── Ring bookkeeping ────────────────────────────────────────────

    #[inline]
    fn next_idx(index: usize) -> usize {
        (index + 1) % PLANNER_BUFFER_SIZE
    }

    #[inline]
    fn prev_idx(index: usize) -> usize {
        (index + PLANNER_BUFFER_SIZE - 1) % PLANNER_BUFFER_SIZE
    }

    fn buffer_read(&mut self) {
        self.read = Self::next_idx(self.read);
        self.slots += 1;
    }

    fn buffer_write(&mut self) {
        self.write = Self::next_idx(self.write);
        self.slots -= 1;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots == PLANNER_BUFFER_SIZE
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.slots == 0
    }

    /// Free ring slots.
    #[inline]
    pub fn free_slots(&self) -> usize {
        self.slots
    }

    /// Blocks currently queued.
    #[inline]
    pub fn inflight(&self) -> usize {
        PLANNER_BUFFER_SIZE - self.slots
    }

    /// Queued blocks in execution order, oldest first.
    pub fn blocks_inflight(&self) -> impl Iterator<Item = &PlannerBlock> {
        (0..self.inflight()).map(move |offset| {
            &self.blocks[(self.read + offset) % PLANNER_BUFFER_SIZE]
        })
    }

    /// Drop all queued motions. The caller resynchronizes the position
    /// mirror from the interpolator afterwards.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.slots = PLANNER_BUFFER_SIZE;
        self.spindle = 0.0;
        self.prev_dir = [0.0; AXIS_COUNT];
    }

    // ── Block production ────────────────────────────────────────────

    /// Append one motion to the ring. The caller guarantees a free slot
    /// (the motion shim pumps the supervisor while the ring is full)
    /// and a nonzero distance for `Linear` blocks.
    ///
    /// Computes the normalized direction, the per-direction acceleration
    /// and rapid ceilings, the junction entry-speed cap against the
    /// previous segment, and re-optimizes the chain.
    pub fn add_line(
        &mut self,
        target: &[f32; AXIS_COUNT],
        mut data: BlockData,
        settings: &Settings,
    ) -> AddLineOutcome {
        debug_assert!(!self.is_full());
        let w = self.write;

        self.blocks[w] = PlannerBlock {
            spindle: data.spindle,
            dwell: data.dwell,
            distance: data.distance,
            motion_mode: data.motion_mode,
            ..PlannerBlock::EMPTY
        };
        self.spindle = data.spindle;

        if data.motion_mode == MotionMode::NoMotion {
            self.buffer_write();
            return AddLineOutcome { head_touched: false };
        }

        self.blocks[w].target = *target;

        // Normalize the direction vector and accumulate cos θ with the
        // previous segment (unit vectors, so the dot product is enough).
        // The same loop derives the direction-limited rapid feed and
        // acceleration from the per-axis settings.
        let inv_magn = 1.0 / data.distance;
        let had_prev = !self.is_empty();
        let prev = Self::prev_idx(w);
        let mut cos_theta = 0.0f32;
        let mut rapid_feed = f32::INFINITY;
        let mut acceleration = f32::INFINITY;
        let mut dirbits = 0u8;

        for i in 0..AXIS_COUNT {
            if data.dir_vect[i] != 0.0 {
                data.dir_vect[i] *= inv_magn;
                let mut dir_axis_abs = 1.0 / data.dir_vect[i];
                if data.dir_vect[i] < 0.0 {
                    dirbits |= 1 << i;
                    dir_axis_abs = -dir_axis_abs;
                }
                if had_prev {
                    cos_theta += data.dir_vect[i] * self.prev_dir[i];
                }
                rapid_feed = rapid_feed.min(settings.max_feed_rate[i] * dir_axis_abs);
                acceleration = acceleration.min(settings.acceleration[i] * dir_axis_abs);
            }
        }

        self.blocks[w].dirbits = dirbits;
        self.blocks[w].acceleration = acceleration;
        self.blocks[w].accel_inv = 1.0 / acceleration;

        // Clamp the requested feed to the rapid ceiling for this
        // direction (settings are mm/min, planner speeds are mm/s).
        rapid_feed *= MIN_SEC_MULT;
        let feed = data.feed.min(rapid_feed);

        self.blocks[w].feed_sqr = feed * feed;
        self.blocks[w].entry_max_feed_sqr = self.blocks[w].feed_sqr;
        self.blocks[w].rapid_feed_sqr = rapid_feed * rapid_feed;

        let mut head_touched = false;
        if had_prev {
            if cos_theta > 0.0 {
                // Half-angle identity: tan(θ/2) = sqrt(1−cos²θ)/(1+cosθ).
                // Turns up to 90° land in [0,1); sharper turns keep the
                // full-stop default of 1.
                let mut angle_factor = 1.0 / (1.0 + cos_theta);
                angle_factor *= (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
                self.blocks[w].angle_factor = angle_factor;
            }

            // Junction ceiling: (1 − angle_factor)² · feed²_prev, which
            // collapses to a full stop for factors at or above 1.
            let mut junction_feed_sqr = (1.0 - self.blocks[w].angle_factor).max(0.0);
            junction_feed_sqr *= junction_feed_sqr;
            junction_feed_sqr *= self.blocks[prev].feed_sqr;
            self.blocks[w].entry_max_feed_sqr = self.blocks[w].feed_sqr.min(junction_feed_sqr);

            head_touched = self.recalculate();
        }

        self.buffer_write();
        self.coord = *target;
        self.prev_dir = data.dir_vect;
        AddLineOutcome { head_touched }
    }

    /// Two-pass re-optimization of the queued chain.
    ///
    /// Backward pass: starting from the newest block (exit speed 0,
    /// nothing follows it), raise each entry speed to the highest value
    /// from which the remaining chain can still stop, capped by the
    /// junction ceiling. Stops early at blocks already proven optimal
    /// and never touches the entry of the executing head block.
    ///
    /// Forward pass: lower any entry speed that full acceleration from
    /// the previous block cannot reach, and mark it optimal. Returns
    /// true when the pass visited the head block, i.e. the interpolator
    /// must refresh.
    fn recalculate(&mut self) -> bool {
        let last = self.write;
        let first = self.read;
        let mut block = self.write;

        let entry_feed_sqr = 2.0 * self.blocks[block].distance * self.blocks[block].acceleration;
        self.blocks[block].entry_feed_sqr =
            self.blocks[block].entry_max_feed_sqr.min(entry_feed_sqr);

        let mut next = block;
        block = Self::prev_idx(block);

        while !self.blocks[block].optimal && block != first {
            if self.blocks[block].entry_feed_sqr != self.blocks[block].entry_max_feed_sqr {
                let entry_feed_sqr = self.blocks[next].entry_feed_sqr
                    + 2.0 * self.blocks[block].distance * self.blocks[block].acceleration;
                self.blocks[block].entry_feed_sqr =
                    self.blocks[block].entry_max_feed_sqr.min(entry_feed_sqr);
            }
            next = block;
            block = Self::prev_idx(block);
        }

        let mut head_touched = false;
        while block != last {
            if self.blocks[block].entry_feed_sqr < self.blocks[next].entry_feed_sqr {
                let exit_speed_sqr = self.blocks[block].entry_feed_sqr
                    + 2.0 * self.blocks[block].distance * self.blocks[block].acceleration;
                if exit_speed_sqr < self.blocks[next].entry_feed_sqr {
                    self.blocks[next].entry_feed_sqr = exit_speed_sqr;
                    self.blocks[next].optimal = true;
                }
            }
            if block == first {
                head_touched = true;
            }
            block = next;
            next = Self::next_idx(block);
        }
        head_touched
    }

    // ── Block consumption ───────────────────────────────────────────

    /// Read-only view of the head (oldest) block.
    pub fn get_block(&self) -> Option<&PlannerBlock> {
        if self.is_empty() {
            None
        } else {
            Some(&self.blocks[self.read])
        }
    }

    /// Release the head block after it has been fully decomposed to
    /// step level.
    pub fn discard_block(&mut self) {
        if !self.is_empty() {
            self.buffer_read();
        }
    }

    /// Exit speed squared of the head block: the next block's planned
    /// entry, override-scaled, or 0 when nothing follows.
    pub fn get_exit_speed_sqr(&self) -> f32 {
        if self.slots >= PLANNER_BUFFER_SIZE - 1 {
            return 0.0;
        }

        let next = Self::next_idx(self.read);
        let mut exit_speed_sqr = self.blocks[next].entry_feed_sqr;
        if !self.overrides.enabled {
            return exit_speed_sqr;
        }

        if self.overrides.feed != 100 {
            exit_speed_sqr *= Overrides::sqr_factor(self.overrides.feed);
        }

        // An active rapid override also caps the junction speed.
        if self.overrides.rapid != 100 {
            let rapid_feed_sqr =
                self.blocks[next].rapid_feed_sqr * Overrides::sqr_factor(self.overrides.rapid);
            exit_speed_sqr = exit_speed_sqr.min(rapid_feed_sqr);
        }

        exit_speed_sqr
    }

    /// Top speed squared reachable inside the head block: the trapezoid
    /// peak `(v₀² + vₑ² + 2·a·d) / 2`, capped by the override-scaled
    /// target feed and the rapid ceiling.
    pub fn get_block_top_speed_sqr(&self) -> f32 {
        let block = &self.blocks[self.read];
        let exit_speed_sqr = self.get_exit_speed_sqr();
        let peak_sqr = 0.5
            * (block.entry_feed_sqr
                + exit_speed_sqr
                + 2.0 * block.acceleration * block.distance);

        let mut target_speed_sqr = block.feed_sqr;
        if self.overrides.enabled {
            if self.overrides.feed != 100 {
                target_speed_sqr *= Overrides::sqr_factor(self.overrides.feed);
            }
            let mut rapid_feed_sqr = block.rapid_feed_sqr;
            if self.overrides.rapid != 100 {
                rapid_feed_sqr *= Overrides::sqr_factor(self.overrides.rapid);
            }
            target_speed_sqr = target_speed_sqr.min(rapid_feed_sqr);
        }

        peak_sqr.min(target_speed_sqr)
    }

    // ── Position tracking ───────────────────────────────────────────

    /// Planner-side position mirror (end of the queued chain).
    pub fn get_position(&self) -> [f32; AXIS_COUNT] {
        self.coord
    }

    /// Snap the position mirror to the interpolator's real-time
    /// position, after homing, abort or any non-monotonic motion event.
    pub fn resync_position(&mut self, rt_position: [f32; AXIS_COUNT]) {
        self.coord = rt_position;
        self.prev_dir = [0.0; AXIS_COUNT];
    }

    // ── Overrides ───────────────────────────────────────────────────

    pub fn overrides(&self) -> Overrides {
        self.overrides
    }

    /// Each mutator returns true when the interpolator must refresh the
    /// executing profile (overrides enabled).
    pub fn feed_ovr_inc(&mut self, delta: i16) -> bool {
        self.overrides.feed_inc(delta);
        self.overrides.enabled
    }

    pub fn feed_ovr_reset(&mut self) -> bool {
        self.overrides.feed = 100;
        self.overrides.enabled
    }

    pub fn rapid_ovr_set(&mut self, pct: u8) -> bool {
        self.overrides.rapid_set(pct);
        self.overrides.enabled
    }

    pub fn rapid_ovr_reset(&mut self) -> bool {
        self.overrides.rapid = 100;
        self.overrides.enabled
    }

    pub fn spindle_ovr_inc(&mut self, delta: i16) {
        self.overrides.spindle_inc(delta);
    }

    pub fn spindle_ovr_reset(&mut self) {
        self.overrides.spindle = 100;
    }

    pub fn toggle_overrides(&mut self) -> bool {
        self.overrides.enabled = !self.overrides.enabled;
        true
    }

    /// Spindle speed currently in effect [RPM, signed]: the head
    /// block's programmed speed (or the last programmed one when idle)
    /// with the spindle override applied to its magnitude.
    pub fn spindle_rpm(&self) -> f32 {
        let rpm = match self.get_block() {
            Some(block) => block.spindle,
            None => self.spindle,
        };
        if self.overrides.enabled && self.overrides.spindle != 100 {
            rpm * 0.01 * self.overrides.spindle as f32
        } else {
            rpm
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_settings() -> Settings {
        Settings {
            max_feed_rate: [600.0; AXIS_COUNT],
            acceleration: [500.0; AXIS_COUNT],
            ..Settings::default()
        }
    }

    fn line_data(from: [f32; AXIS_COUNT], to: [f32; AXIS_COUNT], feed: f32) -> BlockData {
        let mut dir = [0.0; AXIS_COUNT];
        let mut dist_sqr = 0.0;
        for i in 0..AXIS_COUNT {
            dir[i] = to[i] - from[i];
            dist_sqr += dir[i] * dir[i];
        }
        BlockData {
            dir_vect: dir,
            distance: dist_sqr.sqrt(),
            feed,
            ..BlockData::default()
        }
    }

    fn add(planner: &mut Planner, settings: &Settings, to: [f32; AXIS_COUNT], feed: f32) {
        let from = planner.get_position();
        let data = line_data(from, to, feed);
        planner.add_line(&to, data, settings);
    }

    #[test]
    fn first_block_plans_full_stop_both_ends() {
        let mut planner = Planner::new();
        let settings = test_settings();
        add(&mut planner, &settings, [10.0, 0.0, 0.0], 10.0);

        let block = planner.get_block().unwrap();
        assert_eq!(block.entry_feed_sqr, 0.0);
        // Last block must always be able to stop: entry² ≤ 2·a·d.
        assert!(block.entry_feed_sqr <= 2.0 * block.acceleration * block.distance);
        assert_eq!(block.dirbits, 0);
    }

    #[test]
    fn collinear_junction_joins_at_full_feed() {
        let mut planner = Planner::new();
        let settings = test_settings();
        let feed = 8.0; // mm/s, under the 10 mm/s rapid ceiling
        add(&mut planner, &settings, [10.0, 0.0, 0.0], feed);
        add(&mut planner, &settings, [20.0, 0.0, 0.0], feed);

        let second = planner.blocks_inflight().nth(1).unwrap();
        // Straight-through junction: angle factor ~0, entry cap at the
        // programmed feed.
        assert!(second.angle_factor < 1e-3);
        assert!((second.entry_max_feed_sqr - feed * feed).abs() < 1e-3);
        assert!((second.entry_feed_sqr - feed * feed).abs() < 1e-3);
    }

    #[test]
    fn right_angle_junction_forces_full_stop() {
        let mut planner = Planner::new();
        let settings = test_settings();
        add(&mut planner, &settings, [10.0, 0.0, 0.0], 10.0);
        add(&mut planner, &settings, [10.0, 10.0, 0.0], 10.0);

        let second = planner.blocks_inflight().nth(1).unwrap();
        // cos θ = 0 keeps the full-stop default.
        assert!(second.angle_factor >= 1.0);
        assert_eq!(second.entry_feed_sqr, 0.0);
    }

    #[test]
    fn reversal_forces_full_stop() {
        let mut planner = Planner::new();
        let settings = test_settings();
        add(&mut planner, &settings, [10.0, 0.0, 0.0], 10.0);
        add(&mut planner, &settings, [0.0, 0.0, 0.0], 10.0);

        let second = planner.blocks_inflight().nth(1).unwrap();
        assert!(second.angle_factor >= 1.0);
        assert_eq!(second.entry_feed_sqr, 0.0);
        assert_eq!(second.dirbits, 0b001);
    }

    #[test]
    fn shallow_junction_carries_partial_speed() {
        let mut planner = Planner::new();
        let settings = test_settings();
        add(&mut planner, &settings, [100.0, 0.0, 0.0], 10.0);
        add(&mut planner, &settings, [200.0, 10.0, 0.0], 10.0);

        let second = planner.blocks_inflight().nth(1).unwrap();
        assert!(second.angle_factor > 0.0 && second.angle_factor < 1.0);
        assert!(second.entry_feed_sqr > 0.0);
        assert!(second.entry_feed_sqr <= second.feed_sqr);
    }

    #[test]
    fn feed_clamps_to_direction_rapid_ceiling() {
        let mut planner = Planner::new();
        let settings = test_settings();
        // Rapid ceiling along X: 600 mm/min = 10 mm/s; ask for double.
        add(&mut planner, &settings, [10.0, 0.0, 0.0], 20.0);
        let block = planner.get_block().unwrap();
        assert!((block.feed_sqr - 100.0).abs() < 1e-3);
        assert!((block.rapid_feed_sqr - 100.0).abs() < 1e-3);
    }

    #[test]
    fn acceleration_is_direction_limited_minimum() {
        let mut planner = Planner::new();
        let mut settings = test_settings();
        settings.acceleration = [500.0, 50.0, 500.0];
        // Diagonal XY move: Y is the limiting axis.
        add(&mut planner, &settings, [10.0, 10.0, 0.0], 5.0);
        let block = planner.get_block().unwrap();
        // |dir_y| = 1/sqrt(2) → limit = 50/(1/sqrt2) = 50*sqrt2.
        let expected = 50.0 * 2.0f32.sqrt();
        assert!((block.acceleration - expected).abs() / expected < 1e-3);
    }

    #[test]
    fn chain_respects_forward_reachability() {
        let mut planner = Planner::new();
        let settings = test_settings();
        let mut x = 0.0;
        for _ in 0..6 {
            x += 2.0;
            add(&mut planner, &settings, [x, 0.0, 0.0], 10.0);
        }

        let blocks: Vec<_> = planner.blocks_inflight().collect();
        for pair in blocks.windows(2) {
            let reachable =
                pair[0].entry_feed_sqr + 2.0 * pair[0].acceleration * pair[0].distance;
            assert!(
                pair[1].entry_feed_sqr <= reachable + 1e-3,
                "entry {} unreachable from {}",
                pair[1].entry_feed_sqr,
                pair[0].entry_feed_sqr
            );
            assert!(pair[1].entry_feed_sqr <= pair[1].entry_max_feed_sqr + 1e-3);
        }

        // Tail block always consistent with a full stop.
        let tail = blocks.last().unwrap();
        assert!(tail.entry_feed_sqr <= 2.0 * tail.acceleration * tail.distance + 1e-3);
    }

    #[test]
    fn nomotion_block_keeps_position_and_counts() {
        let mut planner = Planner::new();
        let settings = test_settings();
        let data = BlockData {
            dwell: 150,
            spindle: 300.0,
            motion_mode: MotionMode::NoMotion,
            ..BlockData::default()
        };
        planner.add_line(&[0.0; AXIS_COUNT], data, &settings);

        assert_eq!(planner.inflight(), 1);
        let block = planner.get_block().unwrap();
        assert_eq!(block.motion_mode, MotionMode::NoMotion);
        assert_eq!(block.dwell, 150);
        assert_eq!(planner.get_position(), [0.0; AXIS_COUNT]);
    }

    #[test]
    fn exit_speed_is_zero_for_single_block() {
        let mut planner = Planner::new();
        let settings = test_settings();
        add(&mut planner, &settings, [10.0, 0.0, 0.0], 10.0);
        assert_eq!(planner.get_exit_speed_sqr(), 0.0);
    }

    #[test]
    fn exit_speed_scales_with_feed_override() {
        let mut planner = Planner::new();
        let settings = test_settings();
        add(&mut planner, &settings, [10.0, 0.0, 0.0], 10.0);
        add(&mut planner, &settings, [20.0, 0.0, 0.0], 10.0);

        let nominal = planner.get_exit_speed_sqr();
        assert!(nominal > 0.0);

        planner.feed_ovr_inc(-30); // 70%
        let scaled = planner.get_exit_speed_sqr();
        assert!((scaled - nominal * 0.49).abs() / nominal < 1e-3);
    }

    #[test]
    fn top_speed_respects_triangle_peak() {
        let mut planner = Planner::new();
        let settings = test_settings();
        // Short block: the peak is acceleration-limited below the feed.
        add(&mut planner, &settings, [0.05, 0.0, 0.0], 10.0);
        let block = planner.get_block().unwrap();
        let peak = 0.5 * (2.0 * block.acceleration * block.distance);
        let top = planner.get_block_top_speed_sqr();
        assert!((top - peak).abs() / peak < 1e-3);
        assert!(top < block.feed_sqr);
    }

    #[test]
    fn top_speed_capped_by_rapid_override() {
        let mut planner = Planner::new();
        let settings = test_settings();
        add(&mut planner, &settings, [100.0, 0.0, 0.0], 10.0);

        let nominal = planner.get_block_top_speed_sqr();
        planner.rapid_ovr_set(25);
        let reduced = planner.get_block_top_speed_sqr();
        assert!(reduced <= nominal * 0.0625 + 1e-3);

        planner.rapid_ovr_reset();
        assert!((planner.get_block_top_speed_sqr() - nominal).abs() < 1e-3);
    }

    #[test]
    fn disabled_overrides_apply_programmed_values() {
        let mut planner = Planner::new();
        let settings = test_settings();
        add(&mut planner, &settings, [10.0, 0.0, 0.0], 10.0);
        add(&mut planner, &settings, [20.0, 0.0, 0.0], 10.0);

        planner.feed_ovr_inc(-50);
        let scaled = planner.get_exit_speed_sqr();
        planner.toggle_overrides();
        let unscaled = planner.get_exit_speed_sqr();
        assert!(unscaled > scaled);
    }

    #[test]
    fn spindle_rpm_follows_head_block_and_override() {
        let mut planner = Planner::new();
        let settings = test_settings();
        let data = BlockData {
            spindle: -200.0,
            motion_mode: MotionMode::NoMotion,
            ..BlockData::default()
        };
        planner.add_line(&[0.0; AXIS_COUNT], data, &settings);
        assert_eq!(planner.spindle_rpm(), -200.0);

        planner.spindle_ovr_inc(-50);
        assert!((planner.spindle_rpm() + 100.0).abs() < 1e-3);

        // Idle planner remembers the last programmed speed.
        planner.discard_block();
        planner.spindle_ovr_reset();
        assert_eq!(planner.spindle_rpm(), -200.0);
    }

    #[test]
    fn resync_snaps_position() {
        let mut planner = Planner::new();
        let settings = test_settings();
        add(&mut planner, &settings, [10.0, 5.0, 0.0], 10.0);
        planner.resync_position([1.0, 2.0, 3.0]);
        assert_eq!(planner.get_position(), [1.0, 2.0, 3.0]);
    }

    // ── Property tests ──────────────────────────────────────────────

    proptest! {
        /// Ring invariant: free + inflight = capacity under any
        /// add/discard interleaving.
        #[test]
        fn ring_invariant_holds(ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let mut planner = Planner::new();
            let settings = test_settings();
            let mut x = 0.0f32;
            for add_op in ops {
                if add_op {
                    if !planner.is_full() {
                        x += 1.0;
                        let to = [x, 0.0, 0.0];
                        let from = planner.get_position();
                        planner.add_line(&to, line_data(from, to, 5.0), &settings);
                    }
                } else {
                    planner.discard_block();
                }
                prop_assert!(planner.free_slots() + planner.inflight() == PLANNER_BUFFER_SIZE);
                prop_assert!(planner.free_slots() <= PLANNER_BUFFER_SIZE);
            }
        }

        /// Feed override stays in range after any increment sequence.
        #[test]
        fn feed_override_clamp(deltas in proptest::collection::vec(-30i16..30, 0..100)) {
            let mut planner = Planner::new();
            for delta in deltas {
                planner.feed_ovr_inc(delta);
                let feed = planner.overrides().feed;
                prop_assert!((10..=200).contains(&feed));
            }
        }

        /// Kinematic feasibility across random chains: every junction
        /// entry is reachable and within its ceiling, and the tail can
        /// stop.
        #[test]
        fn chain_feasibility(targets in proptest::collection::vec((1.0f32..50.0, -20.0f32..20.0), 2..10)) {
            let mut planner = Planner::new();
            let settings = test_settings();
            let mut pos = [0.0f32; AXIS_COUNT];
            for (dx, dy) in targets {
                pos = [pos[0] + dx, pos[1] + dy, 0.0];
                let from = planner.get_position();
                planner.add_line(&pos, line_data(from, pos, 8.0), &settings);
            }

            let blocks: Vec<_> = planner.blocks_inflight().collect();
            for pair in blocks.windows(2) {
                let reachable = pair[0].entry_feed_sqr
                    + 2.0 * pair[0].acceleration * pair[0].distance;
                prop_assert!(pair[1].entry_feed_sqr <= reachable * (1.0 + 1e-4) + 1e-3);
                prop_assert!(pair[1].entry_feed_sqr <= pair[1].entry_max_feed_sqr * (1.0 + 1e-4) + 1e-3);
            }
            let tail = blocks.last().unwrap();
            prop_assert!(
                tail.entry_feed_sqr <= 2.0 * tail.acceleration * tail.distance * (1.0 + 1e-4) + 1e-3
            );
        }
    }
}
