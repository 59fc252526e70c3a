//! Trapezoidal velocity profile construction in v²-space.
//!
//! A block profile is three phases over its distance: a ramp from the
//! entry speed toward the top speed, a cruise, and a ramp toward the
//! exit speed. Working with squared speeds keeps the math linear
//! (`v² = v₀² ± 2·a·d`) and free of square roots.
//!
//! The entry may sit *above* the top speed (an override drop while the
//! block executes); the first phase then ramps down. When the phases do
//! not fit the distance, the triangle peak `(v₀² + vₑ² + 2·a·d)/2`
//! replaces the top, degenerating to accelerate-only or
//! decelerate-only profiles at the extremes.

/// Phase lengths of one block profile, in distance units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile {
    /// Length of the first ramp (entry → top) [mm].
    pub ramp_dist: f32,
    /// Length of the cruise phase [mm].
    pub cruise_dist: f32,
    /// Length of the final ramp (top → exit) [mm].
    pub decel_dist: f32,
    /// Effective top speed squared after fitting.
    pub top_sqr: f32,
}

/// Fit a profile for the given squared speeds over `distance` at
/// acceleration `accel`.
pub fn compute(entry_sqr: f32, exit_sqr: f32, top_sqr: f32, accel: f32, distance: f32) -> Profile {
    let two_a = 2.0 * accel;
    if two_a <= 0.0 || distance <= 0.0 {
        return Profile {
            ramp_dist: 0.0,
            cruise_dist: distance.max(0.0),
            decel_dist: 0.0,
            top_sqr: entry_sqr,
        };
    }

    let exit_sqr = exit_sqr.min(top_sqr.max(entry_sqr));
    let ramp_dist = (top_sqr - entry_sqr).abs() / two_a;
    let decel_dist = (top_sqr - exit_sqr).max(0.0) / two_a;

    if ramp_dist + decel_dist <= distance {
        return Profile {
            ramp_dist,
            cruise_dist: distance - ramp_dist - decel_dist,
            decel_dist,
            top_sqr,
        };
    }

    if entry_sqr <= top_sqr {
        // Triangle between entry and exit.
        let peak_sqr = 0.5 * (entry_sqr + exit_sqr + two_a * distance);
        if peak_sqr <= exit_sqr {
            // Exit unreachable upward: accelerate the whole way.
            Profile {
                ramp_dist: distance,
                cruise_dist: 0.0,
                decel_dist: 0.0,
                top_sqr: entry_sqr + two_a * distance,
            }
        } else if peak_sqr <= entry_sqr {
            // Exit unreachable downward: decelerate the whole way.
            Profile {
                ramp_dist: 0.0,
                cruise_dist: 0.0,
                decel_dist: distance,
                top_sqr: entry_sqr,
            }
        } else {
            let ramp_dist = ((peak_sqr - entry_sqr) / two_a).clamp(0.0, distance);
            Profile {
                ramp_dist,
                cruise_dist: 0.0,
                decel_dist: distance - ramp_dist,
                top_sqr: peak_sqr,
            }
        }
    } else {
        // Overspeed entry with no room to shed and still meet the exit:
        // decelerate for the whole distance.
        Profile {
            ramp_dist: 0.0,
            cruise_dist: 0.0,
            decel_dist: distance,
            top_sqr: entry_sqr,
        }
    }
}

/// Move a squared speed toward a target by at most `delta_sqr`
/// (`2·a·Δd`), in either direction.
#[inline]
pub fn advance_towards(v_sqr: f32, target_sqr: f32, delta_sqr: f32) -> f32 {
    if v_sqr < target_sqr {
        (v_sqr + delta_sqr).min(target_sqr)
    } else {
        (v_sqr - delta_sqr).max(target_sqr)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
