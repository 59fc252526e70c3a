//! # Fresa Motion Core
//!
//! The motion control core of a Grbl-compatible CNC firmware: a
//! look-ahead velocity planner chaining motion segments at feasible
//! junction speeds, a trapezoidal-profile interpolator emitting a timed
//! step pulse train, and a state-machine supervisor arbitrating between
//! motion, operator real-time commands and safety inputs.
//!
//! ## Pipeline
//!
//! `line interpreter → motion shim → planner → interpolator → step
//! interrupts → drivers`, supervised by [`cnc::Cnc`]. Serial RX
//! intercepts real-time command bytes out-of-band; the supervisor event
//! pump services them within one cycle.
//!
//! ## Fixed-capacity motion path
//!
//! Every structure on the motion path — planner ring, interpolator
//! segment queue, serial rings — is fixed-capacity; the only
//! suspension points are the two documented busy-yields (full planner
//! ring, full TX ring), both of which keep pumping events.

pub mod cnc;
pub mod interpolator;
pub mod io_control;
pub mod planner;
pub mod serial;

mod gcode;
mod homing;
mod motion;
mod protocol;

pub use gcode::GcodeState;
