//! Fresa Common Library
//!
//! Shared vocabulary for all Fresa workspace crates: the Grbl-compatible
//! protocol tables (status, alarm and real-time command bytes), the
//! supervisor execution-state word, the machine settings record, and the
//! MCU hardware-abstraction contract.
//!
//! # Module Structure
//!
//! - [`consts`] - Compile-time machine limits and buffer capacities
//! - [`grbl`] - Status/alarm code tables, real-time bytes, protocol strings
//! - [`state`] - Execution-state bitflags and the atomic state word
//! - [`settings`] - Machine settings: TOML load, EEPROM record, `$N=value`
//! - [`hal`] - The `Mcu` trait every platform implementation provides

pub mod consts;
pub mod grbl;
pub mod hal;
pub mod settings;
pub mod state;
