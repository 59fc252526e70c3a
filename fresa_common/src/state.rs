//! Supervisor execution-state word.
//!
//! A single bitflag word holds the orthogonal execution flags; multiple
//! may coexist (e.g. `RUN | HOLD` while decelerating into a feed hold).
//! The atomic wrapper enforces the interrupt-side discipline: interrupt
//! contexts may only *set* bits, the main task owns set and clear.

use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Execution flags of the CNC supervisor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExecState: u16 {
        /// A block is currently being stepped.
        const RUN    = 0x0001;
        /// Current motion is a jog.
        const JOG    = 0x0002;
        /// Deceleration-to-stop requested.
        const HOLD   = 0x0004;
        /// Safety door open.
        const DOOR   = 0x0008;
        /// Homing cycle active.
        const HOMING = 0x0010;
        /// Hard-limit input active.
        const LIMITS = 0x0020;
        /// Machine has no home reference.
        const NOHOME = 0x0040;
        /// G-code commands rejected.
        const LOCKED = 0x0080;
        /// Alarm present.
        const ALARM  = 0x0100;
        /// Hard stop; loops until a reset command is received.
        const ABORT  = 0x0200;
    }
}

impl ExecState {
    /// All flags that keep the machine in an alarm condition.
    pub const ALARM_MASK: Self = Self::from_bits_truncate(
        Self::DOOR.bits()
            | Self::LIMITS.bits()
            | Self::NOHOME.bits()
            | Self::LOCKED.bits()
            | Self::ALARM.bits()
            | Self::ABORT.bits(),
    );

    /// Alarm flags that survive into the terminal abort loop. A missing
    /// home reference alone does not hold the machine there.
    pub const ALARM_ABORT_MASK: Self =
        Self::from_bits_truncate(Self::ALARM_MASK.bits() & !Self::NOHOME.bits());

    /// Returns true if any alarm-condition flag is set.
    #[inline]
    pub const fn has_alarm(&self) -> bool {
        self.intersects(Self::ALARM_MASK)
    }
}

/// Atomic execution-state word shared between the main task and
/// interrupt contexts.
///
/// Interrupt contexts only ever `set`; `clear` belongs to the main task.
/// Single-bit read-modify-writes go through `fetch_or`/`fetch_and`, the
/// hosted equivalent of an interrupt-disable window around the word.
#[derive(Debug, Default)]
pub struct AtomicExecState(AtomicU16);

impl AtomicExecState {
    pub const fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    /// Snapshot of the current flags.
    #[inline]
    pub fn get(&self) -> ExecState {
        ExecState::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    /// Returns the intersection of the current flags with `mask`.
    #[inline]
    pub fn check(&self, mask: ExecState) -> ExecState {
        self.get() & mask
    }

    /// Returns true if any flag in `mask` is set.
    #[inline]
    pub fn contains_any(&self, mask: ExecState) -> bool {
        self.get().intersects(mask)
    }

    /// Set the flags in `mask`. Allowed from interrupt contexts.
    #[inline]
    pub fn set(&self, mask: ExecState) {
        self.0.fetch_or(mask.bits(), Ordering::AcqRel);
    }

    /// Clear the flags in `mask`. Main task only.
    #[inline]
    pub fn clear(&self, mask: ExecState) {
        self.0.fetch_and(!mask.bits(), Ordering::AcqRel);
    }

    /// Replace the whole word. Main task only (reset paths).
    #[inline]
    pub fn store(&self, state: ExecState) {
        self.0.store(state.bits(), Ordering::Release);
    }
}

/// Latched real-time command slot, written from the RX interrupt and
/// swap-cleared by the supervisor once per event-pump cycle.
///
/// A pending byte is only replaced when the slot is empty or holds the
/// lowest-priority report request, so a reset can never be shadowed by
/// a later status query.
#[derive(Debug, Default)]
pub struct RtCmdLatch(AtomicU8);

impl RtCmdLatch {
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Latch a real-time byte from the RX interrupt.
    #[inline]
    pub fn latch(&self, cmd: u8) {
        let current = self.0.load(Ordering::Acquire);
        if current == 0 || current == crate::grbl::rt::REPORT {
            self.0.store(cmd, Ordering::Release);
        }
    }

    /// Take the pending byte, clearing the slot. Returns `None` when idle.
    #[inline]
    pub fn take(&self) -> Option<u8> {
        match self.0.swap(0, Ordering::AcqRel) {
            0 => None,
            cmd => Some(cmd),
        }
    }

    /// Peek without clearing (terminal abort loop).
    #[inline]
    pub fn peek(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
