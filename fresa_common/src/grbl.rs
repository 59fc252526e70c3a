//! Grbl-compatible protocol tables.
//!
//! Numeric status and alarm codes follow the Grbl error/alarm tables
//! bit-for-bit so that existing G-code senders keep working. Real-time
//! command bytes follow the Grbl 1.1 extended set.

// ─── Status Codes ───────────────────────────────────────────────────

/// Line-scoped protocol status codes (`error:<code>`). Valid values 1–42;
/// zero is reserved for "ok" and never appears in an error line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    ExpectedCommandLetter = 1,
    BadNumberFormat = 2,
    InvalidStatement = 3,
    NegativeValue = 4,
    SettingDisabled = 5,
    SettingStepPulseMin = 6,
    SettingReadFail = 7,
    IdleError = 8,
    SystemGcLock = 9,
    SoftLimitError = 10,
    Overflow = 11,
    MaxStepRateExceeded = 12,
    CheckDoor = 13,
    LineLengthExceeded = 14,
    TravelExceeded = 15,
    InvalidJogCommand = 16,
    SettingDisabledLaser = 17,
    GcodeUnsupportedCommand = 20,
    GcodeModalGroupViolation = 21,
    GcodeUndefinedFeedRate = 22,
    GcodeCommandValueNotInteger = 23,
    GcodeAxisCommandConflict = 24,
    GcodeWordRepeated = 25,
    GcodeNoAxisWords = 26,
    GcodeInvalidLineNumber = 27,
    GcodeValueWordMissing = 28,
    GcodeUnsupportedCoordSys = 29,
    GcodeG53InvalidMotionMode = 30,
    GcodeAxisWordsExist = 31,
    GcodeNoAxisWordsInPlane = 32,
    GcodeInvalidTarget = 33,
    GcodeArcRadiusError = 34,
    GcodeNoOffsetsInPlane = 35,
    GcodeUnusedWords = 36,
    GcodeG43DynamicAxisError = 37,
    GcodeMaxValueExceeded = 38,
    BadCommentFormat = 39,
    InvalidTool = 40,
    UndefinedAxis = 41,
    FeedNotSet = 42,
}

impl Status {
    /// The numeric wire code emitted after `error:`.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Convenience alias for protocol-visible operations.
pub type StatusResult = Result<(), Status>;

// ─── Alarm Codes ────────────────────────────────────────────────────

/// Latched alarm codes (`ALARM:<code>`). Require `$X` or `$H` to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Alarm {
    Reset = 0,
    HardLimit = 1,
    SoftLimit = 2,
    AbortCycle = 3,
    ProbeFailInitial = 4,
    ProbeFailContact = 5,
    HomingFailReset = 6,
    HomingFailDoor = 7,
    HomingFailPulloff = 8,
    HomingFailApproach = 9,
    HomingFailDualApproach = 10,
    HomingFailLimitActive = 11,
}

impl Alarm {
    /// The numeric wire code emitted after `ALARM:`.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

// ─── Real-Time Command Bytes ────────────────────────────────────────

/// Real-time command bytes, acted on out-of-band from the line stream.
///
/// The printable pair `!`/`~` and ctrl-x sit outside the RX enqueue
/// window `(0x22, 0x7B)`; the extended set lives above 0x7F. `?` is the
/// one in-window byte that is intercepted rather than enqueued.
pub mod rt {
    pub const REPORT: u8 = b'?'; // 0x3F
    pub const RESET: u8 = 0x18; // ctrl-x
    pub const FEED_HOLD: u8 = b'!'; // 0x21
    pub const CYCLE_START: u8 = b'~'; // 0x7E
    pub const SAFETY_DOOR: u8 = 0x84;
    pub const JOG_CANCEL: u8 = 0x85;

    pub const FEED_100: u8 = 0x90;
    pub const FEED_INC_COARSE: u8 = 0x91;
    pub const FEED_DEC_COARSE: u8 = 0x92;
    pub const FEED_INC_FINE: u8 = 0x93;
    pub const FEED_DEC_FINE: u8 = 0x94;

    pub const RAPID_100: u8 = 0x95;
    pub const RAPID_50: u8 = 0x96;
    pub const RAPID_25: u8 = 0x97;

    pub const SPINDLE_100: u8 = 0x99;
    pub const SPINDLE_INC_COARSE: u8 = 0x9A;
    pub const SPINDLE_DEC_COARSE: u8 = 0x9B;
    pub const SPINDLE_INC_FINE: u8 = 0x9C;
    pub const SPINDLE_DEC_FINE: u8 = 0x9D;
    pub const SPINDLE_TOGGLE: u8 = 0x9E;

    pub const COOLANT_FLOOD_TOGGLE: u8 = 0xA0;
    pub const COOLANT_MIST_TOGGLE: u8 = 0xA1;
}

// ─── Override Ranges ────────────────────────────────────────────────

/// Feed override lower bound [%].
pub const FEED_OVR_MIN: u8 = 10;
/// Feed override upper bound [%].
pub const FEED_OVR_MAX: u8 = 200;
/// Feed override coarse increment [%].
pub const FEED_OVR_COARSE: i16 = 10;
/// Feed override fine increment [%].
pub const FEED_OVR_FINE: i16 = 1;

/// First reduced rapid override step [%].
pub const RAPID_OVR1: u8 = 50;
/// Second reduced rapid override step [%].
pub const RAPID_OVR2: u8 = 25;

/// Spindle override lower bound [%].
pub const SPINDLE_OVR_MIN: u8 = 10;
/// Spindle override upper bound [%].
pub const SPINDLE_OVR_MAX: u8 = 200;
/// Spindle override coarse increment [%].
pub const SPINDLE_OVR_COARSE: i16 = 10;
/// Spindle override fine increment [%].
pub const SPINDLE_OVR_FINE: i16 = 1;

// ─── Protocol Strings ───────────────────────────────────────────────

pub const MSG_OK: &str = "ok\n";
pub const MSG_ERROR: &str = "error:";
pub const MSG_ALARM: &str = "ALARM:";
pub const MSG_STARTUP: &str = "Fresa 0.1.0 ['$' for help]\n";
pub const MSG_HELP: &str = "[HLP:$$ $H $X $J=line $x=val ~ ! ? ctrl-x]\n";

pub const MSG_RESET_TO_CONTINUE: &str = "[MSG:Reset to continue]\n";
pub const MSG_UNLOCK: &str = "[MSG:'$H'|'$X' to unlock]\n";
pub const MSG_CAUTION_UNLOCKED: &str = "[MSG:Caution: Unlocked]\n";
pub const MSG_CHECK_DOOR: &str = "[MSG:Check Door]\n";
pub const MSG_CHECK_LIMITS: &str = "[MSG:Check Limits]\n";
pub const MSG_RESTORING_DEFAULTS: &str = "[MSG:Restoring defaults]\n";
pub const MSG_RESTORING_SPINDLE: &str = "[MSG:Restoring spindle]\n";
pub const MSG_CHECK_ESTOP: &str = "[MSG:Check Emergency Stop]\n";

// ─── Tests ──────────────────────────────────────────────────────────
