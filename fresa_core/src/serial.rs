//! Serial ring buffers with real-time byte interception.
//!
//! Two single-producer/single-consumer rings. The RX side classifies
//! every received byte before it is stored: printable bytes inside the
//! `(0x22, 0x7B)` window are line data (minus `?`, the status query, and
//! the `(`/`)` comment delimiters, which are consumed here); CR and LF
//! terminate a line; everything else is a real-time command latched
//! straight to the supervisor, out-of-band from the line stream.
//!
//! The RX consumer works in *complete lines*: `getc` yields NUL until a
//! full line is buffered, and `rx_is_empty` reports the line count, not
//! the byte count.

use fresa_common::consts::{RX_BUFFER_SIZE, TX_BUFFER_SIZE};
use fresa_common::grbl::rt;
use fresa_common::state::RtCmdLatch;
use tracing::warn;

/// Outcome of a non-blocking TX push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPush {
    /// Byte stored, nothing to do.
    Stored,
    /// Byte stored and a transmit kick is due (line completed).
    StoredKick,
    /// Ring full; the caller must pump events and retry.
    Full,
}

/// RX/TX rings plus the real-time command latch.
pub struct SerialPort {
    rx_buffer: [u8; RX_BUFFER_SIZE],
    rx_read: usize,
    rx_write: usize,
    rx_used: usize,
    rx_lines: usize,
    comment_depth: u8,

    tx_buffer: [u8; TX_BUFFER_SIZE],
    tx_read: usize,
    tx_write: usize,
    tx_used: usize,

    rt: RtCmdLatch,
}

impl Default for SerialPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialPort {
    pub const fn new() -> Self {
        Self {
            rx_buffer: [0; RX_BUFFER_SIZE],
            rx_read: 0,
            rx_write: 0,
            rx_used: 0,
            rx_lines: 0,
            comment_depth: 0,
            tx_buffer: [0; TX_BUFFER_SIZE],
            tx_read: 0,
            tx_write: 0,
            tx_used: 0,
            rt: RtCmdLatch::new(),
        }
    }

    /// The shared real-time command latch.
    #[inline]
    pub fn rt(&self) -> &RtCmdLatch {
        &self.rt
    }

    /// Drop all buffered bytes and reset line/comment tracking. The RT
    /// latch survives a clear; a pending reset must not be lost.
    pub fn clear(&mut self) {
        self.rx_read = 0;
        self.rx_write = 0;
        self.rx_used = 0;
        self.rx_lines = 0;
        self.comment_depth = 0;
        self.tx_read = 0;
        self.tx_write = 0;
        self.tx_used = 0;
    }

    // ── RX interrupt side (producer) ────────────────────────────────

    /// Classify and store one received byte.
    pub fn rx_isr(&mut self, byte: u8) {
        if byte > 0x22 && byte < 0x7B {
            match byte {
                rt::REPORT => self.rt.latch(rt::REPORT),
                b'(' => self.comment_depth += 1,
                b')' => self.comment_depth = self.comment_depth.saturating_sub(1),
                _ => {
                    if self.comment_depth == 0 {
                        self.rx_push(byte);
                    }
                }
            }
        } else {
            match byte {
                b'\r' | b'\n' => {
                    // CR is normalized to LF; a line terminator also
                    // resets comment nesting. The line only counts if
                    // its terminator fit in the ring.
                    if self.rx_push(b'\n') {
                        self.rx_lines += 1;
                    }
                    self.comment_depth = 0;
                }
                _ => self.rt.latch(byte),
            }
        }
    }

    fn rx_push(&mut self, byte: u8) -> bool {
        if self.rx_used == RX_BUFFER_SIZE {
            warn!("rx ring overflow, byte dropped");
            return false;
        }
        self.rx_buffer[self.rx_write] = byte;
        self.rx_write = (self.rx_write + 1) % RX_BUFFER_SIZE;
        self.rx_used += 1;
        true
    }

    /// Inject a full command string as if received over the wire.
    pub fn rx_inject(&mut self, line: &str) {
        for byte in line.bytes() {
            self.rx_isr(byte);
        }
    }

    // ── RX task side (consumer) ─────────────────────────────────────

    /// True when no *complete line* is buffered.
    #[inline]
    pub fn rx_is_empty(&self) -> bool {
        self.rx_lines == 0
    }

    /// Next byte without consuming it; NUL when no complete line.
    pub fn peek(&self) -> u8 {
        if self.rx_lines == 0 {
            0
        } else {
            self.rx_buffer[self.rx_read]
        }
    }

    /// Dequeue one byte of the current line; NUL when no complete line
    /// is buffered.
    pub fn getc(&mut self) -> u8 {
        if self.rx_lines == 0 {
            return 0;
        }
        let byte = self.rx_buffer[self.rx_read];
        self.rx_read = (self.rx_read + 1) % RX_BUFFER_SIZE;
        self.rx_used -= 1;
        if byte == b'\n' {
            self.rx_lines -= 1;
        }
        byte
    }

    /// Drain the remainder of the current line, terminator included.
    pub fn discard_current_line(&mut self) {
        if self.rx_lines == 0 {
            return;
        }
        while self.getc() != b'\n' {}
    }

    // ── TX task side (producer) ─────────────────────────────────────

    /// Push one byte toward the host. Never blocks: on a full ring the
    /// caller pumps the supervisor event loop and retries, so real-time
    /// commands keep being serviced while waiting.
    pub fn try_putc(&mut self, byte: u8) -> TxPush {
        if self.tx_used == TX_BUFFER_SIZE {
            return TxPush::Full;
        }
        self.tx_buffer[self.tx_write] = byte;
        self.tx_write = (self.tx_write + 1) % TX_BUFFER_SIZE;
        self.tx_used += 1;
        if byte == b'\n' {
            TxPush::StoredKick
        } else {
            TxPush::Stored
        }
    }

    #[inline]
    pub fn tx_is_empty(&self) -> bool {
        self.tx_used == 0
    }

    // ── TX interrupt side (consumer) ────────────────────────────────

    /// Pull one byte for the transmitter; `None` when drained.
    pub fn tx_isr(&mut self) -> Option<u8> {
        if self.tx_used == 0 {
            return None;
        }
        let byte = self.tx_buffer[self.tx_read];
        self.tx_read = (self.tx_read + 1) % TX_BUFFER_SIZE;
        self.tx_used -= 1;
        Some(byte)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
