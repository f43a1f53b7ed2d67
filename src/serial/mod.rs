//! Mai2 Serial touch protocol.
//!
//! Outbound the adapter streams 9-byte touch frames, inbound it parses 6-byte
//! command frames from whatever the port yields. The port itself is behind
//! [`SerialPort`] so the adapter runs against a UART on the board and against
//! a buffer in tests.

pub mod frame;
pub mod mai2;
pub mod parser;

pub use frame::{
    Command,
    CommandFrame,
    encode_response,
    encode_touch_frame,
};
pub use mai2::{
    Mai2Serial,
    Status,
};
pub use parser::CommandParser;

use crate::Result;

/// Non-blocking byte transport.
pub trait SerialPort {
    /// Queues all of `bytes` or none of them; returns how much was taken.
    fn write(&mut self, bytes: &[u8]) -> usize;

    /// Copies already-received bytes into `buf`; returns 0 when idle.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;
}

/// Hands `bytes` to `push` only when `free` room takes all of them, so a
/// frame is never split across scan passes. Returns what `push` accepted.
pub fn write_whole(free: usize, bytes: &[u8], push: impl FnOnce(&[u8]) -> usize) -> usize {
    if bytes.len() > free {
        return 0;
    }
    push(bytes)
}
