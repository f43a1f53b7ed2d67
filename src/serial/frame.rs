//! Wire formats.
//!
//! Touch frame: `'('`, seven payload bytes, `')'`. Payload byte `i` carries
//! bits `5*i .. 5*i+5` of the region word in its low five bits, so the frame
//! spans 35 bits; bit 34 is reserved and always sent as zero.
//!
//! Command frame: `'{' L R cmd value '}'`. Responses reuse the touch-frame
//! delimiters: `'(' L R cmd value ')'`.

use crate::state::SerialState;

pub const TOUCH_FRAME_LEN: usize = 9;
pub const COMMAND_FRAME_LEN: usize = 6;
pub const RESPONSE_LEN: usize = 6;

pub const TOUCH_START: u8 = b'(';
pub const TOUCH_END: u8 = b')';
pub const COMMAND_START: u8 = b'{';
pub const COMMAND_END: u8 = b'}';

const PAYLOAD_BYTES: usize = 7;
const PAYLOAD_MASK: u8 = 0x1F;

pub fn encode_touch_frame(state: SerialState) -> [u8; TOUCH_FRAME_LEN] {
    let bits = state.bits() & SerialState::AREA_BITS;
    let mut frame = [0u8; TOUCH_FRAME_LEN];
    frame[0] = TOUCH_START;
    for i in 0..PAYLOAD_BYTES {
        frame[1 + i] = ((bits >> (5 * i)) as u8) & PAYLOAD_MASK;
    }
    frame[TOUCH_FRAME_LEN - 1] = TOUCH_END;
    frame
}

/// Inverse of [`encode_touch_frame`]; `None` if the delimiters are wrong.
pub fn decode_touch_frame(frame: &[u8; TOUCH_FRAME_LEN]) -> Option<SerialState> {
    if frame[0] != TOUCH_START || frame[TOUCH_FRAME_LEN - 1] != TOUCH_END {
        return None;
    }
    let bits = frame[1..=PAYLOAD_BYTES]
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(b & PAYLOAD_MASK) << (5 * i)));
    Some(SerialState(bits & SerialState::AREA_BITS))
}

pub fn encode_response(lr: u8, sensor: u8, cmd: u8, value: u8) -> [u8; RESPONSE_LEN] {
    [TOUCH_START, lr, sensor, cmd, value, TOUCH_END]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// `E`
    Reset,
    /// `L`
    Halt,
    /// `A`
    Start,
    /// `r`
    Ratio,
    /// `k`
    Sensitivity,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(b: u8) -> Self {
        match b {
            b'E' => Self::Reset,
            b'L' => Self::Halt,
            b'A' => Self::Start,
            b'r' => Self::Ratio,
            b'k' => Self::Sensitivity,
            other => Self::Unknown(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        match c {
            Command::Reset => b'E',
            Command::Halt => b'L',
            Command::Start => b'A',
            Command::Ratio => b'r',
            Command::Sensitivity => b'k',
            Command::Unknown(b) => b,
        }
    }
}

/// One complete inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandFrame {
    pub lr: u8,
    pub sensor: u8,
    pub command: Command,
    pub value: u8,
}

impl CommandFrame {
    pub fn parse(bytes: &[u8; COMMAND_FRAME_LEN]) -> Option<Self> {
        if bytes[0] != COMMAND_START || bytes[COMMAND_FRAME_LEN - 1] != COMMAND_END {
            return None;
        }
        Some(Self {
            lr: bytes[1],
            sensor: bytes[2],
            command: Command::from(bytes[3]),
            value: bytes[4],
        })
    }

    pub fn to_bytes(self) -> [u8; COMMAND_FRAME_LEN] {
        [COMMAND_START, self.lr, self.sensor, self.command.into(), self.value, COMMAND_END]
    }
}
