//! Physical channel addresses.
//!
//! A channel is named by a 32-bit word: the owning IC's module mask in the
//! high byte and a one-hot channel bit in the low 24 bits. Mapping resolution
//! relies on this layout for plain mask tests against device states.

use core::fmt;

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    Error,
    Result,
    consts::MAX_CHANNELS,
};

pub const CHANNEL_BITS: u32 = 0x00FF_FFFF;

/// Raw word used by persisted tables for "no channel".
pub const UNMAPPED: u32 = 0xFFFF_FFFF;

/// A validated `(device_mask << 24) | (1 << channel)` word.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(try_from = "u32", into = "u32")]
pub struct ChannelAddress(u32);

impl ChannelAddress {
    pub const fn new(device_mask: u8, channel: u8) -> Result<Self> {
        if device_mask == 0 || channel >= MAX_CHANNELS {
            return Err(Error::InvalidAddress);
        }
        Ok(Self(((device_mask as u32) << 24) | (1 << channel)))
    }

    /// Validates a raw word: non-zero device mask, exactly one channel bit.
    pub const fn from_raw(raw: u32) -> Result<Self> {
        let channels = raw & CHANNEL_BITS;
        if raw >> 24 == 0 || channels.count_ones() != 1 {
            return Err(Error::InvalidAddress);
        }
        Ok(Self(raw))
    }

    /// Decodes a persisted table entry, where [`UNMAPPED`] and 0 mean "none".
    pub fn from_table(raw: u32) -> Result<Option<Self>> {
        match raw {
            0 | UNMAPPED => Ok(None),
            raw => Self::from_raw(raw).map(Some),
        }
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn device_mask(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn channel_bit(self) -> u32 {
        self.0 & CHANNEL_BITS
    }

    pub const fn channel(self) -> u8 {
        self.channel_bit().trailing_zeros() as u8
    }

    /// True if `state` (a device state word or a bare channel bitmap of the
    /// same device) has this channel set.
    pub const fn is_set_in(self, channels: u32) -> bool {
        channels & self.channel_bit() != 0
    }
}

impl TryFrom<u32> for ChannelAddress {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        Self::from_raw(raw)
    }
}

impl From<ChannelAddress> for u32 {
    fn from(addr: ChannelAddress) -> Self {
        addr.0
    }
}

/// Table encoding of an optional address.
pub fn to_table(addr: Option<ChannelAddress>) -> u32 {
    addr.map_or(UNMAPPED, ChannelAddress::raw)
}

impl fmt::Debug for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelAddress({:#04x}:{})", self.device_mask(), self.channel())
    }
}

/// Bits `0..count` set.
pub const fn channel_mask(count: u8) -> u32 {
    if count >= 32 {
        u32::MAX
    } else {
        (1u32 << count) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_device_and_channel() {
        let addr = ChannelAddress::new(0x01, 5).unwrap();
        assert_eq!(addr.raw(), 0x0100_0020);
        assert_eq!(addr.device_mask(), 0x01);
        assert_eq!(addr.channel(), 5);
        assert_eq!(addr.channel_bit(), 1 << 5);
    }

    #[test]
    fn every_constructed_address_is_one_hot() {
        for mask in 1..=u8::MAX {
            for ch in 0..MAX_CHANNELS {
                let addr = ChannelAddress::new(mask, ch).unwrap();
                assert_eq!(addr.channel_bit().count_ones(), 1);
                assert_eq!(ChannelAddress::from_raw(addr.raw()), Ok(addr));
            }
        }
    }

    #[test]
    fn rejects_malformed_words() {
        assert_eq!(ChannelAddress::new(0, 1), Err(Error::InvalidAddress));
        assert_eq!(ChannelAddress::new(1, 24), Err(Error::InvalidAddress));
        assert_eq!(ChannelAddress::from_raw(0x0100_0003), Err(Error::InvalidAddress));
        assert_eq!(ChannelAddress::from_raw(0x0000_0001), Err(Error::InvalidAddress));
        assert_eq!(ChannelAddress::from_raw(0x0100_0000), Err(Error::InvalidAddress));
    }

    #[test]
    fn table_sentinels_decode_to_none() {
        assert_eq!(ChannelAddress::from_table(UNMAPPED), Ok(None));
        assert_eq!(ChannelAddress::from_table(0), Ok(None));
        assert_eq!(to_table(None), UNMAPPED);
        let addr = ChannelAddress::new(2, 0).unwrap();
        assert_eq!(ChannelAddress::from_table(to_table(Some(addr))), Ok(Some(addr)));
    }

    #[test]
    fn channel_mask_covers_low_bits() {
        assert_eq!(channel_mask(0), 0);
        assert_eq!(channel_mask(12), 0xFFF);
        assert_eq!(channel_mask(24), 0xFF_FFFF);
    }
}
