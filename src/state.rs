//! Per-scan touch state: device snapshots and the aggregated Serial word.

use core::ops::{
    BitOr,
    BitOrAssign,
};

use crate::{
    address::{
        CHANNEL_BITS,
        ChannelAddress,
    },
    area::Area,
};

/// One device's touch word (`device_mask << 24 | channels`) for the current
/// and previous scan pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchDeviceState {
    current: u32,
    previous: u32,
    timestamp_us: u64,
}

impl TouchDeviceState {
    pub const fn new(device_mask: u8) -> Self {
        let word = (device_mask as u32) << 24;
        Self { current: word, previous: word, timestamp_us: 0 }
    }

    pub const fn device_mask(&self) -> u8 {
        (self.current >> 24) as u8
    }

    /// Folds a fresh channel bitmap in, keeping the old one as previous.
    pub fn update(&mut self, channels: u32, now_us: u64) {
        self.previous = self.current;
        self.current = (self.current & !CHANNEL_BITS) | (channels & CHANNEL_BITS);
        self.timestamp_us = now_us;
    }

    pub const fn current(&self) -> u32 {
        self.current
    }

    pub const fn previous(&self) -> u32 {
        self.previous
    }

    pub const fn channels(&self) -> u32 {
        self.current & CHANNEL_BITS
    }

    pub const fn previous_channels(&self) -> u32 {
        self.previous & CHANNEL_BITS
    }

    /// Channels that went down this pass.
    pub const fn pressed(&self) -> u32 {
        self.channels() & !self.previous_channels()
    }

    /// Channels that went up this pass.
    pub const fn released(&self) -> u32 {
        !self.channels() & self.previous_channels()
    }

    pub const fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub const fn is_touched(&self, addr: ChannelAddress) -> bool {
        self.device_mask() == addr.device_mask() && addr.is_set_in(self.current)
    }
}

/// Channels of `device_mask` touched in `states`, zero if the device is absent.
pub fn channels_of(states: &[TouchDeviceState], device_mask: u8) -> u32 {
    states
        .iter()
        .find(|s| s.device_mask() == device_mask)
        .map_or(0, TouchDeviceState::channels)
}

pub fn is_touched(states: &[TouchDeviceState], addr: ChannelAddress) -> bool {
    states.iter().any(|s| s.is_touched(addr))
}

/// How many channels are down across every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TouchCount {
    None,
    One(ChannelAddress),
    Many(u32),
}

pub fn touch_count(states: &[TouchDeviceState]) -> TouchCount {
    let mut total = 0u32;
    let mut single = None;
    for state in states {
        let channels = state.channels();
        let n = channels.count_ones();
        if n == 1 && total == 0 {
            single = ChannelAddress::new(state.device_mask(), channels.trailing_zeros() as u8).ok();
        }
        total += n;
    }
    match (total, single) {
        (0, _) => TouchCount::None,
        (1, Some(addr)) => TouchCount::One(addr),
        (n, _) => TouchCount::Many(n),
    }
}

/// The 64-bit Serial touch word; region `n` is bit `n - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SerialState(pub u64);

impl SerialState {
    pub const EMPTY: Self = Self(0);

    /// Bits that carry regions; everything above is reserved.
    pub const AREA_BITS: u64 = (1 << 34) - 1;

    pub fn from_areas(areas: &[Area]) -> Self {
        Self(crate::area::mask_of(areas))
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, area: Area) -> bool {
        self.0 & area.bit() != 0
    }

    pub fn insert(&mut self, area: Area) {
        self.0 |= area.bit();
    }

    pub fn remove(&mut self, area: Area) {
        self.0 &= !area.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 & Self::AREA_BITS == 0
    }

    pub const fn count(self) -> u32 {
        (self.0 & Self::AREA_BITS).count_ones()
    }

    pub fn areas(self) -> impl Iterator<Item = Area> {
        Area::ALL.into_iter().filter(move |a| self.contains(*a))
    }
}

impl BitOr for SerialState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SerialState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
