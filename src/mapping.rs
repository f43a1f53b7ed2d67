//! Mapping store: physical channels to Serial regions, HID contacts and keys.
//!
//! A channel belongs to at most one family, and a Serial region to at most one
//! channel. Every edit goes through [`AreaChannelMappings`], which removes the
//! address from all other places before inserting it, so neither rule can be
//! broken from the outside.

use alloc::vec::Vec;

use heapless::Vec as BoundedVec;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    Error,
    Result,
    address::{
        self,
        ChannelAddress,
        channel_mask,
    },
    area::Area,
    consts::{
        AREA_COUNT,
        HID_SLOTS,
        MAX_CHANNELS,
        MAX_TOUCH_DEVICES,
        MAX_TOUCH_KEYMAP,
    },
    hid::{
        COORD_MAX,
        keycode::HidKey,
    },
    sensor::SensitivityMode,
    state::{
        SerialState,
        TouchDeviceState,
        channels_of,
    },
};

// ── Per-device table ────────────────────────────────────────────────────────

/// Persisted settings of one touch IC, keyed by its module mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchDeviceMapping {
    pub device_mask: u8,
    max_channels: u8,
    enabled_channels: u32,
    sensitivity: [i8; MAX_CHANNELS as usize],
    pub sensitivity_mode: SensitivityMode,
    /// Runtime only: a live sensor is registered under this mask.
    #[serde(skip)]
    pub connected: bool,
}

impl TouchDeviceMapping {
    pub fn new(device_mask: u8, supported_channels: u8, mode: SensitivityMode) -> Self {
        let max_channels = supported_channels.min(MAX_CHANNELS);
        Self {
            device_mask,
            max_channels,
            enabled_channels: channel_mask(max_channels),
            sensitivity: [mode.default_value(); MAX_CHANNELS as usize],
            sensitivity_mode: mode,
            connected: false,
        }
    }

    pub const fn max_channels(&self) -> u8 {
        self.max_channels
    }

    /// Every channel this device can report.
    pub const fn channel_bits(&self) -> u32 {
        channel_mask(self.max_channels)
    }

    pub const fn enabled_channels(&self) -> u32 {
        self.enabled_channels
    }

    /// Stores `mask` limited to existing channels and returns what was kept.
    pub fn set_enabled_channels(&mut self, mask: u32) -> u32 {
        self.enabled_channels = mask & self.channel_bits();
        self.enabled_channels
    }

    pub fn sensitivity(&self, channel: u8) -> Option<i8> {
        (channel < self.max_channels).then(|| self.sensitivity[channel as usize])
    }

    /// Clamps to the declared mode and records the value.
    pub fn set_sensitivity(&mut self, channel: u8, value: i16) -> Result<i8> {
        if channel >= self.max_channels {
            return Err(Error::InvalidArgument);
        }
        let value = self.sensitivity_mode.clamp(value);
        self.sensitivity[channel as usize] = value;
        Ok(value)
    }

    /// Takes on a live sensor's channel count and mode. Stored values are
    /// clamped into the new range before anything reaches the sensor.
    pub fn adopt(&mut self, supported_channels: u8, mode: SensitivityMode) {
        if mode != self.sensitivity_mode {
            debug!("mapping: {=u8:#x} sensitivity mode changed, re-clamping", self.device_mask);
        }
        self.max_channels = supported_channels;
        self.sensitivity_mode = mode;
        self.normalize();
    }

    /// Repairs a table read from flash.
    fn normalize(&mut self) {
        self.max_channels = self.max_channels.min(MAX_CHANNELS);
        self.enabled_channels &= self.channel_bits();
        let mode = self.sensitivity_mode;
        for v in &mut self.sensitivity {
            *v = mode.clamp(i16::from(*v));
        }
    }
}

/// Up to [`MAX_TOUCH_DEVICES`] device tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceTable(BoundedVec<TouchDeviceMapping, MAX_TOUCH_DEVICES>);

impl DeviceTable {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TouchDeviceMapping> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TouchDeviceMapping> {
        self.0.iter_mut()
    }

    pub fn find(&self, device_mask: u8) -> Option<&TouchDeviceMapping> {
        self.0.iter().find(|m| m.device_mask == device_mask)
    }

    pub fn find_mut(&mut self, device_mask: u8) -> Option<&mut TouchDeviceMapping> {
        self.0.iter_mut().find(|m| m.device_mask == device_mask)
    }

    pub fn insert(&mut self, mapping: TouchDeviceMapping) -> Result<&mut TouchDeviceMapping> {
        if self.find(mapping.device_mask).is_some() {
            return Err(Error::DuplicateDevice);
        }
        self.0.push(mapping).map_err(|_| Error::DeviceLimit)?;
        let last = self.0.len() - 1;
        Ok(&mut self.0[last])
    }

    pub fn normalize(&mut self) {
        self.0.retain(|m| m.device_mask != 0);
        self.0.iter_mut().for_each(TouchDeviceMapping::normalize);
    }
}

// ── Channel families ────────────────────────────────────────────────────────

/// Channel reported as a digitizer contact at `(x, y)`, each `0..=COORD_MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HidMapping {
    pub address: ChannelAddress,
    pub x: u16,
    pub y: u16,
}

/// Channel reported as a held key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyMapping {
    pub key: HidKey,
    pub address: ChannelAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MappingFamily {
    Serial(Area),
    Hid(u8),
    Keyboard(HidKey),
}

/// Which families count when computing the channels a device must scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Families {
    pub serial: bool,
    pub hid: bool,
    pub keyboard: bool,
}

impl Families {
    pub const ALL: Self = Self { serial: true, hid: true, keyboard: true };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MappingsRepr", into = "MappingsRepr")]
pub struct AreaChannelMappings {
    serial: [Option<ChannelAddress>; AREA_COUNT],
    hid: [Option<HidMapping>; HID_SLOTS],
    keyboard: BoundedVec<KeyMapping, MAX_TOUCH_KEYMAP>,
}

impl Default for AreaChannelMappings {
    fn default() -> Self {
        Self {
            serial: [None; AREA_COUNT],
            hid: [None; HID_SLOTS],
            keyboard: BoundedVec::new(),
        }
    }
}

impl AreaChannelMappings {
    pub fn serial(&self, area: Area) -> Option<ChannelAddress> {
        self.serial[area.slot()]
    }

    pub fn set_serial(&mut self, area: Area, addr: ChannelAddress) {
        self.unmap(addr);
        self.serial[area.slot()] = Some(addr);
    }

    pub fn clear_serial(&mut self, area: Area) {
        self.serial[area.slot()] = None;
    }

    pub fn area_of(&self, addr: ChannelAddress) -> Option<Area> {
        self.serial
            .iter()
            .position(|s| *s == Some(addr))
            .and_then(Area::from_slot)
    }

    pub fn serial_count(&self) -> usize {
        self.serial.iter().flatten().count()
    }

    pub fn hid(&self, slot: usize) -> Option<HidMapping> {
        self.hid.get(slot).copied().flatten()
    }

    pub fn hid_slots(&self) -> &[Option<HidMapping>; HID_SLOTS] {
        &self.hid
    }

    /// `(0, 0)` is reserved for "unmapped" and rejected.
    pub fn set_hid(&mut self, slot: usize, addr: ChannelAddress, x: u16, y: u16) -> Result<()> {
        if slot >= HID_SLOTS {
            return Err(Error::InvalidArgument);
        }
        if (x == 0 && y == 0) || x > COORD_MAX || y > COORD_MAX {
            return Err(Error::OutOfRange);
        }
        self.unmap(addr);
        self.hid[slot] = Some(HidMapping { address: addr, x, y });
        Ok(())
    }

    pub fn clear_hid(&mut self, slot: usize) {
        if let Some(entry) = self.hid.get_mut(slot) {
            *entry = None;
        }
    }

    pub fn keyboard(&self) -> &[KeyMapping] {
        &self.keyboard
    }

    pub fn set_key(&mut self, addr: ChannelAddress, key: HidKey) -> Result<()> {
        if key.is_none() {
            return Err(Error::InvalidArgument);
        }
        let already_key = matches!(self.family_of(addr), Some(MappingFamily::Keyboard(_)));
        if self.keyboard.is_full() && !already_key {
            return Err(Error::DeviceLimit);
        }
        self.unmap(addr);
        self.keyboard
            .push(KeyMapping { key, address: addr })
            .map_err(|_| Error::DeviceLimit)
    }

    pub fn clear_key(&mut self, addr: ChannelAddress) {
        self.keyboard.retain(|k| k.address != addr);
    }

    /// Removes `addr` from every family. Returns whether it was mapped.
    pub fn unmap(&mut self, addr: ChannelAddress) -> bool {
        let mut found = false;
        for s in &mut self.serial {
            if *s == Some(addr) {
                *s = None;
                found = true;
            }
        }
        for h in &mut self.hid {
            if h.is_some_and(|m| m.address == addr) {
                *h = None;
                found = true;
            }
        }
        let before = self.keyboard.len();
        self.keyboard.retain(|k| k.address != addr);
        found || self.keyboard.len() != before
    }

    /// Drops every mapping that points at `device_mask`.
    pub fn unmap_device(&mut self, device_mask: u8) {
        for s in &mut self.serial {
            if s.is_some_and(|a| a.device_mask() == device_mask) {
                *s = None;
            }
        }
        for h in &mut self.hid {
            if h.is_some_and(|m| m.address.device_mask() == device_mask) {
                *h = None;
            }
        }
        self.keyboard.retain(|k| k.address.device_mask() != device_mask);
    }

    pub fn clear_all(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.serial_count() == 0 && self.hid.iter().all(Option::is_none) && self.keyboard.is_empty()
    }

    pub fn family_of(&self, addr: ChannelAddress) -> Option<MappingFamily> {
        if let Some(area) = self.area_of(addr) {
            return Some(MappingFamily::Serial(area));
        }
        if let Some(slot) = self.hid.iter().position(|h| h.is_some_and(|m| m.address == addr)) {
            return Some(MappingFamily::Hid(slot as u8));
        }
        self.keyboard
            .iter()
            .find(|k| k.address == addr)
            .map(|k| MappingFamily::Keyboard(k.key))
    }

    /// Channel bits of `device_mask` referenced by the selected families.
    pub fn mapped_channels(&self, device_mask: u8, families: Families) -> u32 {
        let mut bits = 0;
        let mut add = |addr: ChannelAddress| {
            if addr.device_mask() == device_mask {
                bits |= addr.channel_bit();
            }
        };
        if families.serial {
            self.serial.iter().flatten().copied().for_each(&mut add);
        }
        if families.hid {
            self.hid.iter().flatten().for_each(|m| add(m.address));
        }
        if families.keyboard {
            self.keyboard.iter().for_each(|k| add(k.address));
        }
        bits
    }

    // ── Resolution ──────────────────────────────────────────────────────────

    /// Serial word for the current device states.
    pub fn resolve_serial(&self, states: &[TouchDeviceState]) -> SerialState {
        let mut out = 0u64;
        for (slot, addr) in self.serial.iter().enumerate() {
            if let Some(addr) = addr {
                if addr.is_set_in(channels_of(states, addr.device_mask())) {
                    out |= 1 << slot;
                }
            }
        }
        SerialState(out)
    }

    /// Bit `i` set when HID slot `i` is touched.
    pub fn resolve_hid(&self, states: &[TouchDeviceState]) -> u16 {
        let mut out = 0u16;
        for (slot, entry) in self.hid.iter().enumerate() {
            if let Some(m) = entry {
                if m.address.is_set_in(channels_of(states, m.address.device_mask())) {
                    out |= 1 << slot;
                }
            }
        }
        out
    }

    /// Bit `i` set when keymap entry `i` is touched.
    pub fn resolve_keys(&self, states: &[TouchDeviceState]) -> u16 {
        let mut out = 0u16;
        for (i, k) in self.keyboard.iter().enumerate() {
            if k.address.is_set_in(channels_of(states, k.address.device_mask())) {
                out |= 1 << i;
            }
        }
        out
    }
}

/// Flash shape: the Serial table as raw words with `0xFFFF_FFFF` for gaps.
#[derive(Serialize, Deserialize)]
struct MappingsRepr {
    serial: Vec<u32>,
    hid: Vec<Option<HidMapping>>,
    keyboard: BoundedVec<KeyMapping, MAX_TOUCH_KEYMAP>,
}

impl From<AreaChannelMappings> for MappingsRepr {
    fn from(m: AreaChannelMappings) -> Self {
        Self {
            serial: m.serial.iter().map(|a| address::to_table(*a)).collect(),
            hid: m.hid.to_vec(),
            keyboard: m.keyboard,
        }
    }
}

impl TryFrom<MappingsRepr> for AreaChannelMappings {
    type Error = Error;

    fn try_from(repr: MappingsRepr) -> Result<Self> {
        if repr.serial.len() != AREA_COUNT || repr.hid.len() != HID_SLOTS {
            return Err(Error::Corrupt);
        }
        let mut out = Self::default();
        for (slot, raw) in repr.serial.iter().enumerate() {
            if let Some(addr) = ChannelAddress::from_table(*raw)? {
                if out.family_of(addr).is_some() {
                    return Err(Error::Corrupt);
                }
                out.serial[slot] = Some(addr);
            }
        }
        for (slot, entry) in repr.hid.into_iter().enumerate() {
            if let Some(m) = entry {
                if out.family_of(m.address).is_some() {
                    return Err(Error::Corrupt);
                }
                out.hid[slot] = Some(m);
            }
        }
        for k in repr.keyboard {
            if out.family_of(k.address).is_some() {
                return Err(Error::Corrupt);
            }
            out.keyboard.push(k).map_err(|_| Error::Corrupt)?;
        }
        Ok(out)
    }
}
