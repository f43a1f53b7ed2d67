//! Button inputs: MCU pins and expander pins in one tagged id space.

use heapless::Vec;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    Error,
    Result,
    consts::{
        MAX_COMBO_KEYS,
        MAX_GPIO_KEYS,
    },
    hid::{
        keycode::HidKey,
        report::KeySet,
    },
};

const KIND_MASK: u8 = 0xC0;
const KIND_MCU: u8 = 0x00;
const KIND_EXPANDER: u8 = 0x40;

/// `0x00 | pin` for MCU pins 0..=63, `0x40 | n` for expander pins 1..=16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(transparent)]
pub struct GpioId(u8);

impl GpioId {
    pub const NONE: Self = Self(0xFF);

    pub const fn mcu(pin: u8) -> Option<Self> {
        if pin < 64 { Some(Self(KIND_MCU | pin)) } else { None }
    }

    /// `n` is 1-based: port A is 1..=8, port B 9..=16.
    pub const fn expander(n: u8) -> Option<Self> {
        if n >= 1 && n <= 16 { Some(Self(KIND_EXPANDER | n)) } else { None }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == Self::NONE.0
    }

    pub const fn is_mcu(self) -> bool {
        !self.is_none() && self.0 & KIND_MASK == KIND_MCU
    }

    pub const fn is_expander(self) -> bool {
        !self.is_none() && self.0 & KIND_MASK == KIND_EXPANDER && self.pin() >= 1 && self.pin() <= 16
    }

    pub const fn pin(self) -> u8 {
        self.0 & !KIND_MASK
    }
}

impl TryFrom<u8> for GpioId {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        let id = Self(raw);
        if id.is_none() || id.is_mcu() || id.is_expander() {
            Ok(id)
        } else {
            Err(Error::InvalidArgument)
        }
    }
}

/// Raw line levels; a cleared bit is a pressed button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioSnapshot {
    pub mcu: u64,
    pub expander: u16,
}

impl Default for GpioSnapshot {
    fn default() -> Self {
        Self::RELEASED
    }
}

impl GpioSnapshot {
    pub const RELEASED: Self = Self { mcu: u64::MAX, expander: u16::MAX };

    pub const fn is_pressed(&self, id: GpioId) -> bool {
        if id.is_mcu() {
            self.mcu & (1 << id.pin()) == 0
        } else if id.is_expander() {
            self.expander & (1 << (id.pin() - 1)) == 0
        } else {
            false
        }
    }
}

/// Anything that can report button levels without blocking.
pub trait GpioSource {
    fn snapshot(&mut self) -> GpioSnapshot;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhysicalKeyboardMapping {
    pub gpio: GpioId,
    pub default_key: HidKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LogicalKeyMapping {
    pub gpio: GpioId,
    pub keys: [HidKey; MAX_COMBO_KEYS],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpioKeyboard {
    physical: Vec<PhysicalKeyboardMapping, MAX_GPIO_KEYS>,
    logical: Vec<LogicalKeyMapping, MAX_GPIO_KEYS>,
}

impl GpioKeyboard {
    pub fn new(physical: &[PhysicalKeyboardMapping], logical: &[LogicalKeyMapping]) -> Result<Self> {
        let mut kb = Self::default();
        for p in physical {
            kb.add_physical(*p)?;
        }
        for l in logical {
            kb.set_logical(l.gpio, &l.keys)?;
        }
        Ok(kb)
    }

    pub fn physical(&self) -> &[PhysicalKeyboardMapping] {
        &self.physical
    }

    pub fn logical(&self) -> &[LogicalKeyMapping] {
        &self.logical
    }

    pub fn add_physical(&mut self, mapping: PhysicalKeyboardMapping) -> Result<()> {
        if mapping.gpio.is_none() {
            return Err(Error::InvalidArgument);
        }
        if let Some(existing) = self.physical.iter_mut().find(|p| p.gpio == mapping.gpio) {
            existing.default_key = mapping.default_key;
            return Ok(());
        }
        self.physical.push(mapping).map_err(|_| Error::DeviceLimit)
    }

    /// Assigns up to three keys pressed together by one button.
    pub fn set_logical(&mut self, gpio: GpioId, keys: &[HidKey]) -> Result<()> {
        if gpio.is_none() || keys.is_empty() || keys.len() > MAX_COMBO_KEYS {
            return Err(Error::InvalidArgument);
        }
        let mut combo = [HidKey::NONE; MAX_COMBO_KEYS];
        combo[..keys.len()].copy_from_slice(keys);
        if let Some(existing) = self.logical.iter_mut().find(|l| l.gpio == gpio) {
            existing.keys = combo;
            return Ok(());
        }
        self.logical
            .push(LogicalKeyMapping { gpio, keys: combo })
            .map_err(|_| Error::DeviceLimit)
    }

    pub fn clear_logical(&mut self, gpio: GpioId) {
        self.logical.retain(|l| l.gpio != gpio);
    }

    /// Keys of every pressed button; a logical mapping replaces the default.
    pub fn resolve(&self, snapshot: &GpioSnapshot, keys: &mut KeySet) {
        for p in &self.physical {
            if !snapshot.is_pressed(p.gpio) {
                continue;
            }
            match self.logical.iter().find(|l| l.gpio == p.gpio) {
                Some(l) => l.keys.iter().for_each(|k| keys.insert(*k)),
                None => keys.insert(p.default_key),
            }
        }
    }
}
