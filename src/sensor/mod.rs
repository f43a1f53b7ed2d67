//! Capacitive touch IC abstraction.
//!
//! The input core only ever talks to sensors through [`TouchSensor`]. Drivers
//! own their bus handle; the core owns the driver once it is registered and
//! calls it exclusively from the scan loop.

pub mod gtx312l;

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    Error,
    Result,
};

/// Sensitivity scale a sensor declares. The core never converts between
/// scales; values are clamped to the declared range and passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensitivityMode {
    /// 0..=99, higher is more sensitive.
    #[default]
    Absolute,
    /// -127..=127 around the IC's own baseline.
    Relative,
}

impl SensitivityMode {
    pub const fn min(self) -> i8 {
        match self {
            Self::Absolute => 0,
            Self::Relative => -127,
        }
    }

    pub const fn max(self) -> i8 {
        match self {
            Self::Absolute => 99,
            Self::Relative => 127,
        }
    }

    pub fn clamp(self, value: i16) -> i8 {
        value.clamp(self.min() as i16, self.max() as i16) as i8
    }

    pub const fn contains(self, value: i16) -> bool {
        value >= self.min() as i16 && value <= self.max() as i16
    }

    /// Value assigned to channels of a freshly registered sensor.
    pub const fn default_value(self) -> i8 {
        match self {
            Self::Absolute => crate::consts::DEFAULT_SENSITIVITY,
            Self::Relative => 0,
        }
    }
}

/// One physical capacitive touch IC.
pub trait TouchSensor {
    /// Mask identifying this IC; unique among connected sensors.
    fn module_mask(&self) -> u8;

    /// Channels the IC provides (the core caps this at 24).
    fn supported_channels(&self) -> u8;

    fn sensitivity_mode(&self) -> SensitivityMode {
        SensitivityMode::Absolute
    }

    /// Latest touch bitmap, one bit per channel in the low 24 bits.
    ///
    /// Must not block; drivers that scan asynchronously return their cached
    /// result.
    fn sample(&mut self) -> Result<u32>;

    fn set_channel_sensitivity(&mut self, channel: u8, value: i8) -> Result<()>;

    fn channel_sensitivity(&mut self, channel: u8) -> Result<i8>;

    fn set_enabled_channel_mask(&mut self, mask: u32) -> Result<()>;

    fn enabled_channel_mask(&self) -> u32;

    fn supports_calibration(&self) -> bool {
        false
    }

    /// Starts the IC's own calibration toward a relative target (-10..=10).
    fn start_auto_calibration(&mut self, _target: i8) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn is_calibration_active(&self) -> bool {
        false
    }

    /// 0..=255, 255 meaning done.
    fn calibration_progress(&self) -> u8 {
        u8::MAX
    }

    /// Restricts the next calibration to `bitmap` with a per-channel target.
    fn set_calibration_target_by_bitmap(&mut self, _bitmap: u32, _target: i8) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Channels the IC flags as stuck or out of range after calibration.
    fn abnormal_channel_mask(&mut self) -> u32 {
        0
    }
}
