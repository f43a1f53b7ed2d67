//! GTX312L 12-channel capacitive touch controller over I²C.

use embedded_hal::i2c::{
    I2c,
    SevenBitAddress,
};

use super::{
    SensitivityMode,
    TouchSensor,
};
use crate::{
    Error,
    Result,
    address::channel_mask,
};

pub const CHANNELS: u8 = 12;

/// 7-bit addresses selectable by the strap pins (0xB0..0xB6 on the wire).
pub const ADDRESSES: [SevenBitAddress; 4] = [0x58, 0x59, 0x5A, 0x5B];

const SENSITIVITY_REG_MAX: u8 = 0x3F;
const WRITE_LOCK_KEY: u8 = 0x5A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Reg {
    ChipAddr = 0x01,
    TouchStatusL = 0x02,
    TouchStatusH = 0x03,
    ChEnableL = 0x04,
    ChEnableH = 0x05,
    MonRst = 0x0A,
    Sleep = 0x0B,
    I2cPullupDisable = 0x0C,
    WriteLock = 0x0F,
    IntTouchMode = 0x10,
    ExpConfig = 0x11,
    CalTime = 0x13,
    SenIdleTime = 0x14,
    SenIdleSuffix = 0x15,
    BusyToIdle = 0x17,
    I2bMode = 0x18,
    SlideMode = 0x19,
    Sensitivity1 = 0x20,
}

/// Register values applied by [`Gtx312l::init`], in order.
const INIT_SEQUENCE: [(Reg, u8); 12] = [
    (Reg::MonRst, 0x01),
    (Reg::Sleep, 0x00),
    (Reg::I2cPullupDisable, 0x01),
    (Reg::WriteLock, WRITE_LOCK_KEY),
    // multi-touch, no interrupt pulses
    (Reg::IntTouchMode, 0x01),
    // touches never expire
    (Reg::ExpConfig, 0x00),
    (Reg::CalTime, 0x00),
    (Reg::SenIdleTime, 0x00),
    (Reg::SenIdleSuffix, 0x00),
    (Reg::BusyToIdle, 0x00),
    // stay in busy mode
    (Reg::I2bMode, 0x00),
    (Reg::SlideMode, 0x00),
];

/// Maps the 0..=99 scale onto the 6-bit sensitivity register.
pub const fn to_register(value: i8) -> u8 {
    let v = if value < 0 { 0 } else if value > 99 { 99 } else { value as u16 };
    (v * SENSITIVITY_REG_MAX as u16 / 99) as u8
}

/// Inverse of [`to_register`], rounded to the nearest step.
pub const fn from_register(raw: u8) -> i8 {
    let raw = (raw & SENSITIVITY_REG_MAX) as u16;
    ((raw * 99 + SENSITIVITY_REG_MAX as u16 / 2) / SENSITIVITY_REG_MAX as u16) as i8
}

pub struct Gtx312l<I> {
    i2c: I,
    address: SevenBitAddress,
    module_mask: u8,
    enabled: u32,
}

impl<I: I2c> Gtx312l<I> {
    /// `bus` distinguishes ICs with the same strap address on different buses.
    pub fn new(i2c: I, address: SevenBitAddress, bus: u8) -> Self {
        let local = address.wrapping_sub(ADDRESSES[0]).wrapping_add(1) & 0x0F;
        Self {
            i2c,
            address,
            module_mask: ((bus & 0x0F) << 4) | local,
            enabled: channel_mask(CHANNELS),
        }
    }

    /// Checks the chip responds and applies the scan configuration.
    pub fn init(&mut self) -> Result<()> {
        let chip = self.read_reg(Reg::ChipAddr)?;
        debug!("gtx312l {=u8:#x}: chip id {=u8:#x}", self.address, chip);
        for (reg, value) in INIT_SEQUENCE {
            self.write_reg(reg, value)?;
        }
        self.set_enabled_channel_mask(channel_mask(CHANNELS))
    }

    pub fn release(self) -> I {
        self.i2c
    }

    fn read_reg(&mut self, reg: Reg) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[reg as u8], &mut buf)
            .map_err(|_| Error::Bus)?;
        Ok(buf[0])
    }

    fn write_reg(&mut self, reg: Reg, value: u8) -> Result<()> {
        self.write_raw(reg as u8, value)
    }

    fn write_raw(&mut self, reg: u8, value: u8) -> Result<()> {
        self.i2c.write(self.address, &[reg, value]).map_err(|_| Error::Bus)
    }
}

impl<I: I2c> TouchSensor for Gtx312l<I> {
    fn module_mask(&self) -> u8 {
        self.module_mask
    }

    fn supported_channels(&self) -> u8 {
        CHANNELS
    }

    fn sensitivity_mode(&self) -> SensitivityMode {
        SensitivityMode::Absolute
    }

    fn sample(&mut self) -> Result<u32> {
        let mut buf = [0u8; 2];
        // status L/H are adjacent; one burst read keeps the pair coherent
        self.i2c
            .write_read(self.address, &[Reg::TouchStatusL as u8], &mut buf)
            .map_err(|_| Error::Bus)?;
        Ok(u32::from(u16::from_le_bytes(buf)) & channel_mask(CHANNELS))
    }

    fn set_channel_sensitivity(&mut self, channel: u8, value: i8) -> Result<()> {
        if channel >= CHANNELS {
            return Err(Error::InvalidArgument);
        }
        self.write_raw(Reg::Sensitivity1 as u8 + channel, to_register(value))
    }

    fn channel_sensitivity(&mut self, channel: u8) -> Result<i8> {
        if channel >= CHANNELS {
            return Err(Error::InvalidArgument);
        }
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[Reg::Sensitivity1 as u8 + channel], &mut buf)
            .map_err(|_| Error::Bus)?;
        Ok(from_register(buf[0]))
    }

    fn set_enabled_channel_mask(&mut self, mask: u32) -> Result<()> {
        let mask = mask & channel_mask(CHANNELS);
        self.write_reg(Reg::ChEnableL, mask as u8)?;
        self.write_reg(Reg::ChEnableH, (mask >> 8) as u8)?;
        self.enabled = mask;
        Ok(())
    }

    fn enabled_channel_mask(&self) -> u32 {
        self.enabled
    }
}
