//! Auxiliary cabinet buttons (test, service, coin, select).
//!
//! Read as plain pull-up inputs; a pressed button pulls its line low. The
//! report loop polls far faster than contacts bounce, so no debouncing.

use esp_hal::gpio::{
    Input,
    InputConfig,
    Pull,
};

use super::ButtonResources;
use crate::gpio::{
    GpioSnapshot,
    GpioSource,
};

/// MCU pin numbers, as used in [`GpioId::mcu`](crate::gpio::GpioId::mcu).
pub const TEST_PIN: u8 = 11;
pub const SERVICE_PIN: u8 = 12;
pub const COIN_PIN: u8 = 13;
pub const SELECT_PIN: u8 = 14;

pub struct AuxButtons {
    lines: [(u8, Input<'static>); 4],
}

impl From<ButtonResources<'static>> for AuxButtons {
    fn from(res: ButtonResources<'static>) -> Self {
        let pull_up = InputConfig::default().with_pull(Pull::Up);
        Self {
            lines: [
                (TEST_PIN, Input::new(res.test, pull_up)),
                (SERVICE_PIN, Input::new(res.service, pull_up)),
                (COIN_PIN, Input::new(res.coin, pull_up)),
                (SELECT_PIN, Input::new(res.select, pull_up)),
            ],
        }
    }
}

impl GpioSource for AuxButtons {
    fn snapshot(&mut self) -> GpioSnapshot {
        let mut snap = GpioSnapshot::RELEASED;
        for (pin, input) in &self.lines {
            if input.is_low() {
                snap.mcu &= !(1u64 << pin);
            }
        }
        snap
    }
}
