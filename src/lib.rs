//! # maitouch
//!
//! Input core of a Mai2-style capacitive touch controller: 34 named touch
//! regions fed by up to 16 capacitive sensor ICs, reported to the host over
//! the Mai2 Serial protocol or as a USB HID digitizer plus keyboards.
//!
//! The core is hardware-agnostic and builds on the host:
//! - **Sensors** sit behind [`sensor::TouchSensor`]; [`sensor::gtx312l`] is
//!   the I²C driver used on the board.
//! - **Mapping** turns `(device, channel)` addresses into regions, HID
//!   contacts or keys ([`mapping`]).
//! - **Output** goes through [`serial::Mai2Serial`] and [`hid::HidAdapter`].
//! - **Scheduling** is split over two loops: [`input::InputManager`] scans
//!   and publishes a [`handoff::TouchSnapshot`], [`input::report::ReportLoop`]
//!   turns it into HID reports.
//! - **Settings** persist through [`config::ConfigStore`] on any
//!   `embedded-storage` flash.
//!
//! With the `board` feature the [`board`] module wires all of this to the
//! ESP32-S3 controller board.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! let peripherals = maitouch::board::init();
//! let resources = maitouch::split_resources!(peripherals);
//!
//! let mut manager = InputManager::new(uart, config)?;
//! manager.register_sensor(Box::new(sensor))?;
//! loop {
//!     manager.scan_pass(now_us(), &SNAPSHOT);
//! }
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
mod fmt;

/// StaticCell helper: allocates a value into a `static` exactly once.
#[cfg(feature = "board")]
#[macro_export]
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write($val);
        x
    }};
}

pub mod address;
pub mod area;
pub mod binding;
pub mod calibration;
pub mod config;
pub mod consts;
pub mod delay;
pub mod error;
pub mod gpio;
pub mod handoff;
pub mod hid;
pub mod input;
pub mod mapping;
pub mod rate;
pub mod sensor;
pub mod serial;
pub mod state;
pub mod touch_keyboard;

#[cfg(feature = "board")]
pub mod board;

#[cfg(test)]
pub(crate) mod mock;

pub use error::{
    Error,
    Result,
};
