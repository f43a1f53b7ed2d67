//! Crate-wide error type.

use core::fmt;

/// Everything that can go wrong at the input core's API surface.
///
/// Transient sampling and submit failures never reach the caller; they are
/// logged and dropped inside the scan loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Channel address is not `device << 24 | one-hot channel`.
    InvalidAddress,
    /// Argument is malformed (unknown area, bad slot, empty mask...).
    InvalidArgument,
    /// Value outside the accepted range (sensitivity, delay, baud rate...).
    OutOfRange,
    /// No room left for another sensor, rule or mapping.
    DeviceLimit,
    /// A connected sensor already uses this module mask.
    DuplicateDevice,
    /// No sensor is registered under this module mask.
    UnknownDevice,
    /// Operation conflicts with the current mapping or work mode.
    MappingConflict,
    /// Another interactive flow is running.
    Busy,
    /// The sensor does not implement the requested feature.
    NotSupported,
    /// Sensor bus transaction failed.
    Bus,
    /// Flash read or write failed.
    Storage,
    /// Persisted image failed validation.
    Corrupt,
    /// Config value could not be encoded or decoded.
    Serialize,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::InvalidAddress => "invalid channel address",
            Self::InvalidArgument => "invalid argument",
            Self::OutOfRange => "value out of range",
            Self::DeviceLimit => "capacity exhausted",
            Self::DuplicateDevice => "module mask already registered",
            Self::UnknownDevice => "unknown device",
            Self::MappingConflict => "mapping conflict",
            Self::Busy => "busy",
            Self::NotSupported => "not supported",
            Self::Bus => "bus error",
            Self::Storage => "storage error",
            Self::Corrupt => "corrupt config image",
            Self::Serialize => "serialization error",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
