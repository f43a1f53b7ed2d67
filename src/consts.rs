//! Capacities, timing and defaults shared across the input core.

/// Touch ICs the core will accept.
pub const MAX_TOUCH_DEVICES: usize = 16;

/// Channels addressable per IC (low 24 bits of a channel address).
pub const MAX_CHANNELS: u8 = 24;

/// Mai2 logical regions A1..E8.
pub const AREA_COUNT: usize = 34;

/// HID digitizer contacts (and coordinate mapping slots).
pub const HID_SLOTS: usize = 10;

/// Entries in the touch keymap family.
pub const MAX_TOUCH_KEYMAP: usize = 16;

/// Touch keyboard rules.
pub const MAX_TOUCH_KEYBOARD_RULES: usize = 16;

/// Physical and logical GPIO key entries.
pub const MAX_GPIO_KEYS: usize = 32;

/// Keycodes per logical GPIO mapping.
pub const MAX_COMBO_KEYS: usize = 3;

/// Ring entries of the delayed Serial state buffer.
pub const DELAY_BUFFER_SIZE: usize = 512;

/// Upper bound of the output-side delay.
pub const MAX_TOUCH_RESPONSE_DELAY_MS: u8 = 100;

/// Consecutive failed samples before a sensor is marked disconnected.
pub const DISCONNECT_THRESHOLD: u8 = 8;

/// Default sensitivity of a fresh channel in absolute mode.
pub const DEFAULT_SENSITIVITY: i8 = 15;

/// A bind candidate must be the only touched channel for this long.
pub const BINDING_HOLD_US: u64 = 1_000_000;

pub const DEFAULT_BINDING_TIMEOUT_MS: u32 = 30_000;

/// Settle time between two auto-adjust sensitivity steps.
pub const AUTO_ADJUST_STABILIZE_MS: u32 = 100;

pub const AUTO_ADJUST_TIMEOUT_MS: u32 = 60_000;

pub const CALIBRATION_TIMEOUT_MS: u32 = 60_000;

/// Relative calibration target range.
pub const CALIBRATION_TARGET_MIN: i8 = -10;
pub const CALIBRATION_TARGET_MAX: i8 = 10;

/// Scan passes between two maintenance rounds.
pub const MAINTENANCE_INTERVAL: u32 = 256;

/// Rate counters publish once per this window.
pub const RATE_WINDOW_US: u64 = 1_000_000;

pub const MAI2_DEFAULT_BAUD: u32 = 115_200;

pub const MAI2_BAUD_RATES: [u32; 7] = [
    9_600, 115_200, 250_000, 500_000, 1_000_000, 1_500_000, 2_000_000,
];

pub const USB_VID: u16 = 0x2E8A;
pub const USB_PID: u16 = 0x000A;
pub const USB_MANUFACTURER: &str = "maitouch";
pub const USB_PRODUCT: &str = "Mai2 Touch Controller";

/// Flash window reserved for the two config image slots.
pub const CONFIG_FLASH_OFFSET: u32 = 0x3F_0000;
pub const CONFIG_SLOT_SIZE: u32 = 0x2000;
