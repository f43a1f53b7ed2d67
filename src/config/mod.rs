//! Typed key/value configuration persisted in flash.

mod store;

use alloc::string::String;

use serde::{
    Deserialize,
    Serialize,
};
pub use store::{
    ConfigStore,
    LoadOutcome,
};

pub const KEY_WORK_MODE: &str = "input_manager_work_mode";
pub const KEY_TOUCH_DEVICES: &str = "input_manager_touch_devices";
pub const KEY_AREA_CHANNEL_MAPPINGS: &str = "input_manager_area_channel_mappings";
pub const KEY_PHYSICAL_KEYBOARDS: &str = "input_manager_physical_keyboards";
pub const KEY_LOGICAL_KEYS: &str = "input_manager_logical_keys";
pub const KEY_TOUCH_KEYBOARD_ENABLED: &str = "input_manager_touch_keyboard_enabled";
pub const KEY_TOUCH_KEYBOARD_MODE: &str = "input_manager_touch_keyboard_mode";
pub const KEY_TOUCH_KEYBOARD_RULES: &str = "input_manager_touch_keyboard_rules";
pub const KEY_TOUCH_RESPONSE_DELAY: &str = "input_manager_touch_response_delay";
pub const KEY_MAI2_BAUD_RATE: &str = "input_manager_mai2serial_baud_rate";
pub const KEY_CALIBRATION_SENSITIVITY: &str = "input_manager_calibration_sensitivity";
pub const KEY_BINDING_TIMEOUT_MS: &str = "input_manager_binding_timeout_ms";

/// One stored value. Blobs hold arbitrary serde data as a JSON tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ConfigValue {
    Bool(bool),
    U8(u8),
    U32(u32),
    Blob(serde_json::Value),
}

impl ConfigValue {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U8(_) => "u8",
            Self::U32(_) => "u32",
            Self::Blob(_) => "blob",
        }
    }

    pub fn same_kind(&self, other: &Self) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }
}

/// On-flash entry: `{ "key": .., "type": .., "value": .. }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry {
    key: String,
    #[serde(flatten)]
    value: ConfigValue,
}
