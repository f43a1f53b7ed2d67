//! The Input Core's private slice of the key/value store.

use heapless::Vec;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};

use crate::{
    Error,
    Result,
    config::{
        self,
        ConfigStore,
        ConfigValue,
    },
    consts::{
        CALIBRATION_TARGET_MAX,
        CALIBRATION_TARGET_MIN,
        DEFAULT_BINDING_TIMEOUT_MS,
        HID_SLOTS,
        MAI2_BAUD_RATES,
        MAI2_DEFAULT_BAUD,
        MAX_GPIO_KEYS,
        MAX_TOUCH_KEYBOARD_RULES,
        MAX_TOUCH_KEYMAP,
        MAX_TOUCH_RESPONSE_DELAY_MS,
    },
    gpio::{
        LogicalKeyMapping,
        PhysicalKeyboardMapping,
    },
    hid::keycode::HidKey,
    mapping::{
        AreaChannelMappings,
        DeviceTable,
        HidMapping,
    },
    touch_keyboard::{
        TouchKeyboardMode,
        TouchKeyboardRule,
    },
};

/// Which host interface carries touch data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WorkMode {
    #[default]
    Serial,
    Hid,
}

impl WorkMode {
    pub const fn raw(self) -> u8 {
        match self {
            Self::Serial => 0,
            Self::Hid => 1,
        }
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Serial),
            1 => Some(Self::Hid),
            _ => None,
        }
    }
}

const fn keyboard_mode_raw(mode: TouchKeyboardMode) -> u8 {
    match mode {
        TouchKeyboardMode::KeyOnly => 0,
        TouchKeyboardMode::TouchOnly => 1,
        TouchKeyboardMode::Both => 2,
    }
}

const fn keyboard_mode_from_raw(raw: u8) -> Option<TouchKeyboardMode> {
    match raw {
        0 => Some(TouchKeyboardMode::KeyOnly),
        1 => Some(TouchKeyboardMode::TouchOnly),
        2 => Some(TouchKeyboardMode::Both),
        _ => None,
    }
}

/// Calibration targets are stored biased so they fit a `u8`.
const CALIBRATION_BIAS: i8 = 10;
const DEFAULT_CALIBRATION_TARGET: i8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputConfig {
    pub work_mode: WorkMode,
    pub devices: DeviceTable,
    pub mappings: AreaChannelMappings,
    pub physical_keyboards: Vec<PhysicalKeyboardMapping, MAX_GPIO_KEYS>,
    pub logical_keys: Vec<LogicalKeyMapping, MAX_GPIO_KEYS>,
    pub touch_keyboard_enabled: bool,
    pub touch_keyboard_mode: TouchKeyboardMode,
    pub touch_keyboard_rules: Vec<TouchKeyboardRule, MAX_TOUCH_KEYBOARD_RULES>,
    pub touch_response_delay_ms: u8,
    pub mai2_baud_rate: u32,
    /// Relative target for sensor calibration, -10..=10.
    pub calibration_target: i8,
    pub binding_timeout_ms: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            work_mode: WorkMode::Serial,
            devices: DeviceTable::default(),
            mappings: AreaChannelMappings::default(),
            physical_keyboards: Vec::new(),
            logical_keys: Vec::new(),
            touch_keyboard_enabled: false,
            touch_keyboard_mode: TouchKeyboardMode::Both,
            touch_keyboard_rules: Vec::new(),
            touch_response_delay_ms: 0,
            mai2_baud_rate: MAI2_DEFAULT_BAUD,
            calibration_target: DEFAULT_CALIBRATION_TARGET,
            binding_timeout_ms: DEFAULT_BINDING_TIMEOUT_MS,
        }
    }
}

impl InputConfig {
    /// Registers every key with its default value.
    pub fn register<S: embedded_storage::Storage>(store: &mut ConfigStore<S>) -> Result<()> {
        let d = Self::default();
        store.register(config::KEY_WORK_MODE, ConfigValue::U8(d.work_mode.raw()));
        store.register(config::KEY_TOUCH_DEVICES, blob(&d.devices)?);
        store.register(config::KEY_AREA_CHANNEL_MAPPINGS, blob(&d.mappings)?);
        store.register(config::KEY_PHYSICAL_KEYBOARDS, blob(&d.physical_keyboards)?);
        store.register(config::KEY_LOGICAL_KEYS, blob(&d.logical_keys)?);
        store.register(config::KEY_TOUCH_KEYBOARD_ENABLED, ConfigValue::Bool(d.touch_keyboard_enabled));
        store.register(config::KEY_TOUCH_KEYBOARD_MODE, ConfigValue::U8(keyboard_mode_raw(d.touch_keyboard_mode)));
        store.register(config::KEY_TOUCH_KEYBOARD_RULES, blob(&d.touch_keyboard_rules)?);
        store.register(config::KEY_TOUCH_RESPONSE_DELAY, ConfigValue::U8(d.touch_response_delay_ms));
        store.register(config::KEY_MAI2_BAUD_RATE, ConfigValue::U32(d.mai2_baud_rate));
        store.register(
            config::KEY_CALIBRATION_SENSITIVITY,
            ConfigValue::U8((d.calibration_target + CALIBRATION_BIAS) as u8),
        );
        store.register(config::KEY_BINDING_TIMEOUT_MS, ConfigValue::U32(d.binding_timeout_ms));
        Ok(())
    }

    /// Pulls every field from `store`. A missing or invalid value keeps
    /// its default and is logged.
    pub fn load<S: embedded_storage::Storage>(store: &ConfigStore<S>) -> Self {
        let mut cfg = Self::default();

        if let Some(mode) = store.get_u8(config::KEY_WORK_MODE).ok().and_then(WorkMode::from_raw) {
            cfg.work_mode = mode;
        }
        if let Some(mut devices) = load_blob::<_, DeviceTable>(store, config::KEY_TOUCH_DEVICES) {
            devices.normalize();
            cfg.devices = devices;
        }
        if let Some(mappings) = load_blob(store, config::KEY_AREA_CHANNEL_MAPPINGS) {
            cfg.mappings = mappings;
        }
        if let Some(list) = load_blob(store, config::KEY_PHYSICAL_KEYBOARDS) {
            cfg.physical_keyboards = list;
        }
        if let Some(list) = load_blob(store, config::KEY_LOGICAL_KEYS) {
            cfg.logical_keys = list;
        }
        if let Ok(enabled) = store.get_bool(config::KEY_TOUCH_KEYBOARD_ENABLED) {
            cfg.touch_keyboard_enabled = enabled;
        }
        if let Some(mode) = store
            .get_u8(config::KEY_TOUCH_KEYBOARD_MODE)
            .ok()
            .and_then(keyboard_mode_from_raw)
        {
            cfg.touch_keyboard_mode = mode;
        }
        if let Some(rules) = load_blob::<_, Vec<TouchKeyboardRule, MAX_TOUCH_KEYBOARD_RULES>>(
            store,
            config::KEY_TOUCH_KEYBOARD_RULES,
        ) {
            let valid = rules
                .iter()
                .all(|r| TouchKeyboardRule::new(r.area_mask, r.hold_ms, r.key, r.once).is_ok());
            if valid {
                cfg.touch_keyboard_rules = rules;
            } else {
                warn!("config: touch keyboard rules rejected");
            }
        }
        match store.get_u8(config::KEY_TOUCH_RESPONSE_DELAY) {
            Ok(ms) if ms <= MAX_TOUCH_RESPONSE_DELAY_MS => cfg.touch_response_delay_ms = ms,
            Ok(ms) => warn!("config: delay {=u8} ms out of range", ms),
            Err(_) => {}
        }
        match store.get_u32(config::KEY_MAI2_BAUD_RATE) {
            Ok(baud) if MAI2_BAUD_RATES.contains(&baud) => cfg.mai2_baud_rate = baud,
            Ok(baud) => warn!("config: baud {=u32} unsupported", baud),
            Err(_) => {}
        }
        if let Ok(raw) = store.get_u8(config::KEY_CALIBRATION_SENSITIVITY) {
            let target = raw as i16 - CALIBRATION_BIAS as i16;
            if (CALIBRATION_TARGET_MIN as i16..=CALIBRATION_TARGET_MAX as i16).contains(&target) {
                cfg.calibration_target = target as i8;
            }
        }
        match store.get_u32(config::KEY_BINDING_TIMEOUT_MS) {
            Ok(ms) if ms > 0 => cfg.binding_timeout_ms = ms,
            _ => {}
        }
        cfg
    }

    /// Pushes every field back into `store`; the caller saves.
    pub fn store<S: embedded_storage::Storage>(&self, store: &mut ConfigStore<S>) -> Result<()> {
        store.set_u8(config::KEY_WORK_MODE, self.work_mode.raw())?;
        store.set_blob(config::KEY_TOUCH_DEVICES, &self.devices)?;
        store.set_blob(config::KEY_AREA_CHANNEL_MAPPINGS, &self.mappings)?;
        store.set_blob(config::KEY_PHYSICAL_KEYBOARDS, &self.physical_keyboards)?;
        store.set_blob(config::KEY_LOGICAL_KEYS, &self.logical_keys)?;
        store.set_bool(config::KEY_TOUCH_KEYBOARD_ENABLED, self.touch_keyboard_enabled)?;
        store.set_u8(config::KEY_TOUCH_KEYBOARD_MODE, keyboard_mode_raw(self.touch_keyboard_mode))?;
        store.set_blob(config::KEY_TOUCH_KEYBOARD_RULES, &self.touch_keyboard_rules)?;
        store.set_u8(config::KEY_TOUCH_RESPONSE_DELAY, self.touch_response_delay_ms)?;
        store.set_u32(config::KEY_MAI2_BAUD_RATE, self.mai2_baud_rate)?;
        store.set_u8(
            config::KEY_CALIBRATION_SENSITIVITY,
            (self.calibration_target + CALIBRATION_BIAS) as u8,
        )?;
        store.set_u32(config::KEY_BINDING_TIMEOUT_MS, self.binding_timeout_ms)
    }

    /// Range checks for values that arrive from the UI.
    pub fn validate(&self) -> Result<()> {
        if self.touch_response_delay_ms > MAX_TOUCH_RESPONSE_DELAY_MS
            || !MAI2_BAUD_RATES.contains(&self.mai2_baud_rate)
            || !(CALIBRATION_TARGET_MIN..=CALIBRATION_TARGET_MAX).contains(&self.calibration_target)
        {
            return Err(Error::OutOfRange);
        }
        if self.binding_timeout_ms == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// What the report core needs to know; sent whenever it changes.
    pub fn report_config(&self) -> ReportConfig {
        let mut keymap = Vec::new();
        for k in self.mappings.keyboard() {
            // capacities match, so this never drops anything
            let _ = keymap.push(k.key);
        }
        ReportConfig {
            work_mode: self.work_mode,
            touch_keyboard_enabled: self.touch_keyboard_enabled,
            touch_keyboard_mode: self.touch_keyboard_mode,
            rules: self.touch_keyboard_rules.clone(),
            physical_keyboards: self.physical_keyboards.clone(),
            logical_keys: self.logical_keys.clone(),
            hid_points: *self.mappings.hid_slots(),
            keymap,
        }
    }
}

/// Snapshot of the settings the HID / keyboard loop works from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportConfig {
    pub work_mode: WorkMode,
    pub touch_keyboard_enabled: bool,
    pub touch_keyboard_mode: TouchKeyboardMode,
    pub rules: Vec<TouchKeyboardRule, MAX_TOUCH_KEYBOARD_RULES>,
    pub physical_keyboards: Vec<PhysicalKeyboardMapping, MAX_GPIO_KEYS>,
    pub logical_keys: Vec<LogicalKeyMapping, MAX_GPIO_KEYS>,
    pub hid_points: [Option<HidMapping>; HID_SLOTS],
    /// Key of each touch keymap entry, indexed like the published bitmap.
    pub keymap: Vec<HidKey, MAX_TOUCH_KEYMAP>,
}

fn blob<T: Serialize>(value: &T) -> Result<ConfigValue> {
    serde_json::to_value(value)
        .map(ConfigValue::Blob)
        .map_err(|_| Error::Serialize)
}

fn load_blob<S: embedded_storage::Storage, T: DeserializeOwned>(store: &ConfigStore<S>, key: &'static str) -> Option<T> {
    match store.get_blob(key) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("config: {=str} unreadable: {}", key, e);
            None
        }
    }
}
