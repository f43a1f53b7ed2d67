//! The scan side of the Input Core.
//!
//! [`InputManager`] owns every registered sensor, the mapping tables, the
//! Mai2 Serial adapter and the interactive flows (binding, sensitivity
//! sweeps, sensor calibration). The scan loop calls [`InputManager::scan_pass`]
//! as fast as it can; each pass samples, resolves, emits and publishes a
//! [`TouchSnapshot`] for the report loop ([`report::ReportLoop`]) on the
//! other core.

pub mod config;
pub mod report;
#[cfg(test)]
mod tests;

use alloc::boxed::Box;
use core::sync::atomic::Ordering;

use heapless::Vec;

pub use self::config::{
    InputConfig,
    ReportConfig,
    WorkMode,
};
use crate::{
    Error,
    Result,
    address::ChannelAddress,
    area::Area,
    binding::{
        BindingCallback,
        BindingEvent,
        BindingFailure,
        BindingMode,
        BindingState,
        SerialBinding,
    },
    calibration::{
        AdjustAction,
        AdjustOutcome,
        AutoAdjust,
        CalibrationOutcome,
        CalibrationRequest,
        CalibrationTracker,
        CalibrationZone,
        average_progress,
    },
    config::ConfigStore,
    consts::{
        AUTO_ADJUST_STABILIZE_MS,
        AUTO_ADJUST_TIMEOUT_MS,
        CALIBRATION_TIMEOUT_MS,
        DELAY_BUFFER_SIZE,
        DISCONNECT_THRESHOLD,
        HID_SLOTS,
        MAINTENANCE_INTERVAL,
        MAX_TOUCH_DEVICES,
        MAX_TOUCH_KEYMAP,
    },
    delay::DelayBuffer,
    gpio::{
        GpioId,
        PhysicalKeyboardMapping,
    },
    handoff::{
        SharedStatus,
        SnapshotSlot,
        TouchSnapshot,
    },
    hid::keycode::HidKey,
    mapping::{
        AreaChannelMappings,
        Families,
        TouchDeviceMapping,
    },
    rate::RateCounter,
    sensor::TouchSensor,
    serial::{
        Mai2Serial,
        SerialPort,
        Status,
    },
    state::{
        SerialState,
        TouchDeviceState,
    },
    touch_keyboard::{
        TouchKeyboardMode,
        TouchKeyboardRule,
    },
};

/// Final word of a sensitivity sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdjustResult {
    pub device_mask: u8,
    pub channel: u8,
    pub value: i8,
    pub outcome: AdjustOutcome,
}

pub type AdjustCallback = Box<dyn FnMut(AdjustResult)>;

struct SensorSlot {
    driver: Box<dyn TouchSensor>,
    mask: u8,
    channel_bits: u32,
    failures: u8,
    connected: bool,
}

/// What binding overwrote, put back if the run does not finish.
struct BindingBackup {
    mappings: AreaChannelMappings,
    enabled: Vec<(u8, u32), MAX_TOUCH_DEVICES>,
}

pub struct InputManager<P> {
    config: InputConfig,
    sensors: Vec<SensorSlot, MAX_TOUCH_DEVICES>,
    /// Parallel to `sensors`.
    states: Vec<TouchDeviceState, MAX_TOUCH_DEVICES>,
    serial: Mai2Serial<P>,
    delay: DelayBuffer,
    binding: SerialBinding,
    binding_cb: Option<BindingCallback>,
    binding_backup: Option<BindingBackup>,
    adjust: Option<AutoAdjust>,
    adjust_request: Option<(u8, u8)>,
    adjust_cb: Option<AdjustCallback>,
    last_adjust: Option<AdjustResult>,
    calibration: CalibrationTracker,
    calibration_request: Option<CalibrationRequest>,
    cancel_requested: bool,
    report_dirty: bool,
    sample_rate: RateCounter,
    passes: u32,
    last_serial: SerialState,
}

impl<P: SerialPort> InputManager<P> {
    /// Brings the Serial adapter up with the configured baud rate and delay.
    pub fn new(port: P, config: InputConfig) -> Result<Self> {
        config.validate()?;
        let mut serial = Mai2Serial::new(port);
        serial.init(config.mai2_baud_rate)?;
        let mut delay = DelayBuffer::new();
        delay.set_delay(config.touch_response_delay_ms)?;
        let mut config = config;
        config.devices.iter_mut().for_each(|d| d.connected = false);
        Ok(Self {
            config,
            sensors: Vec::new(),
            states: Vec::new(),
            serial,
            delay,
            binding: SerialBinding::new(),
            binding_cb: None,
            binding_backup: None,
            adjust: None,
            adjust_request: None,
            adjust_cb: None,
            last_adjust: None,
            calibration: CalibrationTracker::default(),
            calibration_request: None,
            cancel_requested: false,
            report_dirty: true,
            sample_rate: RateCounter::new(),
            passes: 0,
            last_serial: SerialState::EMPTY,
        })
    }

    // ── Sensors ─────────────────────────────────────────────────────────────

    /// Takes ownership of a discovered sensor. A mapping saved under the same
    /// mask is picked up again so bindings survive reboots.
    pub fn register_sensor(&mut self, mut driver: Box<dyn TouchSensor>) -> Result<u8> {
        let mask = driver.module_mask();
        if mask == 0 {
            warn!("input: sensor with mask 0 rejected");
            return Err(Error::InvalidArgument);
        }
        if self.slot_index(mask).is_some() {
            warn!("input: mask {=u8:#x} already registered", mask);
            return Err(Error::DuplicateDevice);
        }
        if self.sensors.is_full() {
            return Err(Error::DeviceLimit);
        }

        if self.config.devices.find(mask).is_some() {
            debug!("input: restoring saved settings for {=u8:#x}", mask);
        } else {
            self.config.devices.insert(TouchDeviceMapping::new(
                mask,
                driver.supported_channels(),
                driver.sensitivity_mode(),
            ))?;
        }
        let mapping = self.config.devices.find_mut(mask).ok_or(Error::UnknownDevice)?;
        mapping.connected = true;
        mapping.adopt(driver.supported_channels(), driver.sensitivity_mode());
        for ch in 0..mapping.max_channels() {
            if let Some(value) = mapping.sensitivity(ch) {
                if let Err(e) = driver.set_channel_sensitivity(ch, value) {
                    warn!("input: {=u8:#x} ch{=u8} sensitivity not applied: {}", mask, ch, e);
                }
            }
        }
        let channel_bits = mapping.channel_bits();

        let slot = SensorSlot { driver, mask, channel_bits, failures: 0, connected: true };
        // capacity checked above; states mirrors sensors
        if self.sensors.push(slot).is_err() || self.states.push(TouchDeviceState::new(mask)).is_err() {
            return Err(Error::DeviceLimit);
        }
        info!("input: sensor {=u8:#x} registered", mask);
        self.apply_enabled_masks();
        Ok(mask)
    }

    /// Drops the driver; its settings and mappings stay.
    pub fn unregister_sensor(&mut self, mask: u8) -> Result<Box<dyn TouchSensor>> {
        let idx = self.slot_index(mask).ok_or(Error::UnknownDevice)?;
        let slot = self.sensors.remove(idx);
        self.states.remove(idx);
        if let Some(m) = self.config.devices.find_mut(mask) {
            m.connected = false;
        }
        if self.adjust.as_ref().is_some_and(|a| a.device_mask == mask) {
            self.adjust = None;
        }
        info!("input: sensor {=u8:#x} unregistered", mask);
        Ok(slot.driver)
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_connected(&self, mask: u8) -> bool {
        self.slot_index(mask).is_some_and(|i| self.sensors[i].connected)
    }

    pub fn device_states(&self) -> &[TouchDeviceState] {
        &self.states
    }

    fn slot_index(&self, mask: u8) -> Option<usize> {
        self.sensors.iter().position(|s| s.mask == mask)
    }

    /// Clamps to the sensor's range and applies it; recorded only once the
    /// sensor took it.
    pub fn set_sensitivity(&mut self, mask: u8, channel: u8, value: i16) -> Result<i8> {
        let mapping = self.config.devices.find(mask).ok_or(Error::UnknownDevice)?;
        if channel >= mapping.max_channels() {
            return Err(Error::InvalidArgument);
        }
        let applied = mapping.sensitivity_mode.clamp(value);
        if let Some(idx) = self.sensors.iter().position(|s| s.mask == mask && s.connected) {
            self.sensors[idx].driver.set_channel_sensitivity(channel, applied)?;
        }
        let mapping = self.config.devices.find_mut(mask).ok_or(Error::UnknownDevice)?;
        mapping.set_sensitivity(channel, i16::from(applied))
    }

    pub fn sensitivity(&self, mask: u8, channel: u8) -> Option<i8> {
        self.config.devices.find(mask)?.sensitivity(channel)
    }

    /// Same value on every enabled channel of every device.
    pub fn set_sensitivity_all(&mut self, value: i16) -> Result<()> {
        let mut targets: Vec<(u8, u32), MAX_TOUCH_DEVICES> = Vec::new();
        for d in self.config.devices.iter() {
            let _ = targets.push((d.device_mask, d.enabled_channels()));
        }
        for (mask, enabled) in targets {
            for ch in (0..24u8).filter(|ch| enabled & (1 << ch) != 0) {
                self.set_sensitivity(mask, ch, value)?;
            }
        }
        Ok(())
    }

    /// Sensitivity of the channel bound to a Serial region.
    pub fn set_serial_area_sensitivity(&mut self, area: Area, value: i16) -> Result<i8> {
        let addr = self.config.mappings.serial(area).ok_or(Error::InvalidArgument)?;
        self.set_sensitivity(addr.device_mask(), addr.channel(), value)
    }

    /// Sensitivity of the channel behind HID contact `slot`.
    pub fn set_hid_area_sensitivity(&mut self, slot: usize, value: i16) -> Result<i8> {
        if slot >= HID_SLOTS {
            return Err(Error::InvalidArgument);
        }
        let addr = self.config.mappings.hid(slot).ok_or(Error::InvalidArgument)?.address;
        self.set_sensitivity(addr.device_mask(), addr.channel(), value)
    }

    /// Sensitivity of every channel that types `key`.
    pub fn set_keyboard_sensitivity(&mut self, key: HidKey, value: i16) -> Result<()> {
        let mut targets: Vec<ChannelAddress, MAX_TOUCH_KEYMAP> = Vec::new();
        for m in self.config.mappings.keyboard().iter().filter(|m| m.key == key) {
            let _ = targets.push(m.address);
        }
        if targets.is_empty() {
            return Err(Error::InvalidArgument);
        }
        for addr in targets {
            self.set_sensitivity(addr.device_mask(), addr.channel(), value)?;
        }
        Ok(())
    }

    /// `(device_mask << 24) | channels` of every sensor flagging channels.
    pub fn collect_abnormal_channels(&mut self) -> Vec<u32, MAX_TOUCH_DEVICES> {
        let mut out = Vec::new();
        for slot in self.sensors.iter_mut() {
            if !slot.connected || !slot.driver.supports_calibration() {
                continue;
            }
            let bad = slot.driver.abnormal_channel_mask() & slot.channel_bits;
            if bad != 0 {
                let _ = out.push((u32::from(slot.mask) << 24) | bad);
            }
        }
        out
    }

    // ── Mappings ────────────────────────────────────────────────────────────

    fn check_address(&self, addr: ChannelAddress) -> Result<()> {
        let device = self.config.devices.find(addr.device_mask()).ok_or(Error::UnknownDevice)?;
        if addr.channel() >= device.max_channels() {
            return Err(Error::InvalidAddress);
        }
        Ok(())
    }

    fn check_editable(&self) -> Result<()> {
        if self.binding.is_active() { Err(Error::Busy) } else { Ok(()) }
    }

    fn mappings_changed(&mut self) {
        self.apply_enabled_masks();
        self.report_dirty = true;
    }

    pub fn set_serial_mapping(&mut self, area: Area, addr: ChannelAddress) -> Result<()> {
        self.check_editable()?;
        self.check_address(addr)?;
        self.config.mappings.set_serial(area, addr);
        self.mappings_changed();
        Ok(())
    }

    pub fn clear_serial_mapping(&mut self, area: Area) -> Result<()> {
        self.check_editable()?;
        self.config.mappings.clear_serial(area);
        self.mappings_changed();
        Ok(())
    }

    pub fn set_hid_mapping(&mut self, slot: usize, addr: ChannelAddress, x: u16, y: u16) -> Result<()> {
        self.check_editable()?;
        self.check_address(addr)?;
        self.config.mappings.set_hid(slot, addr, x, y)?;
        self.mappings_changed();
        Ok(())
    }

    pub fn clear_hid_mapping(&mut self, slot: usize) -> Result<()> {
        self.check_editable()?;
        if slot >= HID_SLOTS {
            return Err(Error::InvalidArgument);
        }
        self.config.mappings.clear_hid(slot);
        self.mappings_changed();
        Ok(())
    }

    pub fn set_keyboard_mapping(&mut self, addr: ChannelAddress, key: HidKey) -> Result<()> {
        self.check_editable()?;
        self.check_address(addr)?;
        self.config.mappings.set_key(addr, key)?;
        self.mappings_changed();
        Ok(())
    }

    pub fn clear_keyboard_mapping(&mut self, addr: ChannelAddress) -> Result<()> {
        self.check_editable()?;
        self.config.mappings.clear_key(addr);
        self.mappings_changed();
        Ok(())
    }

    pub fn clear_all_mappings(&mut self) -> Result<()> {
        self.check_editable()?;
        self.config.mappings.clear_all();
        self.mappings_changed();
        Ok(())
    }

    pub fn mappings(&self) -> &AreaChannelMappings {
        &self.config.mappings
    }

    /// Mapping families whose channels must be scanned in the current mode.
    fn active_families(&self) -> Families {
        let touch_keys = self.config.touch_keyboard_enabled && self.config.touch_keyboard_mode.touch_keys();
        match self.config.work_mode {
            WorkMode::Serial => Families { serial: true, hid: false, keyboard: touch_keys },
            // rules look at region bits, so Serial channels stay on for them
            WorkMode::Hid => Families { serial: touch_keys, hid: true, keyboard: touch_keys },
        }
    }

    /// Turns off every channel nothing listens to. Left alone while a
    /// binding or sweep needs the channels on.
    pub fn apply_enabled_masks(&mut self) {
        if self.binding.is_active() || self.adjust.is_some() {
            return;
        }
        let families = self.active_families();
        for slot in self.sensors.iter_mut() {
            let mapped = self.config.mappings.mapped_channels(slot.mask, families);
            let Some(device) = self.config.devices.find_mut(slot.mask) else {
                continue;
            };
            let mask = device.set_enabled_channels(mapped);
            if let Err(e) = slot.driver.set_enabled_channel_mask(mask) {
                warn!("input: {=u8:#x} enable mask not applied: {}", slot.mask, e);
            }
        }
    }

    // ── Settings ────────────────────────────────────────────────────────────

    pub const fn work_mode(&self) -> WorkMode {
        self.config.work_mode
    }

    pub fn set_work_mode(&mut self, mode: WorkMode) {
        if mode == self.config.work_mode {
            return;
        }
        info!("input: work mode {}", mode);
        self.config.work_mode = mode;
        if mode == WorkMode::Hid && self.binding.is_active() {
            self.abort_binding(BindingFailure::WrongMode);
        }
        self.mappings_changed();
    }

    pub fn set_touch_response_delay(&mut self, delay_ms: u8) -> Result<()> {
        self.delay.set_delay(delay_ms)?;
        self.config.touch_response_delay_ms = delay_ms;
        Ok(())
    }

    pub fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.serial.set_baud_rate(baud)?;
        self.config.mai2_baud_rate = baud;
        Ok(())
    }

    pub fn set_touch_keyboard(&mut self, enabled: bool, mode: TouchKeyboardMode) {
        self.config.touch_keyboard_enabled = enabled;
        self.config.touch_keyboard_mode = mode;
        self.mappings_changed();
    }

    pub fn set_touch_keyboard_rules(&mut self, rules: &[TouchKeyboardRule]) -> Result<()> {
        self.config.touch_keyboard_rules = Vec::from_slice(rules).map_err(|_| Error::DeviceLimit)?;
        self.report_dirty = true;
        Ok(())
    }

    pub fn add_physical_keyboard(&mut self, gpio: GpioId, default_key: HidKey) -> Result<()> {
        if gpio.is_none() {
            return Err(Error::InvalidArgument);
        }
        let list = &mut self.config.physical_keyboards;
        match list.iter_mut().find(|p| p.gpio == gpio) {
            Some(existing) => existing.default_key = default_key,
            None => list
                .push(PhysicalKeyboardMapping { gpio, default_key })
                .map_err(|_| Error::DeviceLimit)?,
        }
        self.report_dirty = true;
        Ok(())
    }

    /// Up to three keys sent together for one button; replaces its default.
    pub fn set_logical_key(&mut self, gpio: GpioId, keys: &[HidKey]) -> Result<()> {
        let mut keyboard = crate::gpio::GpioKeyboard::new(&[], &self.config.logical_keys)?;
        keyboard.set_logical(gpio, keys)?;
        self.config.logical_keys = Vec::from_slice(keyboard.logical()).map_err(|_| Error::DeviceLimit)?;
        self.report_dirty = true;
        Ok(())
    }

    pub fn clear_logical_key(&mut self, gpio: GpioId) {
        self.config.logical_keys.retain(|l| l.gpio != gpio);
        self.report_dirty = true;
    }

    /// Takes one key out of a button's combo; the mapping goes once empty.
    pub fn remove_logical_key(&mut self, gpio: GpioId, key: HidKey) -> bool {
        let Some(idx) = self.config.logical_keys.iter().position(|l| l.gpio == gpio) else {
            return false;
        };
        let mapping = &mut self.config.logical_keys[idx];
        let Some(pos) = mapping.keys.iter().position(|k| *k == key && !k.is_none()) else {
            return false;
        };
        mapping.keys[pos..].rotate_left(1);
        if let Some(last) = mapping.keys.last_mut() {
            *last = HidKey::NONE;
        }
        if mapping.keys.iter().all(|k| k.is_none()) {
            self.config.logical_keys.remove(idx);
        }
        self.report_dirty = true;
        true
    }

    pub fn remove_physical_keyboard(&mut self, gpio: GpioId) -> bool {
        let before = self.config.physical_keyboards.len();
        self.config.physical_keyboards.retain(|p| p.gpio != gpio);
        let removed = self.config.physical_keyboards.len() != before;
        if removed {
            self.report_dirty = true;
        }
        removed
    }

    pub fn clear_physical_keyboards(&mut self) {
        self.config.physical_keyboards.clear();
        self.report_dirty = true;
    }

    /// Copy of the live configuration, for edit-and-write-back.
    pub fn config_copy(&self) -> InputConfig {
        self.config.clone()
    }

    /// Validates and applies an edited copy. Nothing changes on error.
    pub fn write_config(&mut self, mut cfg: InputConfig) -> Result<()> {
        cfg.validate()?;
        if cfg.mappings != self.config.mappings {
            self.check_editable()?;
        }
        self.normalize_devices(&mut cfg)?;
        if cfg.mai2_baud_rate != self.serial.baud_rate() {
            self.serial.set_baud_rate(cfg.mai2_baud_rate)?;
        }
        if cfg.touch_response_delay_ms != self.delay.delay_ms() {
            self.delay.set_delay(cfg.touch_response_delay_ms)?;
        }
        for slot in self.sensors.iter_mut() {
            let (Some(new), Some(old)) = (cfg.devices.find(slot.mask), self.config.devices.find(slot.mask)) else {
                continue;
            };
            for ch in 0..new.max_channels() {
                match (new.sensitivity(ch), old.sensitivity(ch)) {
                    (Some(v), Some(was)) if v != was => {
                        if let Err(e) = slot.driver.set_channel_sensitivity(ch, v) {
                            warn!("input: {=u8:#x} ch{=u8} sensitivity not applied: {}", slot.mask, ch, e);
                        }
                    }
                    _ => {}
                }
            }
        }
        let mode_changed = cfg.work_mode != self.config.work_mode;
        let new_mode = cfg.work_mode;
        cfg.work_mode = self.config.work_mode;
        self.config = cfg;
        if mode_changed {
            self.set_work_mode(new_mode);
        } else {
            self.mappings_changed();
        }
        Ok(())
    }

    /// Brings an edited device list back in line with what is actually
    /// registered. Runtime flags, channel counts and modes come from the
    /// live sensors; entries cannot be invented.
    fn normalize_devices(&self, cfg: &mut InputConfig) -> Result<()> {
        for d in cfg.devices.iter_mut() {
            if self.config.devices.find(d.device_mask).is_none() {
                warn!("input: config names unknown device {=u8:#x}", d.device_mask);
                return Err(Error::UnknownDevice);
            }
            match self.slot_index(d.device_mask) {
                Some(i) => {
                    let slot = &self.sensors[i];
                    d.adopt(slot.driver.supported_channels(), slot.driver.sensitivity_mode());
                    d.connected = slot.connected;
                }
                None => {
                    let old = self.config.devices.find(d.device_mask).ok_or(Error::UnknownDevice)?;
                    d.adopt(old.max_channels(), old.sensitivity_mode);
                    d.connected = false;
                }
            }
        }
        for slot in self.sensors.iter() {
            if cfg.devices.find(slot.mask).is_none() {
                let live = self.config.devices.find(slot.mask).ok_or(Error::UnknownDevice)?;
                cfg.devices.insert(live.clone())?;
            }
        }
        Ok(())
    }

    /// Writes the configuration into `store` and saves it.
    pub fn save_config<S: embedded_storage::Storage>(&self, store: &mut ConfigStore<S>) -> Result<()> {
        self.config.store(store)?;
        store.save()
    }

    /// The report loop's settings, once after every change.
    pub fn take_report_config(&mut self) -> Option<ReportConfig> {
        if !self.report_dirty {
            return None;
        }
        self.report_dirty = false;
        Some(self.config.report_config())
    }

    // ── Serial ──────────────────────────────────────────────────────────────

    pub fn serial(&self) -> &Mai2Serial<P> {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut Mai2Serial<P> {
        &mut self.serial
    }

    /// Serial word sent (or due) on the last pass, after the delay.
    pub const fn last_serial_state(&self) -> SerialState {
        self.last_serial
    }

    // ── Binding ─────────────────────────────────────────────────────────────

    /// Region-by-region binding driven from the device UI.
    pub fn start_serial_binding(&mut self, cb: BindingCallback) -> Result<()> {
        self.start_binding(BindingMode::Manual, Some(cb))
    }

    /// Binding where each target region is also asserted on the Serial link.
    pub fn start_auto_serial_binding(&mut self, cb: Option<BindingCallback>) -> Result<()> {
        self.start_binding(BindingMode::Auto, cb)
    }

    fn start_binding(&mut self, mode: BindingMode, cb: Option<BindingCallback>) -> Result<()> {
        if self.config.work_mode != WorkMode::Serial {
            return Err(Error::MappingConflict);
        }
        if self.adjust.is_some() || self.adjust_request.is_some() {
            return Err(Error::Busy);
        }
        self.binding.start(mode, self.config.binding_timeout_ms)?;
        let mut enabled = Vec::new();
        for d in self.config.devices.iter() {
            let _ = enabled.push((d.device_mask, d.enabled_channels()));
        }
        self.binding_backup = Some(BindingBackup { mappings: self.config.mappings.clone(), enabled });
        for slot in self.sensors.iter_mut() {
            if let Err(e) = slot.driver.set_enabled_channel_mask(slot.channel_bits) {
                warn!("input: {=u8:#x} enable mask not applied: {}", slot.mask, e);
            }
        }
        self.binding_cb = cb;
        self.cancel_requested = false;
        info!("input: binding started ({})", mode);
        Ok(())
    }

    /// Serviced at the top of the next scan pass.
    pub fn request_cancel_binding(&mut self) {
        self.cancel_requested = true;
    }

    pub fn binding_state(&self) -> BindingState {
        self.binding.state()
    }

    pub fn binding_area(&self) -> Option<Area> {
        self.binding.current_area()
    }

    /// Keeps a finished binding: persists it and narrows the enabled masks
    /// back down.
    pub fn confirm_serial_binding<S: embedded_storage::Storage>(&mut self, store: &mut ConfigStore<S>) -> Result<()> {
        if self.binding.state() != BindingState::Done {
            return Err(Error::InvalidArgument);
        }
        self.binding.stop();
        self.binding_backup = None;
        self.binding_cb = None;
        self.serial.clear_manual_trigger();
        self.mappings_changed();
        info!("input: binding confirmed");
        self.save_config(store)
    }

    fn abort_binding(&mut self, reason: BindingFailure) {
        if !self.binding.stop() {
            return;
        }
        warn!("input: binding aborted ({})", reason);
        self.restore_binding_backup();
        self.serial.clear_manual_trigger();
        if let Some(mut cb) = self.binding_cb.take() {
            cb(BindingEvent::Failed(reason));
        }
    }

    fn restore_binding_backup(&mut self) {
        let Some(backup) = self.binding_backup.take() else {
            return;
        };
        self.config.mappings = backup.mappings;
        for (mask, enabled) in backup.enabled {
            let Some(device) = self.config.devices.find_mut(mask) else {
                continue;
            };
            let enabled = device.set_enabled_channels(enabled);
            if let Some(slot) = self.sensors.iter_mut().find(|s| s.mask == mask) {
                if let Err(e) = slot.driver.set_enabled_channel_mask(enabled) {
                    warn!("input: {=u8:#x} enable mask not applied: {}", mask, e);
                }
            }
        }
        self.report_dirty = true;
    }

    fn step_binding(&mut self, now_us: u64) {
        if !self.binding.is_active() {
            return;
        }
        let mut events: Vec<BindingEvent, 4> = Vec::new();
        self.binding.step(&self.states, &mut self.config.mappings, now_us, &mut |e| {
            let _ = events.push(e);
        });
        for event in events {
            let auto = self.binding.mode() == BindingMode::Auto;
            match event {
                BindingEvent::Target(area) if auto => self.serial.manually_trigger_area(area),
                BindingEvent::Completed => self.serial.clear_manual_trigger(),
                BindingEvent::Failed(_) => {
                    self.restore_binding_backup();
                    self.serial.clear_manual_trigger();
                }
                _ => {}
            }
            if let Some(cb) = self.binding_cb.as_mut() {
                cb(event);
            }
            if matches!(event, BindingEvent::Failed(_)) {
                self.binding_cb = None;
            }
        }
    }

    // ── Sensitivity sweep ───────────────────────────────────────────────────

    /// Sweeps one channel's sensitivity while the user holds a finger on
    /// it. Starts on the next pass; the result goes to `cb`.
    pub fn auto_adjust_sensitivity(&mut self, mask: u8, channel: u8, cb: Option<AdjustCallback>) -> Result<()> {
        if self.binding.is_active() || self.adjust.is_some() || self.adjust_request.is_some() {
            return Err(Error::Busy);
        }
        if !self.is_connected(mask) {
            return Err(Error::UnknownDevice);
        }
        let device = self.config.devices.find(mask).ok_or(Error::UnknownDevice)?;
        if channel >= device.max_channels() {
            return Err(Error::InvalidArgument);
        }
        self.adjust_request = Some((mask, channel));
        self.adjust_cb = cb;
        Ok(())
    }

    pub fn is_adjusting(&self) -> bool {
        self.adjust.is_some() || self.adjust_request.is_some()
    }

    pub const fn last_adjust(&self) -> Option<AdjustResult> {
        self.last_adjust
    }

    fn begin_adjust(&mut self, mask: u8, channel: u8, now_us: u64) {
        let Some(device) = self.config.devices.find(mask) else {
            return;
        };
        let original = device.sensitivity(channel).unwrap_or(device.sensitivity_mode.default_value());
        let mode = device.sensitivity_mode;
        let enabled = device.enabled_channels();
        let Some(idx) = self.slot_index(mask) else {
            return;
        };
        if let Err(e) = self.sensors[idx].driver.set_enabled_channel_mask(enabled | 1 << channel) {
            warn!("input: {=u8:#x} enable mask not applied: {}", mask, e);
        }
        info!("input: sweeping {=u8:#x} ch{=u8} from {=i8}", mask, channel, original);
        self.adjust = Some(AutoAdjust::new(
            mask,
            channel,
            mode,
            original,
            AUTO_ADJUST_STABILIZE_MS,
            AUTO_ADJUST_TIMEOUT_MS,
            now_us,
        ));
    }

    fn step_adjust(&mut self, now_us: u64, cancel: bool) {
        let Some((mask, channel)) = self.adjust.as_ref().map(|a| (a.device_mask, a.channel)) else {
            return;
        };
        let Some(idx) = self.slot_index(mask) else {
            self.adjust = None;
            return;
        };
        let touched = self.states[idx].channels() & (1 << channel) != 0;
        let action = match self.adjust.as_mut() {
            Some(a) if cancel => a.cancel(),
            Some(a) => a.step(touched, now_us),
            None => return,
        };
        match action {
            AdjustAction::Wait => {}
            AdjustAction::Apply(value) => {
                if let Err(e) = self.sensors[idx].driver.set_channel_sensitivity(channel, value) {
                    warn!("input: sweep write failed: {}", e);
                }
            }
            AdjustAction::Finish { value, outcome } => {
                self.adjust = None;
                let stored = self
                    .config
                    .devices
                    .find_mut(mask)
                    .and_then(|d| d.set_sensitivity(channel, i16::from(value)).ok())
                    .unwrap_or(value);
                if let Err(e) = self.sensors[idx].driver.set_channel_sensitivity(channel, stored) {
                    warn!("input: sweep write failed: {}", e);
                }
                info!("input: sweep {=u8:#x} ch{=u8} -> {=i8} ({})", mask, channel, stored, outcome);
                let result = AdjustResult { device_mask: mask, channel, value: stored, outcome };
                self.last_adjust = Some(result);
                if let Some(mut cb) = self.adjust_cb.take() {
                    cb(result);
                }
                self.apply_enabled_masks();
            }
        }
    }

    // ── Sensor calibration ──────────────────────────────────────────────────

    /// Every sensor that supports it calibrates toward the configured target.
    pub fn calibrate_all(&mut self) -> Result<()> {
        let request = CalibrationRequest::all(self.config.calibration_target)?;
        self.request_calibration(request)
    }

    /// Only the listed channels calibrate.
    pub fn calibrate_zones(&mut self, zones: &[CalibrationZone]) -> Result<()> {
        let request = CalibrationRequest::zones(zones, self.config.calibration_target)?;
        self.request_calibration(request)
    }

    fn request_calibration(&mut self, request: CalibrationRequest) -> Result<()> {
        if self.binding.is_active()
            || self.is_adjusting()
            || self.calibration.is_running()
            || self.calibration_request.is_some()
        {
            return Err(Error::Busy);
        }
        if !self.sensors.iter().any(|s| s.connected && s.driver.supports_calibration()) {
            return Err(Error::NotSupported);
        }
        self.calibration_request = Some(request);
        Ok(())
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_running() || self.calibration_request.is_some()
    }

    /// Mean progress of the calibrating sensors, 255 when done.
    pub fn calibration_progress(&self) -> u8 {
        if !self.is_calibrating() {
            return u8::MAX;
        }
        average_progress(
            self.sensors
                .iter()
                .filter(|s| s.connected && s.driver.supports_calibration())
                .map(|s| s.driver.calibration_progress()),
        )
    }

    fn begin_calibration(&mut self, request: CalibrationRequest, now_us: u64) {
        let target = request.target();
        let mut started = 0u8;
        for slot in self.sensors.iter_mut() {
            if !slot.connected || !slot.driver.supports_calibration() {
                continue;
            }
            let result = match request.bitmap_for(slot.mask) {
                None => continue,
                Some(None) => slot.driver.start_auto_calibration(target),
                Some(Some(bitmap)) => slot
                    .driver
                    .set_calibration_target_by_bitmap(bitmap & slot.channel_bits, target)
                    .and_then(|()| slot.driver.start_auto_calibration(target)),
            };
            match result {
                Ok(()) => started += 1,
                Err(e) => warn!("input: {=u8:#x} calibration not started: {}", slot.mask, e),
            }
        }
        if started == 0 {
            warn!("input: no sensor started calibrating");
            return;
        }
        info!("input: calibrating {=u8} sensor(s) toward {=i8}", started, target);
        self.calibration.begin(now_us, CALIBRATION_TIMEOUT_MS);
    }

    fn poll_calibration(&mut self, now_us: u64) {
        if !self.calibration.is_running() {
            return;
        }
        let active = self.sensors.iter().any(|s| s.connected && s.driver.is_calibration_active());
        match self.calibration.poll(active, now_us) {
            Some(CalibrationOutcome::Finished) => {
                info!("input: calibration finished");
                self.read_back_sensitivities();
            }
            Some(CalibrationOutcome::TimedOut) => warn!("input: calibration timed out"),
            None => {}
        }
    }

    /// Calibration moves thresholds inside the ICs; mirror them.
    fn read_back_sensitivities(&mut self) {
        for slot in self.sensors.iter_mut() {
            if !slot.connected || !slot.driver.supports_calibration() {
                continue;
            }
            let Some(device) = self.config.devices.find_mut(slot.mask) else {
                continue;
            };
            for ch in 0..device.max_channels() {
                if let Ok(v) = slot.driver.channel_sensitivity(ch) {
                    let _ = device.set_sensitivity(ch, i16::from(v));
                }
            }
        }
    }

    // ── Scan loop ───────────────────────────────────────────────────────────

    /// One scan pass. Never blocks.
    pub fn scan_pass(&mut self, now_us: u64, out: &SnapshotSlot) {
        self.service_requests(now_us);
        self.sample_all(now_us);

        let serial = self.config.mappings.resolve_serial(&self.states);
        let hid_points = self.config.mappings.resolve_hid(&self.states);
        let touch_keys = self.config.mappings.resolve_keys(&self.states);

        self.step_binding(now_us);
        self.step_adjust(now_us, false);
        self.poll_calibration(now_us);

        let delayed = self.delay.process(serial, now_us);
        self.last_serial = delayed;
        let manual_binding = self.binding.is_active() && self.binding.mode() == BindingMode::Manual;
        if self.config.work_mode == WorkMode::Serial && !manual_binding {
            self.serial.send_touch_state(delayed);
        }
        self.serial.process_commands();

        out.publish(&TouchSnapshot {
            serial: delayed,
            hid_points,
            touch_keys,
            timestamp_us: now_us as u32,
        });

        self.passes = self.passes.wrapping_add(1);
        if self.passes % MAINTENANCE_INTERVAL == 0 {
            self.maintenance(now_us);
        }
    }

    fn service_requests(&mut self, now_us: u64) {
        if core::mem::take(&mut self.cancel_requested) {
            if self.binding.is_active() {
                self.abort_binding(BindingFailure::Cancelled);
            }
            if self.adjust.is_some() {
                self.step_adjust(now_us, true);
            }
            if let Some((mask, channel)) = self.adjust_request.take() {
                debug!("input: sweep of {=u8:#x} ch{=u8} dropped", mask, channel);
            }
        }
        if let Some((mask, channel)) = self.adjust_request.take() {
            self.begin_adjust(mask, channel, now_us);
        }
        if let Some(request) = self.calibration_request.take() {
            self.begin_calibration(request, now_us);
        }
    }

    fn sample_all(&mut self, now_us: u64) {
        for (slot, state) in self.sensors.iter_mut().zip(self.states.iter_mut()) {
            match slot.driver.sample() {
                Ok(bits) => {
                    if !slot.connected {
                        info!("input: sensor {=u8:#x} back", slot.mask);
                        slot.connected = true;
                        if let Some(d) = self.config.devices.find_mut(slot.mask) {
                            d.connected = true;
                        }
                    }
                    slot.failures = 0;
                    state.update(bits & slot.channel_bits, now_us);
                }
                Err(e) => {
                    slot.failures = slot.failures.saturating_add(1);
                    if slot.connected && slot.failures >= DISCONNECT_THRESHOLD {
                        warn!("input: sensor {=u8:#x} disconnected: {}", slot.mask, e);
                        slot.connected = false;
                        if let Some(d) = self.config.devices.find_mut(slot.mask) {
                            d.connected = false;
                        }
                        state.update(0, now_us);
                    } else {
                        trace!("input: sensor {=u8:#x} sample failed: {}", slot.mask, e);
                    }
                }
            }
        }
    }

    fn maintenance(&mut self, now_us: u64) {
        if let Some(rate) = self.sample_rate.add(MAINTENANCE_INTERVAL, now_us) {
            debug!(
                "input: {=u32} scans/s, {=u32} frames sent, {=u32} dropped",
                rate,
                self.serial.frames_sent(),
                self.serial.frames_dropped()
            );
            let window = u64::from(rate) * u64::from(self.delay.delay_ms());
            if window > DELAY_BUFFER_SIZE as u64 * 1000 {
                warn!(
                    "input: {=u8} ms delay at {=u32} scans/s overruns the delay ring",
                    self.delay.delay_ms(),
                    rate
                );
            }
        }
    }

    /// Scan passes per second over the last full window.
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate.rate()
    }

    /// Copies the diagnostics the status display shows.
    pub fn publish_status(&self, status: &SharedStatus) {
        let mut flags = 0;
        if self.config.work_mode == WorkMode::Hid {
            flags |= SharedStatus::FLAG_HID_MODE;
        }
        if self.serial.status() == Status::Running {
            flags |= SharedStatus::FLAG_SERIAL_RUNNING;
        }
        if self.binding.is_active() {
            flags |= SharedStatus::FLAG_BINDING;
        }
        if self.is_calibrating() || self.is_adjusting() {
            flags |= SharedStatus::FLAG_CALIBRATING;
        }
        status.flags.store(flags, Ordering::Relaxed);
        status.sample_rate.store(self.sample_rate.rate(), Ordering::Relaxed);
        status.serial_frames.store(self.serial.frames_sent(), Ordering::Relaxed);
        let area = self.binding.current_area().map_or(0, |a| u32::from(a.index()));
        status.binding_area.store(area, Ordering::Relaxed);
        let connected = self.sensors.iter().filter(|s| s.connected).count() as u32;
        status.connected_sensors.store(connected, Ordering::Relaxed);
    }
}
