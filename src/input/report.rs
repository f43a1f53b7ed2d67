//! The report side: HID touch and keyboard output.
//!
//! Runs on the second core. Each poll reads the latest [`TouchSnapshot`],
//! samples the buttons and sends whatever changed.

use super::{
    ReportConfig,
    WorkMode,
};
use crate::{
    gpio::{
        GpioKeyboard,
        GpioSource,
    },
    handoff::SnapshotSlot,
    hid::{
        HidAdapter,
        HidSink,
        report::KeySet,
    },
    touch_keyboard::TouchKeyboard,
};

pub struct ReportLoop<H, G> {
    hid: HidAdapter<H>,
    gpio: G,
    config: ReportConfig,
    buttons: GpioKeyboard,
    touch_keys: TouchKeyboard,
}

impl<H: HidSink, G: GpioSource> ReportLoop<H, G> {
    pub fn new(sink: H, gpio: G, config: ReportConfig) -> Self {
        let mut this = Self {
            hid: HidAdapter::new(sink),
            gpio,
            config: ReportConfig::default(),
            buttons: GpioKeyboard::default(),
            touch_keys: TouchKeyboard::default(),
        };
        this.apply_config(config, 0);
        this
    }

    /// Takes new settings from the scan side. Leaving HID mode lifts every
    /// contact still down.
    pub fn apply_config(&mut self, config: ReportConfig, now_us: u64) {
        if self.config.work_mode == WorkMode::Hid && config.work_mode != WorkMode::Hid {
            self.hid.release_all(now_us);
        }
        match GpioKeyboard::new(&config.physical_keyboards, &config.logical_keys) {
            Ok(buttons) => self.buttons = buttons,
            Err(e) => warn!("report: button map rejected: {}", e),
        }
        if config.rules != self.config.rules {
            if let Err(e) = self.touch_keys.set_rules(&config.rules) {
                warn!("report: touch rules rejected: {}", e);
            }
        }
        self.config = config;
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub fn hid(&self) -> &HidAdapter<H> {
        &self.hid
    }

    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }

    /// One report pass. Returns the report rate when a new window closes.
    pub fn poll(&mut self, slot: &SnapshotSlot, now_us: u64) -> Option<u32> {
        let snap = slot.load();
        let mut keys = KeySet::new();

        let enabled = self.config.touch_keyboard_enabled;
        let mode = self.config.touch_keyboard_mode;
        if !enabled || mode.gpio_keys() {
            let lines = self.gpio.snapshot();
            self.buttons.resolve(&lines, &mut keys);
        }
        if enabled && mode.touch_keys() {
            self.touch_keys.evaluate(snap.serial, now_us, &mut keys);
            for (i, key) in self.config.keymap.iter().enumerate() {
                if snap.touch_keys & (1 << i) != 0 {
                    keys.insert(*key);
                }
            }
        }

        if self.config.work_mode == WorkMode::Hid {
            self.hid.update_touch(snap.hid_points, &self.config.hid_points, now_us);
        }
        self.hid.update_keyboard(&keys, now_us);

        let rate = self.hid.tick(now_us);
        if let Some(r) = rate {
            trace!("report: {=u32} reports/s", r);
        }
        rate
    }
}
