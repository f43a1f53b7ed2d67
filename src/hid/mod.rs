//! USB HID output: a multi-touch digitizer plus three keyboards.
//!
//! [`HidAdapter`] turns per-pass touch and key state into reports and hands
//! them to a non-blocking [`HidSink`]. Nothing is sent when nothing changed.

pub mod descriptor;
pub mod keycode;
pub mod report;

use report::{
    KEYBOARD_REPORTS,
    KeySet,
    KeyboardReport,
    TouchReport,
};

use crate::{
    Result,
    consts::HID_SLOTS,
    mapping::HidMapping,
    rate::RateCounter,
};

pub const REPORT_ID_TOUCH: u8 = 0x01;
pub const REPORT_ID_KEYBOARD1: u8 = 0x02;
pub const REPORT_ID_KEYBOARD2: u8 = 0x03;
pub const REPORT_ID_KEYBOARD3: u8 = 0x04;

pub const KEYBOARD_REPORT_IDS: [u8; KEYBOARD_REPORTS] =
    [REPORT_ID_KEYBOARD1, REPORT_ID_KEYBOARD2, REPORT_ID_KEYBOARD3];

/// Upper bound of the digitizer's logical X/Y range.
pub const COORD_MAX: u16 = 32767;

/// Non-blocking report submission.
pub trait HidSink {
    /// Queues one report; `Err` when the endpoint cannot take it right now.
    fn try_send(&mut self, report_id: u8, payload: &[u8]) -> Result<()>;
}

pub struct HidAdapter<H> {
    sink: H,
    keyboards: [KeyboardReport; KEYBOARD_REPORTS],
    keys_held: bool,
    /// Slots whose press has been reported.
    contacts: u16,
    last_point: [(u16, u16); HID_SLOTS],
    rate: RateCounter,
    failures: u32,
}

impl<H: HidSink> HidAdapter<H> {
    pub fn new(sink: H) -> Self {
        Self {
            sink,
            keyboards: [KeyboardReport::EMPTY; KEYBOARD_REPORTS],
            keys_held: false,
            contacts: 0,
            last_point: [(0, 0); HID_SLOTS],
            rate: RateCounter::new(),
            failures: 0,
        }
    }

    pub fn sink(&self) -> &H {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut H {
        &mut self.sink
    }

    /// Reports per second over the last full window.
    pub const fn report_rate(&self) -> u32 {
        self.rate.rate()
    }

    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Active contact slots as last reported to the host.
    pub const fn contacts(&self) -> u16 {
        self.contacts
    }

    /// Sends the keyboard reports that differ from what the host last saw.
    /// Going from held keys to none sends an empty report on every id.
    pub fn update_keyboard(&mut self, keys: &KeySet, now_us: u64) {
        let reports = keys.to_reports();
        let clearing = keys.is_empty() && self.keys_held;
        let mut all_sent = true;
        for (i, report) in reports.iter().enumerate() {
            if !clearing && *report == self.keyboards[i] {
                continue;
            }
            if self.send(KEYBOARD_REPORT_IDS[i], &report.to_bytes(), now_us) {
                self.keyboards[i] = *report;
            } else {
                all_sent = false;
            }
        }
        if all_sent {
            self.keys_held = !keys.is_empty();
        }
    }

    /// Emits one report per contact slot whose state flipped.
    pub fn update_touch(&mut self, active: u16, points: &[Option<HidMapping>; HID_SLOTS], now_us: u64) {
        let changed = (active ^ self.contacts) & ((1 << HID_SLOTS) - 1);
        if changed == 0 {
            return;
        }
        let scan_time = (now_us / 100) as u16;
        let contact_count = (active & ((1 << HID_SLOTS) - 1)).count_ones() as u8;
        for slot in 0..HID_SLOTS {
            let bit = 1u16 << slot;
            if changed & bit == 0 {
                continue;
            }
            let pressed = active & bit != 0;
            let (x, y) = match points[slot] {
                Some(m) if pressed => (m.x, m.y),
                // release where the contact went down
                _ => self.last_point[slot],
            };
            let report = TouchReport {
                pressed,
                contact_id: slot as u8,
                x,
                y,
                scan_time,
                contact_count,
            };
            if self.send(REPORT_ID_TOUCH, &report.to_bytes(), now_us) {
                self.contacts ^= bit;
                self.last_point[slot] = (x, y);
            }
        }
    }

    /// Lifts every contact and key, e.g. when leaving HID mode.
    pub fn release_all(&mut self, now_us: u64) {
        let none = [None; HID_SLOTS];
        self.update_touch(0, &none, now_us);
        self.keys_held = true;
        self.update_keyboard(&KeySet::new(), now_us);
    }

    /// Closes the rate window; returns the new rate once per second.
    pub fn tick(&mut self, now_us: u64) -> Option<u32> {
        self.rate.roll(now_us)
    }

    fn send(&mut self, id: u8, payload: &[u8], now_us: u64) -> bool {
        match self.sink.try_send(id, payload) {
            Ok(()) => {
                self.rate.record(now_us);
                true
            }
            Err(e) => {
                self.failures = self.failures.wrapping_add(1);
                warn!("hid: report {=u8} not sent: {}", id, e);
                false
            }
        }
    }
}
