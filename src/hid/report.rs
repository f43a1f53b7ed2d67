//! Report payloads (without the leading report id byte).

use super::keycode::HidKey;

pub const TOUCH_REPORT_LEN: usize = 9;
pub const KEYBOARD_REPORT_LEN: usize = 8;
pub const KEYS_PER_REPORT: usize = 6;
pub const KEYBOARD_REPORTS: usize = 3;

const TIP_SWITCH: u8 = 0x01;
const CONFIDENCE: u8 = 0x02;

/// One digitizer contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchReport {
    pub pressed: bool,
    pub contact_id: u8,
    pub x: u16,
    pub y: u16,
    /// 100 µs units, wrapping.
    pub scan_time: u16,
    pub contact_count: u8,
}

impl TouchReport {
    pub fn to_bytes(&self) -> [u8; TOUCH_REPORT_LEN] {
        let flags = CONFIDENCE | if self.pressed { TIP_SWITCH } else { 0 };
        let [x_lo, x_hi] = self.x.to_le_bytes();
        let [y_lo, y_hi] = self.y.to_le_bytes();
        let [t_lo, t_hi] = self.scan_time.to_le_bytes();
        [flags, self.contact_id, x_lo, x_hi, y_lo, y_hi, t_lo, t_hi, self.contact_count]
    }
}

/// Boot-protocol keyboard report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyboardReport {
    pub modifier: u8,
    pub keys: [u8; KEYS_PER_REPORT],
}

impl KeyboardReport {
    pub const EMPTY: Self = Self { modifier: 0, keys: [0; KEYS_PER_REPORT] };

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_LEN] {
        let mut out = [0u8; KEYBOARD_REPORT_LEN];
        out[0] = self.modifier;
        out[2..].copy_from_slice(&self.keys);
        out
    }
}

/// Set of held keys, one bit per usage id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeySet([u32; 8]);

impl KeySet {
    pub const fn new() -> Self {
        Self([0; 8])
    }

    pub fn insert(&mut self, key: HidKey) {
        if !key.is_none() {
            self.0[usize::from(key.0 >> 5)] |= 1 << (key.0 & 31);
        }
    }

    pub fn remove(&mut self, key: HidKey) {
        self.0[usize::from(key.0 >> 5)] &= !(1 << (key.0 & 31));
    }

    pub fn contains(&self, key: HidKey) -> bool {
        self.0[usize::from(key.0 >> 5)] & (1 << (key.0 & 31)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn clear(&mut self) {
        self.0 = [0; 8];
    }

    pub fn union(&mut self, other: &Self) {
        for (a, b) in self.0.iter_mut().zip(other.0) {
            *a |= b;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = HidKey> + '_ {
        (0..=u8::MAX).map(HidKey).filter(|k| !k.is_none() && self.contains(*k))
    }

    /// Splits the set over the keyboard reports: modifiers into report 1,
    /// other keys six per report in usage order. Keys beyond the last
    /// report are dropped.
    pub fn to_reports(&self) -> [KeyboardReport; KEYBOARD_REPORTS] {
        let mut reports = [KeyboardReport::EMPTY; KEYBOARD_REPORTS];
        let mut slot = 0usize;
        for key in self.iter() {
            if key.is_modifier() {
                reports[0].modifier |= key.modifier_bit();
                continue;
            }
            if slot >= KEYS_PER_REPORT * KEYBOARD_REPORTS {
                continue;
            }
            reports[slot / KEYS_PER_REPORT].keys[slot % KEYS_PER_REPORT] = key.0;
            slot += 1;
        }
        reports
    }
}

impl FromIterator<HidKey> for KeySet {
    fn from_iter<T: IntoIterator<Item = HidKey>>(iter: T) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}
