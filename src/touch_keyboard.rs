//! Keys driven by region combinations held for a while.

use heapless::Vec;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    Error,
    Result,
    consts::MAX_TOUCH_KEYBOARD_RULES,
    hid::{
        keycode::HidKey,
        report::KeySet,
    },
    state::SerialState,
};

/// Which key sources reach the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TouchKeyboardMode {
    /// GPIO buttons only.
    KeyOnly,
    /// Touch rules and the touch keymap only.
    TouchOnly,
    #[default]
    Both,
}

impl TouchKeyboardMode {
    pub const fn gpio_keys(self) -> bool {
        matches!(self, Self::KeyOnly | Self::Both)
    }

    pub const fn touch_keys(self) -> bool {
        matches!(self, Self::TouchOnly | Self::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerStage {
    #[default]
    None,
    Press,
    /// Fired once and released; re-arms after a pass with the areas clear.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct RuleRuntime {
    press_ts: Option<u64>,
    pressing: bool,
    stage: TriggerStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchKeyboardRule {
    /// Serial region bits that must all be touched.
    pub area_mask: u64,
    pub hold_ms: u32,
    pub key: HidKey,
    pub once: bool,
    #[serde(skip)]
    runtime: RuleRuntime,
}

impl TouchKeyboardRule {
    pub fn new(area_mask: u64, hold_ms: u32, key: HidKey, once: bool) -> Result<Self> {
        if area_mask & SerialState::AREA_BITS == 0 || area_mask & !SerialState::AREA_BITS != 0 {
            return Err(Error::InvalidArgument);
        }
        if key.is_none() {
            return Err(Error::InvalidArgument);
        }
        Ok(Self { area_mask, hold_ms, key, once, runtime: RuleRuntime::default() })
    }

    pub const fn is_pressing(&self) -> bool {
        self.runtime.pressing
    }

    pub const fn stage(&self) -> TriggerStage {
        self.runtime.stage
    }

    pub fn reset(&mut self) {
        self.runtime = RuleRuntime::default();
    }

    /// Feeds the latest region word; returns whether the key is held.
    pub fn evaluate(&mut self, touched: u64, now_us: u64) -> bool {
        let rt = &mut self.runtime;
        if self.once && rt.stage == TriggerStage::Release {
            if touched & self.area_mask != 0 {
                return false;
            }
            rt.stage = TriggerStage::None;
        }
        if touched & self.area_mask == self.area_mask {
            if !rt.pressing {
                let since = *rt.press_ts.get_or_insert(now_us);
                if now_us.saturating_sub(since) >= u64::from(self.hold_ms) * 1000 {
                    rt.pressing = true;
                    if self.once {
                        rt.stage = TriggerStage::Press;
                    }
                }
            }
        } else {
            rt.press_ts = None;
            if rt.pressing {
                rt.pressing = false;
                if self.once {
                    rt.stage = TriggerStage::Release;
                }
            }
        }
        rt.pressing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchKeyboard {
    rules: Vec<TouchKeyboardRule, MAX_TOUCH_KEYBOARD_RULES>,
}

impl TouchKeyboard {
    pub fn new(rules: &[TouchKeyboardRule]) -> Result<Self> {
        let mut kb = Self::default();
        kb.set_rules(rules)?;
        Ok(kb)
    }

    pub fn rules(&self) -> &[TouchKeyboardRule] {
        &self.rules
    }

    /// Replaces the rule list; runtime state starts fresh.
    pub fn set_rules(&mut self, rules: &[TouchKeyboardRule]) -> Result<()> {
        let mut next = Vec::from_slice(rules).map_err(|_| Error::DeviceLimit)?;
        next.iter_mut().for_each(TouchKeyboardRule::reset);
        self.rules = next;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.rules.iter_mut().for_each(TouchKeyboardRule::reset);
    }

    /// Evaluates every rule and adds held keys to `keys`.
    pub fn evaluate(&mut self, touched: SerialState, now_us: u64, keys: &mut KeySet) {
        for rule in self.rules.iter_mut() {
            if rule.evaluate(touched.bits(), now_us) {
                keys.insert(rule.key);
            }
        }
    }
}
