//! Sensitivity sweeps and sensor-side calibration tracking.

use heapless::Vec;

use crate::{
    Error,
    Result,
    consts::{
        CALIBRATION_TARGET_MAX,
        CALIBRATION_TARGET_MIN,
        MAX_TOUCH_DEVICES,
    },
    sensor::SensitivityMode,
};

// ── Per-channel auto-adjust ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdjustPhase {
    FindTouchStart,
    FindTouchWait,
    FindReleaseStart,
    FindReleaseWait,
    VerifyThreshold,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdjustOutcome {
    /// Threshold found and verified.
    Adjusted,
    /// Release never seen; midpoint of the range used.
    Midpoint,
    /// No value made the channel register; original restored.
    NoTouch,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdjustAction {
    Wait,
    /// Write this value to the channel and keep going.
    Apply(i8),
    /// Write this value; the sweep is over.
    Finish { value: i8, outcome: AdjustOutcome },
}

/// Sweeps one channel's sensitivity with a finger held on the electrode:
/// up until it registers, down until it lets go, then settles just above
/// the release point.
#[derive(Debug, Clone)]
pub struct AutoAdjust {
    pub device_mask: u8,
    pub channel: u8,
    mode: SensitivityMode,
    original: i8,
    current: i16,
    found: i16,
    lost: i16,
    phase: AdjustPhase,
    phase_started_us: u64,
    started_us: u64,
    stabilize_us: u64,
    timeout_us: u64,
}

impl AutoAdjust {
    pub fn new(
        device_mask: u8,
        channel: u8,
        mode: SensitivityMode,
        original: i8,
        stabilize_ms: u32,
        timeout_ms: u32,
        now_us: u64,
    ) -> Self {
        let floor = Self::floor(mode);
        Self {
            device_mask,
            channel,
            mode,
            original,
            current: floor,
            found: floor,
            lost: floor,
            phase: AdjustPhase::FindTouchStart,
            phase_started_us: now_us,
            started_us: now_us,
            stabilize_us: u64::from(stabilize_ms) * 1000,
            timeout_us: u64::from(timeout_ms) * 1000,
        }
    }

    /// Lowest value the sweep tries; zero would disable an absolute channel.
    const fn floor(mode: SensitivityMode) -> i16 {
        match mode {
            SensitivityMode::Absolute => 1,
            SensitivityMode::Relative => SensitivityMode::Relative.min() as i16,
        }
    }

    pub const fn phase(&self) -> AdjustPhase {
        self.phase
    }

    pub const fn original(&self) -> i8 {
        self.original
    }

    /// Value under test right now.
    pub fn current(&self) -> i8 {
        self.mode.clamp(self.current)
    }

    pub fn cancel(&self) -> AdjustAction {
        AdjustAction::Finish { value: self.original, outcome: AdjustOutcome::Cancelled }
    }

    /// Advances with the channel's latest touch state.
    pub fn step(&mut self, touched: bool, now_us: u64) -> AdjustAction {
        if now_us.saturating_sub(self.started_us) >= self.timeout_us {
            return AdjustAction::Finish { value: self.original, outcome: AdjustOutcome::TimedOut };
        }
        let settled = now_us.saturating_sub(self.phase_started_us) >= self.stabilize_us;
        match self.phase {
            AdjustPhase::FindTouchStart => {
                self.enter(AdjustPhase::FindTouchWait, now_us);
                AdjustAction::Apply(self.current())
            }
            AdjustPhase::FindTouchWait if settled => {
                if touched {
                    self.found = self.current;
                    self.enter(AdjustPhase::FindReleaseStart, now_us);
                    return AdjustAction::Wait;
                }
                self.current += 1;
                if self.current > i16::from(self.mode.max()) {
                    return AdjustAction::Finish { value: self.original, outcome: AdjustOutcome::NoTouch };
                }
                self.enter(AdjustPhase::FindTouchStart, now_us);
                AdjustAction::Wait
            }
            AdjustPhase::FindReleaseStart => {
                self.enter(AdjustPhase::FindReleaseWait, now_us);
                AdjustAction::Apply(self.current())
            }
            AdjustPhase::FindReleaseWait if settled => {
                if !touched {
                    self.lost = self.current;
                    self.enter(AdjustPhase::VerifyThreshold, now_us);
                    return AdjustAction::Wait;
                }
                self.current -= 1;
                let floor = Self::floor(self.mode);
                if self.current < floor {
                    let value = self.mode.clamp((self.found + floor) / 2);
                    return AdjustAction::Finish { value, outcome: AdjustOutcome::Midpoint };
                }
                self.enter(AdjustPhase::FindReleaseStart, now_us);
                AdjustAction::Wait
            }
            AdjustPhase::VerifyThreshold => {
                self.enter(AdjustPhase::Complete, now_us);
                AdjustAction::Apply(self.mode.clamp(self.lost + 1))
            }
            AdjustPhase::Complete if settled => {
                let value = if touched { self.lost + 1 } else { (self.lost + self.found) / 2 };
                AdjustAction::Finish { value: self.mode.clamp(value), outcome: AdjustOutcome::Adjusted }
            }
            AdjustPhase::FindTouchWait | AdjustPhase::FindReleaseWait | AdjustPhase::Complete => {
                AdjustAction::Wait
            }
        }
    }

    fn enter(&mut self, phase: AdjustPhase, now_us: u64) {
        self.phase = phase;
        self.phase_started_us = now_us;
    }
}

// ── Sensor calibration ──────────────────────────────────────────────────────

/// Zoned calibration entry: `bitmap` channels of `device_mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationZone {
    pub device_mask: u8,
    pub bitmap: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationRequest {
    All { target: i8 },
    Zones { zones: Vec<CalibrationZone, MAX_TOUCH_DEVICES>, target: i8 },
}

impl CalibrationRequest {
    pub fn all(target: i8) -> Result<Self> {
        check_target(target)?;
        Ok(Self::All { target })
    }

    pub fn zones(zones: &[CalibrationZone], target: i8) -> Result<Self> {
        check_target(target)?;
        if zones.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let zones = Vec::from_slice(zones).map_err(|_| Error::DeviceLimit)?;
        Ok(Self::Zones { zones, target })
    }

    pub const fn target(&self) -> i8 {
        match self {
            Self::All { target } | Self::Zones { target, .. } => *target,
        }
    }

    /// Channels of `device_mask` to calibrate; `None` means the whole IC.
    pub fn bitmap_for(&self, device_mask: u8) -> Option<Option<u32>> {
        match self {
            Self::All { .. } => Some(None),
            Self::Zones { zones, .. } => zones
                .iter()
                .find(|z| z.device_mask == device_mask)
                .map(|z| Some(z.bitmap)),
        }
    }
}

fn check_target(target: i8) -> Result<()> {
    if (CALIBRATION_TARGET_MIN..=CALIBRATION_TARGET_MAX).contains(&target) {
        Ok(())
    } else {
        Err(Error::OutOfRange)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationOutcome {
    Finished,
    TimedOut,
}

/// Watches sensors running their own calibration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationTracker {
    started_us: Option<u64>,
    timeout_us: u64,
}

impl CalibrationTracker {
    pub fn begin(&mut self, now_us: u64, timeout_ms: u32) {
        self.started_us = Some(now_us);
        self.timeout_us = u64::from(timeout_ms) * 1000;
    }

    pub const fn is_running(&self) -> bool {
        self.started_us.is_some()
    }

    /// `any_active`: at least one sensor still reports calibration running.
    pub fn poll(&mut self, any_active: bool, now_us: u64) -> Option<CalibrationOutcome> {
        let started = self.started_us?;
        let outcome = if !any_active {
            CalibrationOutcome::Finished
        } else if now_us.saturating_sub(started) >= self.timeout_us {
            CalibrationOutcome::TimedOut
        } else {
            return None;
        };
        self.started_us = None;
        Some(outcome)
    }
}

/// Mean of per-sensor progress values; 255 when nothing reports.
pub fn average_progress(values: impl Iterator<Item = u8>) -> u8 {
    let (sum, n) = values.fold((0u32, 0u32), |(s, n), v| (s + u32::from(v), n + 1));
    if n == 0 { u8::MAX } else { (sum / n) as u8 }
}
