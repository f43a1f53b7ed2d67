//! Interactive Serial region binding.
//!
//! Regions are bound in A1..E8 order. For each region the user touches the
//! electrode that should drive it; a touch is accepted once exactly one
//! channel has been held for [`BINDING_HOLD_US`]. The machine is polled once
//! per scan pass and reports through [`BindingEvent`]s.

use alloc::boxed::Box;

use crate::{
    Error,
    Result,
    address::ChannelAddress,
    area::Area,
    consts::BINDING_HOLD_US,
    mapping::AreaChannelMappings,
    state::{
        TouchCount,
        TouchDeviceState,
        touch_count,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BindingMode {
    /// Driven from the on-device UI; progress goes to the callback.
    Manual,
    /// The current region is also asserted on the Serial link so the host
    /// can follow along.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BindingState {
    #[default]
    Idle,
    Prepare,
    WaitTouch,
    /// A channel was accepted; waiting for every finger to lift.
    Processing,
    /// All regions bound; waiting for confirm or cancel.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    MultipleTouches,
    /// The channel already drives a region bound earlier in this run.
    AlreadyBound(Area),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BindingFailure {
    Timeout,
    Cancelled,
    WrongMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BindingEvent {
    /// Waiting for a touch for this region.
    Target(Area),
    Bound { area: Area, address: ChannelAddress },
    Rejected(Rejection),
    Completed,
    Failed(BindingFailure),
}

pub type BindingCallback = Box<dyn FnMut(BindingEvent)>;

pub struct SerialBinding {
    mode: BindingMode,
    state: BindingState,
    index: usize,
    candidate: Option<(ChannelAddress, u64)>,
    region_started_us: u64,
    timeout_us: u64,
    /// A multi-touch was already reported and has not cleared yet.
    rejecting: bool,
}

impl Default for SerialBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialBinding {
    pub const fn new() -> Self {
        Self {
            mode: BindingMode::Manual,
            state: BindingState::Idle,
            index: 0,
            candidate: None,
            region_started_us: 0,
            timeout_us: 0,
            rejecting: false,
        }
    }

    pub fn start(&mut self, mode: BindingMode, timeout_ms: u32) -> Result<()> {
        if self.is_active() {
            return Err(Error::Busy);
        }
        *self = Self {
            mode,
            state: BindingState::Prepare,
            timeout_us: u64::from(timeout_ms) * 1000,
            ..Self::new()
        };
        Ok(())
    }

    pub const fn state(&self) -> BindingState {
        self.state
    }

    pub const fn mode(&self) -> BindingMode {
        self.mode
    }

    pub const fn is_active(&self) -> bool {
        !matches!(self.state, BindingState::Idle)
    }

    /// Region currently being bound.
    pub fn current_area(&self) -> Option<Area> {
        match self.state {
            BindingState::WaitTouch | BindingState::Processing => Area::from_slot(self.index),
            _ => None,
        }
    }

    /// Regions finished so far.
    pub const fn progress(&self) -> usize {
        self.index
    }

    /// Back to idle. Returns whether a run was in progress.
    pub fn stop(&mut self) -> bool {
        let was = self.is_active();
        self.state = BindingState::Idle;
        self.candidate = None;
        was
    }

    pub fn step(
        &mut self,
        states: &[TouchDeviceState],
        mappings: &mut AreaChannelMappings,
        now_us: u64,
        emit: &mut dyn FnMut(BindingEvent),
    ) {
        match self.state {
            BindingState::Idle | BindingState::Done => {}
            BindingState::Prepare => {
                self.index = 0;
                self.enter_region(now_us);
                emit(BindingEvent::Target(Area::A1));
            }
            BindingState::WaitTouch | BindingState::Processing
                if now_us.saturating_sub(self.region_started_us) >= self.timeout_us =>
            {
                warn!("binding: timed out at region {=usize}", self.index + 1);
                self.stop();
                emit(BindingEvent::Failed(BindingFailure::Timeout));
            }
            BindingState::WaitTouch => self.wait_touch(states, mappings, now_us, emit),
            BindingState::Processing => {
                if touch_count(states) != TouchCount::None {
                    return;
                }
                self.index += 1;
                match Area::from_slot(self.index) {
                    Some(next) => {
                        self.enter_region(now_us);
                        emit(BindingEvent::Target(next));
                    }
                    None => {
                        info!("binding: all regions bound");
                        self.state = BindingState::Done;
                        emit(BindingEvent::Completed);
                    }
                }
            }
        }
    }

    fn enter_region(&mut self, now_us: u64) {
        self.state = BindingState::WaitTouch;
        self.region_started_us = now_us;
        self.candidate = None;
        self.rejecting = false;
    }

    fn wait_touch(
        &mut self,
        states: &[TouchDeviceState],
        mappings: &mut AreaChannelMappings,
        now_us: u64,
        emit: &mut dyn FnMut(BindingEvent),
    ) {
        let addr = match touch_count(states) {
            TouchCount::None => {
                self.candidate = None;
                self.rejecting = false;
                return;
            }
            TouchCount::Many(_) => {
                self.candidate = None;
                if !self.rejecting {
                    self.rejecting = true;
                    emit(BindingEvent::Rejected(Rejection::MultipleTouches));
                }
                return;
            }
            TouchCount::One(addr) => addr,
        };
        self.rejecting = false;
        let since = match self.candidate {
            Some((held, since)) if held == addr => since,
            _ => {
                self.candidate = Some((addr, now_us));
                return;
            }
        };
        if now_us.saturating_sub(since) < BINDING_HOLD_US {
            return;
        }
        let Some(area) = Area::from_slot(self.index) else {
            return;
        };
        if let Some(prev) = mappings.area_of(addr) {
            if prev.slot() < self.index {
                // restart the hold so the rejection is not repeated every pass
                self.candidate = Some((addr, now_us));
                emit(BindingEvent::Rejected(Rejection::AlreadyBound(prev)));
                return;
            }
        }
        mappings.set_serial(area, addr);
        info!("binding: {} -> {=u32:#010x}", area.name(), addr.raw());
        self.state = BindingState::Processing;
        self.candidate = None;
        emit(BindingEvent::Bound { area, address: addr });
    }
}
