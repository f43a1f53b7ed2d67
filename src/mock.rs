//! Host-side stand-ins for the hardware seams.

use std::{
    cell::RefCell,
    collections::VecDeque,
    convert::Infallible,
    rc::Rc,
    vec::Vec,
};

use embedded_storage::{
    ReadStorage,
    Storage,
};

use crate::{
    Error,
    Result,
    consts::MAX_CHANNELS,
    gpio::{
        GpioSnapshot,
        GpioSource,
    },
    hid::HidSink,
    sensor::{
        SensitivityMode,
        TouchSensor,
    },
    serial::SerialPort,
};

/// xorshift64; deterministic input for randomized checks.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

pub struct MockPort {
    pub baud: u32,
    /// Largest write accepted in one go.
    pub tx_capacity: usize,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl Default for MockPort {
    fn default() -> Self {
        Self { baud: 0, tx_capacity: 4096, rx: VecDeque::new(), tx: Vec::new() }
    }
}

impl MockPort {
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    pub fn take_tx(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }
}

impl SerialPort for MockPort {
    fn write(&mut self, bytes: &[u8]) -> usize {
        crate::serial::write_whole(self.tx_capacity, bytes, |b| {
            self.tx.extend_from_slice(b);
            b.len()
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.rx.len());
        for (slot, b) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = b;
        }
        n
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.baud = baud;
        Ok(())
    }
}

#[derive(Default)]
pub struct MockSink {
    pub sent: Vec<(u8, Vec<u8>)>,
    pub fail: bool,
}

impl HidSink for MockSink {
    fn try_send(&mut self, report_id: u8, payload: &[u8]) -> Result<()> {
        if self.fail {
            return Err(Error::Busy);
        }
        self.sent.push((report_id, payload.to_vec()));
        Ok(())
    }
}

/// Shared with the test through [`MockSensor::handle`] after the sensor has
/// been boxed into the manager.
pub struct SensorState {
    pub bitmap: u32,
    pub failing: bool,
    pub enabled: u32,
    pub sensitivity: [i8; MAX_CHANNELS as usize],
    /// `(channel, threshold)`: the channel reads touched while its
    /// sensitivity is at least `threshold`.
    pub finger: Option<(u8, i8)>,
    pub supports_calibration: bool,
    pub calibrating: bool,
    pub progress: u8,
    pub calibration_target: Option<(u32, i8)>,
    pub calibration_started: Option<i8>,
    pub abnormal: u32,
}

#[derive(Clone)]
pub struct MockSensor {
    mask: u8,
    channels: u8,
    mode: SensitivityMode,
    state: Rc<RefCell<SensorState>>,
}

impl MockSensor {
    pub fn new(mask: u8, channels: u8) -> Self {
        Self::with_mode(mask, channels, SensitivityMode::Absolute)
    }

    pub fn with_mode(mask: u8, channels: u8, mode: SensitivityMode) -> Self {
        Self {
            mask,
            channels,
            mode,
            state: Rc::new(RefCell::new(SensorState {
                bitmap: 0,
                failing: false,
                enabled: 0,
                sensitivity: [0; MAX_CHANNELS as usize],
                finger: None,
                supports_calibration: false,
                calibrating: false,
                progress: u8::MAX,
                calibration_target: None,
                calibration_started: None,
                abnormal: 0,
            })),
        }
    }

    pub fn handle(&self) -> Rc<RefCell<SensorState>> {
        self.state.clone()
    }

    pub fn boxed(&self) -> alloc::boxed::Box<dyn TouchSensor> {
        alloc::boxed::Box::new(self.clone())
    }

    pub fn touch(&self, bitmap: u32) {
        self.state.borrow_mut().bitmap = bitmap;
    }
}

impl TouchSensor for MockSensor {
    fn module_mask(&self) -> u8 {
        self.mask
    }

    fn supported_channels(&self) -> u8 {
        self.channels
    }

    fn sensitivity_mode(&self) -> SensitivityMode {
        self.mode
    }

    fn sample(&mut self) -> Result<u32> {
        let s = self.state.borrow();
        if s.failing {
            return Err(Error::Bus);
        }
        let mut bits = s.bitmap;
        if let Some((ch, threshold)) = s.finger {
            if s.sensitivity[ch as usize] >= threshold {
                bits |= 1 << ch;
            }
        }
        Ok(bits)
    }

    fn set_channel_sensitivity(&mut self, channel: u8, value: i8) -> Result<()> {
        if channel >= self.channels {
            return Err(Error::InvalidArgument);
        }
        let mut s = self.state.borrow_mut();
        if s.failing {
            return Err(Error::Bus);
        }
        s.sensitivity[channel as usize] = value;
        Ok(())
    }

    fn channel_sensitivity(&mut self, channel: u8) -> Result<i8> {
        if channel >= self.channels {
            return Err(Error::InvalidArgument);
        }
        Ok(self.state.borrow().sensitivity[channel as usize])
    }

    fn set_enabled_channel_mask(&mut self, mask: u32) -> Result<()> {
        self.state.borrow_mut().enabled = mask;
        Ok(())
    }

    fn enabled_channel_mask(&self) -> u32 {
        self.state.borrow().enabled
    }

    fn supports_calibration(&self) -> bool {
        self.state.borrow().supports_calibration
    }

    fn start_auto_calibration(&mut self, target: i8) -> Result<()> {
        let mut s = self.state.borrow_mut();
        if !s.supports_calibration {
            return Err(Error::NotSupported);
        }
        s.calibrating = true;
        s.progress = 0;
        s.calibration_started = Some(target);
        Ok(())
    }

    fn is_calibration_active(&self) -> bool {
        self.state.borrow().calibrating
    }

    fn calibration_progress(&self) -> u8 {
        self.state.borrow().progress
    }

    fn set_calibration_target_by_bitmap(&mut self, bitmap: u32, target: i8) -> Result<()> {
        let mut s = self.state.borrow_mut();
        if !s.supports_calibration {
            return Err(Error::NotSupported);
        }
        s.calibration_target = Some((bitmap, target));
        Ok(())
    }

    fn abnormal_channel_mask(&mut self) -> u32 {
        self.state.borrow().abnormal
    }
}

#[derive(Default, Clone)]
pub struct MockGpio {
    pub lines: GpioSnapshot,
}

impl GpioSource for MockGpio {
    fn snapshot(&mut self) -> GpioSnapshot {
        self.lines
    }
}

/// Flash-like byte array that starts erased (0xFF).
pub struct MemStorage {
    pub bytes: Vec<u8>,
}

impl MemStorage {
    pub fn new(size: usize) -> Self {
        Self { bytes: std::vec![0xFF; size] }
    }
}

impl ReadStorage for MemStorage {
    type Error = Infallible;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> core::result::Result<(), Self::Error> {
        let start = offset as usize;
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.bytes.get(start + i).copied().unwrap_or(0xFF);
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for MemStorage {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> core::result::Result<(), Self::Error> {
        let start = offset as usize;
        let end = (start + bytes.len()).min(self.bytes.len());
        self.bytes[start..end].copy_from_slice(&bytes[..end - start]);
        Ok(())
    }
}
