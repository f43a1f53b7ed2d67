//! Lock-free state shared between the scan core and the report core.
//!
//! [`SnapshotSlot`] is a sequence lock: the scan loop is its only writer,
//! the report loop its only reader, and a read that overlaps a write is
//! retried, so the reader never sees a torn snapshot.

use core::sync::atomic::{
    AtomicU32,
    Ordering,
    fence,
};

use crate::state::SerialState;

/// One scan pass worth of output for the report core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchSnapshot {
    pub serial: SerialState,
    /// Touched HID contact slots.
    pub hid_points: u16,
    /// Touched entries of the touch keymap.
    pub touch_keys: u16,
    /// Low 32 bits of the scan timestamp.
    pub timestamp_us: u32,
}

pub struct SnapshotSlot {
    seq: AtomicU32,
    words: [AtomicU32; 4],
}

impl Default for SnapshotSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSlot {
    pub const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            words: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    /// Single writer only.
    pub fn publish(&self, snap: &TouchSnapshot) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        let bits = snap.serial.bits();
        self.words[0].store(bits as u32, Ordering::Relaxed);
        self.words[1].store((bits >> 32) as u32, Ordering::Relaxed);
        self.words[2].store(u32::from(snap.hid_points) | (u32::from(snap.touch_keys) << 16), Ordering::Relaxed);
        self.words[3].store(snap.timestamp_us, Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Latest complete snapshot.
    pub fn load(&self) -> TouchSnapshot {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 != 0 {
                core::hint::spin_loop();
                continue;
            }
            let w0 = self.words[0].load(Ordering::Relaxed);
            let w1 = self.words[1].load(Ordering::Relaxed);
            let w2 = self.words[2].load(Ordering::Relaxed);
            let w3 = self.words[3].load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return TouchSnapshot {
                    serial: SerialState(u64::from(w0) | (u64::from(w1) << 32)),
                    hid_points: w2 as u16,
                    touch_keys: (w2 >> 16) as u16,
                    timestamp_us: w3,
                };
            }
        }
    }

    /// Bumps on every publish; lets a reader skip unchanged passes.
    pub fn sequence(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }
}

/// Diagnostics the status display polls. Relaxed, torn reads across fields
/// are harmless.
pub struct SharedStatus {
    pub sample_rate: AtomicU32,
    pub hid_rate: AtomicU32,
    pub serial_frames: AtomicU32,
    /// See the `FLAG_*` constants.
    pub flags: AtomicU32,
    /// Region index being bound (1..=34), 0 when idle.
    pub binding_area: AtomicU32,
    pub connected_sensors: AtomicU32,
}

impl SharedStatus {
    pub const FLAG_HID_MODE: u32 = 1 << 0;
    pub const FLAG_SERIAL_RUNNING: u32 = 1 << 1;
    pub const FLAG_BINDING: u32 = 1 << 2;
    pub const FLAG_CALIBRATING: u32 = 1 << 3;

    pub const fn new() -> Self {
        Self {
            sample_rate: AtomicU32::new(0),
            hid_rate: AtomicU32::new(0),
            serial_frames: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            binding_area: AtomicU32::new(0),
            connected_sensors: AtomicU32::new(0),
        }
    }

    pub fn has(&self, flag: u32) -> bool {
        self.flags.load(Ordering::Relaxed) & flag != 0
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread,
    };

    use super::*;

    #[test]
    fn round_trips_snapshot() {
        let slot = SnapshotSlot::new();
        let snap = TouchSnapshot {
            serial: SerialState(0x0000_0003_8000_0001),
            hid_points: 0x0201,
            touch_keys: 0x8001,
            timestamp_us: 123_456,
        };
        slot.publish(&snap);
        assert_eq!(slot.load(), snap);
        assert_eq!(slot.sequence(), 2);
    }

    #[test]
    fn reader_never_sees_torn_snapshot() {
        let slot = Arc::new(SnapshotSlot::new());
        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 1..=50_000u32 {
                    // every field derived from i so a mix is detectable
                    let v = u64::from(i);
                    slot.publish(&TouchSnapshot {
                        serial: SerialState(v | (v << 32)),
                        hid_points: i as u16,
                        touch_keys: i as u16,
                        timestamp_us: i,
                    });
                }
            })
        };
        let mut last = 0;
        while last < 50_000 {
            let s = slot.load();
            let i = s.timestamp_us;
            assert_eq!(s.serial.bits(), u64::from(i) | (u64::from(i) << 32));
            assert_eq!(s.hid_points, i as u16);
            assert_eq!(s.touch_keys, i as u16);
            assert!(i >= last);
            last = i;
        }
        writer.join().unwrap();
    }
}
