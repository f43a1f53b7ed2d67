use std::{
    cell::RefCell,
    rc::Rc,
    vec::Vec,
};

use super::{
    report::ReportLoop,
    *,
};
use crate::{
    consts::{
        CONFIG_SLOT_SIZE,
        DEFAULT_SENSITIVITY,
        MAI2_DEFAULT_BAUD,
    },
    hid::{
        REPORT_ID_KEYBOARD1,
        REPORT_ID_TOUCH,
    },
    mock::{
        MemStorage,
        MockGpio,
        MockPort,
        MockSensor,
        MockSink,
        XorShift,
    },
    sensor::SensitivityMode,
    serial::frame::{
        TOUCH_FRAME_LEN,
        decode_touch_frame,
        encode_touch_frame,
    },
};

const MS: u64 = 1000;
const SEC: u64 = 1_000_000;

const STAT: [u8; 6] = *b"{LRA\x00}";
const HALT: [u8; 6] = *b"{LRL\x00}";

fn addr(mask: u8, ch: u8) -> ChannelAddress {
    ChannelAddress::new(mask, ch).unwrap()
}

struct Rig {
    mgr: InputManager<MockPort>,
    slot: SnapshotSlot,
    sensor: MockSensor,
    now: u64,
}

impl Rig {
    fn new() -> Self {
        Self::with_config(InputConfig::default())
    }

    fn with_config(cfg: InputConfig) -> Self {
        let mut mgr = InputManager::new(MockPort::default(), cfg).unwrap();
        let sensor = MockSensor::new(0x01, 12);
        mgr.register_sensor(sensor.boxed()).unwrap();
        Self { mgr, slot: SnapshotSlot::new(), sensor, now: SEC }
    }

    fn pass(&mut self) {
        self.mgr.scan_pass(self.now, &self.slot);
    }

    fn pass_at(&mut self, now: u64) {
        self.now = now;
        self.pass();
    }

    /// Advances by `step` after each pass.
    fn run(&mut self, passes: usize, step: u64) {
        for _ in 0..passes {
            self.pass();
            self.now += step;
        }
    }

    fn start_streaming(&mut self) {
        self.mgr.serial_mut().port_mut().inject(&STAT);
        self.pass();
        self.now += MS;
        self.tx();
    }

    fn tx(&mut self) -> Vec<u8> {
        self.mgr.serial_mut().port_mut().take_tx()
    }

    fn frames(&mut self) -> Vec<SerialState> {
        self.tx()
            .chunks(TOUCH_FRAME_LEN)
            .map(|c| decode_touch_frame(c.try_into().unwrap()).unwrap())
            .collect()
    }
}

fn events() -> (Rc<RefCell<Vec<BindingEvent>>>, BindingCallback) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (log, Box::new(move |e| sink.borrow_mut().push(e)))
}

// ── End-to-end ──────────────────────────────────────────────────────────────

#[test]
fn mapped_regions_reach_the_wire() {
    let mut rig = Rig::new();
    rig.mgr.set_serial_mapping(Area::A1, addr(1, 0)).unwrap();
    rig.mgr.set_serial_mapping(Area::C1, addr(1, 4)).unwrap();
    rig.mgr.set_serial_mapping(Area::E8, addr(1, 11)).unwrap();
    rig.start_streaming();

    rig.sensor.touch(1 << 0 | 1 << 4 | 1 << 11);
    rig.pass();
    let tx = rig.tx();
    assert_eq!(tx, [0x28, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0x08, 0x29]);
    assert_eq!(tx, encode_touch_frame(SerialState(1 << 0 | 1 << 16 | 1 << 33)));
}

#[test]
fn ratio_command_is_echoed() {
    let mut rig = Rig::new();
    rig.mgr.serial_mut().port_mut().inject(&[0x7B, 0x4C, 0x52, 0x72, 0x05, 0x7D]);
    rig.pass();
    assert_eq!(rig.tx(), [0x28, 0x4C, 0x52, 0x72, 0x05, 0x29]);
}

#[test]
fn frames_flow_only_between_start_and_halt() {
    let mut rig = Rig::new();
    rig.mgr.set_serial_mapping(Area::A1, addr(1, 0)).unwrap();
    rig.mgr.set_serial_mapping(Area::B1, addr(1, 1)).unwrap();
    for i in 0..10 {
        rig.sensor.touch(i % 4);
        rig.pass();
        rig.now += MS;
    }
    assert!(rig.tx().is_empty());

    // the pass that reads STAT has already emitted; the next one streams
    rig.mgr.serial_mut().port_mut().inject(&STAT);
    rig.pass();
    rig.now += MS;
    assert!(rig.tx().is_empty());
    rig.pass();
    rig.now += MS;
    assert_eq!(rig.frames().len(), 1);

    rig.mgr.serial_mut().port_mut().inject(&HALT);
    rig.pass();
    rig.now += MS;
    rig.tx();
    rig.run(5, MS);
    assert!(rig.tx().is_empty());
    assert_eq!(rig.mgr.serial().status(), Status::Ready);
}

#[test]
fn frame_that_does_not_fit_the_fifo_is_dropped_whole() {
    let mut rig = Rig::new();
    rig.mgr.set_serial_mapping(Area::A1, addr(1, 0)).unwrap();
    rig.start_streaming();
    rig.sensor.touch(0b1);

    rig.mgr.serial_mut().port_mut().tx_capacity = TOUCH_FRAME_LEN - 4;
    rig.pass();
    rig.now += MS;
    assert!(rig.tx().is_empty());
    assert_eq!(rig.mgr.serial().frames_dropped(), 1);

    rig.mgr.serial_mut().port_mut().tx_capacity = 4096;
    rig.pass();
    let tx = rig.tx();
    assert_eq!(tx.len(), TOUCH_FRAME_LEN);
    assert_eq!(decode_touch_frame(tx.as_slice().try_into().unwrap()), Some(SerialState::from_areas(&[Area::A1])));
    assert_eq!(rig.mgr.serial().frames_dropped(), 1);
}

#[test]
fn delayed_frames_follow_the_delay_law() {
    let mut rig = Rig::new();
    rig.mgr.set_serial_mapping(Area::A1, addr(1, 0)).unwrap();
    rig.mgr.set_serial_mapping(Area::B2, addr(1, 1)).unwrap();
    rig.mgr.set_touch_response_delay(10).unwrap();
    rig.start_streaming();

    let t0 = rig.now + 50 * MS;
    let a1 = SerialState::from_areas(&[Area::A1]);
    let b2 = SerialState::from_areas(&[Area::B2]);
    let mut seen = Vec::new();
    for ms in 0..=20 {
        match ms {
            0 => rig.sensor.touch(0b01),
            5 => rig.sensor.touch(0),
            10 => rig.sensor.touch(0b10),
            _ => {}
        }
        rig.pass_at(t0 + ms * MS);
        seen.extend(rig.frames());
    }

    let mut expected = Vec::new();
    expected.extend([SerialState::EMPTY; 10]);
    expected.extend([a1; 5]);
    expected.extend([SerialState::EMPTY; 5]);
    expected.push(b2);
    assert_eq!(seen, expected);
}

#[test]
fn manual_binding_accepts_single_touch_only() {
    let mut rig = Rig::new();
    let (log, cb) = events();
    rig.mgr.start_serial_binding(cb).unwrap();
    rig.pass();
    assert_eq!(rig.mgr.binding_area(), Some(Area::A1));

    // two fingers: nothing bound, still waiting
    rig.sensor.touch(1 << 5 | 1 << 6);
    rig.pass_at(rig.now + 10 * MS);
    rig.pass_at(rig.now + 2 * SEC);
    assert_eq!(rig.mgr.mappings().serial(Area::A1), None);
    assert_eq!(rig.mgr.binding_state(), BindingState::WaitTouch);

    rig.sensor.touch(1 << 5);
    rig.pass_at(rig.now + 10 * MS);
    rig.pass_at(rig.now + SEC);
    assert_eq!(rig.mgr.mappings().serial(Area::A1).map(ChannelAddress::raw), Some(0x0100_0020));
    assert_eq!(rig.mgr.binding_state(), BindingState::Processing);

    rig.sensor.touch(0);
    rig.pass_at(rig.now + 10 * MS);
    assert_eq!(rig.mgr.binding_area(), Some(Area::A2));
    let log = log.borrow();
    assert!(log.contains(&BindingEvent::Rejected(crate::binding::Rejection::MultipleTouches)));
    assert!(log.contains(&BindingEvent::Bound { area: Area::A1, address: addr(1, 5) }));
}

#[test]
fn touch_keyboard_rule_presses_once_per_hold() {
    let slot = SnapshotSlot::new();
    let mut cfg = InputConfig::default();
    cfg.touch_keyboard_enabled = true;
    cfg.touch_keyboard_rules
        .push(TouchKeyboardRule::new(Area::A1.bit() | Area::A2.bit(), 200, HidKey::F1, true).unwrap())
        .unwrap();
    let mut report = ReportLoop::new(MockSink::default(), MockGpio::default(), cfg.report_config());

    let held = SerialState::from_areas(&[Area::A1, Area::A2]);
    let mut drive = |from: u64, to: u64, state: SerialState| {
        for t in from..to {
            slot.publish(&TouchSnapshot { serial: state, hid_points: 0, touch_keys: 0, timestamp_us: 0 });
            report.poll(&slot, t * MS);
        }
    };
    drive(0, 150, held);
    drive(150, 200, SerialState::EMPTY);
    drive(1000, 1250, held);
    drive(1250, 1251, SerialState::EMPTY);
    drive(1251, 1400, held);

    let sent = &report.hid().sink().sent;
    let f1 = HidKey::F1.0;
    let presses = sent.iter().filter(|(id, p)| *id == REPORT_ID_KEYBOARD1 && p[2] == f1).count();
    let releases = sent.iter().filter(|(id, p)| *id == REPORT_ID_KEYBOARD1 && p.iter().all(|b| *b == 0)).count();
    assert_eq!((presses, releases), (1, 1));
}

// ── Sensors ─────────────────────────────────────────────────────────────────

#[test]
fn registration_checks_masks() {
    let mut mgr = InputManager::new(MockPort::default(), InputConfig::default()).unwrap();
    assert_eq!(mgr.register_sensor(MockSensor::new(0, 12).boxed()), Err(Error::InvalidArgument));
    assert_eq!(mgr.register_sensor(MockSensor::new(0x02, 12).boxed()), Ok(0x02));
    assert_eq!(mgr.register_sensor(MockSensor::new(0x02, 12).boxed()), Err(Error::DuplicateDevice));
    for mask in 0x10..0x1F {
        mgr.register_sensor(MockSensor::new(mask, 12).boxed()).unwrap();
    }
    assert_eq!(mgr.register_sensor(MockSensor::new(0x40, 12).boxed()), Err(Error::DeviceLimit));
}

#[test]
fn fresh_sensor_gets_default_sensitivity() {
    let rig = Rig::new();
    let handle = rig.sensor.handle();
    assert!(handle.borrow().sensitivity[..12].iter().all(|v| *v == 15));
    assert_eq!(rig.mgr.sensitivity(0x01, 11), Some(15));
    assert_eq!(rig.mgr.sensitivity(0x01, 12), None);
}

#[test]
fn saved_settings_survive_re_registration() {
    let mut rig = Rig::new();
    rig.mgr.set_serial_mapping(Area::D3, addr(1, 7)).unwrap();
    rig.mgr.set_sensitivity(0x01, 7, 60).unwrap();
    rig.mgr.unregister_sensor(0x01).unwrap();
    assert!(!rig.mgr.is_connected(0x01));

    let again = MockSensor::new(0x01, 12);
    rig.mgr.register_sensor(again.boxed()).unwrap();
    assert_eq!(again.handle().borrow().sensitivity[7], 60);
    assert_eq!(rig.mgr.mappings().serial(Area::D3), Some(addr(1, 7)));
}

#[test]
fn sensitivity_is_clamped_to_the_sensor_range() {
    let mut mgr = InputManager::new(MockPort::default(), InputConfig::default()).unwrap();
    let rel = MockSensor::with_mode(0x04, 8, SensitivityMode::Relative);
    mgr.register_sensor(rel.boxed()).unwrap();
    assert_eq!(mgr.set_sensitivity(0x04, 0, 500), Ok(SensitivityMode::Relative.max()));
    assert_eq!(rel.handle().borrow().sensitivity[0], SensitivityMode::Relative.max());
    assert_eq!(mgr.set_sensitivity(0x08, 0, 1), Err(Error::UnknownDevice));
    // only scanned channels take the bulk value
    mgr.set_serial_mapping(Area::B4, addr(0x04, 2)).unwrap();
    mgr.set_sensitivity_all(-3).unwrap();
    assert_eq!(mgr.sensitivity(0x04, 2), Some(-3));
    assert_eq!(mgr.sensitivity(0x04, 1), Some(0));
}

#[test]
fn stored_values_follow_a_sensor_that_changed_mode() {
    let mut mgr = InputManager::new(MockPort::default(), InputConfig::default()).unwrap();
    let rel = MockSensor::with_mode(0x04, 8, SensitivityMode::Relative);
    mgr.register_sensor(rel.boxed()).unwrap();
    mgr.set_sensitivity(0x04, 0, -50).unwrap();
    mgr.set_sensitivity(0x04, 1, 40).unwrap();
    mgr.unregister_sensor(0x04).unwrap();

    let abs = MockSensor::new(0x04, 8);
    mgr.register_sensor(abs.boxed()).unwrap();
    let sent = abs.handle().borrow().sensitivity;
    assert_eq!(sent[0], 0);
    assert_eq!(sent[1], 40);
    assert!(sent[..8].iter().all(|v| (0..=99).contains(v)));
    assert_eq!(mgr.sensitivity(0x04, 0), Some(0));
    assert_eq!(mgr.config_copy().devices.find(0x04).unwrap().sensitivity_mode, SensitivityMode::Absolute);
}

#[test]
fn rejected_sensitivity_write_is_not_recorded() {
    let mut rig = Rig::new();
    let handle = rig.sensor.handle();
    handle.borrow_mut().failing = true;
    assert_eq!(rig.mgr.set_sensitivity(0x01, 2, 70), Err(Error::Bus));
    assert_eq!(rig.mgr.sensitivity(0x01, 2), Some(DEFAULT_SENSITIVITY));

    handle.borrow_mut().failing = false;
    assert_eq!(rig.mgr.set_sensitivity(0x01, 2, 70), Ok(70));
    assert_eq!(rig.mgr.sensitivity(0x01, 2), Some(70));
    assert_eq!(handle.borrow().sensitivity[2], 70);
}

#[test]
fn sensitivity_by_region_key_and_contact() {
    let mut rig = Rig::new();
    rig.mgr.set_serial_mapping(Area::C2, addr(1, 5)).unwrap();
    rig.mgr.set_hid_mapping(2, addr(1, 6), 100, 200).unwrap();
    rig.mgr.set_keyboard_mapping(addr(1, 7), HidKey::ENTER).unwrap();
    rig.mgr.set_keyboard_mapping(addr(1, 8), HidKey::ENTER).unwrap();

    assert_eq!(rig.mgr.set_serial_area_sensitivity(Area::C2, 42), Ok(42));
    assert_eq!(rig.mgr.set_hid_area_sensitivity(2, 120), Ok(99));
    rig.mgr.set_keyboard_sensitivity(HidKey::ENTER, 33).unwrap();
    let sent = rig.sensor.handle().borrow().sensitivity;
    assert_eq!(&sent[5..9], &[42, 99, 33, 33]);
    assert_eq!(rig.mgr.sensitivity(0x01, 6), Some(99));

    assert_eq!(rig.mgr.set_serial_area_sensitivity(Area::A1, 10), Err(Error::InvalidArgument));
    assert_eq!(rig.mgr.set_hid_area_sensitivity(0, 10), Err(Error::InvalidArgument));
    assert_eq!(rig.mgr.set_hid_area_sensitivity(HID_SLOTS, 10), Err(Error::InvalidArgument));
    assert_eq!(rig.mgr.set_keyboard_sensitivity(HidKey::F1, 10), Err(Error::InvalidArgument));
    assert_eq!(rig.mgr.sensitivity(0x01, 0), Some(DEFAULT_SENSITIVITY));
}

#[test]
fn failing_sensor_disconnects_then_recovers() {
    let mut rig = Rig::new();
    rig.sensor.touch(0b1);
    rig.pass();
    let handle = rig.sensor.handle();
    handle.borrow_mut().failing = true;

    rig.run(usize::from(DISCONNECT_THRESHOLD) - 1, MS);
    assert!(rig.mgr.is_connected(0x01));
    assert_eq!(rig.mgr.device_states()[0].channels(), 0b1);

    rig.pass();
    assert!(!rig.mgr.is_connected(0x01));
    assert_eq!(rig.mgr.device_states()[0].channels(), 0);

    handle.borrow_mut().failing = false;
    rig.now += MS;
    rig.pass();
    assert!(rig.mgr.is_connected(0x01));
    assert_eq!(rig.mgr.device_states()[0].channels(), 0b1);
}

#[test]
fn abnormal_channels_are_tagged_with_their_device() {
    let mut rig = Rig::new();
    let cal = MockSensor::new(0x02, 8);
    {
        let h = cal.handle();
        let mut s = h.borrow_mut();
        s.supports_calibration = true;
        s.abnormal = 0b1001 | 1 << 20;
    }
    rig.mgr.register_sensor(cal.boxed()).unwrap();
    rig.sensor.handle().borrow_mut().abnormal = 0xFF;
    // only sensors that support calibration are asked
    assert_eq!(rig.mgr.collect_abnormal_channels().as_slice(), [0x0200_0009]);
}

// ── Mappings ────────────────────────────────────────────────────────────────

#[test]
fn enabled_masks_follow_work_mode() {
    let mut rig = Rig::new();
    let handle = rig.sensor.handle();
    rig.mgr.set_serial_mapping(Area::A1, addr(1, 0)).unwrap();
    rig.mgr.set_hid_mapping(0, addr(1, 1), 100, 200).unwrap();
    rig.mgr.set_keyboard_mapping(addr(1, 2), HidKey::A).unwrap();
    assert_eq!(handle.borrow().enabled, 0b001);

    rig.mgr.set_touch_keyboard(true, TouchKeyboardMode::Both);
    assert_eq!(handle.borrow().enabled, 0b101);

    rig.mgr.set_work_mode(WorkMode::Hid);
    assert_eq!(handle.borrow().enabled, 0b111);

    rig.mgr.set_touch_keyboard(true, TouchKeyboardMode::KeyOnly);
    assert_eq!(handle.borrow().enabled, 0b010);
}

#[test]
fn mapping_edits_are_validated() {
    let mut rig = Rig::new();
    assert_eq!(rig.mgr.set_serial_mapping(Area::A1, addr(1, 12)), Err(Error::InvalidAddress));
    assert_eq!(rig.mgr.set_serial_mapping(Area::A1, addr(2, 0)), Err(Error::UnknownDevice));
    assert_eq!(rig.mgr.clear_hid_mapping(10), Err(Error::InvalidArgument));

    // one address lives in one family only
    rig.mgr.set_serial_mapping(Area::A1, addr(1, 3)).unwrap();
    rig.mgr.set_keyboard_mapping(addr(1, 3), HidKey::B).unwrap();
    assert_eq!(rig.mgr.mappings().serial(Area::A1), None);

    let (_, cb) = events();
    rig.mgr.start_serial_binding(cb).unwrap();
    assert_eq!(rig.mgr.clear_all_mappings(), Err(Error::Busy));
}

#[test]
fn serial_state_is_the_or_of_touched_regions() {
    let mut rig = Rig::new();
    let mut rng = XorShift::new(0x5EED);
    let mut areas = [Area::A1; 12];
    for (ch, area) in areas.iter_mut().enumerate() {
        *area = Area::from_slot(rng.next() as usize % Area::ALL.len()).unwrap();
        rig.mgr.set_serial_mapping(*area, addr(1, ch as u8)).unwrap();
    }
    for _ in 0..200 {
        let touched = rng.next() as u32 & 0xFFF;
        rig.sensor.touch(touched);
        rig.pass();
        rig.now += MS;
        let expected = (0..12u8)
            .filter(|ch| touched & 1 << ch != 0)
            .filter_map(|ch| rig.mgr.mappings().area_of(addr(1, ch)))
            .fold(SerialState::EMPTY, |s, a| s | SerialState::from_areas(&[a]));
        assert_eq!(rig.mgr.last_serial_state(), expected);
        assert_eq!(rig.slot.load().serial, expected);
    }
}

// ── Binding ─────────────────────────────────────────────────────────────────

#[test]
fn binding_requires_serial_mode_and_idle_core() {
    let mut rig = Rig::new();
    rig.mgr.set_work_mode(WorkMode::Hid);
    let (_, cb) = events();
    assert_eq!(rig.mgr.start_serial_binding(cb), Err(Error::MappingConflict));
    rig.mgr.set_work_mode(WorkMode::Serial);
    rig.mgr.start_auto_serial_binding(None).unwrap();
    assert_eq!(rig.mgr.start_auto_serial_binding(None), Err(Error::Busy));
    assert_eq!(rig.mgr.auto_adjust_sensitivity(0x01, 0, None), Err(Error::Busy));
}

#[test]
fn cancelled_binding_restores_previous_map() {
    let mut rig = Rig::new();
    let handle = rig.sensor.handle();
    rig.mgr.set_serial_mapping(Area::A1, addr(1, 0)).unwrap();
    let before = rig.mgr.mappings().clone();
    assert_eq!(handle.borrow().enabled, 0b1);

    let (log, cb) = events();
    rig.mgr.start_serial_binding(cb).unwrap();
    assert_eq!(handle.borrow().enabled, 0xFFF);
    rig.pass();
    rig.sensor.touch(1 << 4);
    rig.pass_at(rig.now + 10 * MS);
    rig.pass_at(rig.now + SEC);
    assert_ne!(rig.mgr.mappings(), &before);

    rig.mgr.request_cancel_binding();
    rig.pass_at(rig.now + 10 * MS);
    assert_eq!(rig.mgr.binding_state(), BindingState::Idle);
    assert_eq!(rig.mgr.mappings(), &before);
    assert_eq!(handle.borrow().enabled, 0b1);
    assert_eq!(log.borrow().last(), Some(&BindingEvent::Failed(BindingFailure::Cancelled)));
}

#[test]
fn auto_binding_asserts_the_target_region() {
    let mut rig = Rig::new();
    rig.start_streaming();
    rig.mgr.start_auto_serial_binding(None).unwrap();
    rig.pass();
    assert_eq!(rig.mgr.serial().manual_trigger(), SerialState::from_areas(&[Area::A1]));
    assert_eq!(rig.frames().last(), Some(&SerialState::from_areas(&[Area::A1])));

    rig.sensor.touch(1 << 2);
    rig.pass_at(rig.now + 10 * MS);
    rig.pass_at(rig.now + SEC);
    rig.sensor.touch(0);
    rig.pass_at(rig.now + 10 * MS);
    assert_eq!(rig.mgr.serial().manual_trigger(), SerialState::from_areas(&[Area::A2]));

    rig.mgr.set_work_mode(WorkMode::Hid);
    assert_eq!(rig.mgr.binding_state(), BindingState::Idle);
    assert_eq!(rig.mgr.serial().manual_trigger(), SerialState::EMPTY);
    assert_eq!(rig.mgr.mappings().serial(Area::A1), None);
}

#[test]
fn manual_binding_keeps_the_wire_quiet() {
    let mut rig = Rig::new();
    rig.start_streaming();
    let (_, cb) = events();
    rig.mgr.start_serial_binding(cb).unwrap();
    rig.run(5, MS);
    assert!(rig.tx().is_empty());
}

#[test]
fn binding_times_out_per_region() {
    let mut cfg = InputConfig::default();
    cfg.binding_timeout_ms = 500;
    let mut rig = Rig::with_config(cfg);
    let (log, cb) = events();
    rig.mgr.start_serial_binding(cb).unwrap();
    rig.pass();
    rig.pass_at(rig.now + 499 * MS);
    assert!(rig.mgr.binding_state() == BindingState::WaitTouch);
    rig.pass_at(rig.now + MS);
    assert_eq!(rig.mgr.binding_state(), BindingState::Idle);
    assert_eq!(log.borrow().last(), Some(&BindingEvent::Failed(BindingFailure::Timeout)));
}

#[test]
fn confirmed_binding_is_persisted() {
    let mut mgr = InputManager::new(MockPort::default(), InputConfig::default()).unwrap();
    let wide = MockSensor::new(0x01, 24);
    let narrow = MockSensor::new(0x02, 12);
    mgr.register_sensor(wide.boxed()).unwrap();
    mgr.register_sensor(narrow.boxed()).unwrap();
    let slot = SnapshotSlot::new();
    let (log, cb) = events();
    mgr.start_serial_binding(cb).unwrap();

    let mut now = SEC;
    mgr.scan_pass(now, &slot);
    for area in Area::ALL {
        let target = if area.slot() < 24 { addr(1, area.slot() as u8) } else { addr(2, (area.slot() - 24) as u8) };
        if target.device_mask() == 1 {
            wide.touch(target.channel_bit());
        } else {
            narrow.touch(target.channel_bit());
        }
        now += 10 * MS;
        mgr.scan_pass(now, &slot);
        now += SEC;
        mgr.scan_pass(now, &slot);
        wide.touch(0);
        narrow.touch(0);
        now += 10 * MS;
        mgr.scan_pass(now, &slot);
    }
    assert_eq!(mgr.binding_state(), BindingState::Done);
    assert_eq!(log.borrow().last(), Some(&BindingEvent::Completed));

    let mut store = ConfigStore::new(MemStorage::new(2 * CONFIG_SLOT_SIZE as usize), 0, CONFIG_SLOT_SIZE);
    InputConfig::register(&mut store).unwrap();
    mgr.confirm_serial_binding(&mut store).unwrap();
    assert_eq!(mgr.binding_state(), BindingState::Idle);
    assert_eq!(mgr.confirm_serial_binding(&mut store), Err(Error::InvalidArgument));

    store.reset_to_defaults();
    store.load();
    let reloaded = InputConfig::load(&store);
    assert_eq!(reloaded.mappings, *mgr.mappings());
    assert_eq!(reloaded.mappings.serial(Area::E8), Some(addr(2, 9)));
    assert_eq!(wide.handle().borrow().enabled, 0xFF_FFFF);
    assert_eq!(narrow.handle().borrow().enabled, 0x3FF);
}

// ── Sensitivity sweep and calibration ───────────────────────────────────────

#[test]
fn sweep_finds_the_touch_threshold() {
    let mut rig = Rig::new();
    let handle = rig.sensor.handle();
    handle.borrow_mut().finger = Some((2, 40));
    let result = Rc::new(RefCell::new(None));
    let out = result.clone();
    rig.mgr
        .auto_adjust_sensitivity(0x01, 2, Some(Box::new(move |r| *out.borrow_mut() = Some(r))))
        .unwrap();
    assert!(rig.mgr.is_adjusting());

    for _ in 0..3000 {
        rig.pass();
        rig.now += 10 * MS;
        if result.borrow().is_some() {
            break;
        }
    }
    let expected = AdjustResult { device_mask: 0x01, channel: 2, value: 40, outcome: AdjustOutcome::Adjusted };
    assert_eq!(*result.borrow(), Some(expected));
    assert_eq!(rig.mgr.last_adjust(), Some(expected));
    assert_eq!(rig.mgr.sensitivity(0x01, 2), Some(40));
    assert_eq!(handle.borrow().sensitivity[2], 40);
    assert!(!rig.mgr.is_adjusting());
}

#[test]
fn cancelled_sweep_restores_the_original_value() {
    let mut rig = Rig::new();
    rig.mgr.set_sensitivity(0x01, 3, 33).unwrap();
    rig.mgr.auto_adjust_sensitivity(0x01, 3, None).unwrap();
    rig.run(30, 10 * MS);
    assert_ne!(rig.sensor.handle().borrow().sensitivity[3], 33);
    rig.mgr.request_cancel_binding();
    rig.pass();
    assert_eq!(rig.mgr.last_adjust().map(|r| (r.value, r.outcome)), Some((33, AdjustOutcome::Cancelled)));
    assert_eq!(rig.sensor.handle().borrow().sensitivity[3], 33);
}

#[test]
fn calibration_runs_on_capable_sensors_only() {
    let mut rig = Rig::new();
    assert_eq!(rig.mgr.calibrate_all(), Err(Error::NotSupported));

    let cal = MockSensor::new(0x02, 8);
    let handle = cal.handle();
    handle.borrow_mut().supports_calibration = true;
    rig.mgr.register_sensor(cal.boxed()).unwrap();
    rig.mgr
        .calibrate_zones(&[CalibrationZone { device_mask: 0x02, bitmap: 0b1_0000_0110 }])
        .unwrap();
    assert_eq!(rig.mgr.calibrate_all(), Err(Error::Busy));
    rig.pass();
    assert_eq!(handle.borrow().calibration_target, Some((0b0110, 0)));
    assert_eq!(handle.borrow().calibration_started, Some(0));

    handle.borrow_mut().progress = 40;
    assert_eq!(rig.mgr.calibration_progress(), 40);
    rig.pass_at(rig.now + MS);
    assert!(rig.mgr.is_calibrating());

    {
        let mut s = handle.borrow_mut();
        s.calibrating = false;
        s.progress = u8::MAX;
        s.sensitivity[1] = 52;
    }
    rig.pass_at(rig.now + MS);
    assert!(!rig.mgr.is_calibrating());
    assert_eq!(rig.mgr.sensitivity(0x02, 1), Some(52));
}

// ── Settings and reporting ──────────────────────────────────────────────────

#[test]
fn settings_are_range_checked() {
    let mut rig = Rig::new();
    assert_eq!(rig.mgr.set_touch_response_delay(101), Err(Error::OutOfRange));
    assert_eq!(rig.mgr.set_baud_rate(57_600), Err(Error::OutOfRange));
    assert_eq!(rig.mgr.serial().port().baud, MAI2_DEFAULT_BAUD);
    rig.mgr.set_baud_rate(115_200).unwrap();
    assert_eq!(rig.mgr.serial().port().baud, 115_200);
    assert_eq!(rig.mgr.config_copy().mai2_baud_rate, 115_200);
}

#[test]
fn written_config_takes_effect() {
    let mut rig = Rig::new();
    assert!(rig.mgr.take_report_config().is_some());
    assert!(rig.mgr.take_report_config().is_none());

    let mut cfg = rig.mgr.config_copy();
    cfg.touch_response_delay_ms = 20;
    cfg.work_mode = WorkMode::Hid;
    cfg.devices.find_mut(0x01).unwrap().set_sensitivity(4, 70).unwrap();
    rig.mgr.write_config(cfg).unwrap();
    assert_eq!(rig.mgr.work_mode(), WorkMode::Hid);
    assert_eq!(rig.sensor.handle().borrow().sensitivity[4], 70);
    assert_eq!(rig.mgr.take_report_config().map(|r| r.work_mode), Some(WorkMode::Hid));

    let mut bad = rig.mgr.config_copy();
    bad.calibration_target = 20;
    assert_eq!(rig.mgr.write_config(bad), Err(Error::OutOfRange));
}

#[test]
fn written_sensitivity_stays_in_the_sensor_range() {
    let mut rig = Rig::new();
    let mut cfg = rig.mgr.config_copy();
    let dev = cfg.devices.find_mut(0x01).unwrap();
    dev.sensitivity_mode = SensitivityMode::Relative;
    dev.set_sensitivity(3, -100).unwrap();
    rig.mgr.write_config(cfg).unwrap();

    assert_eq!(rig.sensor.handle().borrow().sensitivity[3], 0);
    assert_eq!(rig.mgr.sensitivity(0x01, 3), Some(0));
    let live = rig.mgr.config_copy();
    assert_eq!(live.devices.find(0x01).unwrap().sensitivity_mode, SensitivityMode::Absolute);
}

#[test]
fn written_device_list_follows_the_registered_sensors() {
    let mut rig = Rig::new();
    rig.mgr.set_touch_response_delay(5).unwrap();
    let before = rig.mgr.config_copy();

    let mut cfg = rig.mgr.config_copy();
    cfg.touch_response_delay_ms = 30;
    cfg.devices.insert(TouchDeviceMapping::new(0x40, 12, SensitivityMode::Absolute)).unwrap();
    assert_eq!(rig.mgr.write_config(cfg), Err(Error::UnknownDevice));
    assert_eq!(rig.mgr.config_copy(), before);
    assert_eq!(rig.mgr.delay.delay_ms(), 5);

    // channel count and connection state come from the live sensor
    let mut cfg = rig.mgr.config_copy();
    *cfg.devices.find_mut(0x01).unwrap() = TouchDeviceMapping::new(0x01, 24, SensitivityMode::Absolute);
    rig.mgr.write_config(cfg).unwrap();
    let dev = rig.mgr.config_copy().devices.find(0x01).cloned().unwrap();
    assert_eq!(dev.max_channels(), 12);
    assert!(dev.connected);
    assert!(rig.mgr.is_connected(0x01));
    assert_eq!(rig.mgr.set_sensitivity(0x01, 20, 10), Err(Error::InvalidArgument));

    // a dropped entry for a live sensor comes back
    let mut cfg = rig.mgr.config_copy();
    cfg.devices = crate::mapping::DeviceTable::default();
    rig.mgr.write_config(cfg).unwrap();
    assert!(rig.mgr.config_copy().devices.find(0x01).is_some());
}

#[test]
fn button_mappings_can_be_removed() {
    let mut rig = Rig::new();
    let test = GpioId::mcu(11).unwrap();
    let coin = GpioId::mcu(13).unwrap();
    rig.mgr.add_physical_keyboard(test, HidKey::F1).unwrap();
    rig.mgr.add_physical_keyboard(coin, HidKey::ENTER).unwrap();
    rig.mgr.set_logical_key(test, &[HidKey::ENTER, HidKey::F1]).unwrap();
    rig.mgr.take_report_config();

    assert!(rig.mgr.remove_logical_key(test, HidKey::ENTER));
    assert!(!rig.mgr.remove_logical_key(test, HidKey::ENTER));
    assert_eq!(rig.mgr.config_copy().logical_keys[0].keys, [HidKey::F1, HidKey::NONE, HidKey::NONE]);
    assert!(rig.mgr.take_report_config().is_some());
    assert!(rig.mgr.remove_logical_key(test, HidKey::F1));
    assert!(rig.mgr.config_copy().logical_keys.is_empty());
    assert!(!rig.mgr.remove_logical_key(test, HidKey::F1));

    assert!(rig.mgr.remove_physical_keyboard(coin));
    assert!(!rig.mgr.remove_physical_keyboard(coin));
    assert_eq!(rig.mgr.config_copy().physical_keyboards.len(), 1);
    rig.mgr.clear_physical_keyboards();
    assert!(rig.mgr.config_copy().physical_keyboards.is_empty());
}

#[test]
fn status_mirrors_the_core() {
    let mut rig = Rig::new();
    let status = SharedStatus::new();
    rig.start_streaming();
    rig.mgr.start_auto_serial_binding(None).unwrap();
    rig.pass();
    rig.mgr.publish_status(&status);
    assert!(status.has(SharedStatus::FLAG_SERIAL_RUNNING));
    assert!(status.has(SharedStatus::FLAG_BINDING));
    assert!(!status.has(SharedStatus::FLAG_HID_MODE));
    assert_eq!(status.binding_area.load(Ordering::Relaxed), 1);
    assert_eq!(status.connected_sensors.load(Ordering::Relaxed), 1);
}

#[test]
fn report_loop_sends_hid_contacts_and_keys() {
    let mut rig = Rig::new();
    rig.mgr.set_work_mode(WorkMode::Hid);
    rig.mgr.set_hid_mapping(3, addr(1, 6), 1200, 3400).unwrap();
    rig.mgr.set_keyboard_mapping(addr(1, 7), HidKey::ENTER).unwrap();
    rig.mgr.set_touch_keyboard(true, TouchKeyboardMode::Both);
    rig.mgr.add_physical_keyboard(GpioId::mcu(5).unwrap(), HidKey::ESCAPE).unwrap();

    let cfg = rig.mgr.take_report_config().unwrap();
    let mut report = ReportLoop::new(MockSink::default(), MockGpio::default(), cfg);

    rig.sensor.touch(1 << 6 | 1 << 7);
    rig.pass();
    assert_eq!(rig.slot.load().hid_points, 1 << 3);
    assert_eq!(rig.slot.load().touch_keys, 1);
    report.gpio_mut().lines.mcu &= !(1 << 5);
    report.poll(&rig.slot, rig.now);

    let sent = &report.hid().sink().sent;
    let touch = sent.iter().find(|(id, _)| *id == REPORT_ID_TOUCH).unwrap();
    assert_eq!(touch.1[0] & 0x01, 0x01);
    assert_eq!(touch.1[1], 3);
    let keys = sent.iter().find(|(id, _)| *id == REPORT_ID_KEYBOARD1).unwrap();
    assert!(keys.1[2..].contains(&HidKey::ENTER.0));
    assert!(keys.1[2..].contains(&HidKey::ESCAPE.0));
    assert_eq!(report.hid().contacts(), 1 << 3);

    // back to Serial: the contact is lifted
    rig.mgr.set_work_mode(WorkMode::Serial);
    report.apply_config(rig.mgr.take_report_config().unwrap(), rig.now + MS);
    assert_eq!(report.hid().contacts(), 0);
}
