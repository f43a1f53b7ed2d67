//! Controller firmware.
//!
//! Core 0 runs the scan loop: sensors, mapping, Mai2 Serial.
//! Core 1 runs HID reporting, the region LEDs and the status screen.
//! The cores meet at the lock-free [`SnapshotSlot`], a couple of `Signal`s
//! for slow-path messages and the [`SharedStatus`] atomics.

#![no_std]
#![no_main]

use alloc::boxed::Box;
use core::{
    cell::RefCell,
    sync::atomic::Ordering,
};

use defmt::{
    info,
    warn,
};
use embassy_executor::Spawner;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::Channel,
    signal::Signal,
};
use embassy_time::{
    Duration,
    Instant,
    Timer,
};
use embedded_hal_bus::i2c::RefCellDevice;
use esp_backtrace as _;
use esp_hal::{
    Blocking,
    i2c::master::I2c,
    timer::timg::TimerGroup,
};
use esp_println as _;
use esp_storage::FlashStorage;
use maitouch::{
    binding::BindingState,
    board::{
        self,
        buttons::{
            AuxButtons,
            TEST_PIN,
        },
        indicator::Indicator,
        status::{
            Display,
            StatusView,
        },
        uart::UartPort,
        usb::{
            HidQueue,
            UsbHidSink,
            usb_hid_task,
        },
    },
    config::{
        ConfigStore,
        LoadOutcome,
    },
    gpio::{
        GpioId,
        GpioSource,
    },
    handoff::{
        SharedStatus,
        SnapshotSlot,
    },
    input::{
        InputConfig,
        InputManager,
        ReportConfig,
        report::ReportLoop,
    },
    mk_static,
    sensor::gtx312l::{
        self,
        Gtx312l,
    },
    split_resources,
};

extern crate alloc;

esp_bootloader_esp_idf::esp_app_desc!();

static SNAPSHOT: SnapshotSlot = SnapshotSlot::new();
static STATUS: SharedStatus = SharedStatus::new();
static REPORT_CONFIG: Signal<CriticalSectionRawMutex, ReportConfig> = Signal::new();
static UI_REQUEST: Signal<CriticalSectionRawMutex, UiRequest> = Signal::new();
static HID_QUEUE: HidQueue = Channel::new();

/// Button gestures forwarded from core 1.
#[derive(Clone, Copy, defmt::Format)]
enum UiRequest {
    StartAutoBinding,
    Cancel,
}

/// TEST held this long starts a guided binding; a short press cancels.
const LONG_PRESS: Duration = Duration::from_secs(3);

type Manager = InputManager<UartPort>;
type Store = ConfigStore<FlashStorage<'static>>;

fn now_us() -> u64 {
    Instant::now().as_micros()
}

// ── Core 0: scan loop ───────────────────────────────────────────────────────

#[embassy_executor::task]
async fn scan_task(manager: &'static mut Manager, store: &'static mut Store) {
    info!("scan loop running on core 0");
    let mut passes: u32 = 0;
    loop {
        if let Some(request) = UI_REQUEST.try_take() {
            match request {
                UiRequest::StartAutoBinding => {
                    if let Err(e) = manager.start_auto_serial_binding(None) {
                        warn!("binding not started: {}", e);
                    }
                }
                UiRequest::Cancel => manager.request_cancel_binding(),
            }
        }

        manager.scan_pass(now_us(), &SNAPSHOT);

        // no confirmation screen on this board: a finished binding is kept
        if manager.binding_state() == BindingState::Done {
            if let Err(e) = manager.confirm_serial_binding(store) {
                warn!("binding not saved: {}", e);
            }
        }
        if let Some(cfg) = manager.take_report_config() {
            REPORT_CONFIG.signal(cfg);
        }

        passes = passes.wrapping_add(1);
        if passes % 64 == 0 {
            manager.publish_status(&STATUS);
            embassy_futures::yield_now().await;
        }
    }
}

// ── Core 1: reporting, LEDs, screen ─────────────────────────────────────────

#[embassy_executor::task]
async fn report_task(mut report: ReportLoop<UsbHidSink, AuxButtons>) {
    info!("report loop running on core 1");
    let test = GpioId::mcu(TEST_PIN);
    let mut pressed_at: Option<Instant> = None;
    loop {
        if let Some(cfg) = REPORT_CONFIG.try_take() {
            report.apply_config(cfg, now_us());
        }
        if let Some(rate) = report.poll(&SNAPSHOT, now_us()) {
            STATUS.hid_rate.store(rate, Ordering::Relaxed);
        }

        let held = test.is_some_and(|id| report.gpio_mut().snapshot().is_pressed(id));
        match (held, pressed_at) {
            (true, None) => pressed_at = Some(Instant::now()),
            (false, Some(at)) => {
                pressed_at = None;
                let request = if at.elapsed() >= LONG_PRESS { UiRequest::StartAutoBinding } else { UiRequest::Cancel };
                info!("ui: {}", request);
                UI_REQUEST.signal(request);
            }
            _ => {}
        }

        Timer::after(Duration::from_micros(500)).await;
    }
}

#[embassy_executor::task]
async fn indicator_task(indicator: &'static mut Indicator<'static>) {
    loop {
        let snap = SNAPSHOT.load();
        let target = u8::try_from(STATUS.binding_area.load(Ordering::Relaxed))
            .ok()
            .and_then(maitouch::area::Area::from_index);
        indicator.show(snap.serial, target);
        indicator.update().await;
        Timer::after(Duration::from_millis(16)).await;
    }
}

#[embassy_executor::task]
async fn status_task(display: &'static mut Display<'static>) {
    let mut view = StatusView::new();
    loop {
        let hid_rate = STATUS.hid_rate.load(Ordering::Relaxed);
        if view.draw(display, &STATUS, hid_rate).is_err() {
            warn!("status: draw failed");
        }
        Timer::after(Duration::from_millis(100)).await;
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

fn load_config(store: &mut Store) -> InputConfig {
    if let Err(e) = InputConfig::register(store) {
        warn!("config: key registration failed: {}", e);
    }
    match store.load() {
        LoadOutcome::Loaded { generation } => info!("config: loaded generation {=u32}", generation),
        LoadOutcome::Empty => info!("config: flash empty, using defaults"),
        LoadOutcome::Corrupt => warn!("config: both slots corrupt, using defaults"),
    }
    InputConfig::load(store)
}

fn discover_sensors(manager: &mut Manager, bus: &'static RefCell<I2c<'static, Blocking>>) {
    for address in gtx312l::ADDRESSES {
        let mut sensor = Gtx312l::new(RefCellDevice::new(bus), address, 0);
        match sensor.init() {
            Ok(()) => match manager.register_sensor(Box::new(sensor)) {
                Ok(mask) => info!("sensor at {=u8:#x} is device {=u8:#x}", address, mask),
                Err(e) => warn!("sensor at {=u8:#x} not registered: {}", address, e),
            },
            Err(_) => info!("no sensor at {=u8:#x}", address),
        }
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    let peripherals = board::init();
    let resources = split_resources!(peripherals);

    esp_alloc::heap_allocator!(size: 64 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let store = mk_static!(Store, board::config_store(resources.flash));
    let config = load_config(store);

    let uart = UartPort::new(resources.mai2).expect("UART1");
    let manager = mk_static!(Manager, InputManager::new(uart, config).expect("input manager"));
    let bus = mk_static!(RefCell<I2c<'static, Blocking>>, RefCell::new(resources.sensors.into()));
    discover_sensors(manager, bus);
    let initial = manager.take_report_config().unwrap_or_default();

    use esp_hal::interrupt::software::SoftwareInterruptControl;
    let sw_ints = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    let core1_stack = mk_static!(esp_hal::system::Stack<16384>, esp_hal::system::Stack::new());

    esp_rtos::start_second_core::<16384>(
        peripherals.CPU_CTRL,
        sw_ints.software_interrupt0,
        sw_ints.software_interrupt1,
        core1_stack,
        || {
            let executor = mk_static!(esp_rtos::embassy::Executor, esp_rtos::embassy::Executor::new());
            executor.run(|spawner| {
                board::status::backlight_on(resources.backlight);
                let display = mk_static!(Display<'static>, resources.display.into());
                let indicator = mk_static!(Indicator<'static>, Indicator::new(resources.leds.into()));
                let report = ReportLoop::new(UsbHidSink::new(&HID_QUEUE), AuxButtons::from(resources.buttons), initial);

                spawner.must_spawn(usb_hid_task(resources.usb, &HID_QUEUE));
                spawner.must_spawn(report_task(report));
                spawner.must_spawn(indicator_task(indicator));
                spawner.must_spawn(status_task(display));
            });
        },
    );

    spawner.must_spawn(scan_task(manager, store));

    loop {
        Timer::after(Duration::from_secs(600)).await;
    }
}
