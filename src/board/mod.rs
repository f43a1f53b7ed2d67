//! ESP32-S3 controller board: pin assignment, clocks and peripheral glue.
//!
//! Every type here adapts a board peripheral to one of the input core's
//! seams: [`uart::UartPort`] is a [`SerialPort`](crate::serial::SerialPort),
//! [`usb::UsbHidSink`] a [`HidSink`](crate::hid::HidSink),
//! [`buttons::AuxButtons`] a [`GpioSource`](crate::gpio::GpioSource).

pub mod buttons;
pub mod indicator;
pub mod status;
pub mod uart;
pub mod usb;

use esp_hal::{
    Blocking,
    assign_resources,
    clock::{
        Clock,
        CpuClock,
    },
    gpio::{
        Level,
        Output,
        OutputConfig,
    },
    i2c::master::I2c,
    rmt::{
        Rmt,
        Tx,
        TxChannelConfig,
        TxChannelCreator as _,
    },
    rom,
    time::Rate,
};
use esp_storage::FlashStorage;

use crate::{
    config::ConfigStore,
    consts::{
        CONFIG_FLASH_OFFSET,
        CONFIG_SLOT_SIZE,
    },
};

// ── Pin / peripheral assignments ────────────────────────────────────────────

assign_resources! {
    pub Resources<'d> {
        sensors: SensorResources<'d> {
            sda: GPIO8,
            scl: GPIO9,
            i2c: I2C0,
        },
        mai2: Mai2Resources<'d> {
            tx: GPIO17,
            rx: GPIO18,
            uart: UART1,
        },
        usb: UsbResources<'d> {
            dm: GPIO19,
            dp: GPIO20,
            usb0: USB0,
        },
        display: DisplayResources<'d> {
            dc: GPIO15,
            rst: GPIO7,
            sck: GPIO4,
            cs: GPIO6,
            miso: GPIO16,
            mosi: GPIO5,
            spi: SPI2,
            dma: DMA_CH0,
        },
        backlight: BacklightResources<'d> {
            led: GPIO38,
        },
        leds: LedResources<'d> {
            power: GPIO40,
            io: GPIO41,
            rmt: RMT,
        },
        buttons: ButtonResources<'d> {
            test: GPIO11,
            service: GPIO12,
            coin: GPIO13,
            select: GPIO14,
        },
        flash: FlashResources<'d> {
            flash: FLASH,
        }
    }
}

// ── Board initialisation ────────────────────────────────────────────────────

/// Steps through an intermediate frequency before reaching the target,
/// which the ESP32-S3 requires.
fn set_cpu_clock(cpu_clock_speed: CpuClock) {
    let _ = esp_hal::peripherals::SYSTEM::regs()
        .sysclk_conf()
        .modify(|_, w| unsafe { w.soc_clk_sel().bits(1) });
    let _ = esp_hal::peripherals::SYSTEM::regs()
        .cpu_per_conf()
        .modify(|_, w| unsafe {
            let _ = w.pll_freq_sel().set_bit();
            w.cpuperiod_sel().bits(match cpu_clock_speed {
                CpuClock::_80MHz => 0,
                CpuClock::_160MHz => 1,
                _ => 2,
            })
        });

    rom::ets_update_cpu_frequency_rom(cpu_clock_speed.frequency().as_mhz());
}

/// Brings the clocks up and returns the raw peripheral set.
///
/// Call once at the top of `main`, then [`split_resources!`] the result.
#[must_use]
pub fn init() -> esp_hal::peripherals::Peripherals {
    set_cpu_clock(CpuClock::_160MHz);
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    esp_hal::init(config)
}

// ── Resource → peripheral conversions ───────────────────────────────────────

impl<'a> From<SensorResources<'a>> for I2c<'a, Blocking> {
    /// 400 kHz fast mode. Panics only on an invalid static config.
    fn from(res: SensorResources<'a>) -> Self {
        let config = esp_hal::i2c::master::Config::default().with_frequency(Rate::from_khz(400));
        I2c::new(res.i2c, config)
            .expect("static I2C config")
            .with_sda(res.sda)
            .with_scl(res.scl)
    }
}

impl<'a> From<LedResources<'a>> for esp_hal::rmt::Channel<'a, Blocking, Tx> {
    fn from(res: LedResources<'a>) -> Self {
        // the strip's supply switch stays on for the lifetime of the firmware
        core::mem::forget(Output::new(res.power, Level::High, OutputConfig::default()));
        let rmt = Rmt::new(res.rmt, Rate::from_mhz(40)).expect("static RMT config");
        let tx_config = TxChannelConfig::default().with_clk_divider(1);
        rmt.channel0.configure_tx(res.io, tx_config).expect("static RMT channel")
    }
}

/// Settings store on the reserved flash range.
pub fn config_store(res: FlashResources<'static>) -> ConfigStore<FlashStorage<'static>> {
    ConfigStore::new(FlashStorage::new(res.flash), CONFIG_FLASH_OFFSET, CONFIG_SLOT_SIZE)
}
