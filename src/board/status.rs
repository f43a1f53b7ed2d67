//! Status screen on the 320×170 ST7789.
//!
//! Shows the work mode, Serial link state, scan and report rates and, while
//! a binding runs, the region being bound. Everything comes from
//! [`SharedStatus`], so drawing never touches the scan side.

use core::{
    fmt::Write as _,
    sync::atomic::Ordering,
};

use embedded_graphics::{
    mono_font::{
        MonoTextStyle,
        ascii::{
            FONT_6X10,
            FONT_10X20,
        },
    },
    pixelcolor::Rgb565,
    prelude::*,
    primitives::{
        PrimitiveStyle,
        Rectangle,
    },
    text::Text,
};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::{
    Async,
    dma::{
        DmaRxBuf,
        DmaTxBuf,
    },
    dma_buffers,
    gpio::{
        Level,
        Output,
        OutputConfig,
    },
    spi::master::{
        Config,
        Spi,
        SpiDmaBus,
    },
    time::Rate,
};
use heapless::String;

use super::{
    BacklightResources,
    DisplayResources,
};
use crate::{
    area::Area,
    handoff::SharedStatus,
};

type SpiInterface<'a> =
    mipidsi::interface::SpiInterface<'a, ExclusiveDevice<SpiDmaBus<'a, Async>, Output<'a>, esp_hal::delay::Delay>, Output<'a>>;

pub type Display<'a> = mipidsi::Display<SpiInterface<'a>, mipidsi::models::ST7789, Output<'a>>;

impl From<DisplayResources<'static>> for Display<'static> {
    fn from(res: DisplayResources<'static>) -> Self {
        let (rx_buffer, rx_descriptors, tx_buffer, tx_descriptors) = dma_buffers!(32000);
        let dma_rx_buf = DmaRxBuf::new(rx_descriptors, rx_buffer).expect("static DMA buffer");
        let dma_tx_buf = DmaTxBuf::new(tx_descriptors, tx_buffer).expect("static DMA buffer");

        let mut delay = esp_hal::delay::Delay::new();
        let dc = Output::new(res.dc, Level::Low, OutputConfig::default());
        let mut rst = Output::new(res.rst, Level::Low, OutputConfig::default());
        rst.set_high();

        let spi = Spi::new(res.spi, Config::default().with_frequency(Rate::from_mhz(80)))
            .expect("static SPI config")
            .with_sck(res.sck)
            .with_mosi(res.mosi)
            .with_miso(res.miso)
            .with_dma(res.dma)
            .with_buffers(dma_rx_buf, dma_tx_buf)
            .into_async();
        let cs = Output::new(res.cs, Level::High, OutputConfig::default());
        let spi_device = ExclusiveDevice::new(spi, cs, delay).expect("CS pin");

        let buffer = crate::mk_static!([u8; 32000], [0_u8; 32000]);
        let di = mipidsi::interface::SpiInterface::new(spi_device, dc, buffer);

        mipidsi::Builder::new(mipidsi::models::ST7789, di)
            .reset_pin(rst)
            .display_size(170, 320)
            .invert_colors(mipidsi::options::ColorInversion::Inverted)
            .orientation(mipidsi::options::Orientation::new().rotate(mipidsi::options::Rotation::Deg90))
            .display_offset(35, 0)
            .init(&mut delay)
            .expect("ST7789 init")
    }
}

/// Turned on at boot and left on.
pub fn backlight_on(res: BacklightResources<'static>) {
    core::mem::forget(Output::new(res.led, Level::High, OutputConfig::default()));
}

const W: u32 = 320;
const ROW: i32 = 28;

/// What was last drawn; rows are redrawn only when their text changes.
#[derive(Default)]
pub struct StatusView {
    rows: [String<32>; 5],
}

impl StatusView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw<D>(&mut self, display: &mut D, status: &SharedStatus, hid_rate: u32) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb565>,
    {
        let flags = status.flags.load(Ordering::Relaxed);
        let mut next: [String<32>; 5] = Default::default();

        let mode = if flags & SharedStatus::FLAG_HID_MODE != 0 { "HID" } else { "SERIAL" };
        let _ = write!(next[0], "MODE {mode}");
        let link = if flags & SharedStatus::FLAG_SERIAL_RUNNING != 0 { "RUN" } else { "IDLE" };
        let _ = write!(next[1], "MAI2 {link} {}", status.serial_frames.load(Ordering::Relaxed));
        let _ = write!(next[2], "SCAN {}/s", status.sample_rate.load(Ordering::Relaxed));
        let _ = write!(next[3], "HID  {hid_rate}/s");
        let area = status.binding_area.load(Ordering::Relaxed);
        if flags & SharedStatus::FLAG_BINDING != 0 {
            let name = u8::try_from(area).ok().and_then(Area::from_index).map_or("--", Area::name);
            let _ = write!(next[4], "BIND {name}");
        } else if flags & SharedStatus::FLAG_CALIBRATING != 0 {
            let _ = write!(next[4], "CALIBRATING");
        } else {
            let _ = write!(next[4], "SENSORS {}", status.connected_sensors.load(Ordering::Relaxed));
        }

        let text = MonoTextStyle::new(&FONT_10X20, Rgb565::WHITE);
        let blank = PrimitiveStyle::with_fill(Rgb565::BLACK);
        for (i, (shown, row)) in self.rows.iter_mut().zip(next).enumerate() {
            if *shown == row {
                continue;
            }
            let y = 8 + ROW * i as i32;
            Rectangle::new(Point::new(0, y), Size::new(W, ROW as u32)).into_styled(blank).draw(display)?;
            Text::new(&row, Point::new(8, y + 20), text).draw(display)?;
            *shown = row;
        }
        Text::new("maitouch", Point::new(260, 164), MonoTextStyle::new(&FONT_6X10, Rgb565::CSS_GRAY))
            .draw(display)?;
        Ok(())
    }
}
