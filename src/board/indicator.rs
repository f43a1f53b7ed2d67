//! Region LEDs: one WS2812 per touch region, driven over RMT.
//!
//! LED `n` sits under region slot `n` (A1 first, E8 last).

use alloc::vec::Vec;

use embassy_time::{
    Duration,
    Timer,
};
use esp_hal::{
    Blocking,
    gpio::Level,
    rmt::{
        Channel,
        PulseCode,
        Tx,
    },
};
use palette::{
    Srgb,
    named,
};

use crate::{
    area::Area,
    consts::AREA_COUNT,
    state::SerialState,
};

pub const LED_COUNT: usize = AREA_COUNT;

const OFF: Srgb<u8> = Srgb::new(0, 0, 0);

pub struct Indicator<'a> {
    channel: Option<Channel<'a, Blocking, Tx>>,
    framebuffer: [Srgb<u8>; LED_COUNT],
    /// Global scale, 0..=255.
    brightness: u8,
}

impl<'a> Indicator<'a> {
    pub const fn new(channel: Channel<'a, Blocking, Tx>) -> Self {
        Self { channel: Some(channel), framebuffer: [OFF; LED_COUNT], brightness: 64 }
    }

    pub const fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness;
    }

    /// Paints touched regions, with the binding target (if any) on top.
    pub fn show(&mut self, touched: SerialState, target: Option<Area>) {
        for (slot, led) in self.framebuffer.iter_mut().enumerate() {
            *led = if touched.0 & (1 << slot) != 0 { region_colour(slot) } else { OFF };
        }
        if let Some(area) = target {
            self.framebuffer[area.slot()] = named::WHITE;
        }
    }

    pub fn clear(&mut self) {
        self.framebuffer.fill(OFF);
    }

    /// Pushes the framebuffer out to the strip.
    pub async fn update(&mut self) {
        let Some(channel) = self.channel.take() else {
            error!("indicator: RMT channel lost during previous transmission");
            return;
        };

        let scale = u16::from(self.brightness);
        let dim = |c: u8| ((u16::from(c) * scale) / 255) as u8;
        let pulses = self
            .framebuffer
            .iter()
            .flat_map(|c| {
                // WS2812 expects GRB byte order
                [byte_to_pulses(dim(c.green)), byte_to_pulses(dim(c.red)), byte_to_pulses(dim(c.blue))]
                    .into_iter()
                    .flatten()
            })
            .chain(core::iter::once(PulseCode::end_marker()))
            .collect::<Vec<_>>();

        let transaction = match channel.transmit(&pulses) {
            Ok(t) => t,
            Err(e) => {
                error!("indicator: RMT transmit failed: {}", e);
                return;
            }
        };
        self.channel = Some(match transaction.wait() {
            Ok(ch) => ch,
            Err((e, ch)) => {
                error!("indicator: RMT transaction failed: {}", e);
                ch
            }
        });

        // latch
        Timer::after(Duration::from_micros(50)).await;
    }
}

/// One colour per ring: A outer, E inner.
fn region_colour(slot: usize) -> Srgb<u8> {
    match Area::from_slot(slot).map(|a| a.name().as_bytes()[0]) {
        Some(b'A') => named::DEEPSKYBLUE,
        Some(b'B') => named::MEDIUMSPRINGGREEN,
        Some(b'C') => named::GOLD,
        Some(b'D') => named::ORANGERED,
        _ => named::MEDIUMORCHID,
    }
}

/// WS2812 bit timing at a 40 MHz RMT clock.
const fn bit_to_pulse(bit: bool) -> PulseCode {
    if bit {
        PulseCode::new(Level::High, 32, Level::Low, 18)
    } else {
        PulseCode::new(Level::High, 16, Level::Low, 34)
    }
}

fn byte_to_pulses(byte: u8) -> [PulseCode; 8] {
    core::array::from_fn(|i| bit_to_pulse((byte >> (7 - i)) & 1 != 0))
}
