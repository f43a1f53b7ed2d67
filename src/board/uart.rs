//! UART1 as the Mai2 Serial link.

use esp_hal::{
    Blocking,
    uart::{
        Config,
        Uart,
    },
};

use super::Mai2Resources;
use crate::{
    Error,
    Result,
    consts::MAI2_DEFAULT_BAUD,
    serial::{
        self,
        SerialPort,
    },
};

/// ESP32-S3 UART TX FIFO depth.
const TX_FIFO_LEN: usize = 128;

pub struct UartPort {
    uart: Uart<'static, Blocking>,
}

impl UartPort {
    pub fn new(res: Mai2Resources<'static>) -> Result<Self> {
        let config = Config::default().with_baudrate(MAI2_DEFAULT_BAUD);
        let uart = Uart::new(res.uart, config)
            .map_err(|_| Error::Bus)?
            .with_tx(res.tx)
            .with_rx(res.rx);
        Ok(Self { uart })
    }

    /// Room left in the TX FIFO.
    fn tx_free(&self) -> usize {
        let queued = esp_hal::peripherals::UART1::regs().status().read().txfifo_cnt().bits();
        TX_FIFO_LEN.saturating_sub(usize::from(queued))
    }
}

impl SerialPort for UartPort {
    /// A frame that does not fit in the free FIFO space is dropped whole;
    /// the scan loop never waits on the wire.
    fn write(&mut self, bytes: &[u8]) -> usize {
        let free = self.tx_free();
        serial::write_whole(free, bytes, |frame| self.uart.write(frame).unwrap_or(0))
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.uart.read_buffered(buf).unwrap_or(0)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.uart
            .apply_config(&Config::default().with_baudrate(baud))
            .map_err(|e| {
                warn!("uart: baud {=u32} rejected: {}", baud, e);
                Error::Bus
            })
    }
}
