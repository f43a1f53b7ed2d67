//! USB HID: the composite digitizer/keyboard device.
//!
//! [`UsbHidSink`] only queues; [`usb_hid_task`] owns the USB stack and
//! drains the queue into the interrupt endpoint.

use embassy_futures::join::join;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::Channel,
};
use embassy_usb::{
    Builder,
    class::hid::{
        Config as HidConfig,
        HidWriter,
        State,
    },
};
use esp_hal::otg_fs::{
    Usb,
    asynch::{
        Config as DriverConfig,
        Driver,
    },
};
use heapless::Vec;

use super::UsbResources;
use crate::{
    Error,
    Result,
    consts::{
        USB_MANUFACTURER,
        USB_PID,
        USB_PRODUCT,
        USB_VID,
    },
    hid::{
        HidSink,
        descriptor::REPORT_DESCRIPTOR,
        report::TOUCH_REPORT_LEN,
    },
};

/// Report id followed by the payload.
pub type HidPacket = Vec<u8, { TOUCH_REPORT_LEN + 1 }>;

pub type HidQueue = Channel<CriticalSectionRawMutex, HidPacket, 32>;

pub struct UsbHidSink {
    queue: &'static HidQueue,
}

impl UsbHidSink {
    pub const fn new(queue: &'static HidQueue) -> Self {
        Self { queue }
    }
}

impl HidSink for UsbHidSink {
    fn try_send(&mut self, report_id: u8, payload: &[u8]) -> Result<()> {
        let mut packet = HidPacket::new();
        packet.push(report_id).map_err(|_| Error::InvalidArgument)?;
        packet.extend_from_slice(payload).map_err(|_| Error::InvalidArgument)?;
        self.queue.try_send(packet).map_err(|_| Error::Busy)
    }
}

#[embassy_executor::task]
pub async fn usb_hid_task(res: UsbResources<'static>, queue: &'static HidQueue) {
    let usb = Usb::new(res.usb0, res.dp, res.dm);
    let ep_out_buffer = crate::mk_static!([u8; 1024], [0; 1024]);
    let driver = Driver::new(usb, ep_out_buffer, DriverConfig::default());

    let mut config = embassy_usb::Config::new(USB_VID, USB_PID);
    config.manufacturer = Some(USB_MANUFACTURER);
    config.product = Some(USB_PRODUCT);
    config.max_power = 100;

    let config_descriptor = crate::mk_static!([u8; 256], [0; 256]);
    let bos_descriptor = crate::mk_static!([u8; 256], [0; 256]);
    let msos_descriptor = crate::mk_static!([u8; 256], [0; 256]);
    let control_buf = crate::mk_static!([u8; 64], [0; 64]);
    let mut builder = Builder::new(driver, config, config_descriptor, bos_descriptor, msos_descriptor, control_buf);

    let state = crate::mk_static!(State<'static>, State::new());
    let hid_config = HidConfig {
        report_descriptor: &REPORT_DESCRIPTOR,
        request_handler: None,
        poll_ms: 1,
        max_packet_size: 64,
    };
    let mut writer = HidWriter::<_, 64>::new(&mut builder, state, hid_config);
    let mut device = builder.build();
    info!("usb: HID device up ({=u16:#x}:{=u16:#x})", USB_VID, USB_PID);

    let pump = async {
        loop {
            let packet = queue.receive().await;
            if let Err(e) = writer.write(&packet).await {
                warn!("usb: report {=u8} lost: {}", packet[0], e);
            }
        }
    };
    join(device.run(), pump).await;
}
