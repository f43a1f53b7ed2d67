use super::{
    SerialPort,
    frame::{
        Command,
        CommandFrame,
        TOUCH_FRAME_LEN,
        encode_response,
        encode_touch_frame,
    },
    parser::CommandParser,
};
use crate::{
    Error,
    Result,
    area::Area,
    consts::{
        MAI2_BAUD_RATES,
        MAI2_DEFAULT_BAUD,
    },
    state::SerialState,
};

/// Adapter state. Frames go out only while [`Status::Running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    #[default]
    Stopped,
    Ready,
    Running,
}

/// Mai2 Serial endpoint on top of a [`SerialPort`].
pub struct Mai2Serial<P> {
    port: P,
    status: Status,
    serial_ok: bool,
    baud_rate: u32,
    parser: CommandParser,
    trigger: SerialState,
    frames_sent: u32,
    frames_dropped: u32,
}

impl<P: SerialPort> Mai2Serial<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            status: Status::Stopped,
            serial_ok: false,
            baud_rate: MAI2_DEFAULT_BAUD,
            parser: CommandParser::new(),
            trigger: SerialState::EMPTY,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    /// Applies the baud rate and moves to [`Status::Ready`].
    pub fn init(&mut self, baud: u32) -> Result<()> {
        self.set_baud_rate(baud)?;
        self.status = Status::Ready;
        self.serial_ok = false;
        self.parser.reset();
        info!("mai2: ready at {=u32} baud", baud);
        Ok(())
    }

    pub fn deinit(&mut self) {
        self.status = Status::Stopped;
        self.serial_ok = false;
    }

    pub const fn status(&self) -> Status {
        self.status
    }

    /// Host has issued STAT since the last HALT / RSET.
    pub const fn serial_ok(&self) -> bool {
        self.serial_ok
    }

    pub const fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub const fn frames_sent(&self) -> u32 {
        self.frames_sent
    }

    pub const fn frames_dropped(&self) -> u32 {
        self.frames_dropped
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        if !MAI2_BAUD_RATES.contains(&baud) {
            return Err(Error::OutOfRange);
        }
        self.port.set_baud_rate(baud)?;
        self.baud_rate = baud;
        debug!("mai2: baud {=u32}", baud);
        Ok(())
    }

    /// Forces `area` into every outgoing frame until cleared. Replaces any
    /// earlier trigger.
    pub fn manually_trigger_area(&mut self, area: Area) {
        self.trigger = SerialState::from_areas(&[area]);
    }

    pub fn clear_manual_trigger(&mut self) {
        self.trigger = SerialState::EMPTY;
    }

    pub const fn manual_trigger(&self) -> SerialState {
        self.trigger
    }

    /// Emits one touch frame if the host enabled streaming. Returns whether
    /// a frame was queued; a full TX buffer drops the frame.
    pub fn send_touch_state(&mut self, state: SerialState) -> bool {
        if self.status != Status::Running || !self.serial_ok {
            return false;
        }
        let frame = encode_touch_frame(state | self.trigger);
        if self.port.write(&frame) == TOUCH_FRAME_LEN {
            self.frames_sent = self.frames_sent.wrapping_add(1);
            true
        } else {
            self.frames_dropped = self.frames_dropped.wrapping_add(1);
            false
        }
    }

    /// Drains the port and executes every complete command.
    pub fn process_commands(&mut self) {
        if self.status == Status::Stopped {
            return;
        }
        let mut buf = [0u8; 32];
        loop {
            let n = self.port.read(&mut buf);
            if n == 0 {
                break;
            }
            for &b in &buf[..n] {
                self.parser.push(b);
                while let Some(frame) = self.parser.next_frame() {
                    self.handle(frame);
                }
            }
        }
    }

    fn handle(&mut self, frame: CommandFrame) {
        match frame.command {
            Command::Reset => {
                self.status = Status::Ready;
                self.serial_ok = false;
                self.trigger = SerialState::EMPTY;
                info!("mai2: RSET");
            }
            Command::Halt => {
                self.status = Status::Ready;
                self.serial_ok = false;
                info!("mai2: HALT");
            }
            Command::Start => {
                self.status = Status::Running;
                self.serial_ok = true;
                info!("mai2: STAT");
            }
            Command::Ratio => {
                self.respond(frame.lr, frame.sensor, b'r', frame.value);
            }
            Command::Sensitivity => {
                // acknowledged but never applied; hosts send it on startup
                self.respond(b'R', frame.sensor, b'k', frame.value);
            }
            Command::Unknown(cmd) => {
                trace!("mai2: unknown command {=u8:#x}", cmd);
            }
        }
    }

    fn respond(&mut self, lr: u8, sensor: u8, cmd: u8, value: u8) {
        let response = encode_response(lr, sensor, cmd, value);
        if self.port.write(&response) != response.len() {
            self.frames_dropped = self.frames_dropped.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;

    fn ready() -> Mai2Serial<MockPort> {
        let mut s = Mai2Serial::new(MockPort::default());
        s.init(MAI2_DEFAULT_BAUD).unwrap();
        s
    }

    #[test]
    fn ratio_command_is_echoed() {
        let mut s = ready();
        s.port_mut().inject(&[0x7B, 0x4C, 0x52, 0x72, 0x05, 0x7D]);
        s.process_commands();
        assert_eq!(s.port_mut().take_tx(), [0x28, 0x4C, 0x52, 0x72, 0x05, 0x29]);
        assert_eq!(s.status(), Status::Ready);
    }

    #[test]
    fn sensitivity_command_echoes_with_fixed_side() {
        let mut s = ready();
        s.port_mut().inject(&[b'{', b'L', b'C', b'k', 0x30, b'}']);
        s.process_commands();
        assert_eq!(s.port_mut().take_tx(), [b'(', b'R', b'C', b'k', 0x30, b')']);
        assert!(!s.serial_ok());
    }

    #[test]
    fn start_halt_reset_transitions() {
        let mut s = ready();
        assert!(!s.send_touch_state(SerialState(1)));
        s.port_mut().inject(b"{LRA\0}");
        s.process_commands();
        assert_eq!(s.status(), Status::Running);
        assert!(s.send_touch_state(SerialState(1)));
        s.port_mut().inject(b"{LRL\0}");
        s.process_commands();
        assert_eq!(s.status(), Status::Ready);
        assert!(!s.send_touch_state(SerialState(1)));
        s.port_mut().inject(b"{LRA\0}{LRE\0}");
        s.process_commands();
        assert_eq!(s.status(), Status::Ready);
        assert!(!s.serial_ok());
    }

    #[test]
    fn stopped_adapter_ignores_input() {
        let mut s = Mai2Serial::new(MockPort::default());
        s.port_mut().inject(b"{LRA\0}");
        s.process_commands();
        assert_eq!(s.status(), Status::Stopped);
    }

    #[test]
    fn rejects_unsupported_baud_without_change() {
        let mut s = ready();
        assert_eq!(s.set_baud_rate(57_600), Err(Error::OutOfRange));
        assert_eq!(s.baud_rate(), MAI2_DEFAULT_BAUD);
        s.set_baud_rate(2_000_000).unwrap();
        assert_eq!(s.port().baud, 2_000_000);
    }

    #[test]
    fn manual_trigger_is_ored_into_frames() {
        let mut s = ready();
        s.port_mut().inject(b"{LRA\0}");
        s.process_commands();
        s.manually_trigger_area(Area::B1);
        s.manually_trigger_area(Area::A2);
        s.send_touch_state(SerialState::from_areas(&[Area::A1]));
        let tx = s.port_mut().take_tx();
        assert_eq!(tx, encode_touch_frame(SerialState::from_areas(&[Area::A1, Area::A2])));
        s.clear_manual_trigger();
        s.send_touch_state(SerialState::EMPTY);
        assert_eq!(s.port_mut().take_tx(), encode_touch_frame(SerialState::EMPTY));
    }

    #[test]
    fn full_tx_buffer_drops_frame() {
        let mut s = ready();
        s.port_mut().inject(b"{LRA\0}");
        s.process_commands();
        s.port_mut().tx_capacity = 4;
        assert!(!s.send_touch_state(SerialState(3)));
        assert_eq!(s.frames_dropped(), 1);
    }
}
