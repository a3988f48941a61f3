//! Frame encoding for the CAN-controlled DC charger behind the reserved
//! buffer battery.

use std::io::Write;

use tracing::debug;

use crate::devices::types::BufferCharger;
use crate::error::DriverError;

/// Arbitration id for control frames.
pub const CONTROL_ID: u16 = 0x159;
/// Arbitration id for status requests.
pub const STATUS_ID: u16 = 0x15C;

const FILL: u8 = 0xFF;

/// A classic 8-byte CAN data frame with a standard id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    /// 11-bit arbitration id.
    pub id: u16,
    /// Payload.
    pub data: [u8; 8],
}

/// Anything that can put a frame on the bus.
pub trait FrameSink: Send {
    /// Sends one frame.
    fn send(&mut self, frame: CanFrame) -> Result<(), DriverError>;
}

impl FrameSink for Vec<CanFrame> {
    fn send(&mut self, frame: CanFrame) -> Result<(), DriverError> {
        self.push(frame);
        Ok(())
    }
}

/// Writes frames as `cansend`-style text lines (`159#0102030405060708`),
/// one per frame, for an slcan bridge or a capture file.
pub struct LineFrameSink<W> {
    writer: W,
}

impl<W: Write + Send> LineFrameSink<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl<W: Write + Send> FrameSink for LineFrameSink<W> {
    fn send(&mut self, frame: CanFrame) -> Result<(), DriverError> {
        let payload: String = frame.data.iter().map(|b| format!("{b:02X}")).collect();
        writeln!(self.writer, "{:03X}#{payload}", frame.id)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Encodes the init command.
pub fn init_frame() -> CanFrame {
    CanFrame {
        id: CONTROL_ID,
        data: [0x80, 0x00, 0x04, 0x00, 0x03, FILL, FILL, FILL],
    }
}

/// Encodes the start command.
pub fn start_frame() -> CanFrame {
    CanFrame {
        id: CONTROL_ID,
        data: [0x80, 0x01, 0x01, 0x00, 0x03, FILL, FILL, FILL],
    }
}

/// Encodes the stop command.
pub fn stop_frame() -> CanFrame {
    CanFrame {
        id: CONTROL_ID,
        data: [0x80, 0x01, 0x04, 0x00, 0x03, FILL, FILL, FILL],
    }
}

/// Encodes a voltage/current setpoint in 0.1 V / 0.1 A units, big-endian.
pub fn set_voltage_current_frame(volts: f32, amps: f32) -> CanFrame {
    let [vh, vl] = deci(volts).to_be_bytes();
    let [ah, al] = deci(amps).to_be_bytes();
    CanFrame {
        id: CONTROL_ID,
        data: [0x83, vh, vl, ah, al, FILL, FILL, FILL],
    }
}

/// Encodes the side-B feedback status request.
pub fn feedback_status_frame() -> CanFrame {
    CanFrame {
        id: STATUS_ID,
        data: [0xA2, FILL, FILL, FILL, FILL, FILL, FILL, FILL],
    }
}

fn deci(value: f32) -> u16 {
    (value.max(0.0) * 10.0).round().min(f32::from(u16::MAX)) as u16
}

/// DC buffer charger driven over CAN.
///
/// Commands a zero current instead of a stop frame so the converter stays
/// precharged between self-charge windows.
pub struct ZekaCharger<S> {
    bus: S,
    running: bool,
}

impl<S: FrameSink> ZekaCharger<S> {
    /// Sends the init frame and returns a stopped charger.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the init frame cannot be sent.
    pub fn new(mut bus: S) -> Result<Self, DriverError> {
        bus.send(init_frame())?;
        Ok(Self {
            bus,
            running: false,
        })
    }

    /// Sends the stop frame.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the frame cannot be sent.
    pub fn stop(&mut self) -> Result<(), DriverError> {
        self.bus.send(stop_frame())?;
        self.running = false;
        Ok(())
    }

    /// The underlying bus.
    pub fn bus(&self) -> &S {
        &self.bus
    }
}

impl<S: FrameSink> BufferCharger for ZekaCharger<S> {
    fn set_voltage_current(&mut self, volts: f32, amps: f32) -> Result<(), DriverError> {
        self.bus.send(set_voltage_current_frame(volts, amps))?;
        if !self.running && amps > 0.0 {
            self.bus.send(start_frame())?;
            self.running = true;
            debug!(volts, amps, "buffer charger started");
        }
        Ok(())
    }
}
