use std::io::{BufRead, Write};

use tracing::trace;

use crate::devices::types::ChargerDriver;
use crate::error::DriverError;

/// EVSE states reported by `$GS` that mean a vehicle is connected.
const STATE_CONNECTED: u32 = 2;
const STATE_CHARGING: u32 = 3;

/// OpenEVSE charging station spoken to over its RAPI line protocol.
///
/// Every command is a `$`-prefixed line terminated by `\r`; the station
/// answers `$OK ...` or `$NK`, optionally followed by a `^xx` checksum.
pub struct RapiCharger<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> RapiCharger<R, W> {
    /// Wraps the two halves of a serial link.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Sends one command and returns the fields after `$OK`.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, DriverError> {
        write!(self.writer, "{cmd}\r")?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(DriverError::Detached);
        }
        trace!(cmd, response = line.trim_end(), "rapi exchange");

        let body = line.trim().split('^').next().unwrap_or_default();
        let mut fields = body.split_whitespace();
        match fields.next() {
            Some("$OK") => Ok(fields.map(str::to_string).collect()),
            Some("$NK") => Err(DriverError::Rejected(cmd.to_string())),
            _ => Err(DriverError::Protocol(line.trim().to_string())),
        }
    }

    fn field<T: std::str::FromStr>(fields: &[String], index: usize) -> Result<T, DriverError> {
        fields
            .get(index)
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| DriverError::Protocol(fields.join(" ")))
    }
}

impl<R: BufRead + Send, W: Write + Send> ChargerDriver for RapiCharger<R, W> {
    fn read_current(&mut self) -> Result<f32, DriverError> {
        let fields = self.command("$GG")?;
        let milliamps: f32 = Self::field(&fields, 0)?;
        Ok(milliamps / 1000.0)
    }

    fn set_current(&mut self, amps: f32) -> Result<(), DriverError> {
        self.command(&format!("$SC {}", amps.round() as u32))
            .map(|_| ())
    }

    fn plug_confirmed(&mut self) -> Result<bool, DriverError> {
        let fields = self.command("$GS")?;
        let state: u32 = Self::field(&fields, 0)?;
        Ok(matches!(state, STATE_CONNECTED | STATE_CHARGING))
    }

    fn name(&self) -> &'static str {
        "openevse"
    }
}
