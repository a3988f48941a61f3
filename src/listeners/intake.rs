//! Arrival intake for the hardware-backed charging point.
//!
//! A client connects, sends one JSON message on a single line and reads one
//! JSON reply line. Messages are tagged by `type`:
//!
//! ```text
//! {"type":"arrival","id":"ev7","battery_class":"nissan leaf","desired_soc_delta_pct":40,"deadline":7200}
//! {"type":"disconnect","id":"ev7"}
//! ```

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::devices::SharedCharger;
use crate::error::IntakeError;
use crate::io::traces::battery_class_key;
use crate::sim::roster::EngineState;
use crate::sim::types::{ChargeMode, EngineParams, FinalSoc, RESERVED_STATION};
use crate::sim::vehicle::Vehicle;

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A vehicle plugging into the hardware-backed charging point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalDescriptor {
    /// Vehicle identity.
    pub id: String,
    /// Battery class name.
    pub battery_class: String,
    /// Requested state-of-charge gain in percent.
    pub desired_soc_delta_pct: f32,
    /// Departure time on the run clock (seconds).
    pub deadline: f32,
    /// Yields to other vehicles.
    #[serde(default)]
    pub sleep_mode: bool,
}

/// One intake request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntakeMessage {
    /// Register a vehicle at the hardware slot.
    Arrival(ArrivalDescriptor),
    /// Remove a connected vehicle before its deadline.
    Disconnect {
        /// Vehicle identity.
        id: String,
    },
}

/// Reply line sent back to the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeReply {
    /// Whether the request was applied.
    pub ok: bool,
    /// Why it was not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Final report of a disconnected vehicle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_soc: Option<FinalSoc>,
}

impl IntakeReply {
    fn from_result(result: Result<Option<FinalSoc>, IntakeError>) -> Self {
        match result {
            Ok(final_soc) => Self {
                ok: true,
                error: None,
                final_soc,
            },
            Err(e) => Self {
                ok: false,
                error: Some(e.to_string()),
                final_soc: None,
            },
        }
    }
}

/// Everything intake needs: the shared roster, the hardware charger and the
/// battery classes it may resolve.
#[derive(Clone)]
pub struct Intake {
    state: Arc<EngineState>,
    charger: SharedCharger,
    classes: BTreeMap<String, f32>,
    params: EngineParams,
}

impl Intake {
    /// Creates an intake handler.
    pub fn new(
        state: Arc<EngineState>,
        charger: SharedCharger,
        classes: &BTreeMap<String, f32>,
        params: EngineParams,
    ) -> Self {
        Self {
            state,
            charger,
            classes: classes
                .iter()
                .map(|(name, &kwh)| (battery_class_key(name), kwh))
                .collect(),
            params,
        }
    }

    /// Applies one message.
    ///
    /// # Errors
    ///
    /// Returns the reason the message was refused.
    pub fn handle(&self, message: IntakeMessage) -> Result<Option<FinalSoc>, IntakeError> {
        match message {
            IntakeMessage::Arrival(descriptor) => self.admit(descriptor).map(|()| None),
            IntakeMessage::Disconnect { id } => self.disconnect(&id).map(Some),
        }
    }

    /// Registers a hardware-backed vehicle in the reserved slot.
    ///
    /// The descriptor is validated first, then the station must confirm a
    /// plugged-in vehicle. The roster lock is held only for the final insert.
    ///
    /// # Errors
    ///
    /// Returns an `IntakeError` if the descriptor is invalid, the deadline
    /// has passed, the slot is taken, the id is in use, or the station does
    /// not confirm the plug.
    pub fn admit(&self, descriptor: ArrivalDescriptor) -> Result<(), IntakeError> {
        if self.state.is_finished() {
            return Err(IntakeError::Finished);
        }
        if descriptor.id.trim().is_empty() {
            return Err(IntakeError::Malformed("empty vehicle id".to_string()));
        }
        if !(0.0..=100.0).contains(&descriptor.desired_soc_delta_pct) {
            return Err(IntakeError::Malformed(
                "desired_soc_delta_pct must be in [0, 100]".to_string(),
            ));
        }
        let Some(&capacity_kwh) = self.classes.get(&battery_class_key(&descriptor.battery_class))
        else {
            return Err(IntakeError::UnknownBatteryClass(descriptor.battery_class));
        };

        let now = self.state.lock().last_tick.time_s;
        if !(descriptor.deadline > now) {
            return Err(IntakeError::DeadlinePassed {
                deadline: descriptor.deadline,
                now,
            });
        }
        self.check_free(&descriptor.id)?;

        if !self.charger.lock().plug_confirmed()? {
            return Err(IntakeError::NotPlugged);
        }

        let vehicle = Vehicle::new(
            descriptor.id,
            RESERVED_STATION,
            ChargeMode::HardwareBacked,
            descriptor.sleep_mode,
            capacity_kwh,
            descriptor.desired_soc_delta_pct,
            descriptor.deadline,
            &self.params,
        );
        let mut roster = self.state.lock();
        if let Err(rejected) = roster.admit(vehicle) {
            drop(roster);
            self.check_free(&rejected.id)?;
            return Err(IntakeError::Duplicate(rejected.id));
        }
        if let Some(v) = roster.occupant(RESERVED_STATION) {
            info!(
                vehicle = %v.id,
                deficit_kwh = v.energy_deficit_kwh,
                deadline = v.deadline,
                "hardware vehicle registered"
            );
        }
        Ok(())
    }

    fn check_free(&self, id: &str) -> Result<(), IntakeError> {
        let roster = self.state.lock();
        if let Some(occupant) = roster.occupant(RESERVED_STATION) {
            return Err(IntakeError::SlotOccupied(occupant.id.clone()));
        }
        if roster.vehicle(id).is_some() {
            return Err(IntakeError::Duplicate(id.to_string()));
        }
        Ok(())
    }

    /// Removes a connected vehicle and reports its final state of charge.
    /// A hardware-backed vehicle also gets a 0 A setpoint.
    ///
    /// # Errors
    ///
    /// Returns `UnknownVehicle` if no such vehicle is connected.
    pub fn disconnect(&self, id: &str) -> Result<FinalSoc, IntakeError> {
        let (report, hardware) = {
            let mut roster = self.state.lock();
            let hardware = roster
                .vehicle(id)
                .is_some_and(|v| v.mode == ChargeMode::HardwareBacked);
            let now = roster.last_tick.time_s;
            let report = roster
                .disconnect(id, now)
                .ok_or_else(|| IntakeError::UnknownVehicle(id.to_string()))?;
            (report, hardware)
        };
        if hardware {
            if let Err(e) = self.charger.lock().set_current(0.0) {
                warn!(vehicle = id, error = %e, "could not stop charging point after disconnect");
            }
        }
        Ok(report)
    }

    /// Reads one request line from `stream`, applies it and writes the reply.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the connection fails; refused requests are
    /// reported to the client, not returned.
    pub fn serve_connection(&self, stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut writer = stream.try_clone()?;
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line)?;
        if line.trim().is_empty() {
            return Ok(());
        }

        let result = serde_json::from_str::<IntakeMessage>(line.trim())
            .map_err(|e| IntakeError::Malformed(e.to_string()))
            .and_then(|message| self.handle(message));
        if let Err(e) = &result {
            warn!(error = %e, "intake request refused");
        }
        let reply = serde_json::to_string(&IntakeReply::from_result(result))?;
        writeln!(writer, "{reply}")?;
        writer.flush()
    }

    /// Binds `addr` and serves one request per connection on a background
    /// thread until the engine finishes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be bound.
    pub fn spawn(self, addr: impl ToSocketAddrs) -> io::Result<JoinHandle<()>> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!(addr = %listener.local_addr()?, "intake listening");
        Ok(thread::spawn(move || self.accept_loop(&listener)))
    }

    fn accept_loop(&self, listener: &TcpListener) {
        while !self.state.is_finished() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "intake connection");
                    if let Err(e) = self.serve_connection(stream) {
                        warn!(%peer, error = %e, "intake connection failed");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    warn!(error = %e, "intake accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        debug!("intake stopped");
    }
}
