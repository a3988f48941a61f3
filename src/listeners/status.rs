//! Periodic status publication to a single best-effort subscriber.
//!
//! Each snapshot is one JSON line. When the subscriber goes away the
//! publisher waits for the next one; nothing is buffered in between.

use std::collections::BTreeMap;
use std::io::{self, ErrorKind, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::sim::roster::{EngineState, Roster};
use crate::sim::types::{ChargeMode, EngineParams, StationId};
use crate::sim::vehicle::Vehicle;

const SLEEP_SLICE: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// What one connected vehicle looks like to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSummary {
    /// Vehicle identity.
    pub id: String,
    /// How the vehicle is observed.
    pub mode: ChargeMode,
    /// Energy still required, as a percentage of the vehicle battery.
    pub soc_remaining_pct: f32,
    /// Energy still required (kWh).
    pub energy_deficit_kwh: f32,
    /// Commanded current (A).
    pub assigned_current: f32,
    /// Observed draw (A).
    pub measured_current: f32,
    /// Battery-sourced share of the commanded current (A).
    pub assist_current: f32,
    /// Normalized priority.
    pub priority: f32,
    /// Departure time (seconds).
    pub deadline: f32,
    /// Station leased this tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leased_station_id: Option<StationId>,
}

impl From<&Vehicle> for VehicleSummary {
    fn from(v: &Vehicle) -> Self {
        Self {
            id: v.id.clone(),
            mode: v.mode,
            soc_remaining_pct: v.soc_remaining_pct(),
            energy_deficit_kwh: v.energy_deficit_kwh,
            assigned_current: v.assigned_current,
            measured_current: v.measured_current,
            assist_current: v.battery_assist_current,
            priority: v.priority,
            deadline: v.deadline,
            leased_station_id: (v.battery_assist_current > 0.0)
                .then_some(v.assigned_battery_id)
                .flatten(),
        }
    }
}

/// A charging slot: empty, or the vehicle plugged into it.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotStatus {
    /// Nobody plugged in.
    Empty,
    /// A vehicle is charging.
    Occupied(VehicleSummary),
}

impl Serialize for SlotStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_str("empty"),
            Self::Occupied(summary) => summary.serialize(serializer),
        }
    }
}

/// Buffer battery state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryStatus {
    /// Station id.
    pub station_id: StationId,
    /// Stored energy (kWh).
    pub capacity_kwh: f32,
    /// Stored energy as a fraction of rated capacity.
    pub soc: f32,
    /// Current to the leaseholder (A).
    pub discharge_current: f32,
    /// Self-charge current (A).
    pub charge_current: f32,
}

/// Aggregates over the whole site.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    /// Connected vehicles.
    pub vehicles: usize,
    /// Grid current to vehicles (A).
    pub grid_current: f32,
    /// Battery-sourced current to vehicles (A).
    pub assist_current: f32,
    /// Grid current to self-charging batteries (A).
    pub self_charge_current: f32,
    /// Energy stored across all batteries (kWh).
    pub stored_energy_kwh: f32,
}

/// Status snapshot taken under a single roster lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Time of the last completed tick (seconds).
    pub tick_time: f32,
    /// Building load sample of that tick (kW).
    pub building_load_kw: f32,
    /// Service capacity left after the building load (kW).
    pub building_headroom_kw: f32,
    /// Current budget of that tick (A).
    pub available_current: f32,
    /// Every slot, by station id.
    pub stations: BTreeMap<StationId, SlotStatus>,
    /// Buffer batteries.
    pub batteries: Vec<BatteryStatus>,
    /// Site totals.
    pub totals: Totals,
}

impl StatusSnapshot {
    /// Captures the current state.
    pub fn capture(state: &EngineState, params: &EngineParams) -> Self {
        Self::from_roster(&state.lock(), params)
    }

    /// Builds a snapshot from a locked roster.
    pub fn from_roster(roster: &Roster, params: &EngineParams) -> Self {
        let stations = roster
            .stations
            .iter()
            .map(|s| {
                let slot = roster
                    .occupant(s.id)
                    .map_or(SlotStatus::Empty, |v| SlotStatus::Occupied(v.into()));
                (s.id, slot)
            })
            .collect();
        let batteries = roster
            .stations
            .iter()
            .map(|s| BatteryStatus {
                station_id: s.id,
                capacity_kwh: s.capacity_kwh,
                soc: s.soc(),
                discharge_current: s.discharge_current,
                charge_current: s.charge_current,
            })
            .collect();
        let last = &roster.last_tick;
        Self {
            tick_time: last.time_s,
            building_load_kw: last.building_load_kw,
            building_headroom_kw: params.max_building_capacity_kw - last.building_load_kw,
            available_current: last.available_current,
            stations,
            batteries,
            totals: Totals {
                vehicles: roster.vehicles.len(),
                grid_current: last.grid_current,
                assist_current: last.assist_current,
                self_charge_current: last.self_charge_current,
                stored_energy_kwh: roster.stations.iter().map(|s| s.capacity_kwh).sum(),
            },
        }
    }
}

/// Publishes a snapshot every `period` to whoever is connected.
pub struct StatusPublisher {
    state: Arc<EngineState>,
    params: EngineParams,
    period: Duration,
}

impl StatusPublisher {
    /// Creates a publisher.
    pub fn new(state: Arc<EngineState>, params: EngineParams, period: Duration) -> Self {
        Self {
            state,
            params,
            period,
        }
    }

    /// Binds `addr` and publishes on a background thread until the engine
    /// finishes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be bound.
    pub fn spawn(self, addr: impl ToSocketAddrs) -> io::Result<JoinHandle<()>> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!(addr = %listener.local_addr()?, "status publisher listening");
        Ok(thread::spawn(move || self.run(&listener)))
    }

    fn run(&self, listener: &TcpListener) {
        let mut subscriber: Option<TcpStream> = None;
        while !self.state.is_finished() {
            if subscriber.is_none() {
                subscriber = self.accept(listener);
            }
            if let Some(stream) = subscriber.as_mut() {
                if let Err(e) = self.publish(stream) {
                    debug!(error = %e, "status subscriber dropped");
                    subscriber = None;
                }
            }
            self.sleep_period();
        }
        debug!("status publisher stopped");
    }

    fn accept(&self, listener: &TcpListener) -> Option<TcpStream> {
        match listener.accept() {
            Ok((stream, peer)) => {
                let ready = stream
                    .set_nonblocking(false)
                    .and_then(|()| stream.set_write_timeout(Some(WRITE_TIMEOUT)));
                match ready {
                    Ok(()) => {
                        info!(%peer, "status subscriber connected");
                        Some(stream)
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "cannot configure status subscriber");
                        None
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(error = %e, "status accept failed");
                None
            }
        }
    }

    fn publish(&self, stream: &mut TcpStream) -> io::Result<()> {
        let snapshot = StatusSnapshot::capture(&self.state, &self.params);
        let line = serde_json::to_string(&snapshot)?;
        writeln!(stream, "{line}")?;
        stream.flush()
    }

    fn sleep_period(&self) {
        let mut left = self.period;
        while !left.is_zero() && !self.state.is_finished() {
            let slice = left.min(SLEEP_SLICE);
            thread::sleep(slice);
            left -= slice;
        }
    }
}
