//! The slow control pass: admission, eviction, assist activation and
//! priority ordering.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{info, warn};

use super::roster::Roster;
use super::types::{ChargeMode, EngineParams, FinalSoc, StationId};
use super::vehicle::Vehicle;

/// One entry of the arrival list with its battery class already resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Arrival {
    /// Vehicle identity.
    pub id: String,
    /// Run-clock time the vehicle plugs in (seconds).
    pub arrival_time: f32,
    /// Run-clock departure time (seconds).
    pub deadline: f32,
    /// Battery class name.
    pub battery_class: String,
    /// Capacity of the battery class (kWh).
    pub capacity_kwh: f32,
    /// Requested state-of-charge gain in percent.
    pub desired_soc_delta_pct: f32,
    /// Yields to other vehicles.
    pub sleep_mode: bool,
}

impl Arrival {
    /// Builds the simulated vehicle for this arrival in `station_id`.
    pub fn into_vehicle(self, station_id: StationId, params: &EngineParams) -> Vehicle {
        Vehicle::new(
            self.id,
            station_id,
            ChargeMode::Simulated,
            self.sleep_mode,
            self.capacity_kwh,
            self.desired_soc_delta_pct,
            self.deadline,
            params,
        )
    }
}

/// Arrivals not yet admitted, in arrival-time order.
#[derive(Debug, Clone, Default)]
pub struct ArrivalQueue {
    pending: VecDeque<Arrival>,
}

impl ArrivalQueue {
    /// Creates a queue, ordering arrivals by time (stable for equal times).
    pub fn new(mut arrivals: Vec<Arrival>) -> Self {
        arrivals.sort_by(|a, b| a.arrival_time.total_cmp(&b.arrival_time));
        Self {
            pending: arrivals.into(),
        }
    }

    /// Arrivals still waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether every arrival has been admitted.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and returns every arrival due at `now`.
    pub fn take_due(&mut self, now: f32) -> Vec<Arrival> {
        let due = self
            .pending
            .iter()
            .take_while(|a| a.arrival_time <= now)
            .count();
        self.pending.drain(..due).collect()
    }

    /// Admits due arrivals into the lowest free slots.
    ///
    /// Arrivals that find no free slot stay queued, in order, for the next
    /// pass. Returns the number admitted.
    pub fn admit_due(&mut self, roster: &mut Roster, now: f32, params: &EngineParams) -> usize {
        let mut admitted = 0;
        while self.pending.front().is_some_and(|a| a.arrival_time <= now) {
            let Some(slot) = roster.free_slot() else {
                warn!(waiting = self.pending.len(), "no free charging slot, arrivals held");
                break;
            };
            let Some(arrival) = self.pending.pop_front() else {
                break;
            };
            let vehicle = arrival.into_vehicle(slot, params);
            info!(
                vehicle = %vehicle.id,
                station = slot,
                deficit_kwh = vehicle.energy_deficit_kwh,
                deadline = vehicle.deadline,
                "vehicle arrived"
            );
            match roster.admit(vehicle) {
                Ok(()) => admitted += 1,
                Err(rejected) => warn!(vehicle = %rejected.id, "duplicate vehicle id, arrival dropped"),
            }
        }
        admitted
    }
}

/// Latches assist on for every vehicle that can no longer finish on grid
/// current alone. Returns the ids newly switched on.
pub fn activate_assist(roster: &mut Roster, now: f32, params: &EngineParams) -> Vec<String> {
    let mut activated = Vec::new();
    for vehicle in roster
        .vehicles
        .iter_mut()
        .filter(|v| !v.assist_enabled())
    {
        if vehicle.needs_assist(now, params) {
            vehicle.enable_assist();
            info!(
                vehicle = %vehicle.id,
                deficit_kwh = vehicle.energy_deficit_kwh,
                "battery assist enabled"
            );
            activated.push(vehicle.id.clone());
        }
    }
    activated
}

/// Recomputes urgency-based priorities.
///
/// When the raw urgencies sum to zero they are left as computed.
pub fn update_priorities(roster: &mut Roster, now: f32) {
    for vehicle in &mut roster.vehicles {
        vehicle.priority = vehicle.urgency(now);
    }
    let total: f32 = roster.priority_sum();
    if total > 0.0 {
        for vehicle in &mut roster.vehicles {
            vehicle.priority /= total;
        }
    }
}

/// Orders the roster for the allocation loop: non-sleep-mode vehicles
/// first, then by descending priority. Equal keys keep their order.
pub fn sort_roster(roster: &mut Roster) {
    roster.vehicles.sort_by(|a, b| {
        a.sleep_mode
            .cmp(&b.sleep_mode)
            .then_with(|| b.priority.total_cmp(&a.priority))
    });
}

/// Outcome of one control pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Vehicles admitted from the arrival list.
    pub admitted: usize,
    /// Vehicles that reached their deadline.
    pub departed: Vec<FinalSoc>,
    /// Vehicles whose assist latch was switched on.
    pub assist_activated: Vec<String>,
}

/// Owns the arrival list and runs control passes over the roster.
#[derive(Debug, Clone)]
pub struct Scheduler {
    arrivals: ArrivalQueue,
    params: EngineParams,
}

impl Scheduler {
    /// Creates a scheduler over the arrivals still to come.
    pub fn new(arrivals: ArrivalQueue, params: EngineParams) -> Self {
        Self { arrivals, params }
    }

    /// Arrivals not yet admitted.
    pub fn pending(&self) -> usize {
        self.arrivals.len()
    }

    /// Gives back the arrivals not yet admitted.
    pub fn into_arrivals(self) -> ArrivalQueue {
        self.arrivals
    }

    /// Runs one control pass at run-clock time `now`.
    ///
    /// Eviction always precedes the priority update so no departed vehicle
    /// is divided by a non-positive horizon.
    pub fn pass(&mut self, roster: &mut Roster, now: f32) -> PassReport {
        let admitted = self.arrivals.admit_due(roster, now, &self.params);
        let departed = roster.evict_departed(now);
        let assist_activated = activate_assist(roster, now, &self.params);
        update_priorities(roster, now);
        sort_roster(roster);
        PassReport {
            admitted,
            departed,
            assist_activated,
        }
    }
}
