//! The roster store: every active vehicle and buffer-battery station behind a
//! single mutex, plus the control-pass signal shared by the two loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::info;

use super::station::Station;
use super::types::{FinalSoc, RESERVED_STATION, StationId};
use super::vehicle::Vehicle;

/// Aggregates of the most recent allocation tick, kept for status readers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    /// Tick index.
    pub tick: u64,
    /// Tick-clock time (seconds).
    pub time_s: f32,
    /// Building load sample (kW).
    pub building_load_kw: f32,
    /// Current budget before allocation (A).
    pub available_current: f32,
    /// Grid current drawn by vehicles (A).
    pub grid_current: f32,
    /// Battery-sourced current delivered to vehicles (A).
    pub assist_current: f32,
    /// Grid current drawn by self-charging stations (A).
    pub self_charge_current: f32,
}

/// Vehicles in priority order plus the station pool.
#[derive(Debug, Clone)]
pub struct Roster {
    /// Active vehicles, ordered by the last control pass.
    pub vehicles: Vec<Vehicle>,
    /// Station pool indexed by station id.
    pub stations: Vec<Station>,
    /// Aggregates of the last completed tick.
    pub last_tick: TickSummary,
    /// Final reports of every vehicle that has left the roster.
    pub departures: Vec<FinalSoc>,
}

impl Roster {
    /// Creates an empty roster over `stations`.
    ///
    /// # Panics
    ///
    /// Panics if station ids do not match their positions.
    pub fn new(stations: Vec<Station>) -> Self {
        assert!(stations.iter().enumerate().all(|(i, s)| s.id == i));
        Self {
            vehicles: Vec::new(),
            stations,
            last_tick: TickSummary::default(),
            departures: Vec::new(),
        }
    }

    /// Looks up a vehicle by id.
    pub fn vehicle(&self, id: &str) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.id == id)
    }

    /// Vehicle occupying a station slot.
    pub fn occupant(&self, station_id: StationId) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.station_id == station_id)
    }

    /// Lowest non-reserved slot with no vehicle in it.
    pub fn free_slot(&self) -> Option<StationId> {
        self.stations
            .iter()
            .map(|s| s.id)
            .filter(|&id| id != RESERVED_STATION)
            .find(|&id| self.occupant(id).is_none())
    }

    /// Appends a vehicle. Returns it back if the id or slot is taken.
    ///
    /// # Errors
    ///
    /// Returns the rejected vehicle when another vehicle already uses its id
    /// or its station slot.
    pub fn admit(&mut self, vehicle: Vehicle) -> Result<(), Box<Vehicle>> {
        if self.vehicle(&vehicle.id).is_some() || self.occupant(vehicle.station_id).is_some() {
            return Err(Box::new(vehicle));
        }
        self.vehicles.push(vehicle);
        Ok(())
    }

    /// Removes the vehicle at `index`, releases its lease and records its
    /// final state of charge.
    fn depart(&mut self, index: usize, now: f32) -> FinalSoc {
        let vehicle = self.vehicles.remove(index);
        if let Some(station) = vehicle
            .assigned_battery_id
            .and_then(|id| self.stations.get_mut(id))
        {
            station.release(&vehicle.id);
        }
        let report = FinalSoc {
            vehicle_id: vehicle.id,
            time_s: now,
            soc_remaining_pct: vehicle.energy_deficit_kwh / vehicle.capacity_kwh * 100.0,
            energy_deficit_kwh: vehicle.energy_deficit_kwh,
        };
        info!(
            vehicle = %report.vehicle_id,
            soc_remaining_pct = report.soc_remaining_pct,
            "vehicle departed"
        );
        self.departures.push(report.clone());
        report
    }

    /// Removes every vehicle whose deadline has been reached.
    pub fn evict_departed(&mut self, now: f32) -> Vec<FinalSoc> {
        let mut reports = Vec::new();
        while let Some(index) = self.vehicles.iter().position(|v| v.deadline <= now) {
            reports.push(self.depart(index, now));
        }
        reports
    }

    /// Explicit disconnect of one vehicle.
    pub fn disconnect(&mut self, id: &str, now: f32) -> Option<FinalSoc> {
        let index = self.vehicles.iter().position(|v| v.id == id)?;
        Some(self.depart(index, now))
    }

    /// Final reports for every vehicle still connected, without removing them.
    pub fn final_soc(&self, now: f32) -> Vec<FinalSoc> {
        self.vehicles
            .iter()
            .map(|v| FinalSoc {
                vehicle_id: v.id.clone(),
                time_s: now,
                soc_remaining_pct: v.soc_remaining_pct(),
                energy_deficit_kwh: v.energy_deficit_kwh,
            })
            .collect()
    }

    /// Sum of all vehicle priorities.
    pub fn priority_sum(&self) -> f32 {
        self.vehicles.iter().map(|v| v.priority).sum()
    }
}

/// Control-pass handshake between the allocation loop and the scheduler.
#[derive(Debug, Default)]
struct ControlSignal {
    requested: Option<u64>,
    completed: Option<u64>,
    finished: bool,
}

/// Engine state shared by the allocation loop, the scheduler and listeners.
///
/// Every roster access goes through [`EngineState::lock`]. The control
/// signal has its own small lock so signaling never holds the roster.
#[derive(Debug)]
pub struct EngineState {
    roster: Mutex<Roster>,
    control: Mutex<ControlSignal>,
    control_cv: Condvar,
    finished: AtomicBool,
}

impl EngineState {
    /// Wraps a roster in shared state.
    pub fn new(roster: Roster) -> Arc<Self> {
        Arc::new(Self {
            roster: Mutex::new(roster),
            control: Mutex::new(ControlSignal::default()),
            control_cv: Condvar::new(),
            finished: AtomicBool::new(false),
        })
    }

    /// Locks the roster.
    pub fn lock(&self) -> MutexGuard<'_, Roster> {
        self.roster.lock()
    }

    /// Requests a control pass for `tick`. Holds the signal lock only for the
    /// notification.
    pub fn signal_control(&self, tick: u64) {
        let mut signal = self.control.lock();
        signal.requested = Some(tick);
        self.control_cv.notify_all();
    }

    /// Blocks until a control pass is requested. Returns `None` once the run
    /// has finished and no request is pending.
    pub fn wait_for_control(&self) -> Option<u64> {
        let mut signal = self.control.lock();
        loop {
            if let Some(tick) = signal.requested.take() {
                return Some(tick);
            }
            if signal.finished {
                return None;
            }
            self.control_cv.wait(&mut signal);
        }
    }

    /// Marks the control pass for `tick` complete.
    pub fn complete_control(&self, tick: u64) {
        let mut signal = self.control.lock();
        signal.completed = Some(tick);
        self.control_cv.notify_all();
    }

    /// Blocks until the control pass for `tick` (or a later one) completed,
    /// or the run finished.
    pub fn wait_control_complete(&self, tick: u64) {
        let mut signal = self.control.lock();
        while !signal.finished && signal.completed.is_none_or(|done| done < tick) {
            self.control_cv.wait(&mut signal);
        }
    }

    /// Ends the run and wakes every waiter.
    pub fn finish(&self) {
        let mut signal = self.control.lock();
        signal.finished = true;
        self.finished.store(true, Ordering::SeqCst);
        self.control_cv.notify_all();
    }

    /// Whether the building-load trace has been exhausted.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
