//! Rebuilding engine state from the telemetry files of an interrupted run.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::telemetry::{STATIONS_FILE, VEHICLES_FILE};
use crate::config::ScenarioConfig;
use crate::error::LoadError;
use crate::sim::roster::{Roster, TickSummary};
use crate::sim::scheduler::{Arrival, ArrivalQueue, Scheduler, sort_roster};
use crate::sim::station::Station;
use crate::sim::types::{EngineParams, StationRecord, VehicleRecord};

/// State recovered from a telemetry directory.
#[derive(Debug)]
pub struct Checkpoint {
    /// Roster as of the last persisted tick.
    pub roster: Roster,
    /// Arrivals that were not yet admitted.
    pub arrivals: ArrivalQueue,
    /// First tick to run.
    pub next_tick: u64,
    /// Run-clock time of the last persisted tick (seconds).
    pub resumed_at: f32,
}

/// Restores roster, stations and tick index from `dir`.
///
/// The latest row per station and per vehicle wins. A vehicle is back in
/// the roster when its latest row belongs to the last persisted tick; one
/// whose rows stop earlier has departed. Arrivals that were due but never
/// recorded go back to the queue. Hardware-backed sessions are not restored
/// and must register again.
///
/// Telemetry is written before the control pass of the same tick, so when
/// the last persisted tick is a control tick that pass is run again here.
/// It admits due arrivals straight into the roster and recomputes assist,
/// priorities and order as of the resume point.
///
/// # Errors
///
/// Returns a `LoadError` if a file cannot be read, a row is malformed or
/// references a station outside the pool, or no rows exist at all.
pub fn restore(
    dir: &Path,
    cfg: &ScenarioConfig,
    params: &EngineParams,
    arrivals: Vec<Arrival>,
) -> Result<Checkpoint, LoadError> {
    let station_path = dir.join(STATIONS_FILE);
    let vehicle_path = dir.join(VEHICLES_FILE);
    let station_rows: Vec<StationRecord> = read_rows(&station_path)?;
    let vehicle_rows: Vec<VehicleRecord> = read_rows(&vehicle_path)?;

    let Some(last_time) = station_rows
        .iter()
        .map(|r| r.timestamp)
        .chain(vehicle_rows.iter().map(|r| r.timestamp))
        .reduce(f32::max)
    else {
        return Err(LoadError::Empty { path: station_path });
    };

    let mut stations = Station::pool(
        cfg.stations.max_vehicles,
        cfg.stations.rated_capacity_kwh,
        cfg.stations.initial_soc,
    );
    for (index, row) in station_rows.iter().enumerate() {
        let Some(station) = stations.get_mut(row.station_id) else {
            return Err(LoadError::Record {
                path: station_path,
                record: index as u64 + 1,
                message: format!("station {} is outside the pool", row.station_id),
            });
        };
        station.capacity_kwh = row.capacity_kwh.clamp(0.0, station.rated_capacity_kwh);
        station.discharge_current = row.discharge_current;
        station.charge_current = row.charge_current;
    }

    let mut latest: HashMap<&str, (usize, &VehicleRecord)> = HashMap::new();
    for (index, row) in vehicle_rows.iter().enumerate() {
        latest.insert(row.vehicle_id.as_str(), (index, row));
    }

    let mut roster = Roster::new(stations);
    let mut pending = Vec::new();
    for arrival in arrivals {
        if arrival.arrival_time > last_time {
            pending.push(arrival);
            continue;
        }
        match latest.remove(arrival.id.as_str()) {
            Some((index, row)) if row.timestamp >= last_time => {
                if row.station_id >= roster.stations.len() {
                    return Err(LoadError::Record {
                        path: vehicle_path,
                        record: index as u64 + 1,
                        message: format!("station {} is outside the pool", row.station_id),
                    });
                }
                let mut vehicle = arrival.into_vehicle(row.station_id, params);
                vehicle.restore_from(row);
                if let Err(rejected) = roster.admit(vehicle) {
                    return Err(LoadError::Record {
                        path: vehicle_path,
                        record: index as u64 + 1,
                        message: format!("slot {} restored twice", rejected.station_id),
                    });
                }
            }
            Some(_) => {}
            None if arrival.deadline > last_time => pending.push(arrival),
            None => {}
        }
    }
    for (_, row) in latest.into_values().filter(|(_, r)| r.timestamp >= last_time) {
        warn!(vehicle = %row.vehicle_id, "session not in the arrival list, must register again");
    }

    let last_tick = (last_time / params.tick_seconds).round().max(0.0) as u64;
    let mut arrivals = ArrivalQueue::new(pending);
    if last_tick % params.control_ratio == 0 {
        let mut scheduler = Scheduler::new(arrivals, params.clone());
        let pass = scheduler.pass(&mut roster, last_time);
        info!(
            tick = last_tick,
            admitted = pass.admitted,
            departed = pass.departed.len(),
            "control pass replayed"
        );
        arrivals = scheduler.into_arrivals();
    } else {
        sort_roster(&mut roster);
    }
    roster.last_tick = TickSummary {
        tick: last_tick,
        time_s: last_time,
        ..TickSummary::default()
    };
    info!(
        resumed_at = last_time,
        vehicles = roster.vehicles.len(),
        pending = arrivals.len(),
        "checkpoint restored"
    );

    Ok(Checkpoint {
        roster,
        arrivals,
        next_tick: last_tick + 1,
        resumed_at: last_time,
    })
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rdr = csv::Reader::from_reader(file);
    rdr.deserialize()
        .enumerate()
        .map(|(index, row)| {
            row.map_err(|e| LoadError::Record {
                path: path.to_path_buf(),
                record: index as u64 + 1,
                message: e.to_string(),
            })
        })
        .collect()
}
