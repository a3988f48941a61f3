//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use ev_cms::config::ScenarioConfig;
use ev_cms::devices::{NullBufferCharger, SimulatedCharger};
use ev_cms::sim::allocation::{Drivers, run_tick};
use ev_cms::sim::roster::Roster;
use ev_cms::sim::scheduler::Arrival;
use ev_cms::sim::station::Station;
use ev_cms::sim::types::{ChargeMode, EngineParams, TickReport};
use ev_cms::sim::vehicle::Vehicle;

/// Baseline parameters at 250 V, where every test budget is an exact f32.
pub fn params() -> EngineParams {
    let mut p = EngineParams::from_config(&ScenarioConfig::baseline());
    p.voltage = 250.0;
    p
}

/// Building load (kW) that leaves exactly `amps` of budget.
pub fn load_for(p: &EngineParams, amps: f32) -> f32 {
    p.max_building_capacity_kw - amps * p.voltage / 1000.0
}

/// Simulated vehicle with a 40 kWh battery wanting half of it by `deadline`.
pub fn vehicle(id: &str, slot: usize, priority: f32, p: &EngineParams) -> Vehicle {
    let mut v = Vehicle::new(id, slot, ChargeMode::Simulated, false, 40.0, 50.0, 36_000.0, p);
    v.priority = priority;
    v
}

/// Roster over stations with the given state of charge, 13.5 kWh rated.
pub fn roster_with(vehicles: Vec<Vehicle>, socs: &[f32]) -> Roster {
    let stations = socs
        .iter()
        .enumerate()
        .map(|(id, &soc)| Station::new(id, 13.5, soc))
        .collect();
    let mut roster = Roster::new(stations);
    for v in vehicles {
        roster.admit(v).expect("distinct ids and slots");
    }
    roster
}

/// Runs one allocation tick at time 0 with simulated drivers.
pub fn tick(roster: &mut Roster, amps: f32, p: &EngineParams) -> TickReport {
    let mut charger = SimulatedCharger::new(p.efficiency);
    let mut buffer = NullBufferCharger::default();
    let mut drivers = Drivers {
        charger: &mut charger,
        buffer: &mut buffer,
    };
    run_tick(roster, 0, 0.0, load_for(p, amps), p, &mut drivers)
}

/// Dataset arrival of a 40 kWh vehicle.
pub fn arrival(id: &str, at: f32, deadline: f32, pct: f32) -> Arrival {
    Arrival {
        id: id.to_string(),
        arrival_time: at,
        deadline,
        battery_class: "nissan leaf".to_string(),
        capacity_kwh: 40.0,
        desired_soc_delta_pct: pct,
        sleep_mode: false,
    }
}

/// A mixed arrival list: early and late vehicles, one sleeper, one tight
/// deadline. Five vehicles, so with four slots the last one is held.
pub fn mixed_arrivals() -> Vec<Arrival> {
    let mut sleeper = arrival("sleeper", 0.0, 3_000.0, 30.0);
    sleeper.sleep_mode = true;
    vec![
        arrival("early", 0.0, 600.0, 80.0),
        sleeper,
        arrival("mid", 20.0, 2_000.0, 40.0),
        arrival("late", 90.0, 5_000.0, 60.0),
        arrival("tight", 10.0, 400.0, 50.0),
    ]
}

/// Asserts every vehicle is either paused or within its current bounds.
pub fn assert_bounds(roster: &Roster) {
    for v in &roster.vehicles {
        assert!(
            v.assigned_current == 0.0
                || (v.min_current <= v.assigned_current && v.assigned_current <= v.max_current),
            "{} assigned {} outside [{}, {}]",
            v.id,
            v.assigned_current,
            v.min_current,
            v.max_current
        );
    }
}
