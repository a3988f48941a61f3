//! The fast allocation pass run once per tick.

use tracing::{info, warn};

use super::lease;
use super::roster::{Roster, TickSummary};
use super::types::{ChargeMode, EngineParams, RESERVED_STATION, TickReport};
use crate::devices::{BufferCharger, ChargerDriver};

/// Hardware the allocation pass talks to during one tick.
pub struct Drivers<'a> {
    /// The hardware-backed charging point.
    pub charger: &'a mut dyn ChargerDriver,
    /// The DC charger behind the reserved buffer battery.
    pub buffer: &'a mut dyn BufferCharger,
}

/// Runs one allocation tick over the roster.
///
/// Reads draw, updates energy deficits, settles the buffer batteries,
/// shares `available_current` out in roster order, leases batteries for
/// assist, hands leftover budget to the neediest batteries, and issues
/// setpoints for the hardware-backed slot.
///
/// # Arguments
///
/// * `roster` - The locked roster
/// * `tick` - Tick index
/// * `time_s` - Run time of this tick
/// * `building_load_kw` - Building load sample for this tick
/// * `params` - Engine parameters
/// * `drivers` - Hardware drivers
pub fn run_tick(
    roster: &mut Roster,
    tick: u64,
    time_s: f32,
    building_load_kw: f32,
    params: &EngineParams,
    drivers: &mut Drivers<'_>,
) -> TickReport {
    let available = params.available_current(building_load_kw);
    let Roster {
        vehicles,
        stations,
        last_tick,
        ..
    } = roster;

    for vehicle in vehicles.iter_mut() {
        let estimate = vehicle.assigned_current * params.efficiency;
        let measured = match vehicle.mode {
            ChargeMode::Simulated => estimate,
            ChargeMode::HardwareBacked => drivers.charger.read_current().unwrap_or_else(|e| {
                warn!(vehicle = %vehicle.id, error = %e, "current read failed, using estimate");
                estimate
            }),
        };
        vehicle.absorb(measured, params);
        if vehicle.mode == ChargeMode::HardwareBacked {
            if let Some(ceiling) = vehicle.observe_saturation(params) {
                info!(vehicle = %vehicle.id, max_current = ceiling, "charging saturated, lowering ceiling");
            }
        }
    }

    let reserved_charge_before = stations
        .get(RESERVED_STATION)
        .map_or(0.0, |s| s.charge_current);
    for station in stations.iter_mut() {
        station.settle(params);
    }

    let mut report = TickReport {
        tick,
        time_s,
        building_load_kw,
        available_current: available,
        ..TickReport::default()
    };
    let mut used = 0.0_f32;

    for vehicle in vehicles.iter_mut() {
        let previous = vehicle.assigned_current;
        let nominal = (available * vehicle.priority).floor();

        if vehicle.priority <= 0.0 {
            lease::release(stations, vehicle);
            vehicle.assigned_current = 0.0;
        } else if vehicle.assist_enabled() {
            let grid_share = nominal.clamp(0.0, vehicle.max_current);
            let shortfall = vehicle.max_current - grid_share;
            if shortfall > 0.0 && lease::acquire(stations, vehicle, shortfall, params).is_some() {
                vehicle.assigned_current = vehicle.max_current;
            } else {
                if shortfall > 0.0 {
                    report.denied_leases += 1;
                }
                lease::release(stations, vehicle);
                vehicle.assigned_current = vehicle.clamp_current(nominal);
            }
        } else if available - used < vehicle.min_current {
            let grid_share = (available - used).max(0.0);
            let shortfall = vehicle.min_current - grid_share;
            if vehicle.sleep_mode && lease::acquire(stations, vehicle, shortfall, params).is_some() {
                vehicle.assigned_current = vehicle.min_current;
            } else {
                if vehicle.sleep_mode {
                    report.denied_leases += 1;
                }
                lease::release(stations, vehicle);
                vehicle.assigned_current = 0.0;
                report.infeasible += 1;
                warn!(
                    vehicle = %vehicle.id,
                    remaining_a = available - used,
                    min_current = vehicle.min_current,
                    "budget below minimum current, vehicle paused"
                );
            }
        } else {
            lease::release(stations, vehicle);
            vehicle.assigned_current = vehicle.clamp_current(nominal);
        }

        used += vehicle.assigned_current - vehicle.battery_assist_current;
        report.assist_current += vehicle.battery_assist_current;

        if vehicle.mode == ChargeMode::HardwareBacked && vehicle.assigned_current != previous {
            if let Err(e) = drivers.charger.set_current(vehicle.assigned_current) {
                warn!(vehicle = %vehicle.id, error = %e, "setpoint not applied");
            }
        }
    }
    report.grid_current = used;

    let charge_current = params.self_charge_current();
    let mut leftover = available - used;
    let mut needy: Vec<usize> = stations
        .iter()
        .filter(|s| {
            s.is_idle() && s.capacity_kwh < params.self_charge_threshold * s.rated_capacity_kwh
        })
        .map(|s| s.id)
        .collect();
    needy.sort_by(|&a, &b| stations[a].capacity_kwh.total_cmp(&stations[b].capacity_kwh));
    for id in needy {
        if charge_current <= 0.0 || leftover < charge_current {
            break;
        }
        stations[id].charge_current = charge_current;
        leftover -= charge_current;
        report.self_charge_current += charge_current;
    }

    if let Some(reserved) = stations.get(RESERVED_STATION) {
        if reserved.charge_current != reserved_charge_before {
            let dc_amps = reserved.charge_current * params.voltage / params.buffer_bus_voltage;
            if let Err(e) = drivers
                .buffer
                .set_voltage_current(params.buffer_bus_voltage, dc_amps)
            {
                warn!(error = %e, "buffer charger setpoint not applied");
            }
        }
    }

    report.vehicles = vehicles.iter().map(|v| v.record(time_s)).collect();
    report.stations = stations.iter().map(|s| s.record(time_s)).collect();
    *last_tick = TickSummary {
        tick,
        time_s,
        building_load_kw,
        available_current: available,
        grid_current: report.grid_current,
        assist_current: report.assist_current,
        self_charge_current: report.self_charge_current,
    };
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;
    use crate::devices::{NullBufferCharger, SimulatedCharger};
    use crate::sim::station::Station;
    use crate::sim::vehicle::Vehicle;

    // 250 V keeps every budget below an exact f32.
    fn params() -> EngineParams {
        let mut p = EngineParams::from_config(&ScenarioConfig::baseline());
        p.voltage = 250.0;
        p.efficiency = 0.9;
        p.min_current = 6.0;
        p.max_current = 24.0;
        p.max_building_capacity_kw = 100.0;
        p.rated_capacity_kwh = 10.0;
        p
    }

    /// Building load that leaves exactly `amps` of budget.
    fn load_for(p: &EngineParams, amps: f32) -> f32 {
        p.max_building_capacity_kw - amps * p.voltage / 1000.0
    }

    fn vehicle(id: &str, slot: usize, priority: f32, p: &EngineParams) -> Vehicle {
        let mut v = Vehicle::new(id, slot, ChargeMode::Simulated, false, 40.0, 50.0, 36_000.0, p);
        v.priority = priority;
        v
    }

    fn hardware_vehicle(p: &EngineParams) -> Vehicle {
        let mut v = Vehicle::new("hw", 0, ChargeMode::HardwareBacked, false, 40.0, 90.0, 36_000.0, p);
        v.priority = 1.0;
        v
    }

    fn roster(vehicles: Vec<Vehicle>, socs: &[f32]) -> Roster {
        let stations = socs
            .iter()
            .enumerate()
            .map(|(id, &soc)| Station::new(id, 10.0, soc))
            .collect();
        let mut r = Roster::new(stations);
        r.vehicles = vehicles;
        r
    }

    fn tick(r: &mut Roster, amps: f32, p: &EngineParams) -> TickReport {
        let mut charger = SimulatedCharger::new(p.efficiency);
        let mut buffer = NullBufferCharger::default();
        let mut drivers = Drivers {
            charger: &mut charger,
            buffer: &mut buffer,
        };
        run_tick(r, 0, 0.0, load_for(p, amps), p, &mut drivers)
    }

    fn assert_bounds(r: &Roster) {
        for v in &r.vehicles {
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

    #[test]
    fn single_vehicle_clamped_to_max() {
        let p = params();
        let mut r = roster(vec![vehicle("a", 1, 1.0, &p)], &[1.0, 1.0]);
        tick(&mut r, 30.0, &p);
        assert_eq!(r.vehicles[0].assigned_current, 24.0);
        assert_bounds(&r);
    }

    #[test]
    fn proportional_shares_within_bounds() {
        let p = params();
        let mut r = roster(
            vec![vehicle("a", 1, 0.75, &p), vehicle("b", 2, 0.25, &p)],
            &[1.0, 1.0, 1.0],
        );
        let report = tick(&mut r, 24.0, &p);
        assert_eq!(r.vehicles[0].assigned_current, 18.0);
        assert_eq!(r.vehicles[1].assigned_current, 6.0);
        assert_eq!(report.grid_current, 24.0);
        assert_bounds(&r);
    }

    #[test]
    fn unscheduled_vehicle_gets_nothing() {
        let p = params();
        let mut r = roster(vec![vehicle("a", 1, 0.0, &p)], &[1.0, 1.0]);
        tick(&mut r, 30.0, &p);
        assert_eq!(r.vehicles[0].assigned_current, 0.0);
    }

    #[test]
    fn starved_vehicle_is_paused() {
        let p = params();
        let mut r = roster(
            vec![vehicle("a", 1, 0.75, &p), vehicle("b", 2, 0.25, &p)],
            &[1.0, 1.0, 1.0],
        );
        let report = tick(&mut r, 20.0, &p);
        assert_eq!(r.vehicles[0].assigned_current, 15.0);
        assert_eq!(r.vehicles[1].assigned_current, 0.0);
        assert_eq!(report.infeasible, 1);
        assert_bounds(&r);
    }

    #[test]
    fn sleep_mode_shortfall_leases_fullest_idle_battery() {
        let p = params();
        let mut sleeper = vehicle("s", 1, 0.25, &p);
        sleeper.sleep_mode = true;
        let mut r = roster(vec![vehicle("a", 2, 0.75, &p), sleeper], &[1.0, 0.0, 0.5, 0.8]);
        // a takes 15 of 20; 5 A left for s, 1 A short of its minimum
        let report = tick(&mut r, 20.0, &p);
        let s = &r.vehicles[1];
        assert_eq!(s.assigned_current, 6.0);
        assert_eq!(s.battery_assist_current, 1.0);
        assert_eq!(s.assigned_battery_id, Some(3));
        assert_eq!(r.stations[3].leased_to.as_deref(), Some("s"));
        assert_eq!(r.stations[3].discharge_current, 1.0);
        assert_eq!(report.infeasible, 0);
        assert_eq!(report.grid_current, 20.0);
        assert_bounds(&r);
    }

    #[test]
    fn sleep_mode_without_battery_is_paused() {
        let p = params();
        let mut sleeper = vehicle("s", 1, 1.0, &p);
        sleeper.sleep_mode = true;
        let mut r = roster(vec![sleeper], &[1.0, 0.0, 0.0]);
        let report = tick(&mut r, 4.0, &p);
        assert_eq!(r.vehicles[0].assigned_current, 0.0);
        assert_eq!(report.denied_leases, 1);
        assert_eq!(report.infeasible, 1);
    }

    #[test]
    fn assist_tops_up_to_max_current() {
        let p = params();
        let mut v = vehicle("a", 1, 1.0, &p);
        v.enable_assist();
        let mut r = roster(vec![v], &[1.0, 1.0]);
        let report = tick(&mut r, 10.0, &p);
        let v = &r.vehicles[0];
        assert_eq!(v.assigned_current, 24.0);
        assert_eq!(v.battery_assist_current, 14.0);
        assert_eq!(v.assigned_battery_id, Some(1));
        assert_eq!(report.grid_current, 10.0);
        assert_eq!(report.assist_current, 14.0);
    }

    #[test]
    fn assist_without_battery_falls_back_to_grid_share() {
        let p = params();
        let mut v = vehicle("a", 1, 1.0, &p);
        v.enable_assist();
        let mut r = roster(vec![v], &[1.0, 0.0]);
        let report = tick(&mut r, 10.0, &p);
        assert_eq!(r.vehicles[0].assigned_current, 10.0);
        assert_eq!(r.vehicles[0].assigned_battery_id, None);
        assert_eq!(report.denied_leases, 1);
    }

    #[test]
    fn lease_is_released_when_assist_no_longer_needed() {
        let p = params();
        let mut sleeper = vehicle("s", 1, 1.0, &p);
        sleeper.sleep_mode = true;
        let mut r = roster(vec![sleeper], &[1.0, 1.0]);
        tick(&mut r, 4.0, &p);
        assert_eq!(r.vehicles[0].assigned_battery_id, Some(1));
        tick(&mut r, 30.0, &p);
        assert_eq!(r.vehicles[0].assigned_battery_id, None);
        assert_eq!(r.vehicles[0].battery_assist_current, 0.0);
        assert!(r.stations[1].is_idle());
    }

    #[test]
    fn no_station_leased_twice_in_a_tick() {
        let p = params();
        let mut vehicles = Vec::new();
        for (id, slot) in [("a", 2), ("b", 4), ("c", 3)] {
            let mut v = vehicle(id, slot, 0.25, &p);
            v.enable_assist();
            vehicles.push(v);
        }
        // Only stations 1 and 3 hold energy and a takes 3 before c gets there.
        let mut r = roster(vehicles, &[1.0, 0.5, 0.0, 0.9, 0.0]);
        let report = tick(&mut r, 16.0, &p);
        assert_eq!(r.vehicles[0].assigned_battery_id, Some(3));
        assert_eq!(r.vehicles[1].assigned_battery_id, Some(1));
        assert_eq!(r.vehicles[2].assigned_battery_id, None);
        assert_eq!(report.denied_leases, 1);
        for v in &r.vehicles {
            if let Some(id) = v.assigned_battery_id {
                assert_eq!(r.stations[id].leased_to.as_deref(), Some(v.id.as_str()));
            }
        }
        assert_bounds(&r);
    }

    #[test]
    fn leftover_budget_recharges_neediest_first() {
        let mut p = params();
        // 0.25 C of 10 kWh at 250 V = 10 A
        p.charge_c_rate = 0.25;
        let mut r = roster(vec![], &[1.0, 0.5, 0.2, 0.85, 0.95]);
        let report = tick(&mut r, 25.0, &p);
        assert_eq!(r.stations[2].charge_current, 10.0);
        assert_eq!(r.stations[1].charge_current, 10.0);
        assert_eq!(r.stations[3].charge_current, 0.0);
        assert_eq!(r.stations[4].charge_current, 0.0);
        assert_eq!(report.self_charge_current, 20.0);
    }

    #[test]
    fn leased_station_is_not_recharged() {
        let mut p = params();
        p.charge_c_rate = 0.25;
        let mut v = vehicle("a", 1, 0.5, &p);
        v.enable_assist();
        let mut r = roster(vec![v], &[1.0, 0.5, 0.5]);
        // a draws 15 A from the grid and 9 A from station 1
        let report = tick(&mut r, 30.0, &p);
        assert_eq!(r.stations[1].discharge_current, 9.0);
        assert_eq!(r.stations[1].charge_current, 0.0);
        assert_eq!(r.stations[2].charge_current, 10.0);
        assert_eq!(report.self_charge_current, 10.0);
    }

    #[test]
    fn deficit_shrinks_by_measured_energy() {
        let p = params();
        let mut r = roster(vec![vehicle("a", 1, 1.0, &p)], &[1.0, 1.0]);
        r.vehicles[0].assigned_current = 20.0;
        let before = r.vehicles[0].energy_deficit_kwh;
        tick(&mut r, 30.0, &p);
        let delivered = before - r.vehicles[0].energy_deficit_kwh;
        assert!((delivered - p.tick_energy_kwh(18.0)).abs() < 1e-5);
        assert_eq!(r.vehicles[0].measured_current, 18.0);
    }

    #[test]
    fn hardware_vehicle_saturation_lowers_ceiling() {
        let p = params();
        let mut r = roster(vec![hardware_vehicle(&p)], &[1.0]);
        let mut charger = SimulatedCharger::new(p.efficiency).with_ceiling(12.0);
        let mut buffer = NullBufferCharger::default();
        for i in 0..12 {
            let mut drivers = Drivers {
                charger: &mut charger,
                buffer: &mut buffer,
            };
            run_tick(&mut r, i, i as f32 * 2.0, load_for(&p, 40.0), &p, &mut drivers);
        }
        // tick 0 reads before any setpoint, ticks 1..=10 read low
        assert_eq!(r.vehicles[0].max_current, 12.0);
        assert_eq!(charger.setpoint(), 12.0);
    }

    #[test]
    fn failed_read_falls_back_to_estimate() {
        let p = params();
        let mut hw = hardware_vehicle(&p);
        hw.assigned_current = 20.0;
        let mut r = roster(vec![hw], &[1.0]);
        let mut charger = SimulatedCharger::new(p.efficiency);
        charger.set_failing(true);
        let mut buffer = NullBufferCharger::default();
        let mut drivers = Drivers {
            charger: &mut charger,
            buffer: &mut buffer,
        };
        run_tick(&mut r, 0, 0.0, load_for(&p, 40.0), &p, &mut drivers);
        assert_eq!(r.vehicles[0].measured_current, 18.0);
        assert_eq!(r.vehicles[0].assigned_current, 24.0);
    }

    #[test]
    fn setpoint_sent_only_on_change() {
        let p = params();
        let mut r = roster(vec![hardware_vehicle(&p)], &[1.0]);
        let mut charger = SimulatedCharger::new(p.efficiency);
        let mut buffer = NullBufferCharger::default();
        for i in 0..3 {
            let mut drivers = Drivers {
                charger: &mut charger,
                buffer: &mut buffer,
            };
            run_tick(&mut r, i, 0.0, load_for(&p, 40.0), &p, &mut drivers);
            if i == 0 {
                assert_eq!(charger.setpoint(), 24.0);
                // overwritten only when the assignment moves
                charger.set_current(7.0).expect("set");
            }
        }
        assert_eq!(charger.setpoint(), 7.0);
    }

    #[test]
    fn reserved_station_recharge_commands_buffer_charger() {
        let mut p = params();
        p.charge_c_rate = 0.25;
        p.buffer_bus_voltage = 500.0;
        let mut r = roster(vec![], &[0.5]);
        let mut charger = SimulatedCharger::new(p.efficiency);
        let mut buffer = NullBufferCharger::default();
        for i in 0..3 {
            let mut drivers = Drivers {
                charger: &mut charger,
                buffer: &mut buffer,
            };
            run_tick(&mut r, i, 0.0, load_for(&p, 30.0), &p, &mut drivers);
        }
        assert_eq!(buffer.commands, 1);
        assert_eq!(buffer.last_command, Some((500.0, 5.0)));
    }

    #[test]
    fn negative_budget_pauses_everyone() {
        let p = params();
        let mut r = roster(
            vec![vehicle("a", 1, 0.5, &p), vehicle("b", 2, 0.5, &p)],
            &[1.0, 1.0, 1.0],
        );
        let report = tick(&mut r, -15.0, &p);
        assert!(r.vehicles.iter().all(|v| v.assigned_current == 0.0));
        assert_eq!(report.infeasible, 2);
    }
}
