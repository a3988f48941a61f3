//! Exclusive per-tick leasing of buffer batteries to vehicles.
//!
//! Rules are tried in order and the first match wins:
//!
//! 1. A hardware-backed vehicle may only use the reserved station.
//! 2. A vehicle keeps the station it already holds when that station is
//!    still idle and charged enough.
//! 3. Otherwise the battery in the vehicle's own slot.
//! 4. Otherwise the idle, non-reserved station with the most stored energy.
//! 5. Otherwise no lease.

use tracing::{debug, warn};

use super::station::Station;
use super::types::{ChargeMode, EngineParams, RESERVED_STATION, StationId};
use super::vehicle::Vehicle;

/// Picks a station for `vehicle` to draw `current_a` from this tick without
/// mutating anything.
pub fn select(
    stations: &[Station],
    vehicle: &Vehicle,
    current_a: f32,
    params: &EngineParams,
) -> Option<StationId> {
    let usable = |id: StationId| {
        stations
            .get(id)
            .is_some_and(|s| s.is_idle() && s.can_supply(current_a, params))
    };

    if vehicle.mode == ChargeMode::HardwareBacked {
        return usable(RESERVED_STATION).then_some(RESERVED_STATION);
    }

    if let Some(held) = vehicle.assigned_battery_id {
        if held != RESERVED_STATION && usable(held) {
            return Some(held);
        }
    }

    if vehicle.station_id != RESERVED_STATION && usable(vehicle.station_id) {
        return Some(vehicle.station_id);
    }

    stations
        .iter()
        .filter(|s| s.id != RESERVED_STATION && usable(s.id))
        .fold(None, |best: Option<&Station>, s| match best {
            Some(b) if b.capacity_kwh >= s.capacity_kwh => Some(b),
            _ => Some(s),
        })
        .map(|s| s.id)
}

/// Leases a station to `vehicle` for `current_a` of assist this tick.
///
/// On success the station records the lease and discharge current and the
/// vehicle records the binding. On failure any binding the vehicle held is
/// dropped and `None` is returned.
pub fn acquire(
    stations: &mut [Station],
    vehicle: &mut Vehicle,
    current_a: f32,
    params: &EngineParams,
) -> Option<StationId> {
    let Some(id) = select(stations, vehicle, current_a, params) else {
        warn!(
            vehicle = %vehicle.id,
            requested_a = current_a,
            "no battery available"
        );
        release(stations, vehicle);
        return None;
    };

    if vehicle.assigned_battery_id != Some(id) {
        debug!(vehicle = %vehicle.id, station = id, "battery leased");
    }
    stations[id].lease(&vehicle.id, current_a);
    vehicle.assigned_battery_id = Some(id);
    vehicle.battery_assist_current = current_a;
    Some(id)
}

/// Drops whatever lease `vehicle` holds.
pub fn release(stations: &mut [Station], vehicle: &mut Vehicle) {
    if let Some(id) = vehicle.assigned_battery_id.take() {
        if let Some(station) = stations.get_mut(id) {
            station.release(&vehicle.id);
        }
        debug!(vehicle = %vehicle.id, station = id, "battery released");
    }
    vehicle.battery_assist_current = 0.0;
}
