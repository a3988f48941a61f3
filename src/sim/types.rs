//! Core engine types: derived parameters and per-tick telemetry records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ScenarioConfig;

/// Station slot reserved for the single hardware-backed charging point.
pub const RESERVED_STATION: StationId = 0;

/// Identifier of a buffer-battery station (and of the charging slot it sits in).
pub type StationId = usize;

/// Engine parameters derived once from a validated [`ScenarioConfig`].
///
/// Both loops read these; nothing in here changes during a run.
///
/// # Examples
///
/// ```
/// use ev_cms::config::ScenarioConfig;
/// use ev_cms::sim::types::EngineParams;
///
/// let params = EngineParams::from_config(&ScenarioConfig::baseline());
/// assert_eq!(params.control_ratio, 30);
/// assert!((params.tick_energy_kwh(24.0) - 0.0032).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct EngineParams {
    /// Supply voltage (V).
    pub voltage: f32,
    /// Tick period on the run clock (seconds).
    pub tick_seconds: f32,
    /// Ticks per control pass.
    pub control_ratio: u64,
    /// Fraction of commanded current a vehicle draws.
    pub efficiency: f32,
    /// Tolerance below `efficiency` before a reading counts as low.
    pub saturation_margin: f32,
    /// Consecutive low readings that trigger a `max_current` reduction.
    pub saturation_ticks: u32,
    /// Building service capacity (kW).
    pub max_building_capacity_kw: f32,
    /// Default minimum vehicle current (A).
    pub min_current: f32,
    /// Default maximum vehicle current (A).
    pub max_current: f32,
    /// Rated buffer-battery capacity (kWh).
    pub rated_capacity_kwh: f32,
    /// Buffer-battery round-trip efficiency.
    pub round_trip_efficiency: f32,
    /// Self-charge C-rate.
    pub charge_c_rate: f32,
    /// Self-charge eligibility threshold as a fraction of rated capacity.
    pub self_charge_threshold: f32,
    /// DC bus voltage for the reserved station's charger (V).
    pub buffer_bus_voltage: f32,
}

impl EngineParams {
    /// Builds engine parameters from a scenario.
    pub fn from_config(cfg: &ScenarioConfig) -> Self {
        Self {
            voltage: cfg.engine.voltage,
            tick_seconds: cfg.engine.read_delay_s,
            control_ratio: cfg.control_ratio().max(1),
            efficiency: cfg.engine.efficiency,
            saturation_margin: cfg.engine.saturation_margin,
            saturation_ticks: cfg.engine.saturation_ticks,
            max_building_capacity_kw: cfg.engine.max_building_capacity_kw,
            min_current: cfg.vehicle.min_current,
            max_current: cfg.vehicle.max_current,
            rated_capacity_kwh: cfg.stations.rated_capacity_kwh,
            round_trip_efficiency: cfg.stations.round_trip_efficiency,
            charge_c_rate: cfg.stations.charge_c_rate,
            self_charge_threshold: cfg.stations.self_charge_threshold,
            buffer_bus_voltage: cfg.stations.buffer_bus_voltage,
        }
    }

    /// Energy (kWh) carried by `current_a` over one tick at the supply voltage.
    pub fn tick_energy_kwh(&self, current_a: f32) -> f32 {
        current_a * self.voltage * (self.tick_seconds / 3600.0) / 1000.0
    }

    /// Current (A) available to vehicles given the building load (kW).
    ///
    /// Negative when the building is over capacity; callers clamp downstream.
    pub fn available_current(&self, building_load_kw: f32) -> f32 {
        (self.max_building_capacity_kw - building_load_kw) * 1000.0 / self.voltage
    }

    /// Fixed self-charge current (A) for one buffer battery.
    pub fn self_charge_current(&self) -> f32 {
        self.charge_c_rate * self.rated_capacity_kwh * 1000.0 / self.voltage
    }
}

/// How a vehicle's draw is observed and commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeMode {
    /// Draw is estimated from the assigned current.
    Simulated,
    /// Draw is read from, and setpoints written to, the hardware driver.
    HardwareBacked,
}

/// One telemetry row per vehicle per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    /// Tick-clock time (seconds).
    pub timestamp: f32,
    /// Vehicle identity.
    pub vehicle_id: String,
    /// Charging slot.
    pub station_id: StationId,
    /// Observed draw (A).
    pub measured_current: f32,
    /// Commanded current (A).
    pub assigned_current: f32,
    /// Portion of the commanded current sourced from a buffer battery (A).
    pub assist_current: f32,
    /// Energy still required, as a percentage of the vehicle battery.
    pub soc_remaining_pct: f32,
    /// Station leased this tick, if any.
    pub leased_station_id: Option<StationId>,
    /// Normalized priority.
    pub priority: f32,
    /// Whether battery assist has been latched on.
    pub assist_enabled: bool,
    /// Current ceiling after saturation adjustments (A).
    pub max_current: f32,
}

/// One telemetry row per station per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    /// Tick-clock time (seconds).
    pub timestamp: f32,
    /// Station id.
    pub station_id: StationId,
    /// Current delivered to a leased vehicle (A).
    pub discharge_current: f32,
    /// Self-charge current (A).
    pub charge_current: f32,
    /// Remaining stored energy (kWh).
    pub capacity_kwh: f32,
}

/// Complete record of one allocation tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Tick index.
    pub tick: u64,
    /// Tick-clock time (seconds).
    pub time_s: f32,
    /// Building load sample for this tick (kW).
    pub building_load_kw: f32,
    /// Current budget before allocation (A).
    pub available_current: f32,
    /// Grid current drawn by vehicles (A).
    pub grid_current: f32,
    /// Grid current drawn by self-charging stations (A).
    pub self_charge_current: f32,
    /// Battery-sourced current delivered to vehicles (A).
    pub assist_current: f32,
    /// Vehicles with a non-zero priority served at 0 A.
    pub infeasible: usize,
    /// Lease requests denied.
    pub denied_leases: usize,
    /// Vehicle telemetry rows.
    pub vehicles: Vec<VehicleRecord>,
    /// Station telemetry rows.
    pub stations: Vec<StationRecord>,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>5} ({:>8.1}s) | avail={:>7.1} A  grid={:>6.1} A  assist={:>5.1} A  \
             recharge={:>5.1} A | vehicles={} infeasible={} denied={}",
            self.tick,
            self.time_s,
            self.available_current,
            self.grid_current,
            self.assist_current,
            self.self_charge_current,
            self.vehicles.len(),
            self.infeasible,
            self.denied_leases,
        )
    }
}

/// Final state of charge reported for a vehicle leaving the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSoc {
    /// Vehicle identity.
    pub vehicle_id: String,
    /// Tick-clock time of departure (seconds).
    pub time_s: f32,
    /// Energy still missing, as a percentage of the vehicle battery.
    pub soc_remaining_pct: f32,
    /// Energy still missing (kWh).
    pub energy_deficit_kwh: f32,
}

impl fmt::Display for FinalSoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name: {} SoC remaining(%): {:.2} ({:.3} kWh short at {:.0}s)",
            self.vehicle_id, self.soc_remaining_pct, self.energy_deficit_kwh, self.time_s
        )
    }
}
