use crate::sim::types::{ChargeMode, EngineParams, StationId, VehicleRecord};

/// Lifecycle phase of an admitted vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Charging from the grid budget only.
    Grid,
    /// Battery assist latched on.
    AssistEnabled,
}

/// One charging session.
///
/// Built through [`Vehicle::new`]; the allocation loop and scheduler pass
/// mutate the public control fields in place under the roster lock.
#[derive(Debug, Clone)]
pub struct Vehicle {
    /// Vehicle identity.
    pub id: String,
    /// Charging slot; [`crate::sim::types::RESERVED_STATION`] for the hardware slot.
    pub station_id: StationId,
    /// How draw is observed and commanded.
    pub mode: ChargeMode,
    /// Sleep-mode vehicles yield to everyone else and may borrow battery
    /// current to reach `min_current`.
    pub sleep_mode: bool,
    /// Usable battery capacity (kWh) of the vehicle's battery class.
    pub capacity_kwh: f32,
    /// Normalized urgency, recomputed each control pass.
    pub priority: f32,
    /// Energy still required (kWh).
    pub energy_deficit_kwh: f32,
    /// Departure time on the run clock (seconds).
    pub deadline: f32,
    /// Minimum non-zero current (A).
    pub min_current: f32,
    /// Maximum current (A), lowered on sustained saturation.
    pub max_current: f32,
    /// Commanded current (A).
    pub assigned_current: f32,
    /// Portion of `assigned_current` sourced from a buffer battery (A).
    pub battery_assist_current: f32,
    /// Station currently leased for assist.
    pub assigned_battery_id: Option<StationId>,
    /// Last observed draw (A).
    pub measured_current: f32,
    assist_enabled: bool,
    saturation_count: u32,
}

impl Vehicle {
    /// Creates a vehicle with an energy deficit derived from the requested
    /// state-of-charge change.
    ///
    /// # Arguments
    ///
    /// * `id` - Vehicle identity
    /// * `station_id` - Charging slot
    /// * `mode` - Simulated or hardware-backed
    /// * `sleep_mode` - Static sleep-mode flag from the admission record
    /// * `capacity_kwh` - Battery class capacity (must be > 0)
    /// * `desired_soc_delta_pct` - Requested state-of-charge gain in percent
    /// * `deadline` - Departure time on the run clock (seconds)
    /// * `params` - Engine parameters supplying default current limits
    ///
    /// # Panics
    ///
    /// Panics if `capacity_kwh` is not positive.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        station_id: StationId,
        mode: ChargeMode,
        sleep_mode: bool,
        capacity_kwh: f32,
        desired_soc_delta_pct: f32,
        deadline: f32,
        params: &EngineParams,
    ) -> Self {
        assert!(capacity_kwh > 0.0);
        Self {
            id: id.into(),
            station_id,
            mode,
            sleep_mode,
            capacity_kwh,
            priority: 0.0,
            energy_deficit_kwh: (desired_soc_delta_pct / 100.0 * capacity_kwh).max(0.0),
            deadline,
            min_current: params.min_current,
            max_current: params.max_current,
            assigned_current: 0.0,
            battery_assist_current: 0.0,
            assigned_battery_id: None,
            measured_current: 0.0,
            assist_enabled: false,
            saturation_count: 0,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        if self.assist_enabled {
            Phase::AssistEnabled
        } else {
            Phase::Grid
        }
    }

    /// Whether battery assist has been latched on.
    pub fn assist_enabled(&self) -> bool {
        self.assist_enabled
    }

    /// Latches battery assist on. There is no way to turn it back off.
    pub fn enable_assist(&mut self) {
        self.assist_enabled = true;
    }

    /// Remaining energy as a percentage of the vehicle battery.
    pub fn soc_remaining_pct(&self) -> f32 {
        self.energy_deficit_kwh / self.capacity_kwh * 100.0
    }

    /// Subtracts the energy delivered at `measured_current` over one tick.
    pub fn absorb(&mut self, measured_current: f32, params: &EngineParams) {
        self.measured_current = measured_current;
        self.energy_deficit_kwh =
            (self.energy_deficit_kwh - params.tick_energy_kwh(measured_current)).max(0.0);
    }

    /// Feeds one reading to the saturation detector.
    ///
    /// A reading below `assigned × (efficiency − margin)` counts as low.
    /// After `saturation_ticks` consecutive low readings `max_current`
    /// drops to the measured draw (never below `min_current`). Returns the
    /// new ceiling when it changed.
    pub fn observe_saturation(&mut self, params: &EngineParams) -> Option<f32> {
        let threshold = self.assigned_current * (params.efficiency - params.saturation_margin);
        if self.assigned_current > 0.0 && self.measured_current < threshold {
            self.saturation_count += 1;
        } else {
            self.saturation_count = 0;
            return None;
        }

        if self.saturation_count < params.saturation_ticks {
            return None;
        }
        self.saturation_count = 0;
        let ceiling = self.measured_current.max(self.min_current);
        if ceiling < self.max_current {
            self.max_current = ceiling;
            Some(ceiling)
        } else {
            None
        }
    }

    /// Consecutive low readings seen so far.
    pub fn saturation_count(&self) -> u32 {
        self.saturation_count
    }

    /// Raw urgency: energy still required per second until the deadline.
    ///
    /// Returns `0.0` once the deadline has been reached so callers never
    /// divide by a non-positive horizon.
    pub fn urgency(&self, now: f32) -> f32 {
        let horizon = self.deadline - now;
        if horizon > 0.0 {
            self.energy_deficit_kwh / horizon
        } else {
            0.0
        }
    }

    /// Whether continuous `max_current` until the deadline would leave the
    /// deficit unmet.
    pub fn needs_assist(&self, now: f32, params: &EngineParams) -> bool {
        let deliverable_kwh = params.efficiency
            * self.max_current
            * params.voltage
            * (self.deadline - now)
            / 3600.0
            / 1000.0;
        self.energy_deficit_kwh >= deliverable_kwh
    }

    /// Clamps a grid share into `[min_current, max_current]`.
    pub fn clamp_current(&self, nominal: f32) -> f32 {
        nominal.clamp(self.min_current, self.max_current.max(self.min_current))
    }

    /// Telemetry row for this tick.
    pub fn record(&self, timestamp: f32) -> VehicleRecord {
        VehicleRecord {
            timestamp,
            vehicle_id: self.id.clone(),
            station_id: self.station_id,
            measured_current: self.measured_current,
            assigned_current: self.assigned_current,
            assist_current: self.battery_assist_current,
            soc_remaining_pct: self.soc_remaining_pct(),
            leased_station_id: self.assigned_battery_id,
            priority: self.priority,
            assist_enabled: self.assist_enabled,
            max_current: self.max_current,
        }
    }

    /// Restores control state from a persisted telemetry row.
    pub fn restore_from(&mut self, record: &VehicleRecord) {
        self.energy_deficit_kwh = (record.soc_remaining_pct / 100.0 * self.capacity_kwh).max(0.0);
        self.measured_current = record.measured_current;
        self.assigned_current = record.assigned_current;
        self.battery_assist_current = record.assist_current;
        self.assigned_battery_id = record.leased_station_id;
        self.priority = record.priority;
        self.max_current = record.max_current.max(self.min_current);
        if record.assist_enabled {
            self.assist_enabled = true;
        }
    }
}
