use crate::sim::types::{EngineParams, StationId, StationRecord};

/// A buffer battery sitting in one charging slot.
///
/// # Current convention
/// Both currents are non-negative magnitudes at the supply voltage:
/// `discharge_current` flows to the leaseholder, `charge_current` comes
/// from the leftover grid budget.
#[derive(Debug, Clone)]
pub struct Station {
    /// Station id; doubles as the slot id.
    pub id: StationId,
    /// Remaining stored energy (kWh).
    pub capacity_kwh: f32,
    /// Rated capacity (kWh).
    pub rated_capacity_kwh: f32,
    /// Current delivered to the leaseholder this tick (A).
    pub discharge_current: f32,
    /// Self-charge current this tick (A).
    pub charge_current: f32,
    /// Vehicle holding this tick's lease.
    pub leased_to: Option<String>,
}

impl Station {
    /// Creates a station holding `initial_soc × rated_capacity_kwh`.
    ///
    /// # Panics
    ///
    /// Panics if `rated_capacity_kwh` is not positive or `initial_soc` is
    /// outside `[0, 1]`.
    pub fn new(id: StationId, rated_capacity_kwh: f32, initial_soc: f32) -> Self {
        assert!(rated_capacity_kwh > 0.0);
        assert!((0.0..=1.0).contains(&initial_soc));
        Self {
            id,
            capacity_kwh: rated_capacity_kwh * initial_soc,
            rated_capacity_kwh,
            discharge_current: 0.0,
            charge_current: 0.0,
            leased_to: None,
        }
    }

    /// Builds the station pool: reserved station 0 plus one per vehicle slot.
    pub fn pool(max_vehicles: usize, rated_capacity_kwh: f32, initial_soc: f32) -> Vec<Self> {
        (0..=max_vehicles)
            .map(|id| Self::new(id, rated_capacity_kwh, initial_soc))
            .collect()
    }

    /// Applies last tick's currents to the stored energy and clears them
    /// along with the lease.
    ///
    /// Discharge energy is divided by the round-trip efficiency and charge
    /// energy multiplied by it. The result is clamped to
    /// `[0, rated_capacity_kwh]`.
    pub fn settle(&mut self, params: &EngineParams) {
        let eta = params.round_trip_efficiency;
        self.capacity_kwh -= params.tick_energy_kwh(self.discharge_current) / eta;
        self.capacity_kwh += params.tick_energy_kwh(self.charge_current) * eta;
        self.capacity_kwh = self.capacity_kwh.clamp(0.0, self.rated_capacity_kwh);
        self.discharge_current = 0.0;
        self.charge_current = 0.0;
        self.leased_to = None;
    }

    /// Free for a new lease this tick.
    pub fn is_idle(&self) -> bool {
        self.leased_to.is_none()
    }

    /// Holds enough energy to deliver `current_a` for one tick.
    pub fn can_supply(&self, current_a: f32, params: &EngineParams) -> bool {
        self.capacity_kwh > params.tick_energy_kwh(current_a) / params.round_trip_efficiency
    }

    /// Binds this tick's lease to `vehicle_id` at `current_a`.
    pub fn lease(&mut self, vehicle_id: &str, current_a: f32) {
        self.leased_to = Some(vehicle_id.to_string());
        self.discharge_current = current_a;
    }

    /// Drops the lease if held by `vehicle_id`.
    pub fn release(&mut self, vehicle_id: &str) {
        if self.leased_to.as_deref() == Some(vehicle_id) {
            self.leased_to = None;
            self.discharge_current = 0.0;
        }
    }

    /// Stored energy as a fraction of rated capacity.
    pub fn soc(&self) -> f32 {
        self.capacity_kwh / self.rated_capacity_kwh
    }

    /// Telemetry row for this tick.
    pub fn record(&self, timestamp: f32) -> StationRecord {
        StationRecord {
            timestamp,
            station_id: self.id,
            discharge_current: self.discharge_current,
            charge_current: self.charge_current,
            capacity_kwh: self.capacity_kwh,
        }
    }
}
