//! Run-level key performance indicators accumulated tick by tick.

use std::fmt;

use serde::Serialize;

use super::types::{EngineParams, TickReport};

/// Aggregate indicators for a complete run.
///
/// Fed one [`TickReport`] at a time so a long run never has to keep its
/// tick history in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiReport {
    /// Ticks recorded.
    pub ticks: u64,
    /// Energy drawn from the grid by vehicles (kWh).
    pub grid_energy_kwh: f32,
    /// Energy delivered to vehicles from buffer batteries (kWh).
    pub assist_energy_kwh: f32,
    /// Energy drawn from the grid to recharge buffer batteries (kWh).
    pub self_charge_energy_kwh: f32,
    /// Vehicle-ticks with a non-zero priority served at 0 A.
    pub infeasible_vehicle_ticks: usize,
    /// Lease requests denied.
    pub denied_leases: usize,
    /// Highest total grid current (vehicles plus self-charge) in any tick (A).
    pub peak_grid_current: f32,
    /// Ticks where the building alone exceeded its capacity.
    pub overload_ticks: usize,
}

impl KpiReport {
    /// Folds one tick into the totals.
    pub fn record(&mut self, tick: &TickReport, params: &EngineParams) {
        self.ticks += 1;
        self.grid_energy_kwh += params.tick_energy_kwh(tick.grid_current);
        self.assist_energy_kwh += params.tick_energy_kwh(tick.assist_current);
        self.self_charge_energy_kwh += params.tick_energy_kwh(tick.self_charge_current);
        self.infeasible_vehicle_ticks += tick.infeasible;
        self.denied_leases += tick.denied_leases;
        self.peak_grid_current = self
            .peak_grid_current
            .max(tick.grid_current + tick.self_charge_current);
        if tick.available_current < 0.0 {
            self.overload_ticks += 1;
        }
    }

    /// Share of vehicle energy that came from buffer batteries, in percent.
    pub fn assist_share_pct(&self) -> f32 {
        let total = self.grid_energy_kwh + self.assist_energy_kwh;
        if total > 0.0 {
            100.0 * self.assist_energy_kwh / total
        } else {
            0.0
        }
    }
}

impl fmt::Display for KpiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- KPI Report ---")?;
        writeln!(f, "Ticks:                 {}", self.ticks)?;
        writeln!(f, "Grid energy:           {:.3} kWh", self.grid_energy_kwh)?;
        writeln!(
            f,
            "Battery assist:        {:.3} kWh ({:.1}%)",
            self.assist_energy_kwh,
            self.assist_share_pct()
        )?;
        writeln!(f, "Battery recharge:      {:.3} kWh", self.self_charge_energy_kwh)?;
        writeln!(f, "Peak grid current:     {:.1} A", self.peak_grid_current)?;
        writeln!(f, "Infeasible (veh-tick): {}", self.infeasible_vehicle_ticks)?;
        writeln!(f, "Denied leases:         {}", self.denied_leases)?;
        write!(f, "Overloaded ticks:      {}", self.overload_ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;

    fn params() -> EngineParams {
        let mut p = EngineParams::from_config(&ScenarioConfig::baseline());
        p.voltage = 250.0;
        p.tick_seconds = 3600.0;
        p
    }

    fn tick(grid: f32, assist: f32, recharge: f32) -> TickReport {
        TickReport {
            available_current: 40.0,
            grid_current: grid,
            assist_current: assist,
            self_charge_current: recharge,
            ..TickReport::default()
        }
    }

    #[test]
    fn energy_totals() {
        let p = params();
        let mut kpi = KpiReport::default();
        // 1 h ticks at 250 V: 4 A = 1 kWh
        kpi.record(&tick(8.0, 4.0, 0.0), &p);
        kpi.record(&tick(4.0, 0.0, 4.0), &p);
        assert_eq!(kpi.ticks, 2);
        assert!((kpi.grid_energy_kwh - 3.0).abs() < 1e-5);
        assert!((kpi.assist_energy_kwh - 1.0).abs() < 1e-5);
        assert!((kpi.self_charge_energy_kwh - 1.0).abs() < 1e-5);
        assert!((kpi.assist_share_pct() - 25.0).abs() < 1e-3);
    }

    #[test]
    fn peaks_and_counters() {
        let p = params();
        let mut kpi = KpiReport::default();
        let mut first = tick(10.0, 0.0, 5.0);
        first.infeasible = 2;
        first.denied_leases = 1;
        let mut second = tick(12.0, 0.0, 0.0);
        second.available_current = -3.0;
        kpi.record(&first, &p);
        kpi.record(&second, &p);
        assert_eq!(kpi.peak_grid_current, 15.0);
        assert_eq!(kpi.infeasible_vehicle_ticks, 2);
        assert_eq!(kpi.denied_leases, 1);
        assert_eq!(kpi.overload_ticks, 1);
    }

    #[test]
    fn empty_run() {
        let kpi = KpiReport::default();
        assert_eq!(kpi.assist_share_pct(), 0.0);
        assert!(format!("{kpi}").contains("Ticks:"));
    }
}
