//! TOML-based scenario configuration and preset definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Top-level scenario configuration parsed from TOML.
///
/// All fields have defaults matching the baseline scenario. Load from
/// TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Tick timing, electrical constants and control tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Default per-vehicle current limits.
    #[serde(default)]
    pub vehicle: VehicleConfig,
    /// Buffer-battery station pool.
    #[serde(default)]
    pub stations: StationConfig,
    /// Battery class name to usable capacity (kWh).
    #[serde(default = "default_battery_classes")]
    pub battery_classes: BTreeMap<String, f32>,
    /// Event listener bindings.
    #[serde(default)]
    pub listeners: ListenerConfig,
}

/// Tick timing, electrical constants and control tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Supply voltage (V) used to convert between power and current.
    pub voltage: f32,
    /// Tick period on the run clock (seconds).
    pub read_delay_s: f32,
    /// Control pass period (seconds); an integer multiple of `read_delay_s`.
    pub control_delay_s: f32,
    /// Wall-clock tick period used by `--fast-sim` (seconds).
    pub fast_read_delay_s: f32,
    /// Fraction of commanded current a vehicle actually draws.
    pub efficiency: f32,
    /// Tolerance below `efficiency` before a reading counts as low.
    pub saturation_margin: f32,
    /// Consecutive low readings before `max_current` is lowered.
    pub saturation_ticks: u32,
    /// Building service capacity (kW).
    pub max_building_capacity_kw: f32,
    /// When true the allocation loop waits for a signaled control pass to
    /// finish before starting the next tick. Off by default: the loop
    /// signals and carries on.
    pub lockstep_control: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voltage: 240.0,
            read_delay_s: 2.0,
            control_delay_s: 60.0,
            fast_read_delay_s: 0.002,
            efficiency: 0.9,
            saturation_margin: 0.1,
            saturation_ticks: 10,
            max_building_capacity_kw: 100.0,
            lockstep_control: false,
        }
    }
}

/// Default per-vehicle current limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VehicleConfig {
    /// Minimum non-zero charging current (A).
    pub min_current: f32,
    /// Maximum charging current (A).
    pub max_current: f32,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            min_current: 6.0,
            max_current: 24.0,
        }
    }
}

/// Buffer-battery station pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationConfig {
    /// Maximum simultaneously connected dataset vehicles; one station each
    /// plus the reserved station 0.
    pub max_vehicles: usize,
    /// Rated capacity of every buffer battery (kWh).
    pub rated_capacity_kwh: f32,
    /// Initial stored energy as a fraction of rated capacity.
    pub initial_soc: f32,
    /// Round-trip efficiency applied on both charge and discharge.
    pub round_trip_efficiency: f32,
    /// Self-charge current as a C-rate.
    pub charge_c_rate: f32,
    /// Stations below this fraction of rated capacity may self-charge.
    pub self_charge_threshold: f32,
    /// DC bus voltage commanded on the reserved station's charger (V).
    pub buffer_bus_voltage: f32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            max_vehicles: 4,
            rated_capacity_kwh: 13.5,
            initial_soc: 1.0,
            round_trip_efficiency: 0.9,
            charge_c_rate: 0.8,
            self_charge_threshold: 0.9,
            buffer_bus_voltage: 550.0,
        }
    }
}

/// Event listener bindings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    /// Address accepting arrival descriptors.
    pub intake_addr: String,
    /// Address publishing status snapshots.
    pub status_addr: String,
    /// Status publication period (seconds).
    pub status_period_s: f32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            intake_addr: "127.0.0.1:8000".to_string(),
            status_addr: "127.0.0.1:9000".to_string(),
            status_period_s: 2.0,
        }
    }
}

fn default_battery_classes() -> BTreeMap<String, f32> {
    BTreeMap::from([("nissan leaf".to_string(), 40.0)])
}

/// Configuration error with field path and constraint description.
#[derive(Debug, thiserror::Error)]
#[error("config error: {field} ({message})")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"engine.read_delay_s"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: &str, message: impl fmt::Display) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl ScenarioConfig {
    /// Returns the baseline scenario.
    pub fn baseline() -> Self {
        Self {
            engine: EngineConfig::default(),
            vehicle: VehicleConfig::default(),
            stations: StationConfig::default(),
            battery_classes: default_battery_classes(),
            listeners: ListenerConfig::default(),
        }
    }

    /// Returns the demo preset: short control period and a tight building
    /// budget so battery assist engages within a few minutes.
    pub fn demo() -> Self {
        Self {
            engine: EngineConfig {
                control_delay_s: 6.0,
                max_building_capacity_kw: 20.0,
                ..EngineConfig::default()
            },
            stations: StationConfig {
                initial_soc: 0.8,
                ..StationConfig::default()
            },
            ..Self::baseline()
        }
    }

    /// Returns the stress preset: many slots, small buffers, weak service.
    pub fn stress() -> Self {
        let mut classes = default_battery_classes();
        classes.insert("tesla model 3".to_string(), 75.0);
        classes.insert("chevy bolt".to_string(), 65.0);
        Self {
            engine: EngineConfig {
                max_building_capacity_kw: 30.0,
                ..EngineConfig::default()
            },
            stations: StationConfig {
                max_vehicles: 8,
                rated_capacity_kwh: 5.0,
                initial_soc: 0.5,
                ..StationConfig::default()
            },
            battery_classes: classes,
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "demo", "stress"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "demo" => Ok(Self::demo()),
            "stress" => Ok(Self::stress()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e))
    }

    /// Number of ticks per control pass.
    pub fn control_ratio(&self) -> u64 {
        (self.engine.control_delay_s / self.engine.read_delay_s).round() as u64
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Checks are written so that NaN fails them. Returns an empty vector if
    /// configuration is valid.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let e = &self.engine;

        if !(e.voltage > 0.0) {
            errors.push(ConfigError::new("engine.voltage", "must be > 0"));
        }
        if !(e.read_delay_s > 0.0 && e.read_delay_s.is_finite()) {
            errors.push(ConfigError::new("engine.read_delay_s", "must be finite and > 0"));
        } else {
            let ratio = e.control_delay_s / e.read_delay_s;
            if !(ratio >= 1.0 && (ratio - ratio.round()).abs() <= 1e-4) {
                errors.push(ConfigError::new(
                    "engine.control_delay_s",
                    "must be a positive integer multiple of engine.read_delay_s",
                ));
            }
        }
        if !(e.fast_read_delay_s >= 0.0 && e.fast_read_delay_s.is_finite()) {
            errors.push(ConfigError::new(
                "engine.fast_read_delay_s",
                "must be finite and >= 0",
            ));
        }
        if !(e.efficiency > 0.0 && e.efficiency <= 1.0) {
            errors.push(ConfigError::new("engine.efficiency", "must be in (0.0, 1.0]"));
        }
        if !(0.0..e.efficiency.max(0.0)).contains(&e.saturation_margin) {
            errors.push(ConfigError::new(
                "engine.saturation_margin",
                "must be in [0.0, engine.efficiency)",
            ));
        }
        if e.saturation_ticks == 0 {
            errors.push(ConfigError::new("engine.saturation_ticks", "must be > 0"));
        }
        if !(e.max_building_capacity_kw >= 0.0) {
            errors.push(ConfigError::new(
                "engine.max_building_capacity_kw",
                "must be >= 0",
            ));
        }

        let v = &self.vehicle;
        if !(v.min_current >= 0.0) {
            errors.push(ConfigError::new("vehicle.min_current", "must be >= 0"));
        }
        if !(v.max_current >= v.min_current) {
            errors.push(ConfigError::new(
                "vehicle.max_current",
                "must be >= vehicle.min_current",
            ));
        }

        let s = &self.stations;
        if !(s.rated_capacity_kwh > 0.0) {
            errors.push(ConfigError::new("stations.rated_capacity_kwh", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&s.initial_soc) {
            errors.push(ConfigError::new("stations.initial_soc", "must be in [0.0, 1.0]"));
        }
        if !(s.round_trip_efficiency > 0.0 && s.round_trip_efficiency <= 1.0) {
            errors.push(ConfigError::new(
                "stations.round_trip_efficiency",
                "must be in (0.0, 1.0]",
            ));
        }
        if !(s.charge_c_rate >= 0.0) {
            errors.push(ConfigError::new("stations.charge_c_rate", "must be >= 0"));
        }
        if !(s.buffer_bus_voltage > 0.0) {
            errors.push(ConfigError::new("stations.buffer_bus_voltage", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&s.self_charge_threshold) {
            errors.push(ConfigError::new(
                "stations.self_charge_threshold",
                "must be in [0.0, 1.0]",
            ));
        }

        for (name, capacity) in &self.battery_classes {
            if !(*capacity > 0.0) {
                errors.push(ConfigError::new(
                    "battery_classes",
                    format!("capacity of \"{name}\" must be > 0"),
                ));
            }
        }

        let period = self.listeners.status_period_s;
        if !(period > 0.0 && period.is_finite()) {
            errors.push(ConfigError::new(
                "listeners.status_period_s",
                "must be finite and > 0",
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_preset_valid() {
        let cfg = ScenarioConfig::baseline();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "baseline should be valid: {errors:?}");
    }

    #[test]
    fn from_preset_unknown() {
        let err = ScenarioConfig::from_preset("nonexistent");
        assert!(err.is_err());
        let e = err.unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn all_presets_are_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[engine]
voltage = 220.0
read_delay_s = 2.0
control_delay_s = 900.0
efficiency = 0.95

[vehicle]
min_current = 8.0
max_current = 32.0

[stations]
max_vehicles = 6
rated_capacity_kwh = 10.0

[battery_classes]
"nissan leaf" = 40.0
"kia niro" = 64.0

[listeners]
status_period_s = 1.0
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).expect("valid TOML should parse");
        assert_eq!(cfg.engine.voltage, 220.0);
        assert_eq!(cfg.control_ratio(), 450);
        assert_eq!(cfg.vehicle.max_current, 32.0);
        assert_eq!(cfg.stations.max_vehicles, 6);
        assert_eq!(cfg.battery_classes.get("kia niro"), Some(&64.0));
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[engine]
voltage = 240.0
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[engine]
max_building_capacity_kw = 42.0
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).expect("partial TOML should parse");
        assert_eq!(cfg.engine.max_building_capacity_kw, 42.0);
        assert_eq!(cfg.engine.read_delay_s, 2.0);
        assert_eq!(cfg.vehicle.min_current, 6.0);
        assert_eq!(cfg.battery_classes.get("nissan leaf"), Some(&40.0));
    }

    #[test]
    fn validation_catches_non_multiple_control_delay() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.engine.control_delay_s = 5.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "engine.control_delay_s"));
    }

    #[test]
    fn validation_catches_inverted_current_limits() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.vehicle.max_current = 4.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "vehicle.max_current"));
    }

    #[test]
    fn validation_catches_bad_battery_class() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.battery_classes.insert("ghost".to_string(), 0.0);
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "battery_classes"));
    }

    #[test]
    fn validation_rejects_nan_fields() {
        let toml = r#"
[engine]
read_delay_s = nan
voltage = nan
max_building_capacity_kw = nan

[stations]
buffer_bus_voltage = nan

[battery_classes]
"x" = nan

[listeners]
status_period_s = nan
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).expect("nan is valid TOML");
        let errors = cfg.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        for field in [
            "engine.read_delay_s",
            "engine.voltage",
            "engine.max_building_capacity_kw",
            "stations.buffer_bus_voltage",
            "battery_classes",
            "listeners.status_period_s",
        ] {
            assert!(fields.contains(&field), "{field} missing from {fields:?}");
        }
    }

    #[test]
    fn validation_catches_zero_bus_voltage_and_infinite_delay() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.stations.buffer_bus_voltage = 0.0;
        cfg.engine.fast_read_delay_s = f32::INFINITY;
        cfg.engine.control_delay_s = f32::NAN;
        let errors = cfg.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"stations.buffer_bus_voltage"));
        assert!(fields.contains(&"engine.fast_read_delay_s"));
        assert!(fields.contains(&"engine.control_delay_s"));
    }

    #[test]
    fn validation_catches_margin_above_efficiency() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.engine.saturation_margin = 0.95;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "engine.saturation_margin"));
    }
}
