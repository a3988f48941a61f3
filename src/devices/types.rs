//! Hardware driver traits consumed by the engine.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, rngs::StdRng};

use crate::error::DriverError;

/// The single hardware-backed charging point.
///
/// Failures are reported, never retried here; the engine falls back to
/// estimated values and tries again on the next tick.
pub trait ChargerDriver: Send {
    /// Returns the present draw in amps.
    fn read_current(&mut self) -> Result<f32, DriverError>;

    /// Commands a new target current in amps.
    fn set_current(&mut self, amps: f32) -> Result<(), DriverError>;

    /// Confirms a vehicle is physically plugged in.
    fn plug_confirmed(&mut self) -> Result<bool, DriverError>;

    /// Returns a human-readable driver name.
    fn name(&self) -> &'static str;
}

/// The DC charger feeding the reserved buffer battery.
pub trait BufferCharger: Send {
    /// Commands output voltage and current.
    fn set_voltage_current(&mut self, volts: f32, amps: f32) -> Result<(), DriverError>;
}

/// Charger driver shared between the allocation loop and the intake listener.
pub type SharedCharger = Arc<Mutex<dyn ChargerDriver>>;

/// Wraps a driver for sharing.
pub fn shared<C: ChargerDriver + 'static>(charger: C) -> SharedCharger {
    Arc::new(Mutex::new(charger))
}

/// Zero-mean sensor noise for simulated current readings (A).
pub fn reading_noise(rng: &mut StdRng, sigma_amps: f32) -> f32 {
    if !sigma_amps.is_finite() || sigma_amps <= 0.0 {
        return 0.0;
    }
    // Box-Muller, keeping u away from 0 so ln stays finite
    let u = rng.random::<f32>().max(1e-6);
    let theta = std::f32::consts::TAU * rng.random::<f32>();
    sigma_amps * (-2.0 * u.ln()).sqrt() * theta.cos()
}
