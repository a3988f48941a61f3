use rand::{SeedableRng, rngs::StdRng};

use crate::devices::types::{BufferCharger, ChargerDriver, reading_noise};
use crate::error::DriverError;

/// Stand-in for the hardware charging point.
///
/// Draws `setpoint × efficiency`, capped at an optional physical ceiling
/// (the vehicle's real on-board limit) and perturbed by seeded Gaussian
/// noise. Reads can be forced to fail to exercise the fallback path.
#[derive(Debug, Clone)]
pub struct SimulatedCharger {
    setpoint: f32,
    efficiency: f32,
    ceiling: Option<f32>,
    noise_std: f32,
    plugged: bool,
    failing: bool,
    rng: StdRng,
}

impl SimulatedCharger {
    /// Creates a noiseless, plugged-in charger with no ceiling.
    pub fn new(efficiency: f32) -> Self {
        Self {
            setpoint: 0.0,
            efficiency,
            ceiling: None,
            noise_std: 0.0,
            plugged: true,
            failing: false,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Caps the simulated draw at `amps`.
    pub fn with_ceiling(mut self, amps: f32) -> Self {
        self.ceiling = Some(amps);
        self
    }

    /// Adds Gaussian measurement noise.
    pub fn with_noise(mut self, std_dev: f32, seed: u64) -> Self {
        self.noise_std = std_dev;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Sets whether a vehicle is plugged in.
    pub fn set_plugged(&mut self, plugged: bool) {
        self.plugged = plugged;
    }

    /// Makes every subsequent read fail (or succeed again).
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Last commanded current (A).
    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }
}

impl ChargerDriver for SimulatedCharger {
    fn read_current(&mut self) -> Result<f32, DriverError> {
        if self.failing {
            return Err(DriverError::Detached);
        }
        let mut draw = self.setpoint * self.efficiency;
        if let Some(ceiling) = self.ceiling {
            draw = draw.min(ceiling);
        }
        Ok((draw + reading_noise(&mut self.rng, self.noise_std)).max(0.0))
    }

    fn set_current(&mut self, amps: f32) -> Result<(), DriverError> {
        self.setpoint = amps.max(0.0);
        Ok(())
    }

    fn plug_confirmed(&mut self) -> Result<bool, DriverError> {
        Ok(self.plugged)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Buffer charger that only remembers the last command.
#[derive(Debug, Clone, Default)]
pub struct NullBufferCharger {
    /// Last `(volts, amps)` command.
    pub last_command: Option<(f32, f32)>,
    /// Commands received.
    pub commands: usize,
}

impl BufferCharger for NullBufferCharger {
    fn set_voltage_current(&mut self, volts: f32, amps: f32) -> Result<(), DriverError> {
        self.last_command = Some((volts, amps));
        self.commands += 1;
        Ok(())
    }
}
