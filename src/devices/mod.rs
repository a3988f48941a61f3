//! Hardware drivers for the charging point and the reserved buffer charger.

/// OpenEVSE RAPI charging-station driver.
pub mod rapi;
/// Simulated stand-ins used when no hardware is attached.
pub mod simulated;
pub mod types;
/// CAN-controlled DC buffer charger.
pub mod zeka;

pub use rapi::RapiCharger;
pub use simulated::{NullBufferCharger, SimulatedCharger};
pub use types::{BufferCharger, ChargerDriver, SharedCharger};
pub use zeka::{LineFrameSink, ZekaCharger};
