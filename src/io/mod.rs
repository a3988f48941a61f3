//! File-backed inputs and outputs: traces, telemetry and checkpoints.

pub mod checkpoint;
pub mod telemetry;
/// Building-load and arrival-list loaders.
pub mod traces;
