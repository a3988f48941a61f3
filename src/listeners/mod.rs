//! Event listeners running beside the engine loops.
//!
//! Both hold the roster lock for one read or one insert at a time.

pub mod intake;
pub mod status;

pub use intake::{ArrivalDescriptor, Intake, IntakeMessage, IntakeReply};
pub use status::{StatusPublisher, StatusSnapshot};
