//! EV charging management: a fast allocation loop sharing a building's spare
//! capacity among connected vehicles, topped up from buffer batteries, and a
//! slow scheduler reordering them by deadline urgency.

#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod devices;
pub mod error;
pub mod io;
pub mod listeners;
/// Allocation engine, scheduler and roster.
pub mod sim;
