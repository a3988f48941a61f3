/// Per-tick allocation pass.
pub mod allocation;
/// Run clock and wall-clock pacing.
pub mod clock;
pub mod engine;
pub mod kpi;
/// Battery-lease policy.
pub mod lease;
pub mod roster;
/// Control-pass scheduling: admission, eviction, assist and priorities.
pub mod scheduler;
pub mod station;
pub mod types;
pub mod vehicle;
