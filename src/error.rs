//! Error types shared across the crate.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure talking to a charging station or buffer charger.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The transport failed.
    #[error("driver i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The device answered with something unexpected.
    #[error("unexpected device response: {0:?}")]
    Protocol(String),
    /// The device rejected the command.
    #[error("device rejected command {0:?}")]
    Rejected(String),
    /// No device is attached.
    #[error("no device attached")]
    Detached,
}

/// Failure loading an input trace or a telemetry checkpoint.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be opened.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// A record could not be parsed or failed validation.
    #[error("{path}: record {record}: {message}")]
    Record {
        /// Offending file.
        path: PathBuf,
        /// One-based record number (header excluded).
        record: u64,
        /// What was wrong with it.
        message: String,
    },
    /// The file held no usable records.
    #[error("{path}: no records")]
    Empty {
        /// Offending file.
        path: PathBuf,
    },
}

/// Failure persisting telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The CSV writer failed.
    #[error("telemetry write failed: {0}")]
    Csv(#[from] csv::Error),
    /// The underlying file failed.
    #[error("telemetry i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Reason an arrival descriptor was not admitted.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// The descriptor names a battery class the scenario does not define.
    #[error("unknown battery class {0:?}")]
    UnknownBatteryClass(String),
    /// The deadline is not after the current tick time.
    #[error("deadline {deadline}s is not after current time {now}s")]
    DeadlinePassed {
        /// Requested deadline (seconds).
        deadline: f32,
        /// Current tick time (seconds).
        now: f32,
    },
    /// The hardware slot already has a vehicle.
    #[error("hardware slot occupied by {0:?}")]
    SlotOccupied(String),
    /// A vehicle with this identity is already connected.
    #[error("vehicle {0:?} already connected")]
    Duplicate(String),
    /// No connected vehicle has this identity.
    #[error("vehicle {0:?} is not connected")]
    UnknownVehicle(String),
    /// The station did not confirm a plugged-in vehicle.
    #[error("no vehicle plugged into the hardware station")]
    NotPlugged,
    /// The station could not be queried.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// The descriptor itself was malformed.
    #[error("malformed arrival descriptor: {0}")]
    Malformed(String),
    /// The run is over.
    #[error("engine has finished")]
    Finished,
}
