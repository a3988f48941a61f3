//! Per-tick telemetry persistence.
//!
//! Every tick produces one row per vehicle and one row per station. The CSV
//! files written here are also the only checkpoint source, see
//! [`crate::io::checkpoint`].

use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TelemetryError;
use crate::sim::types::{StationRecord, TickReport, VehicleRecord};

/// Vehicle telemetry file name inside the telemetry directory.
pub const VEHICLES_FILE: &str = "vehicles.csv";
/// Station telemetry file name inside the telemetry directory.
pub const STATIONS_FILE: &str = "stations.csv";

/// Destination for per-tick telemetry.
pub trait TelemetrySink: Send {
    /// Persists the rows of one tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows cannot be written.
    fn record(&mut self, report: &TickReport) -> Result<(), TelemetryError>;

    /// Flushes buffered rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying writer fails.
    fn flush(&mut self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn record(&mut self, _report: &TickReport) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Rows captured by a [`MemorySink`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recorded {
    /// Vehicle rows in write order.
    pub vehicles: Vec<VehicleRecord>,
    /// Station rows in write order.
    pub stations: Vec<StationRecord>,
}

/// Keeps rows in memory. Clones share the same buffer, so a clone kept by
/// the caller can read what the engine wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Recorded>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn recorded(&self) -> Recorded {
        self.inner.lock().clone()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&mut self, report: &TickReport) -> Result<(), TelemetryError> {
        let mut inner = self.inner.lock();
        inner.vehicles.extend(report.vehicles.iter().cloned());
        inner.stations.extend(report.stations.iter().cloned());
        Ok(())
    }
}

/// Writes `vehicles.csv` and `stations.csv` into a directory.
pub struct CsvSink {
    vehicles: csv::Writer<BufWriter<File>>,
    stations: csv::Writer<BufWriter<File>>,
}

impl CsvSink {
    /// Opens the telemetry files in `dir`, creating the directory if needed.
    ///
    /// With `append` set, existing rows are kept and new rows follow them;
    /// headers are only written to files that start out empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or files cannot be created.
    pub fn create(dir: &Path, append: bool) -> Result<Self, TelemetryError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            vehicles: open_writer(&dir.join(VEHICLES_FILE), append)?,
            stations: open_writer(&dir.join(STATIONS_FILE), append)?,
        })
    }

    /// Paths of the two telemetry files in `dir`.
    pub fn paths(dir: &Path) -> (PathBuf, PathBuf) {
        (dir.join(VEHICLES_FILE), dir.join(STATIONS_FILE))
    }
}

fn open_writer(path: &Path, append: bool) -> Result<csv::Writer<BufWriter<File>>, TelemetryError> {
    let file = if append {
        OpenOptions::new().create(true).append(true).open(path)?
    } else {
        File::create(path)?
    };
    let empty = file.metadata()?.len() == 0;
    Ok(csv::WriterBuilder::new()
        .has_headers(empty)
        .from_writer(BufWriter::new(file)))
}

impl TelemetrySink for CsvSink {
    fn record(&mut self, report: &TickReport) -> Result<(), TelemetryError> {
        for row in &report.vehicles {
            self.vehicles.serialize(row)?;
        }
        for row in &report.stations {
            self.stations.serialize(row)?;
        }
        // Rows must hit disk every tick to be usable as a checkpoint.
        self.flush()
    }

    fn flush(&mut self) -> Result<(), TelemetryError> {
        self.vehicles.flush()?;
        self.stations.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(t: f32) -> TickReport {
        TickReport {
            time_s: t,
            vehicles: vec![VehicleRecord {
                timestamp: t,
                vehicle_id: "ev1".to_string(),
                station_id: 1,
                measured_current: 10.8,
                assigned_current: 12.0,
                assist_current: 0.0,
                soc_remaining_pct: 40.0,
                leased_station_id: None,
                priority: 1.0,
                assist_enabled: false,
                max_current: 24.0,
            }],
            stations: vec![StationRecord {
                timestamp: t,
                station_id: 0,
                discharge_current: 0.0,
                charge_current: 0.0,
                capacity_kwh: 13.5,
            }],
            ..TickReport::default()
        }
    }

    #[test]
    fn csv_sink_writes_header_once_across_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut sink = CsvSink::create(dir.path(), false).expect("create");
            sink.record(&report(0.0)).expect("record");
        }
        {
            let mut sink = CsvSink::create(dir.path(), true).expect("reopen");
            sink.record(&report(2.0)).expect("record");
        }
        let text = fs::read_to_string(dir.path().join(VEHICLES_FILE)).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,vehicle_id,station_id"));
        assert_eq!(text.matches("vehicle_id").count(), 1);
    }

    #[test]
    fn truncates_without_append() {
        let dir = tempfile::tempdir().expect("tempdir");
        for _ in 0..2 {
            let mut sink = CsvSink::create(dir.path(), false).expect("create");
            sink.record(&report(0.0)).expect("record");
        }
        let text = fs::read_to_string(dir.path().join(STATIONS_FILE)).expect("read");
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn memory_sink_clones_share_rows() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.record(&report(0.0)).expect("record");
        writer.record(&report(2.0)).expect("record");
        let rec = sink.recorded();
        assert_eq!(rec.vehicles.len(), 2);
        assert_eq!(rec.stations[1].timestamp, 2.0);
    }
}
