//! Input traces: the building-load series and the arrival list.
//!
//! Both loaders stop at the first bad record and name it.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::LoadError;
use crate::sim::scheduler::Arrival;

/// Loads the building-load trace: one sample (kW) per line, one line per tick.
///
/// Lines starting with `#` are skipped; only the first field of a line is read.
///
/// # Errors
///
/// Returns a `LoadError` if the file cannot be read, a sample is not a
/// finite number, or the trace is empty.
pub fn load_building_trace(path: &Path) -> Result<Vec<f32>, LoadError> {
    let file = open(path)?;
    read_building_trace(file, path)
}

/// Reads a building-load trace from any reader; `path` only labels errors.
///
/// # Errors
///
/// See [`load_building_trace`].
pub fn read_building_trace(reader: impl Read, path: &Path) -> Result<Vec<f32>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut samples = Vec::new();
    for (index, result) in rdr.records().enumerate() {
        let record_no = index as u64 + 1;
        let record = result.map_err(|e| record_error(path, record_no, e))?;
        let field = record.get(0).unwrap_or_default();
        let sample: f32 = field
            .parse()
            .map_err(|_| record_error(path, record_no, format!("{field:?} is not a number")))?;
        if !sample.is_finite() {
            return Err(record_error(path, record_no, "sample must be finite"));
        }
        samples.push(sample);
    }

    if samples.is_empty() {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(samples)
}

/// One row of the arrival CSV before validation.
#[derive(Debug, Deserialize)]
struct ArrivalRow {
    id: String,
    arrival_time: f32,
    deadline: f32,
    battery_class: String,
    desired_soc_delta_pct: f32,
    #[serde(default)]
    sleep_mode: bool,
}

/// Normalizes a battery class name for lookup.
pub fn battery_class_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Loads the arrival list.
///
/// The CSV header must name `id`, `arrival_time`, `deadline`,
/// `battery_class` and `desired_soc_delta_pct`; `sleep_mode` is optional.
/// Times are run-clock seconds.
///
/// # Errors
///
/// Returns a `LoadError` naming the first record that cannot be parsed,
/// references an unknown battery class, repeats an id, or has an
/// out-of-range value.
pub fn load_arrivals(path: &Path, classes: &BTreeMap<String, f32>) -> Result<Vec<Arrival>, LoadError> {
    let file = open(path)?;
    read_arrivals(file, path, classes)
}

/// Reads an arrival list from any reader; `path` only labels errors.
///
/// # Errors
///
/// See [`load_arrivals`].
pub fn read_arrivals(
    reader: impl Read,
    path: &Path,
    classes: &BTreeMap<String, f32>,
) -> Result<Vec<Arrival>, LoadError> {
    let lookup: BTreeMap<String, f32> = classes
        .iter()
        .map(|(name, &kwh)| (battery_class_key(name), kwh))
        .collect();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut seen = HashSet::new();
    let mut arrivals = Vec::new();
    for (index, result) in rdr.deserialize::<ArrivalRow>().enumerate() {
        let record_no = index as u64 + 1;
        let row = result.map_err(|e| record_error(path, record_no, e))?;

        if row.id.is_empty() {
            return Err(record_error(path, record_no, "empty vehicle id"));
        }
        if !seen.insert(row.id.clone()) {
            return Err(record_error(path, record_no, format!("duplicate vehicle id {:?}", row.id)));
        }
        let key = battery_class_key(&row.battery_class);
        let Some(&capacity_kwh) = lookup.get(&key) else {
            return Err(record_error(
                path,
                record_no,
                format!("unknown battery class {:?}", row.battery_class),
            ));
        };
        if !(row.arrival_time >= 0.0) {
            return Err(record_error(path, record_no, "arrival_time must be >= 0"));
        }
        if !(row.deadline > row.arrival_time) {
            return Err(record_error(path, record_no, "deadline must be after arrival_time"));
        }
        if !(0.0..=100.0).contains(&row.desired_soc_delta_pct) {
            return Err(record_error(
                path,
                record_no,
                "desired_soc_delta_pct must be in [0, 100]",
            ));
        }

        arrivals.push(Arrival {
            id: row.id,
            arrival_time: row.arrival_time,
            deadline: row.deadline,
            battery_class: key,
            capacity_kwh,
            desired_soc_delta_pct: row.desired_soc_delta_pct,
            sleep_mode: row.sleep_mode,
        });
    }
    Ok(arrivals)
}

fn open(path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn record_error(path: &Path, record: u64, message: impl ToString) -> LoadError {
    LoadError::Record {
        path: path.to_path_buf(),
        record,
        message: message.to_string(),
    }
}
