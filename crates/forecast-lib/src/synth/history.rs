//! Historical usage CSV table
//!
//! Columns: `Timestamp`, `CPU_Usage`, `Activity_Status`. The status column is
//! informational only; labels are always recomputed from `CPU_Usage`.

use crate::error::{ForecastError, Result};
use crate::models::{format_timestamp, parse_timestamp, UsageLabel, UsageSample};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Serialize, Deserialize)]
struct HistoryRecord {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CPU_Usage")]
    cpu_usage: f64,
    #[serde(rename = "Activity_Status", default)]
    activity_status: Option<String>,
}

/// Write samples as a historical CSV table
pub fn write_history<W: Write>(writer: W, samples: &[UsageSample]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for sample in samples {
        csv_writer.serialize(HistoryRecord {
            timestamp: format_timestamp(sample.timestamp),
            cpu_usage: sample.cpu_usage_pct,
            activity_status: Some(UsageLabel::from_usage(sample.cpu_usage_pct).name().to_string()),
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_history_file(path: &Path, samples: &[UsageSample]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    write_history(BufWriter::new(file), samples)?;
    info!(path = %path.display(), rows = samples.len(), "Wrote usage history");
    Ok(())
}

/// Read a historical CSV table in file order
pub fn read_history<R: Read>(reader: R) -> Result<Vec<UsageSample>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut samples = Vec::new();

    for (row, record) in csv_reader.deserialize::<HistoryRecord>().enumerate() {
        let record = record?;
        let timestamp = parse_timestamp(&record.timestamp)
            .map_err(|e| ForecastError::invalid_input(format!("row {}: {}", row + 1, e)))?;
        if !record.cpu_usage.is_finite() {
            return Err(ForecastError::invalid_input(format!(
                "row {}: CPU_Usage is not a finite number",
                row + 1
            )));
        }
        samples.push(UsageSample {
            timestamp,
            cpu_usage_pct: record.cpu_usage,
        });
    }

    debug!(rows = samples.len(), "Parsed usage history");
    Ok(samples)
}

pub fn read_history_file(path: &Path) -> Result<Vec<UsageSample>> {
    let file = File::open(path)?;
    let samples = read_history(BufReader::new(file))?;
    info!(path = %path.display(), rows = samples.len(), "Loaded usage history");
    Ok(samples)
}
