//! Forecast table construction and persistence
//!
//! A forecast is a gap-free run of 15-minute slots starting one slot after
//! the last historical observation, each labeled by the usage classifier.

use crate::error::{ForecastError, Result};
use crate::models::{
    format_timestamp, is_slot_aligned, parse_timestamp, slot_duration, CalendarFeatures,
    ForecastSlot, UsageLabel, SLOTS_PER_DAY,
};
use crate::observability::SchedulerMetrics;
use crate::predictor::UsageClassifier;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Default forecast horizon in days
pub const DEFAULT_HORIZON_DAYS: u32 = 7;

/// Builds forecast tables from a classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastBuilder {
    horizon_days: u32,
}

impl Default for ForecastBuilder {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }
}

impl ForecastBuilder {
    pub fn new(horizon_days: u32) -> Result<Self> {
        if horizon_days == 0 {
            return Err(ForecastError::invalid_input("forecast horizon must be at least one day"));
        }
        Ok(Self { horizon_days })
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    pub fn slot_count(&self) -> usize {
        self.horizon_days as usize * SLOTS_PER_DAY
    }

    /// Predict every slot from `last_observed + 15min` through the horizon
    pub fn build<C>(&self, last_observed: NaiveDateTime, classifier: &C) -> Result<ForecastTable>
    where
        C: UsageClassifier + ?Sized,
    {
        if !is_slot_aligned(last_observed) {
            return Err(ForecastError::invalid_input(format!(
                "forecast anchor {} is not on a 15-minute boundary",
                format_timestamp(last_observed)
            )));
        }

        let mut slots = Vec::with_capacity(self.slot_count());
        let mut timestamp = last_observed;

        for _ in 0..self.slot_count() {
            timestamp += slot_duration();
            let features = CalendarFeatures::from_timestamp(timestamp);
            let predicted_label = classifier.classify(&features)?;
            slots.push(ForecastSlot {
                timestamp,
                features,
                predicted_label,
            });
        }

        let table = ForecastTable { slots };
        SchedulerMetrics::new().set_forecast_slots(table.len());
        info!(
            slots = table.len(),
            first = ?table.first().map(|s| s.timestamp),
            last = ?table.last().map(|s| s.timestamp),
            "Forecast built"
        );
        Ok(table)
    }
}

/// Ordered forecast slots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastTable {
    slots: Vec<ForecastSlot>,
}

impl ForecastTable {
    /// Wrap slots that must be strictly ascending and exactly one slot apart
    pub fn from_slots(slots: Vec<ForecastSlot>) -> Result<Self> {
        for (i, pair) in slots.windows(2).enumerate() {
            if pair[1].timestamp - pair[0].timestamp != slot_duration() {
                return Err(ForecastError::invalid_input(format!(
                    "slot {} at {} does not follow {} by one slot",
                    i + 1,
                    pair[1].timestamp,
                    pair[0].timestamp
                )));
            }
        }
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[ForecastSlot] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<ForecastSlot> {
        self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn first(&self) -> Option<&ForecastSlot> {
        self.slots.first()
    }

    pub fn last(&self) -> Option<&ForecastSlot> {
        self.slots.last()
    }

    /// Slot whose `[timestamp, timestamp + 15min)` window contains `instant`
    pub fn slot_at(&self, instant: NaiveDateTime) -> Result<&ForecastSlot> {
        let idx = self.slots.partition_point(|s| s.timestamp <= instant);
        idx.checked_sub(1)
            .map(|i| &self.slots[i])
            .filter(|slot| slot.covers(instant))
            .ok_or(ForecastError::NoForecastForInstant(instant))
    }

    /// Number of slots per predicted label
    pub fn label_counts(&self) -> [usize; UsageLabel::COUNT] {
        let mut counts = [0; UsageLabel::COUNT];
        for slot in &self.slots {
            counts[slot.predicted_label.index()] += 1;
        }
        counts
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for slot in &self.slots {
            csv_writer.serialize(ForecastRow::from(slot))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        self.write_csv(BufWriter::new(file))?;
        info!(path = %path.display(), slots = self.len(), "Wrote forecast table");
        Ok(())
    }

    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut slots = Vec::new();
        for (row, record) in csv_reader.deserialize::<ForecastRow>().enumerate() {
            let slot = record?
                .into_slot()
                .map_err(|e| ForecastError::invalid_input(format!("row {}: {}", row + 1, e)))?;
            slots.push(slot);
        }
        debug!(rows = slots.len(), "Parsed forecast table");
        Self::from_slots(slots)
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let table = Self::read_csv(BufReader::new(file))?;
        info!(path = %path.display(), slots = table.len(), "Loaded forecast table");
        Ok(table)
    }
}

/// CSV row layout of the forecast table
#[derive(Debug, Serialize, Deserialize)]
struct ForecastRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Hour")]
    hour: u32,
    #[serde(rename = "Minute")]
    minute: u32,
    #[serde(rename = "DayOfWeek")]
    day_of_week: u32,
    #[serde(rename = "IsWeekend")]
    is_weekend: u8,
    #[serde(rename = "TimeOfDay")]
    time_of_day: u32,
    #[serde(rename = "Predicted_Status")]
    predicted_status: usize,
    #[serde(rename = "Predicted_Status_Label")]
    predicted_status_label: String,
}

impl From<&ForecastSlot> for ForecastRow {
    fn from(slot: &ForecastSlot) -> Self {
        Self {
            timestamp: format_timestamp(slot.timestamp),
            hour: slot.features.hour,
            minute: slot.features.minute,
            day_of_week: slot.features.day_of_week,
            is_weekend: u8::from(slot.features.is_weekend),
            time_of_day: slot.features.time_of_day,
            predicted_status: slot.predicted_label.index(),
            predicted_status_label: slot.predicted_label_name().to_string(),
        }
    }
}

impl ForecastRow {
    fn into_slot(self) -> Result<ForecastSlot> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        let predicted_label = UsageLabel::from_index(self.predicted_status).ok_or_else(|| {
            ForecastError::invalid_input(format!("unknown Predicted_Status {}", self.predicted_status))
        })?;

        let features = CalendarFeatures {
            hour: self.hour,
            minute: self.minute,
            day_of_week: self.day_of_week,
            is_weekend: self.is_weekend != 0,
            time_of_day: self.time_of_day,
        };
        if features != CalendarFeatures::from_timestamp(timestamp) {
            return Err(ForecastError::invalid_input(format!(
                "features do not match timestamp {}",
                self.timestamp
            )));
        }

        Ok(ForecastSlot {
            timestamp,
            features,
            predicted_label,
        })
    }
}
