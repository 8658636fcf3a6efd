//! Core data models for the forecasting pipeline

use crate::error::{ForecastError, Result};
use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of one forecast slot in minutes
pub const SLOT_MINUTES: i64 = 15;

/// Number of slots in one day
pub const SLOTS_PER_DAY: usize = 96;

/// Width of one forecast slot
pub fn slot_duration() -> Duration {
    Duration::minutes(SLOT_MINUTES)
}

/// Round a timestamp down to the start of its slot
pub fn align_to_slot(timestamp: NaiveDateTime) -> NaiveDateTime {
    let minute = timestamp.minute() - timestamp.minute() % SLOT_MINUTES as u32;
    timestamp
        .date()
        .and_hms_opt(timestamp.hour(), minute, 0)
        .unwrap_or(timestamp)
}

pub fn is_slot_aligned(timestamp: NaiveDateTime) -> bool {
    align_to_slot(timestamp) == timestamp
}

/// Timestamp layout written to every CSV table
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an ISO-8601 style timestamp as written by common dataframe tools.
///
/// Accepts a space or `T` separator, optional fractional seconds, and
/// minute precision.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    const LAYOUTS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let raw = raw.trim();
    LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
        .ok_or_else(|| ForecastError::invalid_input(format!("unparseable timestamp '{}'", raw)))
}

pub fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Raw CPU usage observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub timestamp: NaiveDateTime,
    pub cpu_usage_pct: f64,
}

/// Usage level class, densely encoded 0..3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UsageLabel {
    Idle = 0,
    Medium = 1,
    High = 2,
    VeryHigh = 3,
}

impl UsageLabel {
    pub const COUNT: usize = 4;

    pub const ALL: [UsageLabel; Self::COUNT] = [
        UsageLabel::Idle,
        UsageLabel::Medium,
        UsageLabel::High,
        UsageLabel::VeryHigh,
    ];

    /// Map a CPU usage percentage onto its label.
    ///
    /// Intervals are half-open: `[0,10)` Idle, `[10,50)` Medium,
    /// `[50,75)` High, `[75,..)` VeryHigh.
    pub fn from_usage(cpu_usage_pct: f64) -> Self {
        if cpu_usage_pct < 10.0 {
            UsageLabel::Idle
        } else if cpu_usage_pct < 50.0 {
            UsageLabel::Medium
        } else if cpu_usage_pct < 75.0 {
            UsageLabel::High
        } else {
            UsageLabel::VeryHigh
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Human readable name used in CSV tables
    pub fn name(self) -> &'static str {
        match self {
            UsageLabel::Idle => "Idle",
            UsageLabel::Medium => "Medium Usage",
            UsageLabel::High => "High Usage",
            UsageLabel::VeryHigh => "Very High Usage",
        }
    }

    /// Background intensity allowed while the user is at this usage level.
    ///
    /// The less the user loads the CPU, the heavier the background job may be.
    /// `None` means the slot must be left alone.
    pub fn permitted_intensity(self) -> Option<Intensity> {
        match self {
            UsageLabel::Idle => Some(Intensity::High),
            UsageLabel::Medium => Some(Intensity::Medium),
            UsageLabel::High => Some(Intensity::Low),
            UsageLabel::VeryHigh => None,
        }
    }
}

impl fmt::Display for UsageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Background computation aggressiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intensity {
    High,
    Medium,
    Low,
}

impl Intensity {
    pub fn as_str(self) -> &'static str {
        match self {
            Intensity::High => "HIGH",
            Intensity::Medium => "MEDIUM",
            Intensity::Low => "LOW",
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intensity {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Ok(Intensity::High),
            "MEDIUM" => Ok(Intensity::Medium),
            "LOW" => Ok(Intensity::Low),
            other => Err(ForecastError::invalid_input(format!(
                "unknown intensity '{}', expected HIGH, MEDIUM or LOW",
                other
            ))),
        }
    }
}

/// Calendar features derived from a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarFeatures {
    pub hour: u32,
    pub minute: u32,
    /// Monday = 0, Sunday = 6
    pub day_of_week: u32,
    pub is_weekend: bool,
    /// Minutes since midnight
    pub time_of_day: u32,
}

impl CalendarFeatures {
    /// Number of values fed to the classifier
    pub const MODEL_INPUTS: usize = 4;

    /// Number of distinct values each model input can take
    pub const INPUT_CARDINALITY: [usize; Self::MODEL_INPUTS] = [24, 7, 2, 1440];

    pub fn from_timestamp(timestamp: NaiveDateTime) -> Self {
        let hour = timestamp.hour();
        let minute = timestamp.minute();
        let day_of_week = timestamp.weekday().num_days_from_monday();
        Self {
            hour,
            minute,
            day_of_week,
            is_weekend: day_of_week >= 5,
            time_of_day: hour * 60 + minute,
        }
    }

    /// Check every feature against its documented range
    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 {
            return Err(ForecastError::invalid_input(format!(
                "hour {} outside 0-23",
                self.hour
            )));
        }
        if self.minute > 59 || self.minute % SLOT_MINUTES as u32 != 0 {
            return Err(ForecastError::invalid_input(format!(
                "minute {} is not one of 0, 15, 30, 45",
                self.minute
            )));
        }
        if self.day_of_week > 6 {
            return Err(ForecastError::invalid_input(format!(
                "day_of_week {} outside 0-6",
                self.day_of_week
            )));
        }
        if self.is_weekend != (self.day_of_week >= 5) {
            return Err(ForecastError::invalid_input(format!(
                "is_weekend={} inconsistent with day_of_week {}",
                self.is_weekend, self.day_of_week
            )));
        }
        if self.time_of_day != self.hour * 60 + self.minute {
            return Err(ForecastError::invalid_input(format!(
                "time_of_day {} does not match {:02}:{:02}",
                self.time_of_day, self.hour, self.minute
            )));
        }
        Ok(())
    }

    /// Classifier input vector: hour, day of week, weekend flag, time of day
    pub fn model_inputs(&self) -> [u32; Self::MODEL_INPUTS] {
        [
            self.hour,
            self.day_of_week,
            self.is_weekend as u32,
            self.time_of_day,
        ]
    }
}

/// Usage sample with derived features and label
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub timestamp: NaiveDateTime,
    pub cpu_usage_pct: f64,
    pub features: CalendarFeatures,
    pub label: UsageLabel,
}

/// One predicted slot of the forecast horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastSlot {
    pub timestamp: NaiveDateTime,
    pub features: CalendarFeatures,
    pub predicted_label: UsageLabel,
}

impl ForecastSlot {
    pub fn predicted_label_name(&self) -> &'static str {
        self.predicted_label.name()
    }

    pub fn end(&self) -> NaiveDateTime {
        self.timestamp + slot_duration()
    }

    pub fn covers(&self, instant: NaiveDateTime) -> bool {
        self.timestamp <= instant && instant < self.end()
    }
}

/// Phase of a slot's job pair; starts sort before stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Start,
    Stop,
}

/// Deterministic job identity derived from the slot index.
///
/// Ordering is `(slot, phase)`, so slot `i`'s stop precedes slot `i + 1`'s
/// start when both are due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId {
    pub slot: usize,
    pub phase: JobPhase,
}

impl JobId {
    pub fn start(slot: usize) -> Self {
        Self {
            slot,
            phase: JobPhase::Start,
        }
    }

    pub fn stop(slot: usize) -> Self {
        Self {
            slot,
            phase: JobPhase::Stop,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            JobPhase::Start => write!(f, "start_{}", self.slot),
            JobPhase::Stop => write!(f, "stop_{}", self.slot),
        }
    }
}

/// Action carried by a scheduled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "intensity", rename_all = "lowercase")]
pub enum JobAction {
    Start(Intensity),
    Stop,
}

/// One-shot job fired once at `run_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: JobId,
    pub run_at: NaiveDateTime,
    pub action: JobAction,
}

/// State of the background computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "intensity", rename_all = "lowercase")]
pub enum ComputationState {
    Idle,
    Running(Intensity),
}

impl ComputationState {
    pub fn is_running(&self) -> bool {
        matches!(self, ComputationState::Running(_))
    }

    pub fn intensity(&self) -> Option<Intensity> {
        match self {
            ComputationState::Running(intensity) => Some(*intensity),
            ComputationState::Idle => None,
        }
    }
}
