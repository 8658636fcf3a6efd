//! Usage sample generator
//!
//! Each timestamp falls into one of six day/hour buckets. The CPU usage for
//! the timestamp is drawn from the bucket's normal distribution and clamped
//! to `[0, 100]`.

use crate::error::{ForecastError, Result};
use crate::models::{slot_duration, UsageSample};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

/// Default RNG seed for reproducible histories
pub const DEFAULT_SEED: u64 = 42;

/// Length of a synthesized history window
pub const DEFAULT_HISTORY_WEEKS: i64 = 13;

/// Day/hour bucket a timestamp belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageBucket {
    /// Weekdays 09:00-17:00
    WeekdayWork,
    /// Weekdays 17:00-22:00
    WeekdayEvening,
    /// Weekdays 08:00-09:00 and 22:00-23:00
    WeekdayTransition,
    /// Remaining weekday hours
    WeekdayNight,
    /// Weekends 10:00-24:00
    WeekendDay,
    /// Remaining weekend hours
    WeekendNight,
}

/// Normal distribution parameters for a bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    pub mean: f64,
    pub std_dev: f64,
}

impl UsageBucket {
    pub const ALL: [UsageBucket; 6] = [
        UsageBucket::WeekdayWork,
        UsageBucket::WeekdayEvening,
        UsageBucket::WeekdayTransition,
        UsageBucket::WeekdayNight,
        UsageBucket::WeekendDay,
        UsageBucket::WeekendNight,
    ];

    pub fn classify(timestamp: NaiveDateTime) -> Self {
        let weekend = timestamp.weekday().num_days_from_monday() >= 5;
        let hour = timestamp.hour();

        if weekend {
            return if (10..24).contains(&hour) {
                UsageBucket::WeekendDay
            } else {
                UsageBucket::WeekendNight
            };
        }

        match hour {
            9..=16 => UsageBucket::WeekdayWork,
            17..=21 => UsageBucket::WeekdayEvening,
            8 | 22 => UsageBucket::WeekdayTransition,
            _ => UsageBucket::WeekdayNight,
        }
    }

    pub fn params(self) -> BucketParams {
        let (mean, std_dev) = match self {
            UsageBucket::WeekdayWork => (70.0, 10.0),
            UsageBucket::WeekdayEvening => (40.0, 10.0),
            UsageBucket::WeekdayTransition => (20.0, 5.0),
            UsageBucket::WeekdayNight => (5.0, 2.0),
            UsageBucket::WeekendDay => (30.0, 15.0),
            UsageBucket::WeekendNight => (10.0, 5.0),
        };
        BucketParams { mean, std_dev }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Configuration for history synthesis
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// First sample timestamp (inclusive)
    pub start: NaiveDateTime,
    /// Last sample timestamp (inclusive)
    pub end: NaiveDateTime,
    /// Sampling cadence (default: 15 minutes)
    pub interval: Duration,
    /// RNG seed
    pub seed: u64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2023, 7, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .expect("valid default start"),
            end: NaiveDate::from_ymd_opt(2023, 9, 30)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .expect("valid default end"),
            interval: slot_duration(),
            seed: DEFAULT_SEED,
        }
    }
}

impl SynthesizerConfig {
    /// Thirteen weeks of history ending at `end`
    pub fn ending_at(end: NaiveDateTime) -> Self {
        Self {
            start: end - Duration::weeks(DEFAULT_HISTORY_WEEKS),
            end,
            ..Self::default()
        }
    }
}

/// Seeded generator of synthetic usage samples
pub struct UsageSynthesizer {
    config: SynthesizerConfig,
    rng: StdRng,
    distributions: Vec<Normal<f64>>,
}

impl UsageSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Result<Self> {
        if config.interval < Duration::seconds(1) {
            return Err(ForecastError::invalid_input(format!(
                "sampling interval {} is shorter than one second",
                config.interval
            )));
        }
        if config.end < config.start {
            return Err(ForecastError::invalid_input(format!(
                "history end {} precedes start {}",
                config.end, config.start
            )));
        }

        let distributions = UsageBucket::ALL
            .iter()
            .map(|bucket| {
                let p = bucket.params();
                Normal::new(p.mean, p.std_dev).map_err(|e| {
                    ForecastError::invalid_input(format!("bad parameters for {:?}: {}", bucket, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Self {
            config,
            rng,
            distributions,
        })
    }

    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    /// Number of samples `generate` will produce
    pub fn expected_len(&self) -> usize {
        let span = (self.config.end - self.config.start).num_seconds();
        (span / self.config.interval.num_seconds()) as usize + 1
    }

    /// Generate one sample per interval boundary, both ends included
    pub fn generate(&mut self) -> Vec<UsageSample> {
        let mut samples = Vec::with_capacity(self.expected_len());
        let mut timestamp = self.config.start;

        while timestamp <= self.config.end {
            let cpu_usage_pct = self.sample_bucket(UsageBucket::classify(timestamp));
            samples.push(UsageSample {
                timestamp,
                cpu_usage_pct,
            });
            timestamp += self.config.interval;
        }

        info!(
            samples = samples.len(),
            start = %self.config.start,
            end = %self.config.end,
            seed = self.config.seed,
            "Synthesized usage history"
        );

        samples
    }

    /// Draw a clamped usage value from a bucket's distribution
    pub fn sample_bucket(&mut self, bucket: UsageBucket) -> f64 {
        let raw = self.distributions[bucket.index()].sample(&mut self.rng);
        let clamped = raw.clamp(0.0, 100.0);
        if clamped != raw {
            debug!(bucket = ?bucket, raw, "Clamped synthesized usage");
        }
        clamped
    }
}
