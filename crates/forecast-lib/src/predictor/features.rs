//! Feature and label derivation
//!
//! Converts raw usage samples into calendar features plus a usage label.
//! Samples are stably sorted by timestamp so the downstream train/test split
//! preserves temporal order.

use crate::models::{CalendarFeatures, LabeledSample, UsageLabel, UsageSample};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Derive features and label for a single sample
pub fn label_sample(sample: &UsageSample) -> LabeledSample {
    LabeledSample {
        timestamp: sample.timestamp,
        cpu_usage_pct: sample.cpu_usage_pct,
        features: CalendarFeatures::from_timestamp(sample.timestamp),
        label: UsageLabel::from_usage(sample.cpu_usage_pct),
    }
}

/// Sort samples ascending by timestamp (stable) and label each one
pub fn prepare_samples(samples: &[UsageSample]) -> Vec<LabeledSample> {
    let mut ordered: Vec<&UsageSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);

    let labeled: Vec<LabeledSample> = ordered.into_iter().map(label_sample).collect();

    let distribution = ClassDistribution::from_labels(labeled.iter().map(|s| s.label));
    info!(
        samples = labeled.len(),
        idle = distribution.count(UsageLabel::Idle),
        medium = distribution.count(UsageLabel::Medium),
        high = distribution.count(UsageLabel::High),
        very_high = distribution.count(UsageLabel::VeryHigh),
        "Prepared labeled samples"
    );

    labeled
}

/// Number of samples per usage label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDistribution {
    counts: [usize; UsageLabel::COUNT],
}

impl ClassDistribution {
    pub fn from_labels(labels: impl IntoIterator<Item = UsageLabel>) -> Self {
        let mut counts = [0; UsageLabel::COUNT];
        for label in labels {
            counts[label.index()] += 1;
        }
        Self { counts }
    }

    pub fn count(&self, label: UsageLabel) -> usize {
        self.counts[label.index()]
    }

    pub fn counts(&self) -> [usize; UsageLabel::COUNT] {
        self.counts
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Labels with at least one sample, in encoding order
    pub fn present(&self) -> Vec<UsageLabel> {
        UsageLabel::ALL
            .iter()
            .copied()
            .filter(|l| self.count(*l) > 0)
            .collect()
    }
}

impl fmt::Display for ClassDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = UsageLabel::ALL
            .iter()
            .map(|l| format!("{}={}", l.name(), self.count(*l)))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 7, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_label_sample_derives_features() {
        let labeled = label_sample(&UsageSample {
            timestamp: ts(3, 10, 30),
            cpu_usage_pct: 50.0,
        });
        assert_eq!(labeled.label, UsageLabel::High);
        assert_eq!(labeled.features.hour, 10);
        assert_eq!(labeled.features.minute, 30);
        assert_eq!(labeled.features.time_of_day, 630);
        assert!(!labeled.features.is_weekend);
    }

    #[test]
    fn test_prepare_sorts_stably() {
        let samples = vec![
            UsageSample { timestamp: ts(3, 1, 0), cpu_usage_pct: 80.0 },
            UsageSample { timestamp: ts(3, 0, 0), cpu_usage_pct: 5.0 },
            UsageSample { timestamp: ts(3, 1, 0), cpu_usage_pct: 20.0 },
        ];
        let prepared = prepare_samples(&samples);

        assert_eq!(prepared[0].timestamp, ts(3, 0, 0));
        // Equal timestamps keep their input order
        assert_eq!(prepared[1].cpu_usage_pct, 80.0);
        assert_eq!(prepared[2].cpu_usage_pct, 20.0);
    }

    #[test]
    fn test_class_distribution() {
        let dist = ClassDistribution::from_labels(vec![
            UsageLabel::Idle,
            UsageLabel::Idle,
            UsageLabel::High,
        ]);
        assert_eq!(dist.total(), 3);
        assert_eq!(dist.count(UsageLabel::Idle), 2);
        assert_eq!(dist.count(UsageLabel::VeryHigh), 0);
        assert_eq!(dist.present(), vec![UsageLabel::Idle, UsageLabel::High]);
        assert!(dist.to_string().contains("Idle=2"));
    }
}
