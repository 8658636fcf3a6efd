//! Classifier training and held-out evaluation
//!
//! The labeled history is split into a leading training part and a trailing
//! test part without shuffling, since this is a forecasting task. Class
//! weights are computed over the training part only.

use super::booster::{BoostedTrees, BoostingParams, ModelInput};
use super::features::ClassDistribution;
use super::model::TrainedModel;
use super::weights::ClassWeights;
use crate::error::{ForecastError, Result};
use crate::models::{LabeledSample, UsageLabel};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fraction of samples held out for evaluation
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Training configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub params: BoostingParams,
    /// Trailing fraction of samples reserved for evaluation, in `[0, 1)`
    pub test_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            params: BoostingParams::default(),
            test_fraction: DEFAULT_TEST_FRACTION,
        }
    }
}

/// Split ordered samples into leading train and trailing test parts.
///
/// The test part holds `ceil(n * test_fraction)` samples but never all of
/// them, so training always sees at least one sample.
pub fn split_time_ordered(
    samples: &[LabeledSample],
    test_fraction: f64,
) -> (&[LabeledSample], &[LabeledSample]) {
    let n = samples.len();
    let test_len = ((n as f64) * test_fraction).ceil() as usize;
    let test_len = test_len.min(n.saturating_sub(1));
    samples.split_at(n - test_len)
}

/// Precision/recall for one class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: UsageLabel,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Held-out evaluation results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub samples: usize,
    /// `None` when there was nothing to evaluate
    pub accuracy: Option<f64>,
    /// Rows are actual labels, columns predicted labels
    pub confusion: [[usize; UsageLabel::COUNT]; UsageLabel::COUNT],
    pub per_class: Vec<ClassMetrics>,
}

impl Evaluation {
    pub fn compute(actual: &[UsageLabel], predicted: &[UsageLabel]) -> Self {
        let mut confusion = [[0usize; UsageLabel::COUNT]; UsageLabel::COUNT];
        for (a, p) in actual.iter().zip(predicted) {
            confusion[a.index()][p.index()] += 1;
        }

        let samples = actual.len().min(predicted.len());
        let correct: usize = (0..UsageLabel::COUNT).map(|k| confusion[k][k]).sum();
        let accuracy = (samples > 0).then(|| correct as f64 / samples as f64);

        let per_class = UsageLabel::ALL
            .iter()
            .map(|&label| {
                let k = label.index();
                let tp = confusion[k][k] as f64;
                let predicted_k: usize = (0..UsageLabel::COUNT).map(|a| confusion[a][k]).sum();
                let support: usize = confusion[k].iter().sum();
                let precision = ratio(tp, predicted_k as f64);
                let recall = ratio(tp, support as f64);
                let f1 = ratio(2.0 * precision * recall, precision + recall);
                ClassMetrics {
                    label,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        Self {
            samples,
            accuracy,
            confusion,
            per_class,
        }
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Diagnostics produced by a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub train_size: usize,
    pub test_size: usize,
    pub train_distribution: ClassDistribution,
    pub class_weights: ClassWeights,
    pub evaluation: Evaluation,
    /// Training split contained fewer than two classes
    pub degenerate: bool,
    pub duration_ms: u64,
}

/// Fits usage classifiers
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train on an ascending sequence of labeled samples
    pub fn train(&self, samples: &[LabeledSample]) -> Result<(TrainedModel, TrainingReport)> {
        let start = Instant::now();
        self.validate(samples)?;

        let (train, test) = split_time_ordered(samples, self.config.test_fraction);

        let distribution = ClassDistribution::from_labels(train.iter().map(|s| s.label));
        let degenerate = distribution.present().len() < 2;
        if degenerate {
            warn!(
                distribution = %distribution,
                "Training split contains a single class, model will predict it everywhere"
            );
        }

        let class_weights = ClassWeights::from_distribution(&distribution);
        let inputs: Vec<ModelInput> = train.iter().map(|s| s.features.model_inputs()).collect();
        let labels: Vec<UsageLabel> = train.iter().map(|s| s.label).collect();
        let sample_weights = class_weights.sample_weights(labels.iter().copied());

        debug!(
            train = train.len(),
            test = test.len(),
            weights = ?class_weights,
            "Fitting boosted trees"
        );
        let booster = BoostedTrees::fit(&inputs, &labels, &sample_weights, self.config.params);

        let last_observed = samples[samples.len() - 1].timestamp;
        let model = TrainedModel::new(booster, last_observed, train.len());

        let actual: Vec<UsageLabel> = test.iter().map(|s| s.label).collect();
        let predicted: Vec<UsageLabel> = test
            .iter()
            .map(|s| model.booster().predict(&s.features.model_inputs()))
            .collect();
        let evaluation = Evaluation::compute(&actual, &predicted);

        let report = TrainingReport {
            train_size: train.len(),
            test_size: test.len(),
            train_distribution: distribution,
            class_weights,
            evaluation,
            degenerate,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            train_size = report.train_size,
            test_size = report.test_size,
            accuracy = ?report.evaluation.accuracy,
            confusion = ?report.evaluation.confusion,
            duration_ms = report.duration_ms,
            "Usage classifier trained"
        );

        Ok((model, report))
    }

    fn validate(&self, samples: &[LabeledSample]) -> Result<()> {
        if samples.is_empty() {
            return Err(ForecastError::invalid_input("no samples to train on"));
        }
        if !(0.0..1.0).contains(&self.config.test_fraction) {
            return Err(ForecastError::invalid_input(format!(
                "test fraction {} outside [0, 1)",
                self.config.test_fraction
            )));
        }

        for (i, sample) in samples.iter().enumerate() {
            sample
                .features
                .validate()
                .map_err(|e| ForecastError::invalid_input(format!("sample {}: {}", i, e)))?;
            if !sample.cpu_usage_pct.is_finite() {
                return Err(ForecastError::invalid_input(format!(
                    "sample {}: usage is not finite",
                    i
                )));
            }
            if i > 0 && sample.timestamp < samples[i - 1].timestamp {
                return Err(ForecastError::invalid_input(format!(
                    "sample {} at {} precedes its predecessor",
                    i, sample.timestamp
                )));
            }
        }
        Ok(())
    }
}

/// Train with the default configuration
pub fn train(samples: &[LabeledSample]) -> Result<(TrainedModel, TrainingReport)> {
    Trainer::default().train(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CalendarFeatures, UsageSample};
    use crate::predictor::features::prepare_samples;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 7, 3)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    /// Two weeks of deterministic usage: busy office hours, quiet nights
    fn history(days: i64) -> Vec<LabeledSample> {
        let samples: Vec<UsageSample> = (0..days * 96)
            .map(|i| {
                let timestamp = start() + Duration::minutes(15 * i);
                let hour = i % 96 / 4;
                let cpu_usage_pct = match hour {
                    0..=7 => 3.0,
                    8..=16 => 65.0,
                    17..=20 => 30.0,
                    _ => 90.0,
                };
                UsageSample {
                    timestamp,
                    cpu_usage_pct,
                }
            })
            .collect();
        prepare_samples(&samples)
    }

    fn fast_trainer() -> Trainer {
        Trainer::new(TrainingConfig {
            params: BoostingParams {
                n_estimators: 15,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_split_is_time_ordered() {
        let samples = history(5);
        let (train, test) = split_time_ordered(&samples, 0.2);

        assert_eq!(train.len() + test.len(), samples.len());
        assert_eq!(test.len(), 96);
        let max_train = train.iter().map(|s| s.timestamp).max().unwrap();
        let min_test = test.iter().map(|s| s.timestamp).min().unwrap();
        assert!(max_train <= min_test);
    }

    #[test]
    fn test_split_never_empties_training() {
        let samples = history(1);
        let (train, test) = split_time_ordered(&samples[..1], 0.2);
        assert_eq!(train.len(), 1);
        assert!(test.is_empty());

        let (train, test) = split_time_ordered(&samples[..3], 0.2);
        assert_eq!((train.len(), test.len()), (2, 1));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(
            fast_trainer().train(&[]),
            Err(ForecastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_out_of_range_features_rejected() {
        let mut samples = history(1);
        samples[5].features = CalendarFeatures {
            hour: 25,
            ..samples[5].features
        };
        assert!(matches!(
            fast_trainer().train(&samples),
            Err(ForecastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_off_grid_history_row_rejected() {
        let mut raw: Vec<UsageSample> = history(1)
            .iter()
            .map(|s| UsageSample {
                timestamp: s.timestamp,
                cpu_usage_pct: s.cpu_usage_pct,
            })
            .collect();
        raw[10].timestamp += Duration::minutes(7);

        assert!(matches!(
            fast_trainer().train(&prepare_samples(&raw)),
            Err(ForecastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unordered_input_rejected() {
        let mut samples = history(1);
        samples.swap(3, 4);
        assert!(matches!(
            fast_trainer().train(&samples),
            Err(ForecastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_learns_daily_pattern() {
        let samples = history(14);
        let (model, report) = fast_trainer().train(&samples).unwrap();

        assert_eq!(report.train_size + report.test_size, samples.len());
        assert!(!report.degenerate);
        assert!(report.evaluation.accuracy.unwrap() > 0.95);
        assert_eq!(model.last_observed(), samples.last().unwrap().timestamp);

        let night = CalendarFeatures::from_timestamp(start() + Duration::hours(3));
        let office = CalendarFeatures::from_timestamp(start() + Duration::hours(10));
        assert_eq!(model.predict(&night).unwrap(), UsageLabel::Idle);
        assert_eq!(model.predict(&office).unwrap(), UsageLabel::High);
    }

    #[test]
    fn test_predict_is_deterministic() {
        let samples = history(7);
        let (model, _) = fast_trainer().train(&samples).unwrap();
        let features = CalendarFeatures::from_timestamp(start() + Duration::minutes(615));

        let first = model.predict(&features).unwrap();
        let second = model.predict(&features).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            model.predict_many(&[features, features]).unwrap(),
            vec![first, first]
        );
    }

    #[test]
    fn test_degenerate_training_still_succeeds() {
        let samples: Vec<LabeledSample> = history(2)
            .into_iter()
            .map(|mut s| {
                s.cpu_usage_pct = 1.0;
                s.label = UsageLabel::Idle;
                s
            })
            .collect();
        let (model, report) = fast_trainer().train(&samples).unwrap();

        assert!(report.degenerate);
        let any = CalendarFeatures::from_timestamp(start() + Duration::hours(12));
        assert_eq!(model.predict(&any).unwrap(), UsageLabel::Idle);
    }

    #[test]
    fn test_evaluation_metrics() {
        use UsageLabel::*;
        let actual = [Idle, Idle, Medium, High, VeryHigh];
        let predicted = [Idle, Medium, Medium, High, High];
        let eval = Evaluation::compute(&actual, &predicted);

        assert_eq!(eval.samples, 5);
        assert!((eval.accuracy.unwrap() - 0.6).abs() < 1e-12);
        assert_eq!(eval.confusion[Idle.index()][Medium.index()], 1);
        assert_eq!(eval.confusion[VeryHigh.index()][High.index()], 1);

        let idle = eval.per_class[Idle.index()];
        assert!((idle.precision - 1.0).abs() < 1e-12);
        assert!((idle.recall - 0.5).abs() < 1e-12);
        assert_eq!(idle.support, 2);

        let very_high = eval.per_class[VeryHigh.index()];
        assert_eq!(very_high.precision, 0.0);
        assert_eq!(very_high.f1, 0.0);
    }

    #[test]
    fn test_empty_evaluation_has_no_accuracy() {
        let eval = Evaluation::compute(&[], &[]);
        assert_eq!(eval.accuracy, None);
    }
}
