//! Classifier inference
//!
//! `UsagePredictor` holds the current model behind a lock so a retrained model
//! can be swapped in while readers keep using the previous one.

use super::model::TrainedModel;
use super::UsageClassifier;
use crate::error::{ForecastError, Result};
use crate::models::{CalendarFeatures, UsageLabel};
use crate::observability::SchedulerMetrics;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// Inference latency above which a warning is logged
const MAX_INFERENCE_US: u128 = 1_000;

impl UsageClassifier for TrainedModel {
    fn classify(&self, features: &CalendarFeatures) -> Result<UsageLabel> {
        self.predict(features)
    }
}

/// Shared predictor with a replaceable model
pub struct UsagePredictor {
    model: RwLock<Option<Arc<TrainedModel>>>,
    model_version: RwLock<Option<String>>,
    metrics: SchedulerMetrics,
    inference_count: AtomicU64,
    slow_inference_count: AtomicU64,
    error_count: AtomicU64,
}

impl UsagePredictor {
    /// Predictor with no model; every prediction fails until one is installed
    pub fn new_without_model() -> Self {
        Self {
            model: RwLock::new(None),
            model_version: RwLock::new(None),
            metrics: SchedulerMetrics::new(),
            inference_count: AtomicU64::new(0),
            slow_inference_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn with_model(model: impl Into<Arc<TrainedModel>>, version: impl Into<String>) -> Self {
        let predictor = Self::new_without_model();
        predictor.install(model.into(), version.into());
        predictor
    }

    /// Replace the current model
    pub fn update_model(&self, model: impl Into<Arc<TrainedModel>>, version: impl Into<String>) {
        let version = version.into();
        debug!(version = %version, "Installing usage classifier");
        self.install(model.into(), version);
    }

    fn install(&self, model: Arc<TrainedModel>, version: String) {
        self.metrics.set_model_version(&version);
        match self.model.write() {
            Ok(mut guard) => *guard = Some(model),
            Err(poisoned) => *poisoned.into_inner() = Some(model),
        }
        match self.model_version.write() {
            Ok(mut guard) => *guard = Some(version),
            Err(poisoned) => *poisoned.into_inner() = Some(version),
        }
    }

    /// Current model, if any
    pub fn model(&self) -> Option<Arc<TrainedModel>> {
        self.model.read().ok().and_then(|guard| guard.clone())
    }

    pub fn model_version(&self) -> Option<String> {
        self.model_version.read().ok().and_then(|guard| guard.clone())
    }

    pub fn has_model(&self) -> bool {
        self.model().is_some()
    }

    pub fn predict_batch(&self, features: &[CalendarFeatures]) -> Result<Vec<UsageLabel>> {
        features.iter().map(|f| self.classify(f)).collect()
    }

    /// Get inference statistics
    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            total_inferences: self.inference_count.load(Ordering::Relaxed),
            slow_inferences: self.slow_inference_count.load(Ordering::Relaxed),
            failed_inferences: self.error_count.load(Ordering::Relaxed),
        }
    }
}

impl UsageClassifier for UsagePredictor {
    fn classify(&self, features: &CalendarFeatures) -> Result<UsageLabel> {
        let start = Instant::now();

        let model = match self.model() {
            Some(model) => model,
            None => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_prediction_errors();
                return Err(ForecastError::model_unavailable("no classifier loaded"));
            }
        };

        let label = model.predict(features).map_err(|e| {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            self.metrics.inc_prediction_errors();
            e
        })?;

        let elapsed = start.elapsed();
        self.inference_count.fetch_add(1, Ordering::Relaxed);
        self.metrics.observe_prediction_latency(elapsed.as_secs_f64());

        if elapsed.as_micros() > MAX_INFERENCE_US {
            self.slow_inference_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                elapsed_us = elapsed.as_micros(),
                "Inference exceeded {}us target", MAX_INFERENCE_US
            );
        }

        Ok(label)
    }
}

/// Inference statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InferenceStats {
    pub total_inferences: u64,
    pub slow_inferences: u64,
    pub failed_inferences: u64,
}
