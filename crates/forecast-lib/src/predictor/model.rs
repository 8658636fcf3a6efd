//! Trained usage classifier

use super::booster::BoostedTrees;
use crate::error::Result;
use crate::models::{CalendarFeatures, UsageLabel};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Fitted classifier mapping calendar features to a usage label.
///
/// Read-only once trained; retraining produces a new value that replaces
/// the old one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    booster: BoostedTrees,
    /// Last historical timestamp seen during training
    last_observed: NaiveDateTime,
    training_rows: usize,
}

impl TrainedModel {
    pub(crate) fn new(booster: BoostedTrees, last_observed: NaiveDateTime, training_rows: usize) -> Self {
        Self {
            booster,
            last_observed,
            training_rows,
        }
    }

    /// Predict the usage label for one feature tuple
    pub fn predict(&self, features: &CalendarFeatures) -> Result<UsageLabel> {
        features.validate()?;
        Ok(self.booster.predict(&features.model_inputs()))
    }

    /// Predict labels for many feature tuples, failing on the first invalid one
    pub fn predict_many(&self, features: &[CalendarFeatures]) -> Result<Vec<UsageLabel>> {
        features.iter().map(|f| self.predict(f)).collect()
    }

    /// Class membership probabilities in label encoding order
    pub fn probabilities(&self, features: &CalendarFeatures) -> Result<[f64; UsageLabel::COUNT]> {
        features.validate()?;
        Ok(self.booster.probabilities(&features.model_inputs()))
    }

    pub fn last_observed(&self) -> NaiveDateTime {
        self.last_observed
    }

    pub fn training_rows(&self) -> usize {
        self.training_rows
    }

    pub fn booster(&self) -> &BoostedTrees {
        &self.booster
    }
}
