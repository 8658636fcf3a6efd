//! Class-imbalance correction
//!
//! Balanced weighting: `n_samples / (n_present_classes * count(class))`, so
//! rare classes contribute as much total weight to the loss as common ones.

use super::features::ClassDistribution;
use crate::models::UsageLabel;
use serde::{Deserialize, Serialize};

/// Per-class sample weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    weights: [Option<f64>; UsageLabel::COUNT],
}

impl ClassWeights {
    /// Every class weighted 1.0
    pub fn uniform() -> Self {
        Self {
            weights: [Some(1.0); UsageLabel::COUNT],
        }
    }

    /// Inverse-frequency weights over the classes present in `labels`
    pub fn balanced(labels: impl IntoIterator<Item = UsageLabel>) -> Self {
        Self::from_distribution(&ClassDistribution::from_labels(labels))
    }

    pub fn from_distribution(distribution: &ClassDistribution) -> Self {
        let total = distribution.total() as f64;
        let present = distribution.present().len() as f64;
        let mut weights = [None; UsageLabel::COUNT];

        for label in distribution.present() {
            let count = distribution.count(label) as f64;
            weights[label.index()] = Some(total / (present * count));
        }

        Self { weights }
    }

    /// Weight for a class; `None` if the class never appeared
    pub fn get(&self, label: UsageLabel) -> Option<f64> {
        self.weights[label.index()]
    }

    /// Expand class weights into one weight per sample
    pub fn sample_weights(&self, labels: impl IntoIterator<Item = UsageLabel>) -> Vec<f64> {
        labels
            .into_iter()
            .map(|l| self.get(l).unwrap_or(1.0))
            .collect()
    }
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self::uniform()
    }
}
