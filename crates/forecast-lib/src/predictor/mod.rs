//! Usage classification engine
//!
//! Feature derivation, class weighting, gradient-boosted tree training,
//! artifact persistence and inference.

pub mod booster;
mod features;
mod inference;
mod model;
mod model_store;
mod training;
mod weights;

pub use booster::{BoostedTrees, BoostingParams};
pub use features::{label_sample, prepare_samples, ClassDistribution};
pub use inference::{InferenceStats, UsagePredictor};
pub use model::TrainedModel;
pub use model_store::{
    load_model, model_version, save_model, ArtifactInfo, ArtifactSummary, ARTIFACT_FORMAT_VERSION,
};
pub use training::{
    split_time_ordered, train, ClassMetrics, Evaluation, Trainer, TrainingConfig, TrainingReport,
    DEFAULT_TEST_FRACTION,
};
pub use weights::ClassWeights;

use crate::error::Result;
use crate::models::{CalendarFeatures, UsageLabel};

/// Anything that can map calendar features onto a usage label
pub trait UsageClassifier: Send + Sync {
    fn classify(&self, features: &CalendarFeatures) -> Result<UsageLabel>;
}

impl<C: UsageClassifier + ?Sized> UsageClassifier for std::sync::Arc<C> {
    fn classify(&self, features: &CalendarFeatures) -> Result<UsageLabel> {
        (**self).classify(features)
    }
}
