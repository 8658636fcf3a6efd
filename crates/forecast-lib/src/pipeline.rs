//! End-to-end forecasting pipeline
//!
//! History → labeled samples → trained classifier → forecast → job plan.
//! File handling is left to callers.

use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastBuilder, ForecastTable};
use crate::models::UsageSample;
use crate::observability::SchedulerMetrics;
use crate::predictor::{
    model_version, prepare_samples, Trainer, TrainedModel, TrainingConfig, TrainingReport,
    UsagePredictor,
};
use crate::schedule::{plan_jobs, SchedulePlan};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub training: TrainingConfig,
    pub forecast: ForecastBuilder,
}

/// Everything produced by one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub model: Arc<TrainedModel>,
    /// Version the model was installed under, matching its saved artifact
    pub model_version: String,
    pub report: TrainingReport,
    pub forecast: ForecastTable,
    pub plan: SchedulePlan,
}

/// Train on `history`, install the model in `predictor` and plan the
/// coming horizon from its predictions
pub fn run_pipeline(
    history: &[UsageSample],
    config: &PipelineConfig,
    predictor: &UsagePredictor,
) -> Result<PipelineOutput> {
    if history.is_empty() {
        return Err(ForecastError::invalid_input("usage history is empty"));
    }

    let metrics = SchedulerMetrics::new();
    let samples = prepare_samples(history);

    let (model, report) = Trainer::new(config.training).train(&samples)?;
    metrics.observe_training_duration(report.duration_ms as f64 / 1000.0);
    if let Some(accuracy) = report.evaluation.accuracy {
        metrics.set_model_accuracy(accuracy);
    }

    let model = Arc::new(model);
    let version = model_version(&model)?;
    predictor.update_model(model.clone(), version.clone());

    let forecast = config.forecast.build(model.last_observed(), predictor)?;
    let plan = plan_jobs(forecast.slots());

    info!(
        history = history.len(),
        slots = forecast.len(),
        jobs = plan.len(),
        "Pipeline complete"
    );

    Ok(PipelineOutput {
        model,
        model_version: version,
        report,
        forecast,
        plan,
    })
}
