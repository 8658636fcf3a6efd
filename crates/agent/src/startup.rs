//! Startup pipeline
//!
//! Loads or synthesizes the usage history, trains and persists the
//! classifier, builds and persists the forecast, and populates the job
//! dispatcher.

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use forecast_lib::computation::{ComputationController, ComputationManager};
use forecast_lib::forecast::ForecastTable;
use forecast_lib::health::{Component, HealthRegistry};
use forecast_lib::models::UsageSample;
use forecast_lib::observability::{SchedulerMetrics, StructuredLogger};
use forecast_lib::pipeline::run_pipeline;
use forecast_lib::predictor::{save_model, UsagePredictor};
use forecast_lib::schedule::{Clock, FiredJob, JobExecutor, JobScheduler, SystemClock};
use forecast_lib::synth::{read_history_file, write_history_file, UsageSynthesizer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Long-lived components assembled at startup
pub struct AgentRuntime {
    pub forecast: Arc<ForecastTable>,
    pub predictor: Arc<UsagePredictor>,
    pub controller: Arc<ComputationController>,
    pub scheduler: Arc<JobScheduler>,
    pub fired_rx: mpsc::Receiver<FiredJob>,
}

/// Read the history CSV, synthesizing it first if allowed and missing
pub fn load_or_generate_history(
    config: &AgentConfig,
    logger: &StructuredLogger,
) -> Result<Vec<UsageSample>> {
    let path = &config.history_path;

    let (samples, synthesized) = if path.exists() {
        let samples = read_history_file(path)
            .with_context(|| format!("Failed to read usage history {:?}", path))?;
        (samples, false)
    } else if config.generate_history {
        let mut synthesizer = UsageSynthesizer::new(config.synthesizer_config()?)?;
        let samples = synthesizer.generate();
        write_history_file(path, &samples)
            .with_context(|| format!("Failed to write usage history {:?}", path))?;
        (samples, true)
    } else {
        anyhow::bail!(
            "Usage history {:?} not found and history generation is disabled",
            path
        );
    };

    logger.log_history_ready(samples.len(), synthesized, &path.display().to_string());
    Ok(samples)
}

/// Run the full startup pipeline with the system clock
pub async fn start(
    config: &AgentConfig,
    health: &HealthRegistry,
    logger: &StructuredLogger,
) -> Result<AgentRuntime> {
    start_with_clock(config, health, logger, Arc::new(SystemClock)).await
}

pub async fn start_with_clock(
    config: &AgentConfig,
    health: &HealthRegistry,
    logger: &StructuredLogger,
    clock: Arc<dyn Clock>,
) -> Result<AgentRuntime> {
    let pipeline_config = config.pipeline_config()?;
    let predictor = Arc::new(UsagePredictor::new_without_model());

    // Training is CPU bound, keep it off the async workers
    let output = {
        let config = config.clone();
        let logger = logger.clone();
        let predictor = predictor.clone();
        tokio::task::spawn_blocking(move || -> Result<_> {
            let history = load_or_generate_history(&config, &logger)?;
            Ok(run_pipeline(&history, &pipeline_config, &predictor)?)
        })
        .await
        .context("Startup pipeline task failed")??
    };

    let artifact = save_model(&config.model_path, &output.model, Some(&output.report))
        .with_context(|| format!("Failed to save model to {:?}", config.model_path))?;
    logger.log_model_trained(
        output.report.train_size,
        output.report.test_size,
        output.report.evaluation.accuracy,
        &artifact.version,
        output.report.degenerate,
    );
    health.set_healthy(Component::Classifier).await;

    output
        .forecast
        .write_file(&config.forecast_path)
        .with_context(|| format!("Failed to write forecast to {:?}", config.forecast_path))?;
    logger.log_forecast_built(
        output.forecast.len(),
        output.forecast.first().map(|s| s.timestamp),
        output.forecast.last().map(|s| s.timestamp),
        output.forecast.label_counts(),
    );
    if let Some(first) = output.forecast.first() {
        let now = clock.now();
        if first.timestamp <= now {
            warn!(
                first_slot = %first.timestamp,
                now = %now,
                "Forecast starts in the past, jobs already due will fire immediately"
            );
        }
    }
    health.set_healthy(Component::Forecast).await;

    let manager = Arc::new(ComputationManager::new());
    let controller = Arc::new(
        ComputationController::new(config.computation_config(), manager)
            .with_clock(clock.clone())
            .with_logger(logger.clone()),
    );
    health.set_healthy(Component::Controller).await;

    let executor: Arc<dyn JobExecutor> = controller.clone();
    let (scheduler, fired_rx) = JobScheduler::new(executor, clock);
    let scheduler = Arc::new(scheduler.with_logger(logger.clone()));
    let summary = scheduler.schedule_all(output.plan.jobs.iter().copied());
    logger.log_plan(summary.added + summary.replaced, output.plan.skipped_slots.len());
    health.set_healthy(Component::Scheduler).await;

    info!(
        pending_jobs = scheduler.pending(),
        next_job = ?scheduler.next_due().map(|j| j.run_at),
        "Startup pipeline complete"
    );

    Ok(AgentRuntime {
        forecast: Arc::new(output.forecast),
        predictor,
        controller,
        scheduler,
        fired_rx,
    })
}

/// Watch fired jobs and flag the scheduler once the plan is exhausted
pub async fn watch_fired_jobs(
    mut fired_rx: mpsc::Receiver<FiredJob>,
    scheduler: Arc<JobScheduler>,
    health: HealthRegistry,
) {
    while let Some(notice) = fired_rx.recv().await {
        debug!(
            job_id = %notice.job.id,
            lateness_ms = notice.lateness().num_milliseconds(),
            "Observed fired job"
        );
        if scheduler.pending() == 0 {
            info!("All planned jobs have fired");
            health
                .set_degraded(Component::Scheduler, "Plan exhausted, restart to re-plan")
                .await;
        }
    }
}

/// Publish pending-job count for a freshly started dispatcher
pub fn publish_initial_metrics(runtime: &AgentRuntime) {
    let metrics = SchedulerMetrics::new();
    metrics.set_pending_jobs(runtime.scheduler.pending());
    metrics.set_forecast_slots(runtime.forecast.len());
    metrics.set_computation_running(runtime.controller.state().is_running());
}
