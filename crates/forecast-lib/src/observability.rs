//! Observability infrastructure for the idle-compute scheduler
//!
//! Provides:
//! - Prometheus metrics (training, prediction latency, forecast size, job dispatch, computation)
//! - Structured JSON logging with tracing

use crate::models::{Intensity, JobAction, JobId, UsageLabel};
use chrono::NaiveDateTime;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, GaugeVec, Histogram, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for prediction latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.000_001, 0.000_005, 0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05,
];

/// Histogram buckets for training duration (in seconds)
const TRAINING_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct SchedulerMetricsInner {
    training_duration_seconds: Histogram,
    model_accuracy: Gauge,
    model_version_info: GaugeVec,
    prediction_latency_seconds: Histogram,
    prediction_errors: IntCounter,
    forecast_slots: IntGauge,
    skipped_slots: IntCounter,
    pending_jobs: IntGauge,
    jobs_fired: IntCounterVec,
    computation_running: IntGauge,
    computation_cycles: IntCounter,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            training_duration_seconds: register_histogram!(
                "idle_scheduler_training_duration_seconds",
                "Time spent fitting the usage classifier",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            model_accuracy: register_gauge!(
                "idle_scheduler_model_accuracy",
                "Held-out accuracy of the current usage classifier"
            )
            .expect("Failed to register model_accuracy"),

            model_version_info: register_gauge_vec!(
                "idle_scheduler_model_version_info",
                "Information about the currently loaded classifier",
                &["version"]
            )
            .expect("Failed to register model_version_info"),

            prediction_latency_seconds: register_histogram!(
                "idle_scheduler_prediction_latency_seconds",
                "Time spent classifying one forecast slot",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            prediction_errors: register_int_counter!(
                "idle_scheduler_prediction_errors_total",
                "Total number of failed predictions"
            )
            .expect("Failed to register prediction_errors"),

            forecast_slots: register_int_gauge!(
                "idle_scheduler_forecast_slots",
                "Number of slots in the current forecast"
            )
            .expect("Failed to register forecast_slots"),

            skipped_slots: register_int_counter!(
                "idle_scheduler_skipped_slots_total",
                "Forecast slots that produced no jobs"
            )
            .expect("Failed to register skipped_slots"),

            pending_jobs: register_int_gauge!(
                "idle_scheduler_pending_jobs",
                "Jobs waiting in the dispatcher queue"
            )
            .expect("Failed to register pending_jobs"),

            jobs_fired: register_int_counter_vec!(
                "idle_scheduler_jobs_fired_total",
                "Jobs executed by the dispatcher",
                &["action"]
            )
            .expect("Failed to register jobs_fired"),

            computation_running: register_int_gauge!(
                "idle_scheduler_computation_running",
                "1 while a background computation is running"
            )
            .expect("Failed to register computation_running"),

            computation_cycles: register_int_counter!(
                "idle_scheduler_computation_cycles_total",
                "Completed background computation cycles"
            )
            .expect("Failed to register computation_cycles"),
        }
    }
}

/// Scheduler metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new)
    }

    pub fn observe_training_duration(&self, duration_secs: f64) {
        self.inner().training_duration_seconds.observe(duration_secs);
    }

    pub fn set_model_accuracy(&self, accuracy: f64) {
        self.inner().model_accuracy.set(accuracy);
    }

    /// Update model version info
    pub fn set_model_version(&self, version: &str) {
        self.inner().model_version_info.reset();
        self.inner()
            .model_version_info
            .with_label_values(&[version])
            .set(1.0);
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn inc_prediction_errors(&self) {
        self.inner().prediction_errors.inc();
    }

    pub fn set_forecast_slots(&self, count: usize) {
        self.inner().forecast_slots.set(count as i64);
    }

    pub fn inc_skipped_slots(&self, count: usize) {
        self.inner().skipped_slots.inc_by(count as u64);
    }

    pub fn set_pending_jobs(&self, count: usize) {
        self.inner().pending_jobs.set(count as i64);
    }

    /// Count a dispatched job under its action ("start" or "stop")
    pub fn inc_jobs_fired(&self, action: &JobAction) {
        let label = match action {
            JobAction::Start(_) => "start",
            JobAction::Stop => "stop",
        };
        self.inner().jobs_fired.with_label_values(&[label]).inc();
    }

    pub fn set_computation_running(&self, running: bool) {
        self.inner().computation_running.set(i64::from(running));
    }

    pub fn inc_computation_cycles(&self) {
        self.inner().computation_cycles.inc();
    }
}

/// Structured logger for scheduler events
///
/// Emits event-tagged records so log pipelines can filter on `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            "Idle compute agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Idle compute agent shutting down"
        );
    }

    pub fn log_history_ready(&self, rows: usize, synthesized: bool, path: &str) {
        info!(
            event = "history_ready",
            node = %self.node_name,
            rows = rows,
            synthesized = synthesized,
            path = %path,
            "Usage history ready"
        );
    }

    pub fn log_model_trained(
        &self,
        train_size: usize,
        test_size: usize,
        accuracy: Option<f64>,
        version: &str,
        degenerate: bool,
    ) {
        if degenerate {
            warn!(
                event = "model_trained",
                node = %self.node_name,
                train_size = train_size,
                test_size = test_size,
                accuracy = ?accuracy,
                model_version = %version,
                degenerate = true,
                "Usage classifier trained on a single class"
            );
        } else {
            info!(
                event = "model_trained",
                node = %self.node_name,
                train_size = train_size,
                test_size = test_size,
                accuracy = ?accuracy,
                model_version = %version,
                "Usage classifier trained"
            );
        }
    }

    pub fn log_forecast_built(
        &self,
        slots: usize,
        first: Option<NaiveDateTime>,
        last: Option<NaiveDateTime>,
        counts: [usize; UsageLabel::COUNT],
    ) {
        info!(
            event = "forecast_built",
            node = %self.node_name,
            slots = slots,
            first = ?first,
            last = ?last,
            idle = counts[UsageLabel::Idle.index()],
            medium = counts[UsageLabel::Medium.index()],
            high = counts[UsageLabel::High.index()],
            very_high = counts[UsageLabel::VeryHigh.index()],
            "Usage forecast built"
        );
    }

    pub fn log_plan(&self, jobs: usize, skipped_slots: usize) {
        info!(
            event = "jobs_planned",
            node = %self.node_name,
            jobs = jobs,
            skipped_slots = skipped_slots,
            "Computation jobs planned"
        );
    }

    pub fn log_job_fired(&self, id: &JobId, run_at: NaiveDateTime, action: &JobAction, lateness_ms: i64) {
        info!(
            event = "job_fired",
            node = %self.node_name,
            job_id = %id,
            run_at = %run_at,
            action = ?action,
            lateness_ms = lateness_ms,
            "Scheduled job fired"
        );
    }

    pub fn log_computation_started(&self, intensity: Intensity, run_id: u64) {
        info!(
            event = "computation_started",
            node = %self.node_name,
            intensity = %intensity,
            run_id = run_id,
            "Background computation started"
        );
    }

    pub fn log_computation_stopped(&self, intensity: Intensity, run_id: u64, cycles: u64, cpu_time_secs: f64) {
        info!(
            event = "computation_stopped",
            node = %self.node_name,
            intensity = %intensity,
            run_id = run_id,
            cycles = cycles,
            cpu_time_secs = cpu_time_secs,
            "Background computation stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_metrics_creation() {
        let metrics = SchedulerMetrics::new();

        metrics.observe_training_duration(1.5);
        metrics.set_model_accuracy(0.82);
        metrics.set_model_version("abc123");
        metrics.observe_prediction_latency(0.00002);
        metrics.set_forecast_slots(672);
        metrics.inc_skipped_slots(3);
        metrics.set_pending_jobs(10);
        metrics.inc_jobs_fired(&JobAction::Start(Intensity::High));
        metrics.inc_jobs_fired(&JobAction::Stop);
        metrics.set_computation_running(true);
        metrics.inc_computation_cycles();
    }

    #[test]
    fn test_metrics_handles_share_registry() {
        let a = SchedulerMetrics::new();
        let b = a.clone();
        a.set_forecast_slots(5);
        b.set_forecast_slots(7);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "idle_scheduler_forecast_slots"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
    }
}
