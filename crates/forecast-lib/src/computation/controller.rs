//! Background computation controller
//!
//! At most one computation runs at a time. Each run is a tokio task looping
//! on a per-intensity tick, cancelled cooperatively through a
//! `CancellationToken` checked on every iteration.

use super::manager::{CalculationRecord, ComputationManager};
use crate::models::{ComputationState, Intensity, JobAction, ScheduledJob};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::schedule::{Clock, JobExecutor, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_HIGH_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_MEDIUM_TICK: Duration = Duration::from_secs(2);
pub const DEFAULT_LOW_TICK: Duration = Duration::from_secs(3);

/// Label given to computation runs when none is configured
pub const DEFAULT_JOB_LABEL: &str = "background-computation";

/// Computation loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationConfig {
    /// Delay between iterations at each intensity
    pub high_tick: Duration,
    pub medium_tick: Duration,
    pub low_tick: Duration,
    pub job_label: String,
}

impl Default for ComputationConfig {
    fn default() -> Self {
        Self {
            high_tick: DEFAULT_HIGH_TICK,
            medium_tick: DEFAULT_MEDIUM_TICK,
            low_tick: DEFAULT_LOW_TICK,
            job_label: DEFAULT_JOB_LABEL.to_string(),
        }
    }
}

impl ComputationConfig {
    pub fn tick_for(&self, intensity: Intensity) -> Duration {
        match intensity {
            Intensity::High => self.high_tick,
            Intensity::Medium => self.medium_tick,
            Intensity::Low => self.low_tick,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { run_id: u64, intensity: Intensity },
    /// Another run is in progress; nothing changed
    AlreadyRunning { intensity: Intensity },
    /// The controller has been shut down
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped { run_id: u64, intensity: Intensity },
    AlreadyIdle,
}

struct ActiveRun {
    run_id: u64,
    intensity: Intensity,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ControllerState {
    active: Option<ActiveRun>,
    /// Cancelled runs that may still be winding down
    retired: Vec<JoinHandle<()>>,
    next_run_id: u64,
    closed: bool,
}

/// Owns the single background computation
pub struct ComputationController {
    config: ComputationConfig,
    state: Mutex<ControllerState>,
    manager: Arc<ComputationManager>,
    clock: Arc<dyn Clock>,
    metrics: SchedulerMetrics,
    logger: Option<StructuredLogger>,
}

impl ComputationController {
    pub fn new(config: ComputationConfig, manager: Arc<ComputationManager>) -> Self {
        Self {
            config,
            state: Mutex::new(ControllerState::default()),
            manager,
            clock: Arc::new(SystemClock),
            metrics: SchedulerMetrics::new(),
            logger: None,
        }
    }

    /// Clock used to date history records
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &ComputationConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ComputationManager> {
        &self.manager
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ComputationState {
        match &self.lock().active {
            Some(run) => ComputationState::Running(run.intensity),
            None => ComputationState::Idle,
        }
    }

    /// Start a run at `intensity` unless one is already in progress.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, intensity: Intensity) -> StartOutcome {
        let mut state = self.lock();

        if state.closed {
            warn!(intensity = %intensity, "Controller is shut down, start ignored");
            return StartOutcome::Closed;
        }
        if let Some(run) = &state.active {
            info!(
                requested = %intensity,
                running = %run.intensity,
                run_id = run.run_id,
                "Computation is already running"
            );
            return StartOutcome::AlreadyRunning {
                intensity: run.intensity,
            };
        }

        state.next_run_id += 1;
        let run_id = state.next_run_id;
        let cancel = CancellationToken::new();

        self.manager.begin_run(run_id, &self.config.job_label, intensity);
        let worker = Worker {
            run_id,
            intensity,
            tick: self.config.tick_for(intensity),
            label: self.config.job_label.clone(),
            cancel: cancel.clone(),
            manager: self.manager.clone(),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            logger: self.logger.clone(),
        };
        let handle = tokio::spawn(worker.run());

        state.retired.retain(|h| !h.is_finished());
        state.active = Some(ActiveRun {
            run_id,
            intensity,
            cancel,
            handle,
        });
        drop(state);

        self.metrics.set_computation_running(true);
        match &self.logger {
            Some(logger) => logger.log_computation_started(intensity, run_id),
            None => info!(intensity = %intensity, run_id, "Computation started"),
        }
        StartOutcome::Started { run_id, intensity }
    }

    /// Signal the running computation to stop; returns without waiting for it
    pub fn stop(&self) -> StopOutcome {
        let mut state = self.lock();

        let run = match state.active.take() {
            Some(run) => run,
            None => {
                info!("No computation is running");
                return StopOutcome::AlreadyIdle;
            }
        };

        run.cancel.cancel();
        state.retired.retain(|h| !h.is_finished());
        state.retired.push(run.handle);
        drop(state);

        self.metrics.set_computation_running(false);
        info!(intensity = %run.intensity, run_id = run.run_id, "Computation stop requested");
        StopOutcome::Stopped {
            run_id: run.run_id,
            intensity: run.intensity,
        }
    }

    /// Stop any run, refuse further starts and wait for every loop to exit
    pub async fn shutdown(&self) {
        let handles = {
            let mut state = self.lock();
            state.closed = true;
            if let Some(run) = state.active.take() {
                run.cancel.cancel();
                state.retired.push(run.handle);
                self.metrics.set_computation_running(false);
            }
            std::mem::take(&mut state.retired)
        };

        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Computation task ended abnormally");
            }
        }
        info!(awaited = count, "Computation controller shut down");
    }
}

impl JobExecutor for ComputationController {
    fn execute(&self, job: &ScheduledJob) {
        match job.action {
            JobAction::Start(intensity) => {
                let outcome = self.start(intensity);
                debug!(job_id = %job.id, ?outcome, "Start job executed");
            }
            JobAction::Stop => {
                let outcome = self.stop();
                debug!(job_id = %job.id, ?outcome, "Stop job executed");
            }
        }
    }
}

struct Worker {
    run_id: u64,
    intensity: Intensity,
    tick: Duration,
    label: String,
    cancel: CancellationToken,
    manager: Arc<ComputationManager>,
    clock: Arc<dyn Clock>,
    metrics: SchedulerMetrics,
    logger: Option<StructuredLogger>,
}

impl Worker {
    async fn run(self) {
        let date = self.clock.now();
        let started = Instant::now();
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {
                    cycles += 1;
                    self.metrics.inc_computation_cycles();
                    self.manager.update_current_calculation(self.run_id, cycles, &self.label);
                    debug!(
                        run_id = self.run_id,
                        intensity = %self.intensity,
                        cycle = cycles,
                        "Computation cycle completed"
                    );
                }
            }
        }

        let cpu_time_secs = started.elapsed().as_secs_f64();
        self.manager.finish_run(
            self.run_id,
            CalculationRecord {
                name: format!("{} #{}", self.label, self.run_id),
                score: cycles,
                date,
                cpu_time_secs,
                intensity: self.intensity,
            },
        );

        match &self.logger {
            Some(logger) => {
                logger.log_computation_stopped(self.intensity, self.run_id, cycles, cpu_time_secs)
            }
            None => info!(
                run_id = self.run_id,
                intensity = %self.intensity,
                cycles,
                "Computation task ended"
            ),
        }
    }
}
