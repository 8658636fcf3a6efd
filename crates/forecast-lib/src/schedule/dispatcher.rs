//! One-shot job dispatch
//!
//! Jobs wait in a queue ordered by `(run_at, id)`. A single dispatcher loop
//! sleeps until the earliest job is due, fires every due job in order and
//! discards it. Jobs already in the past fire as soon as the loop sees them.

use super::clock::Clock;
use crate::models::{JobId, ScheduledJob};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, info};

/// Upper bound on one dispatcher sleep, so wall-clock adjustments are noticed
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Capacity of the fired-job notification channel
const FIRED_CHANNEL_CAPACITY: usize = 256;

/// Receives jobs as they fall due; must return promptly
pub trait JobExecutor: Send + Sync {
    fn execute(&self, job: &ScheduledJob);
}

/// Notification sent after a job has been executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiredJob {
    pub job: ScheduledJob,
    pub fired_at: NaiveDateTime,
}

impl FiredJob {
    /// How late the job fired relative to its due time
    pub fn lateness(&self) -> chrono::Duration {
        self.fired_at - self.job.run_at
    }
}

/// Result of adding a job to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Added,
    /// A pending job with the same id was dropped in favour of this one
    Replaced,
}

/// Counts from a bulk schedule call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub added: usize,
    pub replaced: usize,
}

#[derive(Default)]
struct JobQueue {
    ordered: BTreeMap<(NaiveDateTime, JobId), ScheduledJob>,
    due_at: HashMap<JobId, NaiveDateTime>,
}

impl JobQueue {
    fn insert(&mut self, job: ScheduledJob) -> ScheduleOutcome {
        let outcome = match self.due_at.insert(job.id, job.run_at) {
            Some(previous) => {
                self.ordered.remove(&(previous, job.id));
                ScheduleOutcome::Replaced
            }
            None => ScheduleOutcome::Added,
        };
        self.ordered.insert((job.run_at, job.id), job);
        outcome
    }

    fn remove(&mut self, id: JobId) -> Option<ScheduledJob> {
        let run_at = self.due_at.remove(&id)?;
        self.ordered.remove(&(run_at, id))
    }

    fn pop_due(&mut self, now: NaiveDateTime) -> Option<ScheduledJob> {
        let (&(run_at, id), _) = self.ordered.first_key_value()?;
        if run_at > now {
            return None;
        }
        self.due_at.remove(&id);
        self.ordered.remove(&(run_at, id))
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }
}

/// Time-driven one-shot job scheduler
pub struct JobScheduler {
    queue: Mutex<JobQueue>,
    executor: Arc<dyn JobExecutor>,
    clock: Arc<dyn Clock>,
    wakeup: Notify,
    fired_tx: mpsc::Sender<FiredJob>,
    fired_count: AtomicU64,
    metrics: SchedulerMetrics,
    logger: Option<StructuredLogger>,
}

impl JobScheduler {
    /// Create a scheduler and the receiver of its fired-job notifications.
    ///
    /// Notifications are best effort: if the receiver falls behind or is
    /// dropped, dispatch carries on without it.
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<FiredJob>) {
        let (tx, rx) = mpsc::channel(FIRED_CHANNEL_CAPACITY);
        let scheduler = Self {
            queue: Mutex::new(JobQueue::default()),
            executor,
            clock,
            wakeup: Notify::new(),
            fired_tx: tx,
            fired_count: AtomicU64::new(0),
            metrics: SchedulerMetrics::new(),
            logger: None,
        };
        (scheduler, rx)
    }

    /// Emit `job_fired` events through a structured logger
    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    fn queue(&self) -> MutexGuard<'_, JobQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a job, replacing any pending job with the same id
    pub fn schedule(&self, job: ScheduledJob) -> ScheduleOutcome {
        let (outcome, pending) = {
            let mut queue = self.queue();
            let outcome = queue.insert(job);
            (outcome, queue.len())
        };
        self.metrics.set_pending_jobs(pending);
        debug!(job_id = %job.id, run_at = %job.run_at, ?outcome, "Job scheduled");
        self.wakeup.notify_one();
        outcome
    }

    pub fn schedule_all<I>(&self, jobs: I) -> ScheduleSummary
    where
        I: IntoIterator<Item = ScheduledJob>,
    {
        let mut summary = ScheduleSummary::default();
        let pending = {
            let mut queue = self.queue();
            for job in jobs {
                match queue.insert(job) {
                    ScheduleOutcome::Added => summary.added += 1,
                    ScheduleOutcome::Replaced => summary.replaced += 1,
                }
            }
            queue.len()
        };
        self.metrics.set_pending_jobs(pending);
        info!(
            added = summary.added,
            replaced = summary.replaced,
            pending = pending,
            "Jobs scheduled"
        );
        self.wakeup.notify_one();
        summary
    }

    /// Remove a pending job; returns it if it had not fired yet
    pub fn cancel(&self, id: JobId) -> Option<ScheduledJob> {
        let (removed, pending) = {
            let mut queue = self.queue();
            let removed = queue.remove(id);
            (removed, queue.len())
        };
        if removed.is_some() {
            self.metrics.set_pending_jobs(pending);
            debug!(job_id = %id, "Job cancelled");
            self.wakeup.notify_one();
        }
        removed
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Earliest pending job
    pub fn next_due(&self) -> Option<ScheduledJob> {
        self.queue().ordered.values().next().copied()
    }

    /// Total jobs fired since creation
    pub fn fired_count(&self) -> u64 {
        self.fired_count.load(Ordering::Relaxed)
    }

    /// Fire every job due at the current clock reading, in queue order
    pub fn fire_due(&self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.clock.now();
            let (job, pending) = {
                let mut queue = self.queue();
                match queue.pop_due(now) {
                    Some(job) => (job, queue.len()),
                    None => break,
                }
            };
            self.metrics.set_pending_jobs(pending);
            self.fire(job, now);
            fired += 1;
        }
        fired
    }

    fn fire(&self, job: ScheduledJob, now: NaiveDateTime) {
        let notice = FiredJob { job, fired_at: now };
        let lateness_ms = notice.lateness().num_milliseconds();
        match &self.logger {
            Some(logger) => logger.log_job_fired(&job.id, job.run_at, &job.action, lateness_ms),
            None => debug!(job_id = %job.id, lateness_ms, "Job fired"),
        }

        self.executor.execute(&job);
        self.fired_count.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_jobs_fired(&job.action);

        if self.fired_tx.try_send(notice).is_err() {
            debug!(job_id = %job.id, "Fired-job notification dropped");
        }
    }

    /// Time until the next job is due, capped at `MAX_SLEEP`
    fn next_wait(&self) -> Option<Duration> {
        let next = self.next_due()?;
        let wait = (next.run_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        Some(wait.min(MAX_SLEEP))
    }

    /// Run the dispatch loop until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(pending = self.pending(), "Starting job dispatcher");

        loop {
            self.fire_due();

            let wait = self.next_wait();
            let sleep = async {
                match wait {
                    Some(duration) => tokio::time::sleep(duration).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = sleep => {}
                _ = self.wakeup.notified() => {}
                _ = shutdown.recv() => {
                    info!(pending = self.pending(), "Shutting down job dispatcher");
                    break;
                }
            }
        }
    }
}
