//! Job planning and time-driven dispatch

mod clock;
mod dispatcher;
mod planner;

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use dispatcher::{FiredJob, JobExecutor, JobScheduler, ScheduleOutcome, ScheduleSummary};
pub use planner::{plan_jobs, plan_slot, SchedulePlan};
