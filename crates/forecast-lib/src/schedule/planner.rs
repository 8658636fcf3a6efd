//! Slot-to-job planning
//!
//! Each forecast slot yields a start/stop job pair whose intensity is the
//! inverse of predicted user load, or nothing when the user is expected to
//! keep the machine very busy.

use crate::models::{slot_duration, ForecastSlot, JobAction, JobId, ScheduledJob};
use crate::observability::SchedulerMetrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Jobs derived from a forecast
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePlan {
    /// Ordered by slot, start before stop
    pub jobs: Vec<ScheduledJob>,
    /// Indices of slots that produced no jobs
    pub skipped_slots: Vec<usize>,
}

impl SchedulePlan {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Start/stop pair for the slot at `index`, if its label permits computation
pub fn plan_slot(index: usize, slot: &ForecastSlot) -> Option<[ScheduledJob; 2]> {
    let intensity = slot.predicted_label.permitted_intensity()?;
    Some([
        ScheduledJob {
            id: JobId::start(index),
            run_at: slot.timestamp,
            action: JobAction::Start(intensity),
        },
        ScheduledJob {
            id: JobId::stop(index),
            run_at: slot.timestamp + slot_duration(),
            action: JobAction::Stop,
        },
    ])
}

/// Plan jobs for every slot of a forecast, indexed by position
pub fn plan_jobs(slots: &[ForecastSlot]) -> SchedulePlan {
    let mut plan = SchedulePlan::default();

    for (index, slot) in slots.iter().enumerate() {
        match plan_slot(index, slot) {
            Some(pair) => plan.jobs.extend(pair),
            None => {
                debug!(slot = index, timestamp = %slot.timestamp, "Very high usage expected, slot skipped");
                plan.skipped_slots.push(index);
            }
        }
    }

    SchedulerMetrics::new().inc_skipped_slots(plan.skipped_slots.len());
    info!(
        slots = slots.len(),
        jobs = plan.jobs.len(),
        skipped = plan.skipped_slots.len(),
        "Computation jobs planned"
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CalendarFeatures, Intensity, UsageLabel};
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn t(slot: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 10, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + Duration::minutes(15 * slot)
    }

    fn slot(index: i64, label: UsageLabel) -> ForecastSlot {
        ForecastSlot {
            timestamp: t(index),
            features: CalendarFeatures::from_timestamp(t(index)),
            predicted_label: label,
        }
    }

    #[test]
    fn test_idle_slot_runs_at_high_intensity() {
        let [start, stop] = plan_slot(4, &slot(0, UsageLabel::Idle)).unwrap();

        assert_eq!(start.id.to_string(), "start_4");
        assert_eq!(start.action, JobAction::Start(Intensity::High));
        assert_eq!(start.run_at, t(0));
        assert_eq!(stop.id.to_string(), "stop_4");
        assert_eq!(stop.action, JobAction::Stop);
        assert_eq!(stop.run_at - start.run_at, Duration::minutes(15));
    }

    #[test]
    fn test_intensity_mapping() {
        let intensity = |label| match plan_slot(0, &slot(0, label)) {
            Some([start, _]) => match start.action {
                JobAction::Start(i) => Some(i),
                JobAction::Stop => None,
            },
            None => None,
        };

        assert_eq!(intensity(UsageLabel::Idle), Some(Intensity::High));
        assert_eq!(intensity(UsageLabel::Medium), Some(Intensity::Medium));
        assert_eq!(intensity(UsageLabel::High), Some(Intensity::Low));
        assert_eq!(intensity(UsageLabel::VeryHigh), None);
    }

    #[test]
    fn test_plan_skips_very_high_slots() {
        let slots = vec![
            slot(0, UsageLabel::Idle),
            slot(1, UsageLabel::VeryHigh),
            slot(2, UsageLabel::High),
            slot(3, UsageLabel::VeryHigh),
        ];
        let plan = plan_jobs(&slots);

        assert_eq!(plan.len(), 4);
        assert_eq!(plan.skipped_slots, vec![1, 3]);
        let ids: Vec<String> = plan.jobs.iter().map(|j| j.id.to_string()).collect();
        assert_eq!(ids, vec!["start_0", "stop_0", "start_2", "stop_2"]);
    }

    #[test]
    fn test_adjacent_slots_share_boundary_instant() {
        let plan = plan_jobs(&[slot(0, UsageLabel::Idle), slot(1, UsageLabel::Medium)]);
        let stop_0 = plan.jobs[1];
        let start_1 = plan.jobs[2];

        assert_eq!(stop_0.run_at, start_1.run_at);
        assert!((stop_0.run_at, stop_0.id) < (start_1.run_at, start_1.id));
    }

    #[test]
    fn test_empty_forecast() {
        let plan = plan_jobs(&[]);
        assert!(plan.is_empty());
        assert!(plan.skipped_slots.is_empty());
    }
}
