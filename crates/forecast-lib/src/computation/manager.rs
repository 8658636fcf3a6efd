//! Computation progress and history
//!
//! Mirrors the controller's runs for external consumers: the run in progress
//! with its cycle count, and an append-only history of finished runs.

use crate::models::Intensity;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationStatus {
    Idle,
    Running,
}

/// The calculation currently in progress, or the last one if idle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentCalculation {
    pub run_id: Option<u64>,
    pub cycle: u64,
    pub label: Option<String>,
    pub intensity: Option<Intensity>,
    pub status: CalculationStatus,
}

impl Default for CurrentCalculation {
    fn default() -> Self {
        Self {
            run_id: None,
            cycle: 0,
            label: None,
            intensity: None,
            status: CalculationStatus::Idle,
        }
    }
}

/// One finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRecord {
    pub name: String,
    /// Completed cycles
    pub score: u64,
    /// When the run started
    pub date: NaiveDateTime,
    pub cpu_time_secs: f64,
    pub intensity: Intensity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub current_calculation: CurrentCalculation,
    pub calculation_history: Vec<CalculationRecord>,
}

#[derive(Default)]
struct ManagerState {
    current: CurrentCalculation,
    history: Vec<CalculationRecord>,
}

/// Shared view of computation progress
#[derive(Default)]
pub struct ComputationManager {
    state: Mutex<ManagerState>,
}

impl ComputationManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a new run as in progress
    pub fn begin_run(&self, run_id: u64, label: &str, intensity: Intensity) {
        self.state().current = CurrentCalculation {
            run_id: Some(run_id),
            cycle: 0,
            label: Some(label.to_string()),
            intensity: Some(intensity),
            status: CalculationStatus::Running,
        };
    }

    /// Record progress; ignored unless `run_id` is the run in progress
    pub fn update_current_calculation(&self, run_id: u64, cycle: u64, label: &str) -> bool {
        let mut state = self.state();
        if state.current.run_id != Some(run_id) || state.current.status != CalculationStatus::Running {
            return false;
        }
        state.current.cycle = cycle;
        if state.current.label.as_deref() != Some(label) {
            state.current.label = Some(label.to_string());
        }
        true
    }

    /// Append a finished run; the current calculation goes idle if it was this run
    pub fn finish_run(&self, run_id: u64, record: CalculationRecord) {
        let mut state = self.state();
        if state.current.run_id == Some(run_id) {
            state.current.status = CalculationStatus::Idle;
            state.current.cycle = record.score;
        }
        state.history.push(record);
    }

    pub fn add_to_history(&self, record: CalculationRecord) {
        self.state().history.push(record);
    }

    pub fn current_calculation(&self) -> CurrentCalculation {
        self.state().current.clone()
    }

    pub fn calculation_history(&self) -> Vec<CalculationRecord> {
        self.state().history.clone()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let state = self.state();
        ManagerSnapshot {
            current_calculation: state.current.clone(),
            calculation_history: state.history.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(name: &str, score: u64) -> CalculationRecord {
        CalculationRecord {
            name: name.to_string(),
            score,
            date: NaiveDate::from_ymd_opt(2023, 10, 2)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            cpu_time_secs: score as f64,
            intensity: Intensity::Medium,
        }
    }

    #[test]
    fn test_starts_idle() {
        let manager = ComputationManager::new();
        let current = manager.current_calculation();
        assert_eq!(current.status, CalculationStatus::Idle);
        assert_eq!(current.cycle, 0);
        assert!(manager.calculation_history().is_empty());
    }

    #[test]
    fn test_progress_of_current_run() {
        let manager = ComputationManager::new();
        manager.begin_run(1, "docking", Intensity::High);

        assert!(manager.update_current_calculation(1, 3, "docking"));
        let current = manager.current_calculation();
        assert_eq!(current.cycle, 3);
        assert_eq!(current.status, CalculationStatus::Running);
        assert_eq!(current.intensity, Some(Intensity::High));
    }

    #[test]
    fn test_stale_run_updates_ignored() {
        let manager = ComputationManager::new();
        manager.begin_run(1, "docking", Intensity::High);
        manager.begin_run(2, "docking", Intensity::Low);

        assert!(!manager.update_current_calculation(1, 9, "docking"));
        manager.finish_run(1, record("docking #1", 9));

        let current = manager.current_calculation();
        assert_eq!(current.run_id, Some(2));
        assert_eq!(current.cycle, 0);
        assert_eq!(current.status, CalculationStatus::Running);
        assert_eq!(manager.calculation_history().len(), 1);
    }

    #[test]
    fn test_finish_appends_history_in_order() {
        let manager = ComputationManager::new();
        manager.begin_run(1, "docking", Intensity::High);
        manager.finish_run(1, record("docking #1", 4));
        manager.add_to_history(record("imported", 7));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.current_calculation.status, CalculationStatus::Idle);
        assert_eq!(snapshot.current_calculation.cycle, 4);
        let names: Vec<&str> = snapshot
            .calculation_history
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["docking #1", "imported"]);
    }
}
