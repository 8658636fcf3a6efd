//! Background computation control and progress tracking

mod controller;
mod manager;

pub use controller::{
    ComputationConfig, ComputationController, StartOutcome, StopOutcome, DEFAULT_HIGH_TICK,
    DEFAULT_JOB_LABEL, DEFAULT_LOW_TICK, DEFAULT_MEDIUM_TICK,
};
pub use manager::{
    CalculationRecord, CalculationStatus, ComputationManager, CurrentCalculation, ManagerSnapshot,
};
