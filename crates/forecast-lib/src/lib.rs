//! Idle-time forecasting and background computation scheduling
//!
//! This crate provides the core functionality for:
//! - Synthetic CPU usage history generation
//! - Calendar feature derivation and usage labeling
//! - Gradient-boosted usage classification
//! - Week-ahead usage forecasts
//! - Time-driven start/stop job dispatch
//! - A cancelable, mutually exclusive background computation
//! - Health checks and observability

pub mod computation;
pub mod error;
pub mod forecast;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod predictor;
pub mod schedule;
pub mod synth;

pub use error::{ForecastError, Result};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{SchedulerMetrics, StructuredLogger};
