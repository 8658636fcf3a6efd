//! Idle-time computation agent
//!
//! Trains the usage classifier at startup, publishes the week-ahead
//! forecast, and drives background computation from the derived job plan.

pub mod api;
pub mod config;
pub mod startup;
