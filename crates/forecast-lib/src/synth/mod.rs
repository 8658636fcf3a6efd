//! Synthetic CPU usage history
//!
//! Generates a labeled usage time series with weekday/weekend and
//! time-of-day dependent distributions, and reads/writes it as the
//! historical CSV table consumed by the training pipeline.

mod generator;
mod history;

pub use generator::{
    BucketParams, SynthesizerConfig, UsageBucket, UsageSynthesizer, DEFAULT_HISTORY_WEEKS,
    DEFAULT_SEED,
};
pub use history::{read_history, read_history_file, write_history, write_history_file};
