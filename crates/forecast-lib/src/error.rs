//! Error taxonomy for the forecasting pipeline

use chrono::NaiveDateTime;
use thiserror::Error;

/// Errors raised by the forecasting and scheduling pipeline
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Empty or malformed historical data, or feature values out of range
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Prediction requested without a usable trained model
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Model artifact body does not match its recorded checksum
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// No forecast slot covers the requested instant
    #[error("no forecast slot covers {0}")]
    NoForecastForInstant(NaiveDateTime),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForecastError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::ModelUnavailable(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
