//! Error types for the demand_forecast crate

use forecast_math::MathError;
use polars::prelude::PolarsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Custom error types for the demand_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Too little history for the requested features or validation folds
    #[error("Data insufficiency: {0}")]
    DataInsufficiency(String),

    /// The underlying model failed to fit or produced non-finite values
    #[error("Model fit error: {0}")]
    ModelFit(String),

    /// The hierarchy is structurally invalid
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// Invalid run configuration, caught before any work starts
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed input records or catalog
    #[error("Data error: {0}")]
    Data(String),

    /// The tracking sink refused a record or artifact
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// The run was asked to stop before it finished
    #[error("Run cancelled")]
    Cancelled,

    /// Error from mathematical operations
    #[error("Math error: {0}")]
    Math(#[from] MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from JSON (de)serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from CSV writing
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    Polars(String),
}

/// Coarse classification used when attributing failures to series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataInsufficiency,
    ModelFit,
    Reconciliation,
    Configuration,
    Data,
    Tracking,
    Cancelled,
    Internal,
}

impl ForecastError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForecastError::DataInsufficiency(_) => ErrorKind::DataInsufficiency,
            ForecastError::ModelFit(_) => ErrorKind::ModelFit,
            ForecastError::Reconciliation(_) => ErrorKind::Reconciliation,
            ForecastError::Configuration(_) => ErrorKind::Configuration,
            ForecastError::Data(_) | ForecastError::Polars(_) | ForecastError::Csv(_) => {
                ErrorKind::Data
            }
            ForecastError::Tracking(_) => ErrorKind::Tracking,
            ForecastError::Cancelled => ErrorKind::Cancelled,
            ForecastError::Math(_) | ForecastError::Io(_) | ForecastError::Json(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Errors that end the whole run rather than a single series
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            ForecastError::Reconciliation(_)
                | ForecastError::Configuration(_)
                | ForecastError::Cancelled
        )
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::Polars(err.to_string())
    }
}
