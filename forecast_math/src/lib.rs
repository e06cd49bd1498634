//! # Forecast Math
//!
//! Numeric building blocks used by the demand forecasting engine.
//! This crate knows nothing about sales, items or hierarchies; it provides
//! the calculations those layers are made of:
//! - trailing rolling-window statistics
//! - exponential smoothing state
//! - harmonic (Fourier) seasonal terms
//! - descriptive statistics
//! - symmetric positive-definite linear algebra

use thiserror::Error;

pub mod linalg;
pub mod rolling;
pub mod seasonal;
pub mod smoothing;
pub mod stats;

/// Errors that can occur in numeric calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Matrix is not positive definite or is ill-conditioned: {0}")]
    NotPositiveDefinite(String),
}

/// Result type for numeric operations
pub type Result<T> = std::result::Result<T, MathError>;
