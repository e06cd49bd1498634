//! # Demand Forecast
//!
//! Daily demand forecasting for many items across many locations, with
//! forecasts made coherent over a location / product-group / item hierarchy.
//!
//! ## Features
//!
//! - Gap-free daily series built from raw sales records
//! - Calendar, lag and rolling-window features without look-ahead
//! - Expanding-window cross-validation anchored at the end of history
//! - Gradient-boosted trees and exponential smoothing with p10/p50/p90 bounds
//! - MASE, sMAPE, weighted quantile loss and interval coverage
//! - Hierarchical reconciliation (OLS, structural, variance, shrunk MinT)
//! - Per-series experiment tracking and background runs with cancellation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use demand_forecast::config::RunConfig;
//! use demand_forecast::pipeline::{ForecastEngine, InMemorySource, RunStatus};
//! use demand_forecast::synthetic::{generate, SyntheticConfig};
//! use demand_forecast::tracking::InMemoryTrackingSink;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Two years of generated sales for a small catalog
//!     let data = generate(&SyntheticConfig::default())?;
//!     let source = Arc::new(InMemorySource::new(data.records, data.catalog));
//!     let engine = ForecastEngine::new(source, Arc::new(InMemoryTrackingSink::new()));
//!
//!     let config = RunConfig {
//!         horizon: 28,
//!         ..RunConfig::default()
//!     };
//!     let handle = engine.run(config);
//!
//!     if handle.wait() == RunStatus::Complete {
//!         if let Some(output) = handle.outputs() {
//!             println!("{} reconciled rows", output.rows.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cross_validation;
pub mod data;
pub mod error;
pub mod export;
pub mod features;
pub mod hierarchy;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod reconciliation;
pub mod synthetic;
pub mod tracking;
pub mod trainer;

// Re-export commonly used types
pub use crate::config::RunConfig;
pub use crate::data::{SalesLoader, SalesRecord, Series, SeriesKey};
pub use crate::error::{ErrorKind, ForecastError};
pub use crate::hierarchy::{Catalog, Hierarchy, NodeId};
pub use crate::models::{FittedModel, ForecastPoint, Forecaster};
pub use crate::pipeline::{ForecastEngine, RunHandle, RunOutput, RunStatus};
pub use crate::reconciliation::{ReconciliationPolicy, Reconciler};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
