//! # Demandcast
//!
//! Workspace facade over the forecasting crates.
//!
//! - [`forecast_math`]: rolling statistics, seasonal terms, smoothing and
//!   SPD linear algebra
//! - [`demand_forecast`]: features, validation, models, reconciliation and
//!   run orchestration
//!
//! ## Example
//!
//! ```
//! use demandcast_workspace::demand_forecast::config::RunConfig;
//!
//! let config = RunConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.horizon, 365);
//! ```

pub use demand_forecast;
pub use forecast_math;
