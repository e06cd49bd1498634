//! Run configuration
//!
//! A [`RunConfig`] is passed explicitly into every run; nothing is read from
//! process-wide state.

use crate::cross_validation::ExpandingWindowSplitter;
use crate::error::{ForecastError, Result};
use crate::features::FeatureConfig;
use crate::models::gradient_boosting::GbtParams;
use crate::reconciliation::ReconciliationPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Cross-validation layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    pub folds: usize,
    /// Days per validation block
    pub validation_size: usize,
    /// Usable rows the first fold trains on at minimum
    pub min_train_size: usize,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            folds: 4,
            validation_size: 28,
            min_train_size: 60,
        }
    }
}

impl CvConfig {
    pub fn splitter(&self) -> Result<ExpandingWindowSplitter> {
        ExpandingWindowSplitter::new(self.folds, self.validation_size, self.min_train_size)
    }
}

/// Model family and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelSpec {
    GradientBoosting(GbtParams),
    ExponentialSmoothing { alpha: f64 },
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec::GradientBoosting(GbtParams::default())
    }
}

impl ModelSpec {
    pub fn name(&self) -> &'static str {
        match self {
            ModelSpec::GradientBoosting(_) => "gradient_boosting",
            ModelSpec::ExponentialSmoothing { .. } => "exponential_smoothing",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ModelSpec::GradientBoosting(params) => params.validate(),
            ModelSpec::ExponentialSmoothing { alpha } => {
                if *alpha > 0.0 && *alpha < 1.0 {
                    Ok(())
                } else {
                    Err(ForecastError::Configuration(format!(
                        "smoothing alpha {} is outside (0, 1)",
                        alpha
                    )))
                }
            }
        }
    }
}

/// Where aggregate nodes get their base forecasts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateBase {
    /// Sum of the leaf base forecasts below the node
    #[default]
    Summed,
    /// Independently fitted on the aggregated series
    Fitted,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub policy: ReconciliationPolicy,
    pub aggregate_base: AggregateBase,
}

/// Configuration for one forecasting run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Runs with the same id are the same run
    pub run_id: Option<Uuid>,
    /// Days to forecast past the end of history
    pub horizon: usize,
    /// Seasonal period in days, used by MASE and the future frame
    pub season_length: usize,
    pub cv: CvConfig,
    pub features: FeatureConfig,
    pub model: ModelSpec,
    pub reconciliation: ReconciliationConfig,
    /// Worker threads for per-series training; 0 uses all cores
    pub parallelism: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: None,
            horizon: 365,
            season_length: 7,
            cv: CvConfig::default(),
            features: FeatureConfig::default(),
            model: ModelSpec::default(),
            reconciliation: ReconciliationConfig::default(),
            parallelism: 0,
        }
    }
}

impl RunConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ForecastError::Configuration(format!("invalid run configuration: {}", e)))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Reject invalid horizon/fold/feature/model combinations
    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(ForecastError::Configuration(
                "horizon must be at least one day".to_string(),
            ));
        }
        if self.season_length == 0 {
            return Err(ForecastError::Configuration(
                "season_length must be positive".to_string(),
            ));
        }

        self.cv.splitter()?;
        if self.cv.min_train_size <= self.season_length {
            return Err(ForecastError::Configuration(format!(
                "min_train_size {} must exceed season_length {}",
                self.cv.min_train_size, self.season_length
            )));
        }

        self.features.validate()?;
        self.model.validate()?;
        self.reconciliation.policy.validate()?;
        Ok(())
    }
}
