//! Simple exponential smoothing on the target alone

use crate::error::{ForecastError, Result};
use crate::features::{FeatureMatrix, FeatureSet};
use crate::models::{check_predictions, check_target, FittedModel, Forecaster};
use forecast_math::smoothing::ExponentialSmoothing as Smoother;
use forecast_math::stats::population_std_dev;
use serde_json::json;

/// Simple exponential smoothing model
#[derive(Debug, Clone)]
pub struct ExponentialSmoothing {
    /// Name of the model
    name: String,
    /// Smoothing parameter
    alpha: f64,
}

/// Fitted exponential smoothing model
#[derive(Debug, Clone)]
pub struct FittedExponentialSmoothing {
    name: String,
    alpha: f64,
    /// Level after the last training observation
    level: f64,
    /// Dispersion of the one-step-ahead errors
    residual_std: f64,
    schema: Vec<String>,
}

impl ExponentialSmoothing {
    /// Create a new exponential smoothing model
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(ForecastError::Configuration(
                "Alpha must be between 0 and 1".to_string(),
            ));
        }

        Ok(Self {
            name: "exponential_smoothing".to_string(),
            alpha,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Forecaster for ExponentialSmoothing {
    type Fitted = FittedExponentialSmoothing;

    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&self, features: &FeatureSet) -> Result<Self::Fitted> {
        check_target(features)?;

        let mut smoother = Smoother::new(self.alpha)?;
        for &value in &features.target {
            smoother.update(value);
        }

        let level = smoother.level()?;
        let residual_std = if smoother.errors().is_empty() {
            0.0
        } else {
            population_std_dev(smoother.errors())?
        };
        check_predictions(&self.name, &[level, residual_std])?;

        Ok(FittedExponentialSmoothing {
            name: self.name.clone(),
            alpha: self.alpha,
            level,
            residual_std,
            schema: Vec::new(),
        })
    }
}

impl FittedModel for FittedExponentialSmoothing {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }

    fn residual_std(&self) -> f64 {
        self.residual_std
    }

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        // The forecast is flat at the last level
        Ok(vec![self.level.max(0.0); features.n_rows()])
    }

    fn artifact(&self) -> serde_json::Value {
        json!({
            "model": self.name,
            "alpha": self.alpha,
            "level": self.level,
            "residual_std": self.residual_std,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn feature_set(target: Vec<f64>) -> FeatureSet {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates = (0..target.len())
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        FeatureSet {
            matrix: FeatureMatrix::from_columns(dates, vec![]).unwrap(),
            target,
            skipped_rows: 0,
        }
    }

    #[test]
    fn invalid_alpha() {
        assert!(ExponentialSmoothing::new(0.0).is_err());
        assert!(ExponentialSmoothing::new(1.0).is_err());
    }

    #[test]
    fn level_tracks_the_target() {
        let model = ExponentialSmoothing::new(0.5).unwrap();
        let fitted = model.fit(&feature_set(vec![10.0, 20.0, 30.0])).unwrap();

        // 10 -> 15 -> 22.5
        let future = feature_set(vec![0.0; 3]);
        let p = fitted.predict(&future.matrix).unwrap();
        assert_eq!(p, vec![22.5; 3]);
        assert!(fitted.residual_std() > 0.0);
        assert!(fitted.schema().is_empty());
    }

    #[test]
    fn constant_target_has_zero_dispersion() {
        let model = ExponentialSmoothing::new(0.3).unwrap();
        let fitted = model.fit(&feature_set(vec![4.0; 20])).unwrap();
        assert_eq!(fitted.residual_std(), 0.0);
    }
}
