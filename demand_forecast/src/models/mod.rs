//! Per-series forecasting models
//!
//! A [`Forecaster`] is an unfitted model family plus its parameters; fitting
//! it on a [`FeatureSet`] yields a [`FittedModel`] bound to one series. The
//! trainer and reconciler only ever see these two traits.

use crate::error::{ForecastError, Result};
use crate::features::{FeatureMatrix, FeatureSet};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use std::fmt::Debug;

pub mod exponential_smoothing;
pub mod gradient_boosting;

/// Lower reported quantile
pub const P10: f64 = 0.1;
/// Upper reported quantile
pub const P90: f64 = 0.9;

/// Point forecast with its p10/p90 bounds for one date.
///
/// All three values are non-negative and `p10 <= p50 <= p90`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

/// Standard-normal quantile at `q`
pub fn normal_quantile(q: f64) -> Result<f64> {
    if !(q > 0.0 && q < 1.0) {
        return Err(ForecastError::Configuration(format!(
            "quantile level {} is outside (0, 1)",
            q
        )));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| ForecastError::ModelFit(e.to_string()))?;
    Ok(normal.inverse_cdf(q))
}

/// Half-width multiplier of the p10/p90 interval, Φ⁻¹(0.9) ≈ 1.2816
pub fn interval_z() -> Result<f64> {
    normal_quantile(P90)
}

/// Fitted model bound to one series
pub trait FittedModel: Debug + Send + Sync {
    /// Name of the model family
    fn name(&self) -> &str;

    /// Ordered feature names this model expects
    fn schema(&self) -> &[String];

    /// Standard deviation of the in-sample residuals
    fn residual_std(&self) -> f64;

    /// Non-negative point forecasts, one per row of `features`
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Symmetric normal interval around the point forecast:
    /// `p50 + Φ⁻¹(q) · residual_std`, clamped at zero.
    fn predict_interval(
        &self,
        features: &FeatureMatrix,
        lower_q: f64,
        upper_q: f64,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        if lower_q >= upper_q {
            return Err(ForecastError::Configuration(format!(
                "lower quantile {} must be below upper quantile {}",
                lower_q, upper_q
            )));
        }
        let z_lower = normal_quantile(lower_q)?;
        let z_upper = normal_quantile(upper_q)?;
        let sigma = self.residual_std();

        let points = self.predict(features)?;
        let lower = points
            .iter()
            .map(|p| (p + z_lower * sigma).max(0.0))
            .collect();
        let upper = points
            .iter()
            .map(|p| (p + z_upper * sigma).max(0.0))
            .collect();

        Ok((lower, upper))
    }

    /// Dated p10/p50/p90 rows for every row of `features`
    fn forecast(&self, features: &FeatureMatrix) -> Result<Vec<ForecastPoint>> {
        let p50 = self.predict(features)?;
        let (p10, p90) = self.predict_interval(features, P10, P90)?;

        Ok(features
            .dates()
            .iter()
            .zip(p50)
            .zip(p10.into_iter().zip(p90))
            .map(|((date, p50), (p10, p90))| ForecastPoint {
                date: *date,
                p10: p10.min(p50),
                p50,
                p90: p90.max(p50),
            })
            .collect())
    }

    /// Serializable description of the fitted state
    fn artifact(&self) -> serde_json::Value;

    /// Per-feature importance, empty for models without a notion of it
    fn feature_importance(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

/// Forecast model family that can be fitted on one series' features
pub trait Forecaster: Debug + Clone + Send + Sync {
    /// The type of fitted model produced
    type Fitted: FittedModel;

    /// Get the name of the model family
    fn name(&self) -> &str;

    /// Fit on training rows
    fn fit(&self, features: &FeatureSet) -> Result<Self::Fitted>;
}

/// Reject empty or non-finite training targets
pub(crate) fn check_target(features: &FeatureSet) -> Result<()> {
    if features.is_empty() {
        return Err(ForecastError::DataInsufficiency(
            "no usable training rows".to_string(),
        ));
    }
    if features.target.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::ModelFit(
            "training target contains undefined values".to_string(),
        ));
    }
    Ok(())
}

/// Reject predictions that are not finite
pub(crate) fn check_predictions(model: &str, values: &[f64]) -> Result<()> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::ModelFit(format!(
            "{} produced non-finite predictions",
            model
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_z_is_the_90th_percentile() {
        let z = interval_z().unwrap();
        assert!((z - 1.281_551_565_5).abs() < 1e-6);
        assert!((normal_quantile(P10).unwrap() + z).abs() < 1e-9);
    }

    #[test]
    fn quantile_levels_outside_unit_interval_are_rejected() {
        assert!(normal_quantile(0.0).is_err());
        assert!(normal_quantile(1.5).is_err());
    }
}
