//! Accuracy and calibration metrics for forecast evaluation
//!
//! Metrics that can be undefined for a window (MASE with a zero naive scale,
//! WQL with zero total demand) are `Option`s; aggregation excludes them from
//! that metric's mean and names the affected series instead of folding them
//! in as zero.

use crate::error::{ForecastError, Result};
use crate::models::{ForecastPoint, P10, P90};
use forecast_math::stats::pinball_loss;
use serde::{Deserialize, Serialize};

/// Naive scales below this are treated as zero
const SCALE_EPSILON: f64 = 1e-10;

fn check_lengths(actual: &[f64], other: &[f64]) -> Result<()> {
    if actual.is_empty() {
        return Err(ForecastError::DataInsufficiency(
            "cannot evaluate an empty window".to_string(),
        ));
    }
    if actual.len() != other.len() {
        return Err(ForecastError::Data(format!(
            "actual length ({}) doesn't match forecast length ({})",
            actual.len(),
            other.len()
        )));
    }
    Ok(())
}

/// Mean absolute error
pub fn mae(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    check_lengths(actual, forecast)?;
    Ok(actual
        .iter()
        .zip(forecast)
        .map(|(a, f)| (a - f).abs())
        .sum::<f64>()
        / actual.len() as f64)
}

/// Root mean squared error
pub fn rmse(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    check_lengths(actual, forecast)?;
    let mse = actual
        .iter()
        .zip(forecast)
        .map(|(a, f)| (a - f).powi(2))
        .sum::<f64>()
        / actual.len() as f64;
    Ok(mse.sqrt())
}

/// Mean absolute scaled error against a seasonal-naive baseline.
///
/// The scale is the mean absolute error of predicting `training[t]` with
/// `training[t - season_length]`. Returns `None` when that scale is zero or
/// the training window is shorter than one season plus one day.
pub fn mase(
    actual: &[f64],
    forecast: &[f64],
    training: &[f64],
    season_length: usize,
) -> Result<Option<f64>> {
    let error = mae(actual, forecast)?;
    if season_length == 0 || training.len() <= season_length {
        return Ok(None);
    }

    let scale = training
        .windows(season_length + 1)
        .map(|w| (w[season_length] - w[0]).abs())
        .sum::<f64>()
        / (training.len() - season_length) as f64;

    if scale < SCALE_EPSILON {
        return Ok(None);
    }
    Ok(Some(error / scale))
}

/// Symmetric mean absolute percentage error in [0, 200].
///
/// Points where actual and forecast are both zero contribute zero error.
pub fn smape(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    check_lengths(actual, forecast)?;
    let total: f64 = actual
        .iter()
        .zip(forecast)
        .map(|(a, f)| {
            let denom = a.abs() + f.abs();
            if denom == 0.0 {
                0.0
            } else {
                200.0 * (a - f).abs() / denom
            }
        })
        .sum();
    Ok(total / actual.len() as f64)
}

/// Weighted quantile loss over the p10/p50/p90 outputs.
///
/// Mean over the three quantiles of `2 · Σ pinball / Σ |actual|`; `None`
/// when total actual demand is zero.
pub fn weighted_quantile_loss(actual: &[f64], points: &[ForecastPoint]) -> Result<Option<f64>> {
    let p50: Vec<f64> = points.iter().map(|p| p.p50).collect();
    check_lengths(actual, &p50)?;

    let weight: f64 = actual.iter().map(|a| a.abs()).sum();
    if weight < SCALE_EPSILON {
        return Ok(None);
    }

    let quantiles: [(f64, fn(&ForecastPoint) -> f64); 3] = [
        (P10, |p: &ForecastPoint| p.p10),
        (0.5, |p: &ForecastPoint| p.p50),
        (P90, |p: &ForecastPoint| p.p90),
    ];
    let loss: f64 = quantiles
        .iter()
        .map(|(q, pick)| {
            let pinball: f64 = actual
                .iter()
                .zip(points)
                .map(|(a, p)| pinball_loss(*a, pick(p), *q))
                .sum();
            2.0 * pinball / weight
        })
        .sum::<f64>()
        / quantiles.len() as f64;

    Ok(Some(loss))
}

/// Fraction of actuals inside the closed interval `[p10, p90]`
pub fn coverage(actual: &[f64], points: &[ForecastPoint]) -> Result<f64> {
    let p50: Vec<f64> = points.iter().map(|p| p.p50).collect();
    check_lengths(actual, &p50)?;

    let inside = actual
        .iter()
        .zip(points)
        .filter(|(a, p)| p.p10 <= **a && **a <= p.p90)
        .count();
    Ok(inside as f64 / actual.len() as f64)
}

/// Metrics for one evaluation window, or a mean over several
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsBundle {
    pub mase: Option<f64>,
    pub smape: f64,
    pub wql: Option<f64>,
    pub coverage: f64,
    pub mae: f64,
    pub rmse: f64,
}

impl MetricsBundle {
    /// Evaluate forecasts for one window against the actuals, with
    /// `training` as the history preceding the window
    pub fn evaluate(
        actual: &[f64],
        points: &[ForecastPoint],
        training: &[f64],
        season_length: usize,
    ) -> Result<Self> {
        let p50: Vec<f64> = points.iter().map(|p| p.p50).collect();

        Ok(Self {
            mase: mase(actual, &p50, training, season_length)?,
            smape: smape(actual, &p50)?,
            wql: weighted_quantile_loss(actual, points)?,
            coverage: coverage(actual, points)?,
            mae: mae(actual, &p50)?,
            rmse: rmse(actual, &p50)?,
        })
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Mean of an optional metric, undefined as soon as one fold's is
fn mean_if_all_defined(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let values: Vec<f64> = values.collect::<Option<Vec<f64>>>()?;
    mean_of(values.into_iter())
}

/// Simple mean of fold metrics. MASE and WQL are undefined for the series
/// when any fold's is undefined, so the series gets flagged downstream.
pub fn aggregate_folds(folds: &[MetricsBundle]) -> Result<MetricsBundle> {
    if folds.is_empty() {
        return Err(ForecastError::DataInsufficiency(
            "no folds to aggregate".to_string(),
        ));
    }

    let mean_required = |pick: fn(&MetricsBundle) -> f64| {
        folds.iter().map(pick).sum::<f64>() / folds.len() as f64
    };

    Ok(MetricsBundle {
        mase: mean_if_all_defined(folds.iter().map(|f| f.mase)),
        smape: mean_required(|f| f.smape),
        wql: mean_if_all_defined(folds.iter().map(|f| f.wql)),
        coverage: mean_required(|f| f.coverage),
        mae: mean_required(|f| f.mae),
        rmse: mean_required(|f| f.rmse),
    })
}

/// Metrics averaged across series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub series_count: usize,
    pub mase: Option<f64>,
    pub smape: Option<f64>,
    pub wql: Option<f64>,
    pub coverage: Option<f64>,
    /// Series left out of the MASE mean because theirs is undefined
    pub mase_undefined: Vec<String>,
    /// Series left out of the WQL mean because theirs is undefined
    pub wql_undefined: Vec<String>,
}

/// Mean across series of their fold-aggregated metrics
pub fn aggregate_series<'a, I>(series: I) -> AggregateMetrics
where
    I: IntoIterator<Item = (&'a str, &'a MetricsBundle)>,
{
    let series: Vec<(&str, &MetricsBundle)> = series.into_iter().collect();

    let undefined = |pick: fn(&MetricsBundle) -> Option<f64>| -> Vec<String> {
        series
            .iter()
            .filter(|(_, m)| pick(m).is_none())
            .map(|(id, _)| id.to_string())
            .collect()
    };

    AggregateMetrics {
        series_count: series.len(),
        mase: mean_of(series.iter().filter_map(|(_, m)| m.mase)),
        smape: mean_of(series.iter().map(|(_, m)| m.smape)),
        wql: mean_of(series.iter().filter_map(|(_, m)| m.wql)),
        coverage: mean_of(series.iter().map(|(_, m)| m.coverage)),
        mase_undefined: undefined(|m| m.mase),
        wql_undefined: undefined(|m| m.wql),
    }
}
