//! Feature construction from daily quantity series
//!
//! Every feature at row `t` is computed from observations strictly before
//! `t`. Rows at the start of history whose lag or rolling windows are not
//! fully observed are dropped from the training set rather than filled.

pub mod calendar;
pub mod matrix;

pub use matrix::FeatureMatrix;

use crate::data::Series;
use crate::error::{ForecastError, Result};
use chrono::{Duration, NaiveDate};
use forecast_math::rolling::{lagged, trailing_stats, WindowStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

/// Feature families that can be switched on independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    Calendar,
    Lag,
    Rolling,
}

/// Which features to build and with which windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub groups: Vec<FeatureGroup>,
    /// Offsets for `lag_{n}` features, in days
    pub lags: Vec<usize>,
    /// Trailing windows for rolling mean/std/min/max, in days
    pub rolling_windows: Vec<usize>,
    /// Sine/cosine pairs of the weekly cycle
    pub weekly_harmonics: usize,
    /// Sine/cosine pairs of the annual cycle
    pub annual_harmonics: usize,
    /// Caller-supplied holiday calendar
    pub holidays: BTreeSet<NaiveDate>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            groups: vec![FeatureGroup::Calendar, FeatureGroup::Lag, FeatureGroup::Rolling],
            lags: vec![7, 14, 28],
            rolling_windows: vec![7, 14, 28],
            weekly_harmonics: 1,
            annual_harmonics: 3,
            holidays: BTreeSet::new(),
        }
    }
}

impl FeatureConfig {
    pub fn includes(&self, group: FeatureGroup) -> bool {
        self.groups.contains(&group)
    }

    /// Largest configured lag or window among the enabled groups
    pub fn lookback(&self) -> usize {
        let lag = if self.includes(FeatureGroup::Lag) {
            self.lags.iter().copied().max().unwrap_or(0)
        } else {
            0
        };
        let window = if self.includes(FeatureGroup::Rolling) {
            self.rolling_windows.iter().copied().max().unwrap_or(0)
        } else {
            0
        };
        lag.max(window)
    }

    pub fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            return Err(ForecastError::Configuration(
                "at least one feature group must be enabled".to_string(),
            ));
        }
        if self.includes(FeatureGroup::Lag) && (self.lags.is_empty() || self.lags.contains(&0)) {
            return Err(ForecastError::Configuration(
                "lag features need at least one positive lag".to_string(),
            ));
        }
        if self.includes(FeatureGroup::Rolling)
            && (self.rolling_windows.is_empty() || self.rolling_windows.iter().any(|w| *w < 2))
        {
            return Err(ForecastError::Configuration(
                "rolling features need windows of at least 2 days".to_string(),
            ));
        }
        Ok(())
    }
}

/// Training rows: feature matrix plus the aligned target
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub matrix: FeatureMatrix,
    pub target: Vec<f64>,
    /// Leading rows dropped for incomplete lag/rolling windows
    pub skipped_rows: usize,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Contiguous block of rows
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            matrix: self.matrix.slice(range.clone()),
            target: self.target[range].to_vec(),
            skipped_rows: 0,
        }
    }
}

/// Turns a series into training and future feature matrices
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: FeatureConfig,
    season_length: usize,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig, season_length: usize) -> Result<Self> {
        config.validate()?;
        if season_length == 0 {
            return Err(ForecastError::Configuration(
                "season length must be positive".to_string(),
            ));
        }

        Ok(Self {
            config,
            season_length,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Feature names in column order
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.config.includes(FeatureGroup::Calendar) {
            names.extend(calendar::calendar_names(
                self.config.weekly_harmonics,
                self.config.annual_harmonics,
            ));
        }
        if self.config.includes(FeatureGroup::Lag) {
            names.extend(self.config.lags.iter().map(|l| format!("lag_{}", l)));
        }
        if self.config.includes(FeatureGroup::Rolling) {
            for w in &self.config.rolling_windows {
                names.push(format!("rolling_mean_{}", w));
                names.push(format!("rolling_std_{}", w));
                names.push(format!("rolling_min_{}", w));
                names.push(format!("rolling_max_{}", w));
            }
        }
        names
    }

    /// Feature matrix and target for every fully observed row of `series`
    pub fn build(&self, series: &Series) -> Result<FeatureSet> {
        let lookback = self.config.lookback();
        if series.len() <= lookback {
            return Err(ForecastError::DataInsufficiency(format!(
                "series {} has {} observations, features need more than {}",
                series.id(),
                series.len(),
                lookback
            )));
        }

        let dates = series.dates();
        let values = series.quantities();
        let matrix = self.frame(&dates, values, lookback..values.len())?;

        Ok(FeatureSet {
            matrix,
            target: values[lookback..].to_vec(),
            skipped_rows: lookback,
        })
    }

    /// Feature matrix for the `horizon` days after the end of `series`.
    ///
    /// Lag and rolling values that would reference dates after the last
    /// observation are taken from a seasonal-naive extension of the known
    /// history, so every window is satisfiable from observed data.
    pub fn build_future(&self, series: &Series, horizon: usize) -> Result<FeatureMatrix> {
        let n = series.len();
        let lookback = self.config.lookback();
        if n < lookback.max(1) || (lookback > 0 && n < self.season_length) {
            return Err(ForecastError::DataInsufficiency(format!(
                "series {} has {} observations, future features need at least {}",
                series.id(),
                n,
                lookback.max(self.season_length).max(1)
            )));
        }

        let mut extended = series.quantities().to_vec();
        extended.reserve(horizon);
        for t in n..n + horizon {
            let source = extended[t - self.season_length.min(t)];
            extended.push(source);
        }

        let dates: Vec<NaiveDate> = (0..n + horizon)
            .map(|i| series.start() + Duration::days(i as i64))
            .collect();

        self.frame(&dates, &extended, n..n + horizon)
    }

    /// Feature columns for `rows`, computed over the whole of `values`
    fn frame(&self, dates: &[NaiveDate], values: &[f64], rows: Range<usize>) -> Result<FeatureMatrix> {
        let mut columns: Vec<(String, Vec<f64>)> = Vec::new();

        if self.config.includes(FeatureGroup::Calendar) {
            let names =
                calendar::calendar_names(self.config.weekly_harmonics, self.config.annual_harmonics);
            let mut data = vec![Vec::with_capacity(rows.len()); names.len()];
            for t in rows.clone() {
                let row = calendar::calendar_row(
                    dates[t],
                    &self.config.holidays,
                    self.config.weekly_harmonics,
                    self.config.annual_harmonics,
                );
                for (column, value) in data.iter_mut().zip(row) {
                    column.push(value);
                }
            }
            columns.extend(names.into_iter().zip(data));
        }

        if self.config.includes(FeatureGroup::Lag) {
            for &lag in &self.config.lags {
                let lags = lagged(values, lag)?;
                let column = collect_window(&lags[rows.clone()], &format!("lag_{}", lag))?;
                columns.push((format!("lag_{}", lag), column));
            }
        }

        if self.config.includes(FeatureGroup::Rolling) {
            for &window in &self.config.rolling_windows {
                let stats = trailing_stats(values, window)?;
                let stats: Vec<WindowStats> =
                    collect_window(&stats[rows.clone()], &format!("rolling_{}", window))?;
                columns.push((
                    format!("rolling_mean_{}", window),
                    stats.iter().map(|s| s.mean).collect(),
                ));
                columns.push((
                    format!("rolling_std_{}", window),
                    stats.iter().map(|s| s.std_dev).collect(),
                ));
                columns.push((
                    format!("rolling_min_{}", window),
                    stats.iter().map(|s| s.min).collect(),
                ));
                columns.push((
                    format!("rolling_max_{}", window),
                    stats.iter().map(|s| s.max).collect(),
                ));
            }
        }

        FeatureMatrix::from_columns(dates[rows].to_vec(), columns)
    }
}

/// Unwrap a window column, failing if any requested row is not fully observed
fn collect_window<T: Copy>(values: &[Option<T>], name: &str) -> Result<Vec<T>> {
    values
        .iter()
        .map(|v| {
            v.ok_or_else(|| {
                ForecastError::DataInsufficiency(format!(
                    "feature '{}' has an incomplete window",
                    name
                ))
            })
        })
        .collect()
}
