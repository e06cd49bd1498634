//! Trailing rolling-window statistics
//!
//! Windows here always look strictly backwards: the statistic reported for
//! position `t` is computed from `values[t - period..t]`, never including
//! `values[t]` itself.

use crate::{MathError, Result};
use std::collections::VecDeque;

/// Summary of one full trailing window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator)
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// Fixed-size window that tracks its mean, spread and extremes
#[derive(Debug, Clone)]
pub struct RollingWindow {
    period: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    /// Create a new rolling window with the specified period
    pub fn new(period: usize) -> Result<Self> {
        if period < 2 {
            return Err(MathError::InvalidInput(
                "Rolling window period must be at least 2".to_string(),
            ));
        }

        Ok(Self {
            period,
            values: VecDeque::with_capacity(period),
        })
    }

    /// Push a new observation, evicting the oldest one once the window is full
    pub fn update(&mut self, value: f64) {
        self.values.push_back(value);
        if self.values.len() > self.period {
            self.values.pop_front();
        }
    }

    /// Whether the window holds `period` observations
    pub fn is_full(&self) -> bool {
        self.values.len() == self.period
    }

    /// Statistics of the current window
    pub fn stats(&self) -> Result<WindowStats> {
        if !self.is_full() {
            return Err(MathError::InsufficientData(format!(
                "Not enough data for rolling statistics. Need {} values, have {}.",
                self.period,
                self.values.len()
            )));
        }

        let n = self.period as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let variance = self
            .values
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1.0);
        let min = self.values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(WindowStats {
            mean,
            std_dev: variance.max(0.0).sqrt(),
            min,
            max,
        })
    }
}

/// Trailing statistics for every position of `values`.
///
/// Entry `t` is `None` until `period` earlier observations exist.
pub fn trailing_stats(values: &[f64], period: usize) -> Result<Vec<Option<WindowStats>>> {
    let mut window = RollingWindow::new(period)?;
    let mut out = Vec::with_capacity(values.len());

    for &value in values {
        out.push(if window.is_full() {
            Some(window.stats()?)
        } else {
            None
        });
        window.update(value);
    }

    Ok(out)
}

/// Value `lag` positions back for every position of `values`
pub fn lagged(values: &[f64], lag: usize) -> Result<Vec<Option<f64>>> {
    if lag == 0 {
        return Err(MathError::InvalidInput(
            "Lag must be greater than zero".to_string(),
        ));
    }

    Ok((0..values.len())
        .map(|t| t.checked_sub(lag).map(|i| values[i]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_rejects_short_period() {
        assert!(RollingWindow::new(1).is_err());
        assert!(RollingWindow::new(0).is_err());
    }

    #[test]
    fn trailing_stats_exclude_current_value() {
        let values = [1.0, 2.0, 3.0, 100.0];
        let stats = trailing_stats(&values, 3).unwrap();

        assert!(stats[0].is_none());
        assert!(stats[2].is_none());
        let last = stats[3].unwrap();
        assert_eq!(last.mean, 2.0);
        assert_eq!(last.min, 1.0);
        assert_eq!(last.max, 3.0);
        assert!((last.std_dev - 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_window_has_zero_spread() {
        let stats = trailing_stats(&[5.0; 10], 4).unwrap();
        let s = stats[9].unwrap();
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.mean, 5.0);
    }

    #[test]
    fn lagged_values_shift_back() {
        let lags = lagged(&[1.0, 2.0, 3.0], 2).unwrap();
        assert_eq!(lags, vec![None, None, Some(1.0)]);
        assert!(lagged(&[1.0], 0).is_err());
    }
}
