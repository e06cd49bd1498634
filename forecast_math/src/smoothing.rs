//! Exponential smoothing state
//!
//! Tracks the smoothed level together with the one-step-ahead errors made
//! along the way, so a caller can derive both a point forecast and a
//! dispersion estimate from a single pass over the history.

use crate::{MathError, Result};

/// Simple exponential smoothing with one-step-ahead error tracking
#[derive(Debug, Clone)]
pub struct ExponentialSmoothing {
    alpha: f64,
    level: Option<f64>,
    errors: Vec<f64>,
}

impl ExponentialSmoothing {
    /// Create a new smoother with the specified alpha (smoothing factor)
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(MathError::InvalidInput(
                "Alpha must be between 0 and 1 (exclusive)".to_string(),
            ));
        }

        Ok(Self {
            alpha,
            level: None,
            errors: Vec::new(),
        })
    }

    /// Feed the next observation.
    ///
    /// The first observation initialises the level; every later one first
    /// records the error of the level as a forecast for it.
    pub fn update(&mut self, value: f64) {
        match self.level {
            None => self.level = Some(value),
            Some(current_level) => {
                self.errors.push(value - current_level);
                self.level = Some(self.alpha * value + (1.0 - self.alpha) * current_level);
            }
        }
    }

    /// Current smoothed level
    pub fn level(&self) -> Result<f64> {
        self.level.ok_or_else(|| {
            MathError::InsufficientData("No data available for exponential smoothing".to_string())
        })
    }

    /// One-step-ahead errors seen so far
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_alpha_outside_unit_interval() {
        assert!(ExponentialSmoothing::new(0.0).is_err());
        assert!(ExponentialSmoothing::new(1.0).is_err());
        assert!(ExponentialSmoothing::new(f64::NAN).is_err());
    }

    #[test]
    fn level_moves_towards_observations() {
        let mut es = ExponentialSmoothing::new(0.5).unwrap();
        assert!(es.level().is_err());

        es.update(10.0);
        es.update(20.0);
        assert_eq!(es.level().unwrap(), 15.0);
        assert_eq!(es.errors(), &[10.0]);
    }

    #[test]
    fn constant_input_has_no_error() {
        let mut es = ExponentialSmoothing::new(0.3).unwrap();
        for _ in 0..20 {
            es.update(4.0);
        }
        assert_eq!(es.level().unwrap(), 4.0);
        assert!(es.errors().iter().all(|e| *e == 0.0));
    }
}
