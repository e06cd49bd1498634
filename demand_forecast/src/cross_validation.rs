//! Expanding-window cross-validation over time-ordered rows

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// One train/validation split.
///
/// Every validation index is strictly greater than every train index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub index: usize,
    pub train: Range<usize>,
    pub validation: Range<usize>,
}

/// Produces `n_folds` expanding-window folds anchored at the end of the
/// sequence.
///
/// Validation blocks have a fixed size and are laid back to back in
/// chronological order; each fold trains on everything before its block, so
/// the train window of fold `i + 1` is that of fold `i` plus fold `i`'s
/// validation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandingWindowSplitter {
    pub n_folds: usize,
    pub validation_size: usize,
    pub min_train_size: usize,
}

impl ExpandingWindowSplitter {
    pub fn new(n_folds: usize, validation_size: usize, min_train_size: usize) -> Result<Self> {
        if n_folds == 0 {
            return Err(ForecastError::Configuration(
                "cross-validation needs at least one fold".to_string(),
            ));
        }
        if validation_size == 0 || min_train_size == 0 {
            return Err(ForecastError::Configuration(
                "validation and minimum train sizes must be positive".to_string(),
            ));
        }

        Ok(Self {
            n_folds,
            validation_size,
            min_train_size,
        })
    }

    /// Smallest sequence length that yields the configured folds
    pub fn required_len(&self) -> usize {
        self.min_train_size + self.n_folds * self.validation_size
    }

    /// Folds over a sequence of `n` rows
    pub fn split(&self, n: usize) -> Result<Vec<Fold>> {
        let required = self.required_len();
        if n < required {
            return Err(ForecastError::DataInsufficiency(format!(
                "{} usable rows cannot hold {} folds of {} with {} initial training rows (need {})",
                n, self.n_folds, self.validation_size, self.min_train_size, required
            )));
        }

        let first_validation = n - self.n_folds * self.validation_size;
        Ok((0..self.n_folds)
            .map(|index| {
                let start = first_validation + index * self.validation_size;
                Fold {
                    index,
                    train: 0..start,
                    validation: start..start + self.validation_size,
                }
            })
            .collect())
    }
}
