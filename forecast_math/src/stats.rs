//! Descriptive statistics over plain slices

use crate::{MathError, Result};

/// Arithmetic mean
pub fn mean(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(MathError::InsufficientData(
            "Cannot take the mean of an empty slice".to_string(),
        ));
    }

    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (n denominator)
pub fn population_std_dev(values: &[f64]) -> Result<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Ok(variance.max(0.0).sqrt())
}

/// Sample covariance matrix of equally long columns, returned row-major
pub fn covariance(columns: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let n = columns.first().map(Vec::len).unwrap_or(0);
    if n < 2 {
        return Err(MathError::InsufficientData(
            "Covariance needs at least two observations".to_string(),
        ));
    }
    if columns.iter().any(|c| c.len() != n) {
        return Err(MathError::InvalidInput(
            "Covariance columns must have equal length".to_string(),
        ));
    }

    let means = columns
        .iter()
        .map(|c| mean(c))
        .collect::<Result<Vec<_>>>()?;
    let k = columns.len();
    let mut out = vec![vec![0.0; k]; k];
    for i in 0..k {
        for j in i..k {
            let cov = (0..n)
                .map(|t| (columns[i][t] - means[i]) * (columns[j][t] - means[j]))
                .sum::<f64>()
                / (n as f64 - 1.0);
            out[i][j] = cov;
            out[j][i] = cov;
        }
    }

    Ok(out)
}

/// Pinball (quantile) loss of a single prediction at quantile `q`
pub fn pinball_loss(actual: f64, predicted: f64, q: f64) -> f64 {
    let diff = actual - predicted;
    if diff >= 0.0 {
        q * diff
    } else {
        (q - 1.0) * diff
    }
}
