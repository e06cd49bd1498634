//! Dense linear algebra for symmetric positive-definite systems
//!
//! Only what generalised least squares needs: a Cholesky factorisation that
//! refuses ill-conditioned input, and solves/inverses built on top of it.

use crate::{MathError, Result};
use ndarray::Array2;

/// Largest acceptable condition number estimate before a matrix is treated
/// as numerically singular.
pub const MAX_CONDITION: f64 = 1e12;

/// Lower-triangular Cholesky factor `L` with `a = L * L^T`.
///
/// Fails when `a` is not square, not symmetric, not positive definite, or
/// its condition estimate exceeds [`MAX_CONDITION`].
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let (rows, cols) = a.dim();
    if rows != cols {
        return Err(MathError::InvalidInput(format!(
            "Cholesky needs a square matrix, got {}x{}",
            rows, cols
        )));
    }
    if rows == 0 {
        return Err(MathError::InvalidInput(
            "Cholesky of an empty matrix".to_string(),
        ));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(MathError::NotPositiveDefinite(
            "matrix contains non-finite entries".to_string(),
        ));
    }

    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    for i in 0..rows {
        for j in (i + 1)..rows {
            if (a[[i, j]] - a[[j, i]]).abs() > 1e-9 * scale.max(1.0) {
                return Err(MathError::InvalidInput(format!(
                    "matrix is not symmetric at ({}, {})",
                    i, j
                )));
            }
        }
    }

    let mut l = Array2::<f64>::zeros((rows, rows));
    for j in 0..rows {
        let mut diag = a[[j, j]];
        for k in 0..j {
            diag -= l[[j, k]] * l[[j, k]];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return Err(MathError::NotPositiveDefinite(format!(
                "non-positive pivot {:.3e} at column {}",
                diag, j
            )));
        }
        let pivot = diag.sqrt();
        l[[j, j]] = pivot;

        for i in (j + 1)..rows {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = sum / pivot;
        }
    }

    let condition = condition_estimate(&l);
    if condition > MAX_CONDITION {
        return Err(MathError::NotPositiveDefinite(format!(
            "condition estimate {:.3e} exceeds {:.0e}",
            condition, MAX_CONDITION
        )));
    }

    Ok(l)
}

/// Squared ratio of the largest to smallest Cholesky pivot.
///
/// A lower bound on the 2-norm condition number, cheap enough to run on
/// every factorisation.
pub fn condition_estimate(l: &Array2<f64>) -> f64 {
    let diag = l.diag();
    let max = diag.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let min = diag.iter().fold(f64::INFINITY, |m, v| m.min(v.abs()));
    if min == 0.0 {
        return f64::INFINITY;
    }
    (max / min).powi(2)
}

/// Solve `a * x = b` for SPD `a`, column by column of `b`
pub fn solve_spd(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let l = cholesky(a)?;
    solve_with_factor(&l, b)
}

/// Solve `L * L^T * x = b` given the Cholesky factor `L`
pub fn solve_with_factor(l: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let n = l.nrows();
    if b.nrows() != n {
        return Err(MathError::InvalidInput(format!(
            "right-hand side has {} rows, expected {}",
            b.nrows(),
            n
        )));
    }

    let mut x = Array2::<f64>::zeros(b.dim());
    for c in 0..b.ncols() {
        // Forward substitution: L y = b
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = b[[i, c]];
            for k in 0..i {
                sum -= l[[i, k]] * y[k];
            }
            y[i] = sum / l[[i, i]];
        }
        // Back substitution: L^T x = y
        for i in (0..n).rev() {
            let mut sum = y[i];
            for k in (i + 1)..n {
                sum -= l[[k, i]] * x[[k, c]];
            }
            x[[i, c]] = sum / l[[i, i]];
        }
    }

    Ok(x)
}

/// Inverse of an SPD matrix
pub fn inverse_spd(a: &Array2<f64>) -> Result<Array2<f64>> {
    solve_spd(a, &Array2::eye(a.nrows()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn factor_reconstructs_matrix() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        let back = l.dot(&l.t());
        for (x, y) in back.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let a = array![[2.0, 1.0, 1.0], [1.0, 2.0, 1.0], [1.0, 1.0, 2.0]];
        let inv = inverse_spd(&a).unwrap();
        let id = a.dot(&inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((id[[i, j]] - expected).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        assert!(matches!(
            cholesky(&a),
            Err(MathError::NotPositiveDefinite(_))
        ));
    }

    #[test]
    fn ill_conditioned_matrix_is_rejected() {
        let a = array![[1.0, 0.0], [0.0, 1e-14]];
        assert!(cholesky(&a).is_err());
    }

    #[test]
    fn asymmetric_matrix_is_rejected() {
        let a = array![[2.0, 1.0], [0.0, 2.0]];
        assert!(matches!(cholesky(&a), Err(MathError::InvalidInput(_))));
    }
}
