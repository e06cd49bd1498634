//! Harmonic seasonal terms

use std::f64::consts::PI;

/// Average length of a calendar year in days
pub const DAYS_PER_YEAR: f64 = 365.25;

/// `(sin, cos)` pairs for harmonics `1..=harmonics` of a cycle with `period`.
///
/// `position` is measured in the same unit as `period`.
pub fn fourier_terms(position: f64, period: f64, harmonics: usize) -> Vec<(f64, f64)> {
    (1..=harmonics)
        .map(|k| {
            let angle = 2.0 * PI * k as f64 * position / period;
            (angle.sin(), angle.cos())
        })
        .collect()
}

/// Cyclic encoding of an integer phase `value` in `0..period`
pub fn cyclic_encoding(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}
