//! Column-oriented feature storage backed by a polars DataFrame

use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use std::ops::Range;

/// Named numeric feature columns, row-aligned 1:1 with `dates`
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    frame: DataFrame,
    dates: Vec<NaiveDate>,
}

impl FeatureMatrix {
    /// Assemble a matrix from named columns.
    ///
    /// Every column must have one finite value per date.
    pub fn from_columns(dates: Vec<NaiveDate>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let mut series = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            if values.len() != dates.len() {
                return Err(ForecastError::Data(format!(
                    "feature '{}' has {} rows, expected {}",
                    name,
                    values.len(),
                    dates.len()
                )));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ForecastError::Data(format!(
                    "feature '{}' contains undefined values",
                    name
                )));
            }
            series.push(Series::new(&name, values));
        }

        let frame = DataFrame::new(series)?;
        Ok(Self { frame, dates })
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Values of one feature column
    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        let values = self
            .frame
            .column(name)?
            .f64()?
            .into_iter()
            .collect::<Option<Vec<f64>>>();

        values.ok_or_else(|| {
            ForecastError::Data(format!("feature '{}' contains null values", name))
        })
    }

    /// Row-major values with columns in `schema` order.
    ///
    /// Fails if any schema feature is absent from this matrix.
    pub fn rows_for(&self, schema: &[String]) -> Result<Vec<Vec<f64>>> {
        let columns = schema
            .iter()
            .map(|name| {
                self.column(name).map_err(|_| {
                    ForecastError::ModelFit(format!(
                        "feature schema mismatch: '{}' is not in the feature matrix",
                        name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((0..self.n_rows())
            .map(|row| columns.iter().map(|column| column[row]).collect())
            .collect())
    }

    /// Contiguous block of rows
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.n_rows());
        let start = range.start.min(end);

        Self {
            frame: self.frame.slice(start as i64, end - start),
            dates: self.dates[start..end].to_vec(),
        }
    }
}

impl PartialEq for FeatureMatrix {
    fn eq(&self, other: &Self) -> bool {
        if self.dates != other.dates || self.feature_names() != other.feature_names() {
            return false;
        }

        self.feature_names().iter().all(|name| {
            match (self.column(name), other.column(name)) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect()
    }

    #[test]
    fn rows_follow_schema_order() {
        let m = FeatureMatrix::from_columns(
            dates(2),
            vec![("a".into(), vec![1.0, 2.0]), ("b".into(), vec![3.0, 4.0])],
        )
        .unwrap();

        let rows = m.rows_for(&["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(rows, vec![vec![3.0, 1.0], vec![4.0, 2.0]]);
        assert!(m.rows_for(&["c".to_string()]).is_err());
    }

    #[test]
    fn rejects_misaligned_and_undefined_columns() {
        assert!(FeatureMatrix::from_columns(dates(2), vec![("a".into(), vec![1.0])]).is_err());
        assert!(
            FeatureMatrix::from_columns(dates(1), vec![("a".into(), vec![f64::NAN])]).is_err()
        );
    }

    #[test]
    fn slice_keeps_dates_aligned() {
        let m = FeatureMatrix::from_columns(dates(4), vec![("a".into(), vec![1.0, 2.0, 3.0, 4.0])])
            .unwrap();
        let s = m.slice(1..3);
        assert_eq!(s.n_rows(), 2);
        assert_eq!(s.dates()[0], dates(4)[1]);
        assert_eq!(s.column("a").unwrap(), vec![2.0, 3.0]);
    }
}
