//! Sales records and gap-free daily series

use crate::error::{ForecastError, Result};
use crate::hierarchy::NodeId;
use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Identity of one leaf series
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub location_id: String,
    pub item_id: String,
}

impl SeriesKey {
    pub fn new(location_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            item_id: item_id.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.location_id, self.item_id)
    }
}

/// One day of sales for one item at one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub location_id: String,
    pub item_id: String,
    pub date: NaiveDate,
    pub quantity: f64,
}

impl SalesRecord {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.location_id.clone(), self.item_id.clone())
    }
}

/// Gap-free daily quantity sequence for one hierarchy node.
///
/// Dates without a record are zero sales, not missing data. Immutable once
/// built.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    id: NodeId,
    start: NaiveDate,
    quantities: Vec<f64>,
}

impl Series {
    /// Create a series from a start date and consecutive daily quantities
    pub fn new(id: NodeId, start: NaiveDate, quantities: Vec<f64>) -> Result<Self> {
        if let Some(bad) = quantities.iter().find(|q| !q.is_finite() || **q < 0.0) {
            return Err(ForecastError::Data(format!(
                "series {} has invalid quantity {}",
                id, bad
            )));
        }

        Ok(Self {
            id,
            start,
            quantities,
        })
    }

    /// Build a series from unordered observations.
    ///
    /// Missing dates between the first and last observation become zero;
    /// several observations on the same date are summed.
    pub fn from_observations(id: NodeId, observations: &[(NaiveDate, f64)]) -> Result<Self> {
        let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for (date, quantity) in observations {
            *by_date.entry(*date).or_insert(0.0) += quantity;
        }

        let (first, last) = match (by_date.keys().next(), by_date.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(ForecastError::Data(format!(
                    "series {} has no observations",
                    id
                )))
            }
        };

        let days = (last - first).num_days() as usize + 1;
        let mut quantities = vec![0.0; days];
        for (date, quantity) in by_date {
            quantities[(date - first).num_days() as usize] = quantity;
        }

        Self::new(id, first, quantities)
    }

    /// Element-wise sum of several series over the union of their date ranges
    pub fn aggregate(id: NodeId, parts: &[&Series]) -> Result<Self> {
        let start = parts.iter().map(|s| s.start).min();
        let end = parts.iter().filter_map(|s| s.end()).max();
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(ForecastError::Data(format!(
                    "aggregate {} has no non-empty parts",
                    id
                )))
            }
        };

        let days = (end - start).num_days() as usize + 1;
        let mut quantities = vec![0.0; days];
        for part in parts {
            let offset = (part.start - start).num_days() as usize;
            for (i, q) in part.quantities.iter().enumerate() {
                quantities[offset + i] += q;
            }
        }

        Self::new(id, start, quantities)
    }

    /// Extend with zero sales through `end`; a no-op if already there
    pub fn padded_to(&self, end: NaiveDate) -> Result<Self> {
        let len = ((end - self.start).num_days() + 1).max(0) as usize;
        let mut quantities = self.quantities.clone();
        if len > quantities.len() {
            quantities.resize(len, 0.0);
        }
        Self::new(self.id.clone(), self.start, quantities)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last observed date, if any
    pub fn end(&self) -> Option<NaiveDate> {
        self.quantities
            .len()
            .checked_sub(1)
            .map(|last| self.date_at(last))
    }

    pub fn len(&self) -> usize {
        self.quantities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    pub fn quantities(&self) -> &[f64] {
        &self.quantities
    }

    /// Date of the observation at `index`
    pub fn date_at(&self, index: usize) -> NaiveDate {
        self.start + Duration::days(index as i64)
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        (0..self.len()).map(|i| self.date_at(i)).collect()
    }
}

/// Group raw records into one leaf series per (location, item), ordered by key
pub fn group_records(records: &[SalesRecord]) -> Result<Vec<Series>> {
    let mut grouped: BTreeMap<SeriesKey, Vec<(NaiveDate, f64)>> = BTreeMap::new();
    for record in records {
        if !record.quantity.is_finite() || record.quantity < 0.0 {
            return Err(ForecastError::Data(format!(
                "negative or non-finite quantity {} for {} on {}",
                record.quantity,
                record.key(),
                record.date
            )));
        }
        grouped
            .entry(record.key())
            .or_default()
            .push((record.date, record.quantity));
    }

    grouped
        .into_iter()
        .map(|(key, observations)| Series::from_observations(NodeId::Leaf(key), &observations))
        .collect()
}

/// Loader for sales records
#[derive(Debug)]
pub struct SalesLoader;

impl SalesLoader {
    /// Load sales records from a CSV file with columns
    /// `location_id, item_id, date, quantity`
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<SalesRecord>> {
        let file = File::open(path)?;
        let df = CsvReader::new(file)
            .infer_schema(None)
            .has_header(true)
            .finish()?;

        Self::from_dataframe(&df)
    }

    /// Extract sales records from an existing DataFrame
    pub fn from_dataframe(df: &DataFrame) -> Result<Vec<SalesRecord>> {
        let date_column = Self::detect_date_column(df)?;

        let locations = df.column("location_id")?.cast(&DataType::Utf8)?;
        let items = df.column("item_id")?.cast(&DataType::Utf8)?;
        let dates = df.column(&date_column)?.cast(&DataType::Utf8)?;
        let quantities = df.column("quantity")?.cast(&DataType::Float64)?;

        let rows = locations
            .utf8()?
            .into_iter()
            .zip(items.utf8()?.into_iter())
            .zip(dates.utf8()?.into_iter())
            .zip(quantities.f64()?.into_iter());

        let mut records = Vec::with_capacity(df.height());
        for (row, (((location, item), date), quantity)) in rows.enumerate() {
            let (location, item, date, quantity) = match (location, item, date, quantity) {
                (Some(l), Some(i), Some(d), Some(q)) => (l, i, d, q),
                _ => {
                    return Err(ForecastError::Data(format!(
                        "row {} has an empty field",
                        row
                    )))
                }
            };
            let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|e| {
                ForecastError::Data(format!("row {} has invalid date '{}': {}", row, date, e))
            })?;

            records.push(SalesRecord {
                location_id: location.to_string(),
                item_id: item.to_string(),
                date,
                quantity,
            });
        }

        Ok(records)
    }

    /// Find the date column: `date`, `sale_date` or the first name containing "date"
    fn detect_date_column(df: &DataFrame) -> Result<String> {
        df.get_column_names()
            .into_iter()
            .find(|name| name.to_lowercase().contains("date"))
            .map(|name| name.to_string())
            .ok_or_else(|| ForecastError::Data("No date column found in sales data".to_string()))
    }
}
