//! Seeded synthetic sales for demos and tests
//!
//! Each leaf's daily demand is a base level times a weekly profile, an
//! annual wave, a slow trend and a holiday dip, with log-normal noise.

use crate::data::SalesRecord;
use crate::error::{ForecastError, Result};
use crate::hierarchy::{Catalog, CatalogItem, CatalogLocation};
use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::f64::consts::PI;

/// Monday through Sunday
const WEEKLY_PROFILE: [f64; 7] = [0.85, 0.9, 0.95, 1.0, 1.15, 1.35, 0.8];

/// Demand multiplier on holidays
const HOLIDAY_FACTOR: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub locations: usize,
    pub groups: usize,
    pub items_per_group: usize,
    pub start: NaiveDate,
    pub days: usize,
    /// Standard deviation of the log-normal noise
    pub noise: f64,
    /// Every `late_start_every`-th item is introduced a third of the way in;
    /// 0 disables late starts
    pub late_start_every: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            locations: 2,
            groups: 2,
            items_per_group: 3,
            start: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap_or_default(),
            days: 730,
            noise: 0.15,
            late_start_every: 0,
            seed: 42,
        }
    }
}

/// Generated records with the catalog and holidays behind them
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticData {
    pub records: Vec<SalesRecord>,
    pub catalog: Catalog,
    pub holidays: BTreeSet<NaiveDate>,
}

/// New Year, Independence Day and Christmas in every covered year
fn holidays(start: NaiveDate, days: usize) -> BTreeSet<NaiveDate> {
    let end = start + Duration::days(days as i64);
    (start.year()..=end.year())
        .flat_map(|year| {
            [(1, 1), (7, 4), (12, 25)]
                .into_iter()
                .filter_map(move |(m, d)| NaiveDate::from_ymd_opt(year, m, d))
        })
        .filter(|date| *date >= start && *date < end)
        .collect()
}

fn build_catalog(config: &SyntheticConfig) -> Catalog {
    let items: Vec<CatalogItem> = (0..config.groups)
        .flat_map(|g| {
            (0..config.items_per_group).map(move |i| CatalogItem {
                item_id: format!("item-{}-{}", g + 1, i + 1),
                product_group: format!("group-{}", g + 1),
            })
        })
        .collect();

    let locations = (0..config.locations)
        .map(|l| CatalogLocation {
            location_id: format!("store-{}", l + 1),
            items: items.iter().map(|item| item.item_id.clone()).collect(),
        })
        .collect();

    Catalog { items, locations }
}

/// Generate sales for every (location, item) in the implied catalog
pub fn generate(config: &SyntheticConfig) -> Result<SyntheticData> {
    if config.locations == 0 || config.groups == 0 || config.items_per_group == 0 {
        return Err(ForecastError::Configuration(
            "synthetic data needs at least one location, group and item".to_string(),
        ));
    }
    if config.days == 0 {
        return Err(ForecastError::Configuration(
            "synthetic data needs at least one day".to_string(),
        ));
    }
    let noise = LogNormal::new(0.0, config.noise)
        .map_err(|e| ForecastError::Configuration(format!("invalid noise {}: {}", config.noise, e)))?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let catalog = build_catalog(config);
    let holidays = holidays(config.start, config.days);

    let mut records = Vec::new();
    for location in &catalog.locations {
        for (index, item_id) in location.items.iter().enumerate() {
            let base: f64 = rng.gen_range(5.0..40.0);
            let trend: f64 = rng.gen_range(-0.0002..0.0006);
            let phase: f64 = rng.gen_range(0.0..2.0 * PI);
            let first_day = if config.late_start_every > 0 && (index + 1) % config.late_start_every == 0 {
                config.days / 3
            } else {
                0
            };

            for t in first_day..config.days {
                let date = config.start + Duration::days(t as i64);
                let weekly = WEEKLY_PROFILE[date.weekday().num_days_from_monday() as usize];
                let annual = 1.0 + 0.25 * (2.0 * PI * date.ordinal() as f64 / 365.25 + phase).sin();
                let holiday = if holidays.contains(&date) {
                    HOLIDAY_FACTOR
                } else {
                    1.0
                };
                let level = base * weekly * annual * holiday * (1.0 + trend * t as f64).max(0.1);

                records.push(SalesRecord {
                    location_id: location.location_id.clone(),
                    item_id: item_id.clone(),
                    date,
                    quantity: (level * noise.sample(&mut rng)).round(),
                });
            }
        }
    }

    Ok(SyntheticData {
        records,
        catalog,
        holidays,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            locations: 2,
            groups: 2,
            items_per_group: 2,
            days: 100,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn covers_every_leaf_and_day() {
        let data = generate(&small()).unwrap();
        assert_eq!(data.catalog.items.len(), 4);
        assert_eq!(data.records.len(), 2 * 4 * 100);
        assert!(data.records.iter().all(|r| r.quantity >= 0.0));
    }

    #[test]
    fn same_seed_same_data() {
        assert_eq!(generate(&small()).unwrap(), generate(&small()).unwrap());
    }

    #[test]
    fn late_items_start_later() {
        let config = SyntheticConfig {
            late_start_every: 2,
            ..small()
        };
        let data = generate(&config).unwrap();
        let first = data
            .records
            .iter()
            .filter(|r| r.item_id == "item-1-2")
            .map(|r| r.date)
            .min()
            .unwrap();
        assert_eq!(first, config.start + Duration::days(33));
    }

    #[test]
    fn holidays_fall_inside_the_range() {
        let data = generate(&SyntheticConfig::default()).unwrap();
        assert!(data
            .holidays
            .contains(&NaiveDate::from_ymd_opt(2022, 12, 25).unwrap()));
        assert_eq!(data.holidays.len(), 6);
    }
}
