//! Calendar features: weekday/month indicators, cyclic encodings, harmonic
//! seasonal terms and the holiday flag

use chrono::{Datelike, NaiveDate, Weekday};
use forecast_math::seasonal::{cyclic_encoding, fourier_terms, DAYS_PER_YEAR};
use std::collections::BTreeSet;

/// Column names in the order [`calendar_row`] fills them
pub fn calendar_names(weekly_harmonics: usize, annual_harmonics: usize) -> Vec<String> {
    let mut names: Vec<String> = [
        "dow",
        "dow_sin",
        "dow_cos",
        "is_weekend",
        "month",
        "month_sin",
        "month_cos",
        "quarter",
        "week_of_year",
        "day_of_year",
        "is_holiday",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for k in 1..=weekly_harmonics {
        names.push(format!("fourier_week_sin_{}", k));
        names.push(format!("fourier_week_cos_{}", k));
    }
    for k in 1..=annual_harmonics {
        names.push(format!("fourier_year_sin_{}", k));
        names.push(format!("fourier_year_cos_{}", k));
    }

    names
}

/// Calendar feature values for one date
pub fn calendar_row(
    date: NaiveDate,
    holidays: &BTreeSet<NaiveDate>,
    weekly_harmonics: usize,
    annual_harmonics: usize,
) -> Vec<f64> {
    // Monday = 0 ... Sunday = 6
    let dow = date.weekday().num_days_from_monday() as f64;
    let month0 = date.month0() as f64;
    let (dow_sin, dow_cos) = cyclic_encoding(dow, 7.0);
    let (month_sin, month_cos) = cyclic_encoding(month0, 12.0);
    let is_weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);

    let mut row = vec![
        dow,
        dow_sin,
        dow_cos,
        if is_weekend { 1.0 } else { 0.0 },
        month0 + 1.0,
        month_sin,
        month_cos,
        (month0 / 3.0).floor() + 1.0,
        date.iso_week().week() as f64,
        date.ordinal() as f64,
        if holidays.contains(&date) { 1.0 } else { 0.0 },
    ];

    let ordinal = date.num_days_from_ce() as f64;
    for (s, c) in fourier_terms(ordinal, 7.0, weekly_harmonics) {
        row.push(s);
        row.push(c);
    }
    for (s, c) in fourier_terms(date.ordinal() as f64, DAYS_PER_YEAR, annual_harmonics) {
        row.push(s);
        row.push(c);
    }

    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_row_width() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let row = calendar_row(date, &BTreeSet::new(), 1, 3);
        assert_eq!(row.len(), calendar_names(1, 3).len());
    }

    #[test]
    fn weekday_month_and_holiday() {
        // 2024-07-04 is a Thursday
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let holidays: BTreeSet<_> = [date].into_iter().collect();
        let row = calendar_row(date, &holidays, 0, 0);

        assert_eq!(row[0], 3.0);
        assert_eq!(row[3], 0.0);
        assert_eq!(row[4], 7.0);
        assert_eq!(row[7], 3.0);
        assert_eq!(row[10], 1.0);
    }

    #[test]
    fn weekend_flag() {
        let saturday = NaiveDate::from_ymd_opt(2024, 7, 6).unwrap();
        let row = calendar_row(saturday, &BTreeSet::new(), 0, 0);
        assert_eq!(row[3], 1.0);
    }
}
