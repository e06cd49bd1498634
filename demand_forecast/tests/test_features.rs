use chrono::{Duration, NaiveDate};
use demand_forecast::data::{Series, SeriesKey};
use demand_forecast::error::ForecastError;
use demand_forecast::features::{FeatureBuilder, FeatureConfig, FeatureGroup};
use demand_forecast::hierarchy::NodeId;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

fn series(len: usize) -> Series {
    Series::new(
        NodeId::Leaf(SeriesKey::new("store-1", "item-1")),
        start(),
        (0..len).map(|i| (i % 7) as f64 * 2.0 + (i / 30) as f64).collect(),
    )
    .unwrap()
}

fn builder() -> FeatureBuilder {
    FeatureBuilder::new(FeatureConfig::default(), 7).unwrap()
}

#[test]
fn test_building_twice_gives_identical_matrices() {
    let s = series(120);
    let first = builder().build(&s).unwrap();
    let second = builder().build(&s).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_training_rows_start_after_the_lookback() {
    let s = series(120);
    let set = builder().build(&s).unwrap();

    assert_eq!(set.skipped_rows, 28);
    assert_eq!(set.len(), 92);
    assert_eq!(set.matrix.n_rows(), set.target.len());
    assert_eq!(set.matrix.dates()[0], start() + Duration::days(28));
    assert_eq!(set.target[0], s.quantities()[28]);
}

#[test]
fn test_lags_and_rolling_windows_use_only_the_past() {
    let s = series(120);
    let set = builder().build(&s).unwrap();
    let values = s.quantities();

    let lag_7 = set.matrix.column("lag_7").unwrap();
    let rolling_max = set.matrix.column("rolling_max_14").unwrap();
    for (row, t) in (set.skipped_rows..s.len()).enumerate() {
        assert_eq!(lag_7[row], values[t - 7]);
        let expected = values[t - 14..t].iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(rolling_max[row], expected);
    }
}

#[test]
fn test_no_training_value_is_undefined() {
    let set = builder().build(&series(90)).unwrap();
    for name in set.matrix.feature_names() {
        let column = set.matrix.column(&name).unwrap();
        assert!(column.iter().all(|v| v.is_finite()), "{} has undefined values", name);
    }
}

#[test]
fn test_future_matrix_covers_the_horizon() {
    let s = series(60);
    let future = builder().build_future(&s, 30).unwrap();

    assert_eq!(future.n_rows(), 30);
    assert_eq!(future.dates()[0], start() + Duration::days(60));
    assert_eq!(future.dates()[29], start() + Duration::days(89));
    assert_eq!(future.feature_names(), builder().feature_names());
}

#[rstest]
#[case(vec![FeatureGroup::Calendar], 0)]
#[case(vec![FeatureGroup::Lag], 28)]
#[case(vec![FeatureGroup::Calendar, FeatureGroup::Rolling], 28)]
fn test_lookback_depends_on_groups(#[case] groups: Vec<FeatureGroup>, #[case] lookback: usize) {
    let config = FeatureConfig {
        groups,
        ..FeatureConfig::default()
    };
    assert_eq!(config.lookback(), lookback);
}

#[test]
fn test_short_history_is_data_insufficiency() {
    let err = builder().build(&series(28)).unwrap_err();
    assert!(matches!(err, ForecastError::DataInsufficiency(_)));
}

#[test]
fn test_holidays_are_flagged() {
    let holiday = start() + Duration::days(40);
    let config = FeatureConfig {
        groups: vec![FeatureGroup::Calendar],
        holidays: [holiday].into_iter().collect(),
        ..FeatureConfig::default()
    };
    let set = FeatureBuilder::new(config, 7)
        .unwrap()
        .build(&series(60))
        .unwrap();

    let flags = set.matrix.column("is_holiday").unwrap();
    assert_eq!(flags.iter().filter(|f| **f == 1.0).count(), 1);
    assert_eq!(flags[40], 1.0);
}
