use chrono::NaiveDate;
use demand_forecast::data::{Series, SeriesKey};
use demand_forecast::features::{FeatureBuilder, FeatureConfig};
use demand_forecast::hierarchy::NodeId;
use demand_forecast::models::exponential_smoothing::ExponentialSmoothing;
use demand_forecast::models::gradient_boosting::{GbtParams, GradientBoosting};
use demand_forecast::models::{interval_z, FittedModel, ForecastPoint, Forecaster};
use rstest::rstest;

fn series(values: Vec<f64>) -> Series {
    Series::new(
        NodeId::Leaf(SeriesKey::new("store-1", "item-1")),
        NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
        values,
    )
    .unwrap()
}

fn small_gbt() -> GradientBoosting {
    GradientBoosting::new(GbtParams {
        n_estimators: 40,
        max_depth: 3,
        learning_rate: 0.1,
        ..GbtParams::default()
    })
    .unwrap()
}

/// Fit on the whole series and forecast `horizon` future days
fn fit_and_forecast<F: Forecaster>(model: &F, s: &Series, horizon: usize) -> Vec<ForecastPoint> {
    let builder = FeatureBuilder::new(FeatureConfig::default(), 7).unwrap();
    let set = builder.build(s).unwrap();
    let fitted = model.fit(&set).unwrap();
    let future = builder.build_future(s, horizon).unwrap();
    fitted.forecast(&future).unwrap()
}

fn weekly_pattern(days: usize) -> Vec<f64> {
    (0..days)
        .map(|i| [4.0, 5.0, 6.0, 7.0, 9.0, 12.0, 3.0][i % 7] + (i % 11) as f64 * 0.3)
        .collect()
}

#[rstest]
#[case(25.0)]
#[case(0.0)]
fn test_constant_series_forecasts_the_constant(#[case] level: f64) {
    let s = series(vec![level; 365 + 28]);

    for points in [
        fit_and_forecast(&small_gbt(), &s, 30),
        fit_and_forecast(&ExponentialSmoothing::new(0.3).unwrap(), &s, 30),
    ] {
        assert_eq!(points.len(), 30);
        for p in points {
            assert!((p.p50 - level).abs() < 1e-9, "p50 {} != {}", p.p50, level);
            assert!(p.p90 - p.p10 < 1e-9);
        }
    }
}

#[test]
fn test_quantiles_are_ordered_and_non_negative() {
    // Demand that falls to zero so raw intervals would dip below it
    let values: Vec<f64> = (0..200)
        .map(|i| if i < 150 { 3.0 + (i % 5) as f64 } else { 0.0 })
        .collect();
    let points = fit_and_forecast(&small_gbt(), &series(values), 60);

    for p in points {
        assert!(p.p10 >= 0.0);
        assert!(p.p10 <= p.p50 && p.p50 <= p.p90, "{:?}", p);
    }
}

#[test]
fn test_interval_half_width_is_z_times_residual_std() {
    let s = series(weekly_pattern(200));
    let builder = FeatureBuilder::new(FeatureConfig::default(), 7).unwrap();
    let fitted = small_gbt().fit(&builder.build(&s).unwrap()).unwrap();
    let future = builder.build_future(&s, 14).unwrap();
    let z = interval_z().unwrap();

    assert!(fitted.residual_std() > 0.0);
    for p in fitted.forecast(&future).unwrap() {
        if p.p10 > 0.0 {
            assert!((p.p90 - p.p50 - z * fitted.residual_std()).abs() < 1e-9);
            assert!((p.p50 - p.p10 - z * fitted.residual_std()).abs() < 1e-9);
        }
    }
}

#[test]
fn test_identical_inputs_give_identical_outputs() {
    let s = series(weekly_pattern(200));
    let first = fit_and_forecast(&small_gbt(), &s, 21);
    let second = fit_and_forecast(&small_gbt(), &s, 21);

    let bits = |points: &[ForecastPoint]| -> Vec<(u64, u64, u64)> {
        points
            .iter()
            .map(|p| (p.p10.to_bits(), p.p50.to_bits(), p.p90.to_bits()))
            .collect()
    };
    assert_eq!(bits(&first), bits(&second));
}

#[test]
fn test_boosting_learns_the_weekly_pattern() {
    let s = series(weekly_pattern(300));
    let builder = FeatureBuilder::new(FeatureConfig::default(), 7).unwrap();
    let set = builder.build(&s).unwrap();
    let fitted = small_gbt().fit(&set).unwrap();

    let predictions = fitted.predict(&set.matrix).unwrap();
    let mean_target = set.target.iter().sum::<f64>() / set.len() as f64;
    let sse: f64 = predictions.iter().zip(&set.target).map(|(p, y)| (p - y).powi(2)).sum();
    let sst: f64 = set.target.iter().map(|y| (y - mean_target).powi(2)).sum();

    assert!(sse < 0.3 * sst, "sse {} sst {}", sse, sst);
    assert!(!fitted.feature_importance().is_empty());
}

#[test]
fn test_artifacts_name_their_family() {
    let s = series(weekly_pattern(120));
    let set = FeatureBuilder::new(FeatureConfig::default(), 7)
        .unwrap()
        .build(&s)
        .unwrap();

    let gbt = small_gbt().fit(&set).unwrap();
    let es = ExponentialSmoothing::new(0.5).unwrap().fit(&set).unwrap();
    assert_eq!(gbt.name(), "gradient_boosting");
    assert_eq!(es.name(), "exponential_smoothing");
    assert!(gbt.artifact().is_object());
    assert!(es.artifact().is_object());
}
