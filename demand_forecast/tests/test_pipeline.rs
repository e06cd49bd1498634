use demand_forecast::config::{AggregateBase, CvConfig, ModelSpec, RunConfig};
use demand_forecast::data::{SalesRecord, SeriesKey};
use demand_forecast::error::ErrorKind;
use demand_forecast::export::write_run;
use demand_forecast::hierarchy::{Catalog, CatalogItem, Hierarchy, NodeId};
use demand_forecast::models::gradient_boosting::GbtParams;
use demand_forecast::pipeline::{
    execute, ForecastEngine, InMemorySource, RunOutput, RunStatus,
};
use demand_forecast::reconciliation::ReconciliationPolicy;
use demand_forecast::synthetic::{generate, SyntheticConfig};
use demand_forecast::tracking::{InMemoryTrackingSink, JsonlTrackingSink};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::tempdir;
use uuid::Uuid;

const HORIZON: usize = 14;

fn data() -> (Vec<SalesRecord>, Catalog) {
    let generated = generate(&SyntheticConfig {
        locations: 2,
        groups: 2,
        items_per_group: 2,
        days: 200,
        ..SyntheticConfig::default()
    })
    .unwrap();
    (generated.records, generated.catalog)
}

fn config() -> RunConfig {
    RunConfig {
        horizon: HORIZON,
        cv: CvConfig {
            folds: 2,
            validation_size: 14,
            min_train_size: 42,
        },
        model: ModelSpec::GradientBoosting(GbtParams {
            n_estimators: 20,
            max_depth: 3,
            learning_rate: 0.1,
            ..GbtParams::default()
        }),
        parallelism: 2,
        ..RunConfig::default()
    }
}

fn engine(records: Vec<SalesRecord>, catalog: Catalog) -> (ForecastEngine, Arc<InMemoryTrackingSink>) {
    let sink = Arc::new(InMemoryTrackingSink::new());
    let engine = ForecastEngine::new(Arc::new(InMemorySource::new(records, catalog)), sink.clone());
    (engine, sink)
}

fn run_to_completion(config: RunConfig, records: Vec<SalesRecord>, catalog: Catalog) -> Arc<RunOutput> {
    let (engine, _) = engine(records, catalog);
    let handle = engine.run(config);
    assert_eq!(handle.wait(), RunStatus::Complete, "{:?}", handle.failure());
    handle.outputs().unwrap()
}

/// Every aggregate row equals the sum of its children's rows on each date
fn assert_coherent(output: &RunOutput, catalog: &Catalog) {
    let hierarchy = Hierarchy::from_catalog(catalog).unwrap();
    let mut p50: BTreeMap<(&NodeId, chrono::NaiveDate), f64> = BTreeMap::new();
    for row in &output.rows {
        assert!(row.p10 >= 0.0 && row.p10 <= row.p50 && row.p50 <= row.p90, "{:?}", row);
        assert!(row.is_reconciled);
        p50.insert((&row.node, row.date), row.p50);
    }

    for node in output.nodes() {
        let children: Vec<&NodeId> = hierarchy
            .children(node)
            .into_iter()
            .filter(|c| output.nodes().contains(c))
            .collect();
        if children.is_empty() {
            continue;
        }
        for row in output.rows_for(node) {
            let sum: f64 = children.iter().map(|c| p50[&(*c, row.date)]).sum();
            assert!(
                (row.p50 - sum).abs() <= 1e-6 * row.p50.abs().max(1.0),
                "{} on {}: {} vs {}",
                node,
                row.date,
                row.p50,
                sum
            );
        }
    }
}

#[test]
fn test_complete_run_publishes_coherent_forecasts() {
    let (records, catalog) = data();
    let (engine, sink) = engine(records, catalog.clone());
    let handle = engine.run(config());

    assert_eq!(handle.wait(), RunStatus::Complete, "{:?}", handle.failure());
    let output = handle.outputs().unwrap();

    // total + 2 locations + 4 groups + 8 leaves
    assert_eq!(output.nodes().len(), 15);
    assert_eq!(output.rows.len(), 15 * HORIZON);
    assert!(output.failed_series.is_empty());
    assert_eq!(output.aggregate_metrics.series_count, 8);
    assert!(output.aggregate_metrics.mase.is_some());
    assert_eq!(output.applied_policy, ReconciliationPolicy::Ols);
    assert_coherent(&output, &catalog);

    let records = sink.records().unwrap();
    assert_eq!(records.len(), 8);
    assert!(records.iter().all(|r| r.run_id == handle.run_id()));
    assert!(records.iter().all(|r| r.fold_metrics.len() == 2));
}

#[rstest]
#[case(ReconciliationPolicy::Structural)]
#[case(ReconciliationPolicy::Variance)]
#[case(ReconciliationPolicy::MinTShrink { lambda: 0.5 })]
fn test_weighted_policies_stay_coherent(#[case] policy: ReconciliationPolicy) {
    let (records, catalog) = data();
    let mut config = config();
    config.reconciliation.policy = policy;

    let output = run_to_completion(config, records, catalog.clone());
    assert_coherent(&output, &catalog);
}

#[test]
fn test_fitted_aggregate_base() {
    let (records, catalog) = data();
    let mut config = config();
    config.reconciliation.aggregate_base = AggregateBase::Fitted;
    config.model = ModelSpec::ExponentialSmoothing { alpha: 0.3 };

    let output = run_to_completion(config, records, catalog.clone());
    assert_coherent(&output, &catalog);
    assert_eq!(output.series_metrics.len(), 15);
    assert!(output.rows.iter().all(|r| r.model == "exponential_smoothing"));
}

#[test]
fn test_short_series_fail_without_failing_the_run() {
    let (records, catalog) = data();
    let short = SeriesKey::new("store-1", "item-2-1");
    // Keep only the last 20 days of one leaf
    let cutoff = records.iter().map(|r| r.date).max().unwrap() - chrono::Duration::days(20);
    let records: Vec<SalesRecord> = records
        .into_iter()
        .filter(|r| r.key() != short || r.date > cutoff)
        .collect();

    let output = run_to_completion(config(), records, catalog.clone());

    assert_eq!(output.failed_series.len(), 1);
    assert_eq!(output.failed_series[0].node, NodeId::Leaf(short.clone()));
    assert_eq!(output.failed_series[0].kind, ErrorKind::DataInsufficiency);
    assert!(!output.nodes().contains(&NodeId::Leaf(short)));
    assert_eq!(output.nodes().len(), 14);
    assert_coherent(&output, &catalog);
}

#[test]
fn test_catalog_item_without_sales_is_reported() {
    let (records, mut catalog) = data();
    catalog.items.push(CatalogItem {
        item_id: "item-new".to_string(),
        product_group: "group-1".to_string(),
    });
    catalog.locations[0].items.push("item-new".to_string());

    let output = run_to_completion(config(), records, catalog);
    assert_eq!(output.failed_series.len(), 1);
    assert_eq!(
        output.failed_series[0].node,
        NodeId::Leaf(SeriesKey::new("store-1", "item-new"))
    );
}

#[test]
fn test_run_fails_when_every_series_fails() {
    let (records, catalog) = data();
    let mut config = config();
    config.cv.min_train_size = 400;

    let (engine, _) = engine(records, catalog);
    let handle = engine.run(config);
    assert_eq!(handle.wait(), RunStatus::Failed);

    let failure = handle.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::ModelFit);
    assert_eq!(failure.failed_series.len(), 8);
    assert!(handle.outputs().is_none());
}

#[test]
fn test_invalid_config_fails_before_any_work() {
    let (records, catalog) = data();
    let (engine, sink) = engine(records, catalog);
    let handle = engine.run(RunConfig {
        horizon: 0,
        ..config()
    });

    assert_eq!(handle.poll(), RunStatus::Failed);
    assert_eq!(handle.failure().unwrap().kind, ErrorKind::Configuration);
    assert!(sink.records().unwrap().is_empty());
}

#[test]
fn test_invalid_hierarchy_is_run_fatal() {
    let (records, mut catalog) = data();
    catalog.locations[1].items.push("unknown-item".to_string());

    let (engine, _) = engine(records, catalog);
    let handle = engine.run(config());
    assert_eq!(handle.wait(), RunStatus::Failed);
    assert_eq!(handle.failure().unwrap().kind, ErrorKind::Reconciliation);
}

#[test]
fn test_same_run_id_returns_the_same_run() {
    let (records, catalog) = data();
    let (engine, sink) = engine(records, catalog);
    let run_id = Uuid::new_v4();
    let config = RunConfig {
        run_id: Some(run_id),
        ..config()
    };

    let first = engine.run(config.clone());
    let second = engine.run(config);
    assert_eq!(first.run_id(), run_id);
    assert_eq!(second.run_id(), run_id);
    assert_eq!(second.wait(), RunStatus::Complete);
    assert_eq!(first.poll(), RunStatus::Complete);
    assert!(engine.get(&run_id).is_some());

    // Trained once
    assert_eq!(sink.records().unwrap().len(), 8);
}

#[test]
fn test_cancelled_run_fails_without_output() {
    let (records, catalog) = data();
    let source = InMemorySource::new(records, catalog);
    let cancel = AtomicBool::new(true);

    let failure = execute(
        Uuid::new_v4(),
        &config(),
        &source,
        Arc::new(InMemoryTrackingSink::new()),
        &cancel,
    )
    .unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
}

#[test]
fn test_outputs_written_to_disk() {
    let (records, catalog) = data();
    let dir = tempdir().unwrap();
    let sink = Arc::new(JsonlTrackingSink::new(dir.path().join("tracking")).unwrap());
    let engine = ForecastEngine::new(Arc::new(InMemorySource::new(records, catalog)), sink.clone());

    let handle = engine.run(config());
    assert_eq!(handle.wait(), RunStatus::Complete);
    let output = handle.outputs().unwrap();

    let (forecasts, metrics) = write_run(dir.path().join("out"), &output).unwrap();
    let csv = std::fs::read_to_string(forecasts).unwrap();
    assert_eq!(csv.lines().count(), 1 + output.rows.len());

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(metrics).unwrap()).unwrap();
    assert_eq!(report["aggregate"]["series_count"], 8);
    assert_eq!(sink.read_records().unwrap().len(), 8);
}
