use demand_forecast::config::{ModelSpec, RunConfig};
use demand_forecast::hierarchy::NodeId;
use demand_forecast::models::gradient_boosting::GbtParams;
use demand_forecast::pipeline::{ForecastEngine, InMemorySource, RunStatus};
use demand_forecast::reconciliation::ReconciliationPolicy;
use demand_forecast::synthetic::{generate, SyntheticConfig};
use demand_forecast::tracking::InMemoryTrackingSink;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Demand Forecast: Basic Hierarchical Forecasting Example");
    println!("=======================================================\n");

    // Create sample data
    println!("Generating sample sales...");
    let data = generate(&SyntheticConfig {
        days: 400,
        late_start_every: 3,
        ..SyntheticConfig::default()
    })?;
    println!(
        "Sample data created: {} records, {} locations, {} items\n",
        data.records.len(),
        data.catalog.locations.len(),
        data.catalog.items.len()
    );

    let mut config = RunConfig {
        horizon: 28,
        model: ModelSpec::GradientBoosting(GbtParams {
            n_estimators: 100,
            ..GbtParams::default()
        }),
        ..RunConfig::default()
    };
    config.features.holidays = data.holidays.clone();
    config.reconciliation.policy = ReconciliationPolicy::MinTShrink { lambda: 0.5 };

    let sink = Arc::new(InMemoryTrackingSink::new());
    let source = Arc::new(InMemorySource::new(data.records, data.catalog));
    let engine = ForecastEngine::new(source, sink.clone());

    println!("Training and reconciling...");
    let handle = engine.run(config);
    if handle.wait() != RunStatus::Complete {
        if let Some(failure) = handle.failure() {
            println!("Run failed: {}", failure);
        }
        return Ok(());
    }
    let output = handle.outputs().ok_or("missing outputs")?;
    println!("Run {} complete\n", output.run_id);

    println!("Total demand, first week:");
    for row in output.rows_for(&NodeId::Total).iter().take(7) {
        println!(
            "  {}: {:.1} (p10 {:.1}, p90 {:.1})",
            row.date, row.p50, row.p10, row.p90
        );
    }

    println!("\nPer-series validation metrics:");
    for series in &output.series_metrics {
        let mase = series
            .metrics
            .mase
            .map(|m| format!("{:.3}", m))
            .unwrap_or_else(|| "undefined".to_string());
        println!(
            "  {:<35} MASE {:>9}  sMAPE {:>6.2}  coverage {:>5.1}%",
            series.node.to_string(),
            mase,
            series.metrics.smape,
            series.metrics.coverage * 100.0
        );
    }

    println!(
        "\nPolicy applied: {:?}; {} tracking records",
        output.applied_policy,
        sink.records()?.len()
    );
    Ok(())
}
