use demand_forecast::config::RunConfig;
use demand_forecast::export::write_run;
use demand_forecast::pipeline::{CsvSource, DataSource, ForecastEngine, InMemorySource, RunStatus};
use demand_forecast::synthetic::{self, SyntheticConfig};
use demand_forecast::tracking::JsonlTrackingSink;
use demand_forecast::observability;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const USAGE: &str = "usage: forecast_run <config.json> [<sales.csv> <catalog.json>] [<out_dir>]";

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, data_paths, out_dir) = match args.as_slice() {
        [config] => (config, None, PathBuf::from("forecast_output")),
        [config, out] => (config, None, PathBuf::from(out)),
        [config, sales, catalog] => (
            config,
            Some((sales, catalog)),
            PathBuf::from("forecast_output"),
        ),
        [config, sales, catalog, out] => (config, Some((sales, catalog)), PathBuf::from(out)),
        _ => {
            eprintln!("{}", USAGE);
            return Ok(ExitCode::from(2));
        }
    };

    let mut config = RunConfig::from_json_file(config_path)?;

    // Without input files, run on generated sales
    let source: Arc<dyn DataSource> = match data_paths {
        Some((sales, catalog)) => Arc::new(CsvSource::new(sales, catalog)),
        None => {
            let data = synthetic::generate(&SyntheticConfig::default())?;
            println!(
                "Generated {} synthetic sales records for {} items",
                data.records.len(),
                data.catalog.items.len()
            );
            config.features.holidays.extend(data.holidays.iter().copied());
            Arc::new(InMemorySource::new(data.records, data.catalog))
        }
    };

    let sink = Arc::new(JsonlTrackingSink::new(out_dir.join("tracking"))?);
    let engine = ForecastEngine::new(source, sink);

    let handle = engine.run(config);
    println!("Run {} submitted", handle.run_id());

    match handle.wait() {
        RunStatus::Complete => {
            let output = handle
                .outputs()
                .ok_or("run completed without outputs")?;
            let (forecasts, metrics) = write_run(&out_dir, &output)?;

            let aggregate = &output.aggregate_metrics;
            println!("Run complete: {} forecast rows", output.rows.len());
            println!("  Series evaluated: {}", aggregate.series_count);
            if let Some(mase) = aggregate.mase {
                println!("  Mean MASE:        {:.3}", mase);
            }
            if let Some(smape) = aggregate.smape {
                println!("  Mean sMAPE:       {:.3}", smape);
            }
            if let Some(coverage) = aggregate.coverage {
                println!("  p10-p90 coverage: {:.1}%", coverage * 100.0);
            }
            if !output.failed_series.is_empty() {
                println!("  Failed series:    {}", output.failed_series.len());
            }
            println!("Forecasts written to {}", forecasts.display());
            println!("Metrics written to {}", metrics.display());
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            match handle.failure() {
                Some(failure) => eprintln!("Run failed: {}", failure),
                None => eprintln!("Run failed"),
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
