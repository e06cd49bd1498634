//! Writing run outputs to disk

use crate::error::Result;
use crate::hierarchy::NodeId;
use crate::metrics::AggregateMetrics;
use crate::pipeline::{ForecastRow, RunOutput, SeriesMetrics};
use crate::reconciliation::ReconciliationPolicy;
use crate::trainer::SeriesFailure;
use csv::Writer as CsvWriter;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

const FORECAST_HEADER: [&str; 10] = [
    "node",
    "location_id",
    "product_group",
    "item_id",
    "date",
    "model",
    "p10",
    "p50",
    "p90",
    "is_reconciled",
];

/// Location, group and item columns for a node; empty where not applicable
fn node_columns(node: &NodeId) -> [String; 3] {
    match node {
        NodeId::Total => [String::new(), String::new(), String::new()],
        NodeId::Location(location) => [location.clone(), String::new(), String::new()],
        NodeId::Group { location, group } => [location.clone(), group.clone(), String::new()],
        NodeId::Leaf(key) => [key.location_id.clone(), String::new(), key.item_id.clone()],
    }
}

/// Write forecast rows as CSV, one line per node and date
pub fn write_forecasts_csv<P: AsRef<Path>>(path: P, rows: &[ForecastRow]) -> Result<()> {
    let mut wtr = CsvWriter::from_writer(File::create(path.as_ref())?);
    wtr.write_record(FORECAST_HEADER)?;

    for row in rows {
        let [location, group, item] = node_columns(&row.node);
        wtr.write_record([
            row.node.to_string(),
            location,
            group,
            item,
            row.date.format("%Y-%m-%d").to_string(),
            row.model.clone(),
            format!("{:.4}", row.p10),
            format!("{:.4}", row.p50),
            format!("{:.4}", row.p90),
            row.is_reconciled.to_string(),
        ])?;
    }
    wtr.flush()?;

    info!(path = %path.as_ref().display(), rows = rows.len(), "Wrote forecasts");
    Ok(())
}

#[derive(Serialize)]
struct MetricsReport<'a> {
    run_id: Uuid,
    applied_policy: ReconciliationPolicy,
    aggregate: &'a AggregateMetrics,
    series: &'a [SeriesMetrics],
    failed_series: &'a [SeriesFailure],
}

/// Write per-series and aggregate metrics as pretty-printed JSON
pub fn write_metrics_json<P: AsRef<Path>>(path: P, output: &RunOutput) -> Result<()> {
    let report = MetricsReport {
        run_id: output.run_id,
        applied_policy: output.applied_policy,
        aggregate: &output.aggregate_metrics,
        series: &output.series_metrics,
        failed_series: &output.failed_series,
    };
    serde_json::to_writer_pretty(BufWriter::new(File::create(path.as_ref())?), &report)?;

    info!(path = %path.as_ref().display(), "Wrote metrics");
    Ok(())
}

/// Write `forecasts.csv` and `metrics.json` under `dir`, creating it if needed
pub fn write_run<P: AsRef<Path>>(dir: P, output: &RunOutput) -> Result<(PathBuf, PathBuf)> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let forecasts = dir.join("forecasts.csv");
    let metrics = dir.join("metrics.json");
    write_forecasts_csv(&forecasts, &output.rows)?;
    write_metrics_json(&metrics, output)?;
    Ok((forecasts, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SeriesKey;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn row(node: NodeId, p50: f64) -> ForecastRow {
        ForecastRow {
            node,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            model: "gradient_boosting".to_string(),
            p10: p50 - 1.0,
            p50,
            p90: p50 + 1.0,
            is_reconciled: true,
        }
    }

    #[test]
    fn csv_has_header_and_node_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("forecasts.csv");
        let rows = vec![
            row(NodeId::Total, 10.0),
            row(NodeId::Leaf(SeriesKey::new("L1", "A")), 4.0),
        ];
        write_forecasts_csv(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("node,location_id,product_group,item_id,date"));
        assert_eq!(
            lines[2],
            "location=L1/item=A,L1,,A,2024-03-01,gradient_boosting,3.0000,4.0000,5.0000,true"
        );
    }
}
