//! Run orchestration
//!
//! A run trains every leaf series, builds base forecasts for the aggregate
//! nodes, reconciles the whole hierarchy and publishes the reconciled rows.
//! [`execute`] does this synchronously; [`ForecastEngine::run`] does it on
//! a background thread behind a [`RunHandle`].

use crate::config::{AggregateBase, ModelSpec, RunConfig};
use crate::data::{group_records, SalesLoader, SalesRecord, Series};
use crate::error::{ErrorKind, ForecastError, Result};
use crate::features::FeatureBuilder;
use crate::hierarchy::{Catalog, Hierarchy, NodeId};
use crate::metrics::{aggregate_series, AggregateMetrics, MetricsBundle};
use crate::models::exponential_smoothing::ExponentialSmoothing;
use crate::models::gradient_boosting::GradientBoosting;
use crate::models::{ForecastPoint, Forecaster};
use crate::reconciliation::{ReconciliationPolicy, Reconciler};
use crate::tracking::TrackingSink;
use crate::trainer::{SeriesFailure, SeriesForecast, TrackingContext, Trainer};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

/// Supplies sales history and the catalog for a run
pub trait DataSource: Send + Sync {
    fn sales(&self) -> Result<Vec<SalesRecord>>;
    fn catalog(&self) -> Result<Catalog>;
}

/// Records and catalog held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    pub records: Vec<SalesRecord>,
    pub catalog: Catalog,
}

impl InMemorySource {
    pub fn new(records: Vec<SalesRecord>, catalog: Catalog) -> Self {
        Self { records, catalog }
    }
}

impl DataSource for InMemorySource {
    fn sales(&self) -> Result<Vec<SalesRecord>> {
        Ok(self.records.clone())
    }

    fn catalog(&self) -> Result<Catalog> {
        Ok(self.catalog.clone())
    }
}

/// Sales CSV plus catalog JSON on disk
#[derive(Debug, Clone)]
pub struct CsvSource {
    sales_path: PathBuf,
    catalog_path: PathBuf,
}

impl CsvSource {
    pub fn new(sales_path: impl Into<PathBuf>, catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            sales_path: sales_path.into(),
            catalog_path: catalog_path.into(),
        }
    }
}

impl DataSource for CsvSource {
    fn sales(&self) -> Result<Vec<SalesRecord>> {
        SalesLoader::from_csv(&self.sales_path)
    }

    fn catalog(&self) -> Result<Catalog> {
        Catalog::from_json_file(&self.catalog_path)
    }
}

/// One published forecast value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub node: NodeId,
    pub date: NaiveDate,
    pub model: String,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub is_reconciled: bool,
}

/// Evaluation results of one trained node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetrics {
    pub node: NodeId,
    pub model: String,
    pub fold_metrics: Vec<MetricsBundle>,
    pub metrics: MetricsBundle,
    pub train_metrics: MetricsBundle,
}

impl From<&SeriesForecast> for SeriesMetrics {
    fn from(f: &SeriesForecast) -> Self {
        Self {
            node: f.node.clone(),
            model: f.model.clone(),
            fold_metrics: f.fold_metrics.clone(),
            metrics: f.metrics.clone(),
            train_metrics: f.train_metrics.clone(),
        }
    }
}

/// Published result of a complete run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutput {
    pub run_id: Uuid,
    /// Reconciled rows, node by node in hierarchy order
    pub rows: Vec<ForecastRow>,
    pub series_metrics: Vec<SeriesMetrics>,
    /// Means across leaf series
    pub aggregate_metrics: AggregateMetrics,
    /// Leaves dropped from the run and why
    pub failed_series: Vec<SeriesFailure>,
    pub applied_policy: ReconciliationPolicy,
}

impl RunOutput {
    pub fn rows_for(&self, node: &NodeId) -> Vec<&ForecastRow> {
        self.rows.iter().filter(|r| &r.node == node).collect()
    }

    /// Distinct nodes with published rows
    pub fn nodes(&self) -> BTreeSet<&NodeId> {
        self.rows.iter().map(|r| &r.node).collect()
    }
}

/// Why a run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub failed_series: Vec<SeriesFailure>,
}

impl RunFailure {
    fn new(error: &ForecastError, failed_series: Vec<SeriesFailure>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            failed_series,
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.failed_series.is_empty() {
            write!(f, " ({} series failed)", self.failed_series.len())?;
        }
        Ok(())
    }
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Failed)
    }
}

/// Run the whole pipeline on the calling thread.
///
/// Nothing is published unless every step succeeds; per-series failures
/// are carried in the output (or the failure) either way.
pub fn execute(
    run_id: Uuid,
    config: &RunConfig,
    source: &dyn DataSource,
    sink: Arc<dyn TrackingSink>,
    cancel: &AtomicBool,
) -> std::result::Result<RunOutput, RunFailure> {
    let span = info_span!("forecast_run", run_id = %run_id);
    let _enter = span.enter();
    info!(
        model = config.model.name(),
        horizon = config.horizon,
        policy = ?config.reconciliation.policy,
        "Run started"
    );

    let mut failures = Vec::new();
    match run_pipeline(run_id, config, source, sink, cancel, &mut failures) {
        Ok(output) => {
            info!(
                rows = output.rows.len(),
                failed_series = output.failed_series.len(),
                "Run complete"
            );
            Ok(output)
        }
        Err(e) => {
            error!(error = %e, failed_series = failures.len(), "Run failed");
            Err(RunFailure::new(&e, failures))
        }
    }
}

fn run_pipeline(
    run_id: Uuid,
    config: &RunConfig,
    source: &dyn DataSource,
    sink: Arc<dyn TrackingSink>,
    cancel: &AtomicBool,
    failures: &mut Vec<SeriesFailure>,
) -> Result<RunOutput> {
    config.validate()?;

    let records = source.sales()?;
    let catalog = source.catalog()?;
    let hierarchy = Hierarchy::from_catalog(&catalog)?;
    let series = leaf_series(&hierarchy, &records, failures)?;
    info!(
        nodes = hierarchy.len(),
        leaves = hierarchy.n_leaves(),
        series = series.len(),
        "Hierarchy loaded"
    );

    let tracking = TrackingContext {
        run_id,
        sink,
        config: serde_json::to_value(config)?,
    };
    let features = FeatureBuilder::new(config.features.clone(), config.season_length)?;
    let splitter = config.cv.splitter()?;

    match &config.model {
        ModelSpec::GradientBoosting(params) => {
            let trainer = Trainer::new(
                GradientBoosting::new(params.clone())?,
                features,
                splitter,
                config.horizon,
                config.season_length,
                tracking,
            );
            forecast_hierarchy(run_id, &trainer, config, &hierarchy, &series, cancel, failures)
        }
        ModelSpec::ExponentialSmoothing { alpha } => {
            let trainer = Trainer::new(
                ExponentialSmoothing::new(*alpha)?,
                features,
                splitter,
                config.horizon,
                config.season_length,
                tracking,
            );
            forecast_hierarchy(run_id, &trainer, config, &hierarchy, &series, cancel, failures)
        }
    }
}

/// One gap-free series per catalog leaf, all ending on the latest sales date.
///
/// Catalog leaves without any sales are recorded as failures; sales for
/// pairs outside the catalog are ignored.
fn leaf_series(
    hierarchy: &Hierarchy,
    records: &[SalesRecord],
    failures: &mut Vec<SeriesFailure>,
) -> Result<Vec<Series>> {
    let mut by_node: BTreeMap<NodeId, Series> = group_records(records)?
        .into_iter()
        .map(|s| (s.id().clone(), s))
        .collect();

    let leaf_ids = hierarchy.leaf_ids();
    let outside = by_node
        .keys()
        .filter(|id| hierarchy.index_of(id).is_none())
        .count();
    if outside > 0 {
        warn!(series = outside, "Ignoring sales for items outside the catalog");
    }

    let end = leaf_ids
        .iter()
        .filter_map(|id| by_node.get(*id).and_then(Series::end))
        .max()
        .ok_or_else(|| ForecastError::Data("no sales records for any catalog item".to_string()))?;

    let mut series = Vec::with_capacity(leaf_ids.len());
    for id in leaf_ids {
        match by_node.remove(id) {
            Some(s) => series.push(s.padded_to(end)?),
            None => {
                let e = ForecastError::DataInsufficiency("no sales records".to_string());
                failures.push(SeriesFailure::new(id.clone(), &e));
            }
        }
    }
    Ok(series)
}

fn forecast_hierarchy<F: Forecaster>(
    run_id: Uuid,
    trainer: &Trainer<F>,
    config: &RunConfig,
    hierarchy: &Hierarchy,
    series: &[Series],
    cancel: &AtomicBool,
    failures: &mut Vec<SeriesFailure>,
) -> Result<RunOutput> {
    let outcome = trainer.train_all(series, config.parallelism, cancel)?;
    failures.extend(outcome.failures);
    if outcome.forecasts.is_empty() {
        return Err(ForecastError::ModelFit(format!(
            "all {} series failed",
            failures.len()
        )));
    }

    let keep: BTreeSet<NodeId> = outcome.forecasts.iter().map(|f| f.node.clone()).collect();
    let hierarchy = hierarchy.retain_leaves(&keep)?;
    let leaves: BTreeMap<&NodeId, &SeriesForecast> =
        outcome.forecasts.iter().map(|f| (&f.node, f)).collect();

    let aggregates: Vec<NodeId> = hierarchy
        .node_ids()
        .into_iter()
        .filter(|id| !id.is_leaf())
        .cloned()
        .collect();

    let fitted = match config.reconciliation.aggregate_base {
        AggregateBase::Summed => Vec::new(),
        AggregateBase::Fitted => {
            fit_aggregates(trainer, config, &hierarchy, &aggregates, series, cancel)?
        }
    };

    // Residuals only feed covariance-based weights
    let keep_residuals = config.reconciliation.policy.needs_residuals();
    let mut base: BTreeMap<NodeId, Vec<ForecastPoint>> = BTreeMap::new();
    let mut residuals: BTreeMap<NodeId, Vec<f64>> = BTreeMap::new();
    for f in outcome.forecasts.iter().chain(&fitted) {
        base.insert(f.node.clone(), f.forecast.clone());
        if keep_residuals {
            residuals.insert(f.node.clone(), f.residuals.clone());
        }
    }
    for id in &aggregates {
        if !base.contains_key(id) {
            let below: Vec<&SeriesForecast> = hierarchy
                .descendant_leaves(id)
                .into_iter()
                .filter_map(|leaf| leaves.get(leaf).copied())
                .collect();
            let (points, resid) = summed_base(&below);
            base.insert(id.clone(), points);
            if keep_residuals {
                residuals.insert(id.clone(), resid);
            }
        }
    }

    let reconciler = Reconciler::new(hierarchy, config.reconciliation.policy)?;
    let reconciled = reconciler.reconcile(&base, &residuals)?;

    let model = trainer.forecaster().name().to_string();
    let rows = reconciler
        .hierarchy()
        .node_ids()
        .into_iter()
        .flat_map(|id| {
            let model = model.clone();
            reconciled
                .forecasts
                .get(id)
                .into_iter()
                .flatten()
                .map(move |p| ForecastRow {
                    node: id.clone(),
                    date: p.date,
                    model: model.clone(),
                    p10: p.p10,
                    p50: p.p50,
                    p90: p.p90,
                    is_reconciled: true,
                })
        })
        .collect();

    let labels: Vec<String> = outcome.forecasts.iter().map(|f| f.node.to_string()).collect();
    let aggregate_metrics = aggregate_series(
        labels
            .iter()
            .map(String::as_str)
            .zip(outcome.forecasts.iter().map(|f| &f.metrics)),
    );
    if !aggregate_metrics.mase_undefined.is_empty() {
        warn!(
            series = ?aggregate_metrics.mase_undefined,
            "MASE undefined for some series, excluded from the aggregate"
        );
    }

    Ok(RunOutput {
        run_id,
        rows,
        series_metrics: outcome
            .forecasts
            .iter()
            .chain(&fitted)
            .map(SeriesMetrics::from)
            .collect(),
        aggregate_metrics,
        failed_series: failures.clone(),
        applied_policy: reconciled.applied_policy,
    })
}

/// Independently fitted aggregate forecasts; aggregates whose fit fails
/// are left out so the caller falls back to summation
fn fit_aggregates<F: Forecaster>(
    trainer: &Trainer<F>,
    config: &RunConfig,
    hierarchy: &Hierarchy,
    aggregates: &[NodeId],
    series: &[Series],
    cancel: &AtomicBool,
) -> Result<Vec<SeriesForecast>> {
    let by_node: BTreeMap<&NodeId, &Series> = series.iter().map(|s| (s.id(), s)).collect();
    let aggregated = aggregates
        .iter()
        .map(|id| {
            let parts: Vec<&Series> = hierarchy
                .descendant_leaves(id)
                .into_iter()
                .filter_map(|leaf| by_node.get(leaf).copied())
                .collect();
            Series::aggregate(id.clone(), &parts)
        })
        .collect::<Result<Vec<_>>>()?;

    let outcome = trainer.train_all(&aggregated, config.parallelism, cancel)?;
    for failure in &outcome.failures {
        warn!(
            node = %failure.node,
            error = %failure.message,
            "Aggregate fit failed, using summed base forecast"
        );
    }
    Ok(outcome.forecasts)
}

/// Element-wise sum of leaf forecasts, and of their residuals aligned on
/// the most recent values
fn summed_base(leaves: &[&SeriesForecast]) -> (Vec<ForecastPoint>, Vec<f64>) {
    let mut points: Vec<ForecastPoint> = match leaves.first() {
        Some(first) => first
            .forecast
            .iter()
            .map(|p| ForecastPoint {
                date: p.date,
                p10: 0.0,
                p50: 0.0,
                p90: 0.0,
            })
            .collect(),
        None => Vec::new(),
    };
    for leaf in leaves {
        for (sum, p) in points.iter_mut().zip(&leaf.forecast) {
            sum.p10 += p.p10;
            sum.p50 += p.p50;
            sum.p90 += p.p90;
        }
    }

    let m = leaves.iter().map(|l| l.residuals.len()).min().unwrap_or(0);
    let mut residuals = vec![0.0; m];
    for leaf in leaves {
        let tail = &leaf.residuals[leaf.residuals.len() - m..];
        for (sum, r) in residuals.iter_mut().zip(tail) {
            *sum += r;
        }
    }

    (points, residuals)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type RunResult = std::result::Result<Arc<RunOutput>, RunFailure>;

#[derive(Debug)]
struct RunState {
    run_id: Uuid,
    status: Mutex<RunStatus>,
    result: Mutex<Option<RunResult>>,
    cancel: AtomicBool,
    finished: Condvar,
}

/// Handle to a submitted run
#[derive(Debug, Clone)]
pub struct RunHandle {
    state: Arc<RunState>,
}

impl RunHandle {
    fn new(run_id: Uuid) -> Self {
        Self {
            state: Arc::new(RunState {
                run_id,
                status: Mutex::new(RunStatus::Pending),
                result: Mutex::new(None),
                cancel: AtomicBool::new(false),
                finished: Condvar::new(),
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.state.run_id
    }

    /// Current status, without blocking
    pub fn poll(&self) -> RunStatus {
        *lock(&self.state.status)
    }

    /// Forecasts and metrics, once the run is complete
    pub fn outputs(&self) -> Option<Arc<RunOutput>> {
        match lock(&self.state.result).as_ref() {
            Some(Ok(output)) => Some(Arc::clone(output)),
            _ => None,
        }
    }

    /// Error summary, once the run has failed
    pub fn failure(&self) -> Option<RunFailure> {
        match lock(&self.state.result).as_ref() {
            Some(Err(failure)) => Some(failure.clone()),
            _ => None,
        }
    }

    /// Ask the run to stop before its next series
    pub fn cancel(&self) {
        self.state.cancel.store(true, Ordering::SeqCst);
    }

    /// Block until the run reaches a terminal status
    pub fn wait(&self) -> RunStatus {
        let mut status = lock(&self.state.status);
        while !status.is_terminal() {
            status = self
                .state
                .finished
                .wait(status)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *status
    }

    fn set_running(&self) {
        let mut status = lock(&self.state.status);
        if *status == RunStatus::Pending {
            *status = RunStatus::Running;
        }
    }

    fn finish(&self, result: RunResult) {
        let terminal = if result.is_ok() {
            RunStatus::Complete
        } else {
            RunStatus::Failed
        };
        *lock(&self.state.result) = Some(result);
        *lock(&self.state.status) = terminal;
        self.state.finished.notify_all();
    }
}

/// Entry point for submitting runs against one data source and sink
pub struct ForecastEngine {
    source: Arc<dyn DataSource>,
    sink: Arc<dyn TrackingSink>,
    runs: Mutex<HashMap<Uuid, RunHandle>>,
}

impl fmt::Debug for ForecastEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForecastEngine")
            .field("runs", &lock(&self.runs).len())
            .finish_non_exhaustive()
    }
}

impl ForecastEngine {
    pub fn new(source: Arc<dyn DataSource>, sink: Arc<dyn TrackingSink>) -> Self {
        Self {
            source,
            sink,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Start a run in the background.
    ///
    /// Idempotent per run id: submitting a config whose `run_id` is already
    /// known returns the existing handle. An invalid configuration yields a
    /// handle that has already failed.
    pub fn run(&self, config: RunConfig) -> RunHandle {
        let run_id = config.run_id.unwrap_or_else(Uuid::new_v4);

        let handle = {
            let mut runs = lock(&self.runs);
            if let Some(existing) = runs.get(&run_id) {
                info!(run_id = %run_id, "Run already submitted");
                return existing.clone();
            }
            let handle = RunHandle::new(run_id);
            runs.insert(run_id, handle.clone());
            handle
        };

        if let Err(e) = config.validate() {
            warn!(run_id = %run_id, error = %e, "Rejected run configuration");
            handle.finish(Err(RunFailure::new(&e, Vec::new())));
            return handle;
        }

        let source = Arc::clone(&self.source);
        let sink = Arc::clone(&self.sink);
        let worker = handle.clone();
        let spawned = thread::Builder::new()
            .name(format!("forecast-run-{}", run_id))
            .spawn(move || {
                worker.set_running();
                let result = execute(
                    run_id,
                    &config,
                    source.as_ref(),
                    sink,
                    &worker.state.cancel,
                );
                worker.finish(result.map(Arc::new));
            });

        if let Err(e) = spawned {
            let e = ForecastError::Io(e);
            error!(run_id = %run_id, error = %e, "Failed to start run thread");
            handle.finish(Err(RunFailure::new(&e, Vec::new())));
        }

        handle
    }

    /// Handle of a previously submitted run
    pub fn get(&self, run_id: &Uuid) -> Option<RunHandle> {
        lock(&self.runs).get(run_id).cloned()
    }
}
