//! Per-series training: cross-validation, final fit, future forecast and
//! tracking

use crate::cross_validation::ExpandingWindowSplitter;
use crate::data::Series;
use crate::error::{ErrorKind, ForecastError, Result};
use crate::features::FeatureBuilder;
use crate::hierarchy::NodeId;
use crate::metrics::{aggregate_folds, MetricsBundle};
use crate::models::{FittedModel, ForecastPoint, Forecaster};
use crate::tracking::{ArtifactRef, TrackingRecord, TrackingSink};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, debug_span, info, warn};
use uuid::Uuid;

/// Everything produced for one successfully trained series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesForecast {
    pub node: NodeId,
    pub model: String,
    pub fold_metrics: Vec<MetricsBundle>,
    /// Mean of the fold metrics
    pub metrics: MetricsBundle,
    /// In-sample metrics of the full-history fit
    pub train_metrics: MetricsBundle,
    pub forecast: Vec<ForecastPoint>,
    /// In-sample residuals of the full-history fit
    pub residuals: Vec<f64>,
    pub feature_importance: BTreeMap<String, f64>,
    pub artifact: Option<ArtifactRef>,
}

/// A series that could not be trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesFailure {
    pub node: NodeId,
    pub kind: ErrorKind,
    pub message: String,
}

impl SeriesFailure {
    pub fn new(node: NodeId, error: &ForecastError) -> Self {
        Self {
            node,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Results of training a batch of series
#[derive(Debug, Clone, Default)]
pub struct TrainOutcome {
    pub forecasts: Vec<SeriesForecast>,
    pub failures: Vec<SeriesFailure>,
}

/// Where and under which run the trainer reports its fits
#[derive(Clone)]
pub struct TrackingContext {
    pub run_id: Uuid,
    pub sink: Arc<dyn TrackingSink>,
    /// Configuration echoed into every record
    pub config: serde_json::Value,
}

impl std::fmt::Debug for TrackingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingContext")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// Trains one model family on many series
#[derive(Debug, Clone)]
pub struct Trainer<F: Forecaster> {
    forecaster: F,
    features: FeatureBuilder,
    splitter: ExpandingWindowSplitter,
    horizon: usize,
    season_length: usize,
    tracking: TrackingContext,
}

impl<F: Forecaster> Trainer<F> {
    pub fn new(
        forecaster: F,
        features: FeatureBuilder,
        splitter: ExpandingWindowSplitter,
        horizon: usize,
        season_length: usize,
        tracking: TrackingContext,
    ) -> Self {
        Self {
            forecaster,
            features,
            splitter,
            horizon,
            season_length,
            tracking,
        }
    }

    pub fn forecaster(&self) -> &F {
        &self.forecaster
    }

    /// Cross-validate, refit on the full history and forecast one series
    pub fn train_series(&self, series: &Series) -> Result<SeriesForecast> {
        let span = debug_span!("series", node = %series.id());
        let _enter = span.enter();

        let set = self.features.build(series)?;
        let folds = self.splitter.split(set.len())?;
        let history = series.quantities();

        let mut fold_metrics = Vec::with_capacity(folds.len());
        for fold in &folds {
            let train = set.slice(fold.train.clone());
            let validation = set.slice(fold.validation.clone());

            let fitted = self.forecaster.fit(&train)?;
            let points = fitted.forecast(&validation.matrix)?;
            let before_validation = &history[..set.skipped_rows + fold.validation.start];
            let metrics = MetricsBundle::evaluate(
                &validation.target,
                &points,
                before_validation,
                self.season_length,
            )?;
            debug!(
                fold = fold.index,
                train_rows = train.len(),
                smape = metrics.smape,
                mase = ?metrics.mase,
                coverage = metrics.coverage,
                "Fold evaluated"
            );
            fold_metrics.push(metrics);
        }
        let metrics = aggregate_folds(&fold_metrics)?;

        let fitted = self.forecaster.fit(&set)?;
        let in_sample = fitted.forecast(&set.matrix)?;
        let train_metrics =
            MetricsBundle::evaluate(&set.target, &in_sample, history, self.season_length)?;
        let residuals = set
            .target
            .iter()
            .zip(&in_sample)
            .map(|(y, p)| y - p.p50)
            .collect();

        let future = self.features.build_future(series, self.horizon)?;
        let forecast = fitted.forecast(&future)?;

        let node = series.id().clone();
        let artifact = self.track(&node, &fitted, &fold_metrics, &metrics, &train_metrics);

        Ok(SeriesForecast {
            node,
            model: fitted.name().to_string(),
            fold_metrics,
            metrics,
            train_metrics,
            forecast,
            residuals,
            feature_importance: fitted.feature_importance(),
            artifact,
        })
    }

    /// Store the artifact and record; sink failures are logged, not raised
    fn track(
        &self,
        node: &NodeId,
        fitted: &F::Fitted,
        fold_metrics: &[MetricsBundle],
        metrics: &MetricsBundle,
        train_metrics: &MetricsBundle,
    ) -> Option<ArtifactRef> {
        let label = node.to_string();
        let sink = &self.tracking.sink;

        let artifact = match sink.store_artifact(self.tracking.run_id, &label, &fitted.artifact()) {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(node = %label, error = %e, "Failed to store model artifact");
                None
            }
        };

        let record = TrackingRecord {
            run_id: self.tracking.run_id,
            node: label.clone(),
            model: fitted.name().to_string(),
            config: self.tracking.config.clone(),
            fold_metrics: fold_metrics.to_vec(),
            metrics: metrics.clone(),
            train_metrics: Some(train_metrics.clone()),
            feature_importance: fitted.feature_importance(),
            artifact: artifact.clone(),
        };
        if let Err(e) = sink.record(&record) {
            warn!(node = %label, error = %e, "Failed to record tracking data");
        }

        artifact
    }

    /// Train every series on a pool of `parallelism` threads (0 = all
    /// cores).
    ///
    /// Per-series errors are collected as failures. `cancel` is checked
    /// before each series starts; once it is set no further series begin and
    /// the batch ends with [`ForecastError::Cancelled`].
    pub fn train_all(
        &self,
        series: &[Series],
        parallelism: usize,
        cancel: &AtomicBool,
    ) -> Result<TrainOutcome> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .build()
            .map_err(|e| ForecastError::Configuration(format!("cannot build worker pool: {}", e)))?;

        let results: Vec<Option<(NodeId, Result<SeriesForecast>)>> = pool.install(|| {
            series
                .par_iter()
                .map(|s| {
                    if cancel.load(Ordering::SeqCst) {
                        return None;
                    }
                    Some((s.id().clone(), self.train_series(s)))
                })
                .collect()
        });

        if cancel.load(Ordering::SeqCst) {
            return Err(ForecastError::Cancelled);
        }

        let mut outcome = TrainOutcome::default();
        for (node, result) in results.into_iter().flatten() {
            match result {
                Ok(forecast) => outcome.forecasts.push(forecast),
                Err(e) => {
                    warn!(node = %node, error = %e, "Series failed");
                    outcome.failures.push(SeriesFailure::new(node, &e));
                }
            }
        }

        info!(
            trained = outcome.forecasts.len(),
            failed = outcome.failures.len(),
            "Training finished"
        );
        Ok(outcome)
    }
}
