//! Hierarchical forecast reconciliation
//!
//! Base forecasts `ŷ` for every node are projected onto the coherent
//! subspace spanned by the summing matrix `S`:
//!
//! ```text
//! G = (Sᵀ W⁻¹ S)⁻¹ Sᵀ W⁻¹,    reconciled = S · max(G ŷ, 0)
//! ```
//!
//! `W` is chosen by the [`ReconciliationPolicy`]. Identity weighting (OLS) is
//! the baseline; the structural, variance and shrunk-covariance policies
//! weight nodes by their reliability. A weighting matrix that cannot be
//! factored falls back to OLS.

use crate::error::{ForecastError, Result};
use crate::hierarchy::{Hierarchy, NodeId};
use crate::models::ForecastPoint;
use forecast_math::linalg::{inverse_spd, solve_spd};
use forecast_math::stats::covariance;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Relative tolerance of the coherence check
pub const COHERENCE_TOLERANCE: f64 = 1e-6;

/// Base values at or below this use an additive quantile shift instead of
/// a ratio
const RATIO_EPSILON: f64 = 1e-9;

/// Weighting matrix used in the projection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationPolicy {
    /// Identity weights
    #[default]
    Ols,
    /// Diagonal of leaf counts below each node
    Structural,
    /// Diagonal of in-sample residual variances
    Variance,
    /// `lambda · diag(Σ) + (1 - lambda) · Σ` with Σ the sample covariance
    /// of in-sample residuals
    MinTShrink { lambda: f64 },
}

impl ReconciliationPolicy {
    pub fn validate(&self) -> Result<()> {
        if let ReconciliationPolicy::MinTShrink { lambda } = self {
            if !(0.0..=1.0).contains(lambda) {
                return Err(ForecastError::Configuration(format!(
                    "shrinkage lambda {} is outside [0, 1]",
                    lambda
                )));
            }
        }
        Ok(())
    }

    pub fn needs_residuals(&self) -> bool {
        matches!(
            self,
            ReconciliationPolicy::Variance | ReconciliationPolicy::MinTShrink { .. }
        )
    }
}

/// Outcome of one reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub forecasts: BTreeMap<NodeId, Vec<ForecastPoint>>,
    /// Policy whose weights were actually used
    pub applied_policy: ReconciliationPolicy,
}

/// Projects base forecasts for a fixed hierarchy onto coherent ones
#[derive(Debug, Clone)]
pub struct Reconciler {
    hierarchy: Hierarchy,
    policy: ReconciliationPolicy,
    summing: Array2<f64>,
}

impl Reconciler {
    pub fn new(hierarchy: Hierarchy, policy: ReconciliationPolicy) -> Result<Self> {
        policy.validate()?;
        hierarchy.validate()?;
        let summing = hierarchy.summing_matrix();
        Ok(Self {
            hierarchy,
            policy,
            summing,
        })
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn summing_matrix(&self) -> &Array2<f64> {
        &self.summing
    }

    /// Weighting matrix for the configured policy.
    ///
    /// `residuals` maps nodes to in-sample residuals; series of different
    /// lengths are aligned on their most recent values.
    pub fn weight_matrix(&self, residuals: &BTreeMap<NodeId, Vec<f64>>) -> Result<Array2<f64>> {
        let n = self.hierarchy.len();
        match self.policy {
            ReconciliationPolicy::Ols => Ok(Array2::eye(n)),
            ReconciliationPolicy::Structural => {
                Ok(Array2::from_diag(&self.summing.sum_axis(ndarray::Axis(1))))
            }
            ReconciliationPolicy::Variance => {
                let sigma = self.residual_covariance(residuals)?;
                Ok(Array2::from_diag(&sigma.diag().to_owned()))
            }
            ReconciliationPolicy::MinTShrink { lambda } => {
                let sigma = self.residual_covariance(residuals)?;
                let diag = Array2::from_diag(&sigma.diag().to_owned());
                Ok(diag * lambda + sigma * (1.0 - lambda))
            }
        }
    }

    fn residual_covariance(&self, residuals: &BTreeMap<NodeId, Vec<f64>>) -> Result<Array2<f64>> {
        let series = self
            .hierarchy
            .node_ids()
            .into_iter()
            .map(|id| {
                residuals.get(id).ok_or_else(|| {
                    ForecastError::Reconciliation(format!("no residuals for node {}", id))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let m = series.iter().map(|r| r.len()).min().unwrap_or(0);
        let columns: Vec<Vec<f64>> = series.iter().map(|r| r[r.len() - m..].to_vec()).collect();
        let cov = covariance(&columns)?;

        let n = cov.len();
        let mut sigma = Array2::from_shape_fn((n, n), |(i, j)| cov[i][j]);
        floor_variances(&mut sigma);
        Ok(sigma)
    }

    /// `G = (Sᵀ W⁻¹ S)⁻¹ Sᵀ W⁻¹`
    fn mapping(&self, weights: &Array2<f64>) -> Result<Array2<f64>> {
        let w_inv = inverse_spd(weights)?;
        let st_w_inv = self.summing.t().dot(&w_inv);
        let normal = st_w_inv.dot(&self.summing);
        Ok(solve_spd(&normal, &st_w_inv)?)
    }

    fn mapping_with_fallback(
        &self,
        residuals: &BTreeMap<NodeId, Vec<f64>>,
    ) -> Result<(Array2<f64>, ReconciliationPolicy)> {
        if self.policy != ReconciliationPolicy::Ols {
            match self.weight_matrix(residuals).and_then(|w| self.mapping(&w)) {
                Ok(g) => return Ok((g, self.policy)),
                Err(e) => warn!(
                    policy = ?self.policy,
                    error = %e,
                    "Weighting matrix unusable, falling back to OLS reconciliation"
                ),
            }
        }

        let g = self
            .mapping(&Array2::eye(self.hierarchy.len()))
            .map_err(|e| ForecastError::Reconciliation(format!("OLS projection failed: {}", e)))?;
        Ok((g, ReconciliationPolicy::Ols))
    }

    /// Reconcile base forecasts for every node of the hierarchy.
    ///
    /// Every node must have a base forecast over the same dates.
    pub fn reconcile(
        &self,
        base: &BTreeMap<NodeId, Vec<ForecastPoint>>,
        residuals: &BTreeMap<NodeId, Vec<f64>>,
    ) -> Result<Reconciled> {
        let ids = self.hierarchy.node_ids();
        let rows = ids
            .iter()
            .map(|id| {
                base.get(*id).ok_or_else(|| {
                    ForecastError::Reconciliation(format!("no base forecast for node {}", id))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let dates: Vec<_> = rows[0].iter().map(|p| p.date).collect();
        for (id, row) in ids.iter().zip(&rows) {
            if row.len() != dates.len() || row.iter().zip(&dates).any(|(p, d)| p.date != *d) {
                return Err(ForecastError::Reconciliation(format!(
                    "base forecast dates for node {} don't match the other nodes",
                    id
                )));
            }
        }

        let (g, applied_policy) = self.mapping_with_fallback(residuals)?;
        debug!(policy = ?applied_policy, nodes = ids.len(), dates = dates.len(), "Reconciling");

        let mut out: Vec<Vec<ForecastPoint>> = vec![Vec::with_capacity(dates.len()); ids.len()];
        for (t, date) in dates.iter().enumerate() {
            let y = Array1::from_iter(rows.iter().map(|row| row[t].p50));
            let bottom = g.dot(&y).mapv(|v| v.max(0.0));
            let coherent = self.summing.dot(&bottom);

            for (i, row) in rows.iter().enumerate() {
                out[i].push(adjust_bounds(&row[t], coherent[i], *date));
            }
        }

        let forecasts: BTreeMap<NodeId, Vec<ForecastPoint>> = ids
            .into_iter()
            .cloned()
            .zip(out)
            .collect();
        self.check_coherence(&forecasts)?;

        Ok(Reconciled {
            forecasts,
            applied_policy,
        })
    }

    /// Every aggregate's p50 equals the sum of its children's p50
    pub fn check_coherence(&self, forecasts: &BTreeMap<NodeId, Vec<ForecastPoint>>) -> Result<()> {
        for id in self.hierarchy.node_ids() {
            let children = self.hierarchy.children(id);
            if children.is_empty() {
                continue;
            }
            let parent = forecasts.get(id).ok_or_else(|| {
                ForecastError::Reconciliation(format!("missing reconciled node {}", id))
            })?;
            for (t, point) in parent.iter().enumerate() {
                let mut sum = 0.0;
                for child in &children {
                    sum += forecasts
                        .get(*child)
                        .and_then(|row| row.get(t))
                        .map(|p| p.p50)
                        .ok_or_else(|| {
                            ForecastError::Reconciliation(format!(
                                "missing reconciled node {}",
                                child
                            ))
                        })?;
                }
                if (point.p50 - sum).abs() > COHERENCE_TOLERANCE * point.p50.abs().max(1.0) {
                    return Err(ForecastError::Reconciliation(format!(
                        "node {} is incoherent on {}: {} vs children sum {}",
                        id, point.date, point.p50, sum
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Smallest variance kept on the diagonal, relative to the largest one
const VARIANCE_FLOOR: f64 = 1e-6;

/// Lift zero or near-zero variances so a single constant series keeps the
/// matrix invertible. An all-zero diagonal is left alone.
fn floor_variances(sigma: &mut Array2<f64>) {
    let largest = sigma.diag().iter().copied().fold(0.0, f64::max);
    if largest <= 0.0 {
        return;
    }
    let floor = largest * VARIANCE_FLOOR;
    for v in sigma.diag_mut() {
        if *v < floor {
            *v = floor;
        }
    }
}

/// Move p10/p90 with the node's p50 adjustment.
///
/// Bounds scale by the ratio reconciled/base; a zero base shifts them by the
/// difference instead. A bound that would cross p50 is widened to p50.
fn adjust_bounds(base: &ForecastPoint, p50: f64, date: chrono::NaiveDate) -> ForecastPoint {
    let (p10, p90) = if base.p50.abs() > RATIO_EPSILON {
        let ratio = p50 / base.p50;
        (base.p10 * ratio, base.p90 * ratio)
    } else {
        let shift = p50 - base.p50;
        (base.p10 + shift, base.p90 + shift)
    };

    ForecastPoint {
        date,
        p10: p10.min(p50).max(0.0),
        p50,
        p90: p90.max(p50),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SeriesKey;
    use chrono::NaiveDate;

    fn leaf(item: &str) -> NodeId {
        NodeId::Leaf(SeriesKey::new("L1", item))
    }

    fn point(p50: f64) -> ForecastPoint {
        ForecastPoint {
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            p10: p50 * 0.8,
            p50,
            p90: p50 * 1.2,
        }
    }

    fn hierarchy() -> Hierarchy {
        Hierarchy::from_edges(
            vec![NodeId::Total, leaf("A"), leaf("B"), leaf("C")],
            &[
                (NodeId::Total, leaf("A")),
                (NodeId::Total, leaf("B")),
                (NodeId::Total, leaf("C")),
            ],
        )
        .unwrap()
    }

    fn base(total: f64, leaves: [f64; 3]) -> BTreeMap<NodeId, Vec<ForecastPoint>> {
        let mut base = BTreeMap::new();
        base.insert(NodeId::Total, vec![point(total)]);
        base.insert(leaf("A"), vec![point(leaves[0])]);
        base.insert(leaf("B"), vec![point(leaves[1])]);
        base.insert(leaf("C"), vec![point(leaves[2])]);
        base
    }

    #[test]
    fn ols_splits_the_gap_evenly() {
        let reconciler = Reconciler::new(hierarchy(), ReconciliationPolicy::Ols).unwrap();
        let out = reconciler
            .reconcile(&base(90.0, [10.0, 20.0, 30.0]), &BTreeMap::new())
            .unwrap();

        let p50 = |id: &NodeId| out.forecasts[id][0].p50;
        assert!((p50(&leaf("A")) - 17.5).abs() < 1e-9);
        assert!((p50(&leaf("B")) - 27.5).abs() < 1e-9);
        assert!((p50(&leaf("C")) - 37.5).abs() < 1e-9);
        assert!((p50(&NodeId::Total) - 82.5).abs() < 1e-9);
    }

    #[test]
    fn bounds_follow_the_ratio() {
        let reconciler = Reconciler::new(hierarchy(), ReconciliationPolicy::Ols).unwrap();
        let out = reconciler
            .reconcile(&base(90.0, [10.0, 20.0, 30.0]), &BTreeMap::new())
            .unwrap();
        let a = out.forecasts[&leaf("A")][0];
        assert!((a.p10 - 8.0 * 1.75).abs() < 1e-9);
        assert!((a.p90 - 12.0 * 1.75).abs() < 1e-9);
    }

    #[test]
    fn zero_base_shifts_bounds() {
        let b = ForecastPoint {
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            p10: 0.0,
            p50: 0.0,
            p90: 1.0,
        };
        let adjusted = adjust_bounds(&b, 2.0, b.date);
        assert_eq!((adjusted.p10, adjusted.p50, adjusted.p90), (2.0, 2.0, 3.0));
    }

    #[test]
    fn singular_weights_fall_back_to_ols() {
        let reconciler = Reconciler::new(hierarchy(), ReconciliationPolicy::Variance).unwrap();
        // Constant residuals have zero variance
        let residuals: BTreeMap<NodeId, Vec<f64>> = [NodeId::Total, leaf("A"), leaf("B"), leaf("C")]
            .into_iter()
            .map(|id| (id, vec![1.0; 10]))
            .collect();
        let out = reconciler
            .reconcile(&base(90.0, [10.0, 20.0, 30.0]), &residuals)
            .unwrap();
        assert_eq!(out.applied_policy, ReconciliationPolicy::Ols);
    }

    #[test]
    fn one_constant_series_keeps_variance_weights() {
        let reconciler = Reconciler::new(hierarchy(), ReconciliationPolicy::Variance).unwrap();
        let varied = |scale: f64| -> Vec<f64> {
            (0..10)
                .map(|i| if i % 2 == 0 { scale } else { -scale })
                .collect()
        };
        let residuals: BTreeMap<NodeId, Vec<f64>> = [
            (NodeId::Total, varied(3.0)),
            (leaf("A"), vec![0.0; 10]),
            (leaf("B"), varied(1.0)),
            (leaf("C"), varied(2.0)),
        ]
        .into_iter()
        .collect();

        let w = reconciler.weight_matrix(&residuals).unwrap();
        assert!(w[[1, 1]] > 0.0);
        assert!(w[[1, 1]] < w[[2, 2]]);

        let out = reconciler
            .reconcile(&base(90.0, [10.0, 20.0, 30.0]), &residuals)
            .unwrap();
        assert_eq!(out.applied_policy, ReconciliationPolicy::Variance);
        let p50 = |id: &NodeId| out.forecasts[id][0].p50;
        let leaves = p50(&leaf("A")) + p50(&leaf("B")) + p50(&leaf("C"));
        assert!((p50(&NodeId::Total) - leaves).abs() < 1e-9);
    }

    #[test]
    fn only_covariance_policies_need_residuals() {
        assert!(!ReconciliationPolicy::Ols.needs_residuals());
        assert!(!ReconciliationPolicy::Structural.needs_residuals());
        assert!(ReconciliationPolicy::Variance.needs_residuals());
        assert!(ReconciliationPolicy::MinTShrink { lambda: 0.5 }.needs_residuals());
    }

    #[test]
    fn structural_weights_count_leaves() {
        let reconciler = Reconciler::new(hierarchy(), ReconciliationPolicy::Structural).unwrap();
        let w = reconciler.weight_matrix(&BTreeMap::new()).unwrap();
        assert_eq!(w[[0, 0]], 3.0);
        assert_eq!(w[[1, 1]], 1.0);
        assert_eq!(w[[0, 1]], 0.0);
    }

    #[test]
    fn missing_node_is_an_error() {
        let reconciler = Reconciler::new(hierarchy(), ReconciliationPolicy::Ols).unwrap();
        let mut b = base(90.0, [10.0, 20.0, 30.0]);
        b.remove(&leaf("C"));
        assert!(matches!(
            reconciler.reconcile(&b, &BTreeMap::new()),
            Err(ForecastError::Reconciliation(_))
        ));
    }
}
