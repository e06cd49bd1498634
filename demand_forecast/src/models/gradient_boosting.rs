//! Gradient-boosted regression trees with squared-error loss
//!
//! Each round fits a depth-limited tree to the gradients of the current
//! ensemble using exact greedy splits. Split gain and leaf weights follow
//! the second-order formulation with L1 (`reg_alpha`) and L2 (`reg_lambda`)
//! penalties; for squared error every row has unit hessian, so
//! `min_child_weight` is a minimum row count per child.

use crate::error::{ForecastError, Result};
use crate::features::{FeatureMatrix, FeatureSet};
use crate::models::{check_predictions, check_target, FittedModel, Forecaster};
use forecast_math::stats::{mean, population_std_dev};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Gains below this are treated as no improvement
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Boosting hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbtParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Fraction of rows drawn per tree
    pub subsample: f64,
    /// Fraction of features drawn per tree
    pub colsample: f64,
    pub min_child_weight: f64,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
    pub seed: u64,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            n_estimators: 400,
            max_depth: 6,
            learning_rate: 0.05,
            subsample: 0.8,
            colsample: 0.8,
            min_child_weight: 5.0,
            reg_alpha: 0.1,
            reg_lambda: 1.0,
            seed: 42,
        }
    }
}

impl GbtParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(ForecastError::Configuration(
                "n_estimators must be positive".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(ForecastError::Configuration(
                "max_depth must be positive".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ForecastError::Configuration(
                "learning_rate must be in (0, 1]".to_string(),
            ));
        }
        for (name, value) in [("subsample", self.subsample), ("colsample", self.colsample)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ForecastError::Configuration(format!(
                    "{} must be in (0, 1]",
                    name
                )));
            }
        }
        if self.min_child_weight < 0.0 || self.reg_alpha < 0.0 || self.reg_lambda < 0.0 {
            return Err(ForecastError::Configuration(
                "min_child_weight and regularisation terms must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// L1 soft-thresholding of a gradient sum
fn threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

/// Optimal leaf weight for gradient sum `g` and hessian sum `h`
pub fn leaf_weight(g: f64, h: f64, params: &GbtParams) -> f64 {
    let denom = h + params.reg_lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    -threshold(g, params.reg_alpha) / denom
}

fn leaf_score(g: f64, h: f64, params: &GbtParams) -> f64 {
    let denom = h + params.reg_lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    threshold(g, params.reg_alpha).powi(2) / denom
}

/// Loss reduction from splitting a node into the given children
pub fn split_gain(gl: f64, hl: f64, gr: f64, hr: f64, params: &GbtParams) -> f64 {
    0.5 * (leaf_score(gl, hl, params) + leaf_score(gr, hr, params)
        - leaf_score(gl + gr, hl + hr, params))
}

/// Tree node stored in a flat arena; children are indices into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One regression tree; the root is node 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes.get(index) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => return 0.0,
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Grows one tree over a fixed row/column sample
struct TreeGrower<'a> {
    params: &'a GbtParams,
    columns: &'a [Vec<f64>],
    grad: &'a [f64],
    features: &'a [usize],
    nodes: Vec<Node>,
    gains: Vec<(usize, f64)>,
}

impl<'a> TreeGrower<'a> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h = rows.len() as f64;
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.params.learning_rate * leaf_weight(g, h, self.params),
        });

        if depth >= self.params.max_depth {
            return index;
        }
        let best = match self.best_split(&rows, g, h) {
            Some(best) => best,
            None => return index,
        };

        let column = &self.columns[best.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| column[r] <= best.threshold);
        self.gains.push((best.feature, best.gain));

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[index] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        index
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<BestSplit> {
        let min_child = self.params.min_child_weight.max(1.0);
        if h < 2.0 * min_child {
            return None;
        }

        let mut best: Option<BestSplit> = None;
        let mut sorted = rows.to_vec();
        for &feature in self.features {
            let column = &self.columns[feature];
            sorted.sort_by(|a, b| column[*a].total_cmp(&column[*b]));

            let mut gl = 0.0;
            let mut hl = 0.0;
            for pair in sorted.windows(2) {
                gl += self.grad[pair[0]];
                hl += 1.0;
                let (here, next) = (column[pair[0]], column[pair[1]]);
                if here == next || hl < min_child || h - hl < min_child {
                    continue;
                }

                let gain = split_gain(gl, hl, g - gl, h - hl, self.params);
                if gain > MIN_SPLIT_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }
}

/// Gradient-boosted tree ensemble
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    name: String,
    params: GbtParams,
}

impl GradientBoosting {
    pub fn new(params: GbtParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            name: "gradient_boosting".to_string(),
            params,
        })
    }

    pub fn params(&self) -> &GbtParams {
        &self.params
    }
}

/// Fitted tree ensemble bound to one series
#[derive(Debug, Clone)]
pub struct FittedGradientBoosting {
    name: String,
    params: GbtParams,
    schema: Vec<String>,
    base_score: f64,
    trees: Vec<Tree>,
    residual_std: f64,
    importance: BTreeMap<String, f64>,
}

impl FittedGradientBoosting {
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    fn raw_predict(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

impl Forecaster for GradientBoosting {
    type Fitted = FittedGradientBoosting;

    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&self, features: &FeatureSet) -> Result<Self::Fitted> {
        check_target(features)?;
        let schema = features.matrix.feature_names();
        if schema.is_empty() {
            return Err(ForecastError::ModelFit(
                "gradient boosting needs at least one feature".to_string(),
            ));
        }

        let columns = schema
            .iter()
            .map(|name| features.matrix.column(name))
            .collect::<Result<Vec<_>>>()?;
        let target = &features.target;
        let n = target.len();
        let p = schema.len();

        let base_score = mean(target)?;
        let mut raw = vec![base_score; n];
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let n_rows = sample_size(n, self.params.subsample);
        let n_cols = sample_size(p, self.params.colsample);

        let mut trees = Vec::with_capacity(self.params.n_estimators);
        let mut gain_by_feature = vec![0.0; p];
        for _ in 0..self.params.n_estimators {
            let grad: Vec<f64> = raw.iter().zip(target).map(|(f, y)| f - y).collect();

            let mut rows = sample(&mut rng, n, n_rows).into_vec();
            rows.sort_unstable();
            let mut cols = sample(&mut rng, p, n_cols).into_vec();
            cols.sort_unstable();

            let mut grower = TreeGrower {
                params: &self.params,
                columns: &columns,
                grad: &grad,
                features: &cols,
                nodes: Vec::new(),
                gains: Vec::new(),
            };
            grower.grow(rows, 0);
            for (feature, gain) in grower.gains {
                gain_by_feature[feature] += gain;
            }

            let tree = Tree {
                nodes: grower.nodes,
            };
            let mut row = vec![0.0; p];
            for (i, value) in raw.iter_mut().enumerate() {
                for (f, column) in columns.iter().enumerate() {
                    row[f] = column[i];
                }
                *value += tree.predict(&row);
            }
            trees.push(tree);
        }
        check_predictions(&self.name, &raw)?;

        let residuals: Vec<f64> = raw
            .iter()
            .zip(target)
            .map(|(f, y)| y - f.max(0.0))
            .collect();
        let residual_std = population_std_dev(&residuals)?;

        let importance = schema
            .iter()
            .cloned()
            .zip(gain_by_feature)
            .collect::<BTreeMap<_, _>>();

        Ok(FittedGradientBoosting {
            name: self.name.clone(),
            params: self.params.clone(),
            schema,
            base_score,
            trees,
            residual_std,
            importance,
        })
    }
}

fn sample_size(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction).ceil() as usize).clamp(1, n.max(1))
}

impl FittedModel for FittedGradientBoosting {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }

    fn residual_std(&self) -> f64 {
        self.residual_std
    }

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let rows = features.rows_for(&self.schema)?;
        let predictions: Vec<f64> = rows.iter().map(|row| self.raw_predict(row)).collect();
        check_predictions(&self.name, &predictions)?;
        Ok(predictions.into_iter().map(|v| v.max(0.0)).collect())
    }

    fn artifact(&self) -> serde_json::Value {
        json!({
            "model": self.name,
            "params": self.params,
            "schema": self.schema,
            "base_score": self.base_score,
            "residual_std": self.residual_std,
            "trees": self.trees,
        })
    }

    fn feature_importance(&self) -> BTreeMap<String, f64> {
        self.importance.clone()
    }
}
