//! Depth-limited least-squares regression trees and the ensembles built on
//! them (gradient boosting, random forest).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use market_core::{EngineError, FeatureFrame};

/// Fixed seed so ensemble fits are reproducible run to run.
pub(crate) const ENSEMBLE_SEED: u64 = 42;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
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

/// A binary regression tree grown by greedy SSE reduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    max_depth: usize,
    min_samples_split: usize,
    /// Total SSE reduction attributed to each feature.
    feature_gains: Vec<f64>,
}

impl RegressionTree {
    pub fn new(max_depth: usize) -> Self {
        Self {
            nodes: Vec::new(),
            max_depth,
            min_samples_split: 2,
            feature_gains: Vec::new(),
        }
    }

    pub fn fit(&mut self, x: &FeatureFrame, y: &[f64], indices: &[usize]) {
        self.nodes.clear();
        self.feature_gains = vec![0.0; x.n_cols()];
        if indices.is_empty() {
            self.nodes.push(Node::Leaf { value: 0.0 });
            return;
        }
        self.grow(x, y, indices, 0);
    }

    /// Grow a subtree over `indices`; returns the node id.
    fn grow(&mut self, x: &FeatureFrame, y: &[f64], indices: &[usize], depth: usize) -> usize {
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64;

        if depth >= self.max_depth || indices.len() < self.min_samples_split {
            self.nodes.push(Node::Leaf { value: mean });
            return self.nodes.len() - 1;
        }

        match self.best_split(x, y, indices) {
            Some((feature, threshold, gain)) => {
                let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                    .iter()
                    .copied()
                    .partition(|&i| x.row(i)[feature] <= threshold);
                if left_idx.is_empty() || right_idx.is_empty() {
                    self.nodes.push(Node::Leaf { value: mean });
                    return self.nodes.len() - 1;
                }
                self.feature_gains[feature] += gain;

                // Reserve the split slot before growing children.
                let id = self.nodes.len();
                self.nodes.push(Node::Leaf { value: mean });
                let left = self.grow(x, y, &left_idx, depth + 1);
                let right = self.grow(x, y, &right_idx, depth + 1);
                self.nodes[id] = Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                };
                id
            }
            None => {
                self.nodes.push(Node::Leaf { value: mean });
                self.nodes.len() - 1
            }
        }
    }

    /// Best (feature, threshold, SSE gain) over all features, or None when
    /// no split improves on the parent.
    fn best_split(
        &self,
        x: &FeatureFrame,
        y: &[f64],
        indices: &[usize],
    ) -> Option<(usize, f64, f64)> {
        let n = indices.len() as f64;
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let parent_sse = total_sq - total_sum * total_sum / n;

        let mut best: Option<(usize, f64, f64)> = None;
        let mut sorted = indices.to_vec();

        for feature in 0..x.n_cols() {
            sorted.sort_by(|&a, &b| {
                x.row(a)[feature]
                    .partial_cmp(&x.row(b)[feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for (pos, &i) in sorted.iter().enumerate().take(sorted.len() - 1) {
                left_sum += y[i];
                left_sq += y[i] * y[i];

                let v = x.row(i)[feature];
                let next = x.row(sorted[pos + 1])[feature];
                if v == next {
                    continue; // cannot cut between equal values
                }

                let nl = (pos + 1) as f64;
                let nr = n - nl;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / nl)
                    + (right_sq - right_sum * right_sum / nr);
                let gain = parent_sse - sse;

                if gain > 1e-12 && best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, (v + next) / 2.0, gain));
                }
            }
        }
        best
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn feature_gains(&self) -> &[f64] {
        &self.feature_gains
    }
}

/// Least-squares gradient boosting over regression trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    base_prediction: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn new(n_estimators: usize, max_depth: usize) -> Self {
        Self {
            n_estimators,
            max_depth,
            learning_rate: 0.1,
            subsample: 0.8,
            base_prediction: 0.0,
            trees: Vec::new(),
        }
    }

    pub fn fit(&mut self, x: &FeatureFrame, y: &[f64]) -> Result<(), EngineError> {
        let n = x.n_rows();
        if n == 0 {
            return Err(EngineError::InsufficientData(
                "gradient boosting fit on empty matrix".to_string(),
            ));
        }
        self.trees.clear();
        self.base_prediction = y.iter().sum::<f64>() / n as f64;

        let mut rng = StdRng::seed_from_u64(ENSEMBLE_SEED);
        let mut predictions = vec![self.base_prediction; n];
        let mut all_indices: Vec<usize> = (0..n).collect();
        let sample_size = ((n as f64 * self.subsample).round() as usize).clamp(1, n);

        for _ in 0..self.n_estimators {
            let residuals: Vec<f64> = y
                .iter()
                .zip(&predictions)
                .map(|(yi, pi)| yi - pi)
                .collect();

            all_indices.shuffle(&mut rng);
            let sample = &all_indices[..sample_size];

            let mut tree = RegressionTree::new(self.max_depth);
            tree.fit(x, &residuals, sample);

            for i in 0..n {
                predictions[i] += self.learning_rate * tree.predict_row(x.row(i));
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let boost: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        self.base_prediction + self.learning_rate * boost
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn feature_gains(&self) -> Vec<f64> {
        sum_gains(&self.trees)
    }
}

fn sum_gains(trees: &[RegressionTree]) -> Vec<f64> {
    let width = trees.first().map(|t| t.feature_gains().len()).unwrap_or(0);
    let mut gains = vec![0.0; width];
    for tree in trees {
        for (total, g) in gains.iter_mut().zip(tree.feature_gains()) {
            *total += g;
        }
    }
    gains
}

/// Bootstrap-aggregated regression trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_estimators: usize,
    pub max_depth: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn new(n_estimators: usize, max_depth: usize) -> Self {
        Self {
            n_estimators,
            max_depth,
            trees: Vec::new(),
        }
    }

    pub fn fit(&mut self, x: &FeatureFrame, y: &[f64]) -> Result<(), EngineError> {
        let n = x.n_rows();
        if n == 0 {
            return Err(EngineError::InsufficientData(
                "random forest fit on empty matrix".to_string(),
            ));
        }
        self.trees.clear();
        let mut rng = StdRng::seed_from_u64(ENSEMBLE_SEED);

        for _ in 0..self.n_estimators {
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut tree = RegressionTree::new(self.max_depth);
            tree.fit(x, y, &sample);
            self.trees.push(tree);
        }
        Ok(())
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn feature_gains(&self) -> Vec<f64> {
        sum_gains(&self.trees)
    }
}
