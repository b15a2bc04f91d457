//! Walk-forward validation: strictly causal out-of-sample evaluation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use market_core::{EngineError, FeatureFrame};

use crate::learner::Learner;
use crate::stats::{nan_mean, nan_std, pearson, sign};

fn default_train_window() -> usize {
    10_000
}
fn default_test_window() -> usize {
    1_000
}
fn default_step_size() -> usize {
    500
}
fn default_min_train_samples() -> usize {
    1_000
}

/// Walk-forward configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    #[serde(default = "default_train_window")]
    pub train_window: usize,
    #[serde(default = "default_test_window")]
    pub test_window: usize,
    #[serde(default = "default_step_size")]
    pub step_size: usize,
    #[serde(default = "default_min_train_samples")]
    pub min_train_samples: usize,
    /// Expanding train window (anchored at 0) instead of rolling.
    #[serde(default)]
    pub expanding: bool,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_window: default_train_window(),
            test_window: default_test_window(),
            step_size: default_step_size(),
            min_train_samples: default_min_train_samples(),
            expanding: false,
        }
    }
}

/// One temporal fold, half-open index ranges with `train_end <= test_start`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fold {
    pub fold: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// Metrics for one evaluated fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
    pub ic: f64,
    pub sign_accuracy: f64,
    pub hit_rate: f64,
    pub sharpe: f64,
    pub n_train: usize,
    pub n_test: usize,
}

/// Aggregate over all evaluated folds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub n_folds: usize,
    pub mean_ic: f64,
    pub std_ic: f64,
    pub min_ic: f64,
    pub max_ic: f64,
    pub mean_sign_accuracy: f64,
    pub mean_hit_rate: f64,
    pub mean_sharpe: f64,
    pub std_sharpe: f64,
    /// Fraction of folds with positive IC.
    pub ic_positive_rate: f64,
    pub folds: Vec<FoldReport>,
}

/// Walk-forward validator over an external learner.
pub struct WalkForwardValidator {
    config: WalkForwardConfig,
}

impl WalkForwardValidator {
    pub fn new(config: WalkForwardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    /// Generate non-overlapping temporal folds over `n_samples`.
    ///
    /// Fold starts step by `step_size` while a full train+test window fits;
    /// only folds whose raw train span reaches `min_train_samples` are
    /// emitted (the NaN-cleaned count is re-checked during validation).
    pub fn splits(&self, n_samples: usize) -> Vec<Fold> {
        let c = &self.config;
        let mut folds = Vec::new();
        if n_samples < c.train_window + c.test_window {
            return folds;
        }

        let mut fold = 0;
        let mut start = 0;
        while start + c.train_window + c.test_window <= n_samples {
            let train_start = if c.expanding { 0 } else { start };
            let train_end = start + c.train_window;
            let test_start = train_end;
            let test_end = (test_start + c.test_window).min(n_samples);

            if train_end - train_start >= c.min_train_samples {
                folds.push(Fold {
                    fold,
                    train_start,
                    train_end,
                    test_start,
                    test_end,
                });
                fold += 1;
            }
            start += c.step_size;
        }
        folds
    }

    /// Run the learner over every fold and aggregate per-fold metrics.
    ///
    /// Rows with any NaN in features or target are dropped independently in
    /// train and test. Folds whose cleaned train set falls below
    /// `min_train_samples` (or with fewer than 2 cleaned test rows) are
    /// skipped.
    pub fn validate<L: Learner>(
        &self,
        learner: &mut L,
        features: &FeatureFrame,
        target: &[f64],
    ) -> Result<ValidationReport, EngineError> {
        if features.n_rows() != target.len() {
            return Err(EngineError::InvalidInput(format!(
                "feature rows ({}) != target length ({})",
                features.n_rows(),
                target.len()
            )));
        }

        let mut reports = Vec::new();
        for fold in self.splits(features.n_rows()) {
            let train_idx = clean_indices(features, target, fold.train_start, fold.train_end);
            let test_idx = clean_indices(features, target, fold.test_start, fold.test_end);

            if train_idx.len() < self.config.min_train_samples || test_idx.len() < 2 {
                debug!(
                    fold = fold.fold,
                    n_train = train_idx.len(),
                    n_test = test_idx.len(),
                    "fold skipped after NaN filtering"
                );
                continue;
            }

            let x_train = features.select_rows(&train_idx);
            let y_train: Vec<f64> = train_idx.iter().map(|&i| target[i]).collect();
            let x_test = features.select_rows(&test_idx);
            let y_test: Vec<f64> = test_idx.iter().map(|&i| target[i]).collect();

            learner.fit(&x_train, &y_train)?;
            let predictions = learner.predict(&x_test)?;

            reports.push(fold_metrics(&fold, &predictions, &y_test, train_idx.len()));
        }

        if reports.is_empty() {
            return Err(EngineError::InsufficientData(
                "no valid walk-forward folds".to_string(),
            ));
        }
        Ok(aggregate(reports))
    }
}

fn clean_indices(features: &FeatureFrame, target: &[f64], start: usize, end: usize) -> Vec<usize> {
    (start..end)
        .filter(|&i| target[i].is_finite() && features.row(i).iter().all(|v| !v.is_nan()))
        .collect()
}

fn fold_metrics(fold: &Fold, predictions: &[f64], actuals: &[f64], n_train: usize) -> FoldReport {
    let n = predictions.len();
    let ic = pearson(predictions, actuals);

    let sign_accuracy = predictions
        .iter()
        .zip(actuals)
        .filter(|(p, a)| sign(**p) == sign(**a))
        .count() as f64
        / n as f64;

    let hit_rate = predictions
        .iter()
        .zip(actuals)
        .filter(|(p, a)| *p * *a > 0.0)
        .count() as f64
        / n as f64;

    // Treat predictions as positions: per-period pnl = pred * actual.
    let pnl: Vec<f64> = predictions.iter().zip(actuals).map(|(p, a)| p * a).collect();
    let mean = pnl.iter().sum::<f64>() / n as f64;
    let var = pnl.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
    let sharpe = mean / (var.sqrt() + 1e-10) * 252.0f64.sqrt();

    FoldReport {
        fold: fold.fold,
        train_start: fold.train_start,
        train_end: fold.train_end,
        test_start: fold.test_start,
        test_end: fold.test_end,
        ic,
        sign_accuracy,
        hit_rate,
        sharpe,
        n_train,
        n_test: n,
    }
}

fn aggregate(folds: Vec<FoldReport>) -> ValidationReport {
    let ics: Vec<f64> = folds.iter().map(|f| f.ic).collect();
    let sharpes: Vec<f64> = folds.iter().map(|f| f.sharpe).collect();
    let accuracies: Vec<f64> = folds.iter().map(|f| f.sign_accuracy).collect();
    let hit_rates: Vec<f64> = folds.iter().map(|f| f.hit_rate).collect();

    let finite_ics: Vec<f64> = ics.iter().copied().filter(|v| !v.is_nan()).collect();
    let (min_ic, max_ic) = finite_ics.iter().fold((f64::NAN, f64::NAN), |(lo, hi), &v| {
        (
            if lo.is_nan() { v } else { lo.min(v) },
            if hi.is_nan() { v } else { hi.max(v) },
        )
    });
    let ic_positive_rate = ics.iter().filter(|&&v| v > 0.0).count() as f64 / ics.len() as f64;

    ValidationReport {
        n_folds: folds.len(),
        mean_ic: nan_mean(&ics),
        std_ic: nan_std(&ics),
        min_ic,
        max_ic,
        mean_sign_accuracy: nan_mean(&accuracies),
        mean_hit_rate: nan_mean(&hit_rates),
        mean_sharpe: nan_mean(&sharpes),
        std_sharpe: nan_std(&sharpes),
        ic_positive_rate,
        folds,
    }
}
