//! Alpha signal wrapper: fit protocol, decay analysis, IC stability.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use market_core::{EngineError, FeatureFrame, FeatureRow};

use crate::learner::{LassoRegression, Learner, Model, RidgeRegression};
use crate::stats::{pearson, sign};
use crate::tree::{GradientBoosting, RandomForest};

/// Deepest lag analyzed by the decay profile.
const DECAY_MAX_LAG: usize = 20;
/// Minimum aligned samples for a decay point.
const DECAY_MIN_SAMPLES: usize = 100;
/// Minimum valid pairs for an IC-stability window.
const STABILITY_MIN_SAMPLES: usize = 50;

fn default_name() -> String {
    "default_alpha".to_string()
}
fn default_horizon() -> usize {
    10
}
fn default_min_ic() -> f64 {
    0.02
}
fn default_max_decay_half_life() -> usize {
    10
}
fn default_regularization() -> f64 {
    1.0
}
fn default_n_estimators() -> usize {
    100
}
fn default_max_depth() -> usize {
    3
}

/// What the model predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Raw forward return.
    #[default]
    Return,
    /// Sign of the forward return.
    Direction,
    /// Absolute forward return.
    Magnitude,
}

/// Underlying learner kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Ridge,
    Lasso,
    Gbm,
    Rf,
}

/// Alpha model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Prediction horizon in ticks/bars.
    #[serde(default = "default_horizon")]
    pub horizon: usize,
    #[serde(default)]
    pub target: TargetKind,
    #[serde(default)]
    pub model_type: ModelType,
    /// Acceptance threshold consumers apply to validation IC.
    #[serde(default = "default_min_ic")]
    pub min_ic: f64,
    /// Acceptance threshold consumers apply to the decay half-life.
    #[serde(default = "default_max_decay_half_life")]
    pub max_decay_half_life: usize,
    #[serde(default = "default_regularization")]
    pub regularization: f64,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for AlphaConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            horizon: default_horizon(),
            target: TargetKind::default(),
            model_type: ModelType::default(),
            min_ic: default_min_ic(),
            max_decay_half_life: default_max_decay_half_life(),
            regularization: default_regularization(),
            n_estimators: default_n_estimators(),
            max_depth: default_max_depth(),
        }
    }
}

/// One point of the signal-decay profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayPoint {
    pub lag: usize,
    pub ic: f64,
    /// IC relative to the lag-1 IC.
    pub ic_normalized: f64,
}

/// One rolling IC-stability window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IcWindow {
    pub start_idx: usize,
    pub end_idx: usize,
    pub ic: f64,
}

/// Fit summary returned by [`AlphaSignal::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaFitReport {
    pub train_ic: f64,
    pub val_ic: f64,
    pub train_r2: f64,
    pub val_r2: f64,
    /// (name, importance) normalized to sum to 1.
    pub feature_importance: Vec<(String, f64)>,
    /// Smallest lag whose normalized IC drops below 0.5, or the deepest
    /// lag analyzed.
    pub decay_half_life: Option<usize>,
    pub decay_profile: Vec<DecayPoint>,
    pub n_train: usize,
    pub n_val: usize,
}

/// Short-horizon alpha model: adapts a [`Model`] to the feature pipeline,
/// with NaN filtering, a strictly temporal train/validation split, decay
/// analysis, and schema-aligned prediction.
pub struct AlphaSignal {
    config: AlphaConfig,
    model: Option<Model>,
    feature_names: Vec<String>,
    feature_importance: Vec<(String, f64)>,
    decay_profile: Vec<DecayPoint>,
}

impl AlphaSignal {
    pub fn new(config: AlphaConfig) -> Self {
        Self {
            config,
            model: None,
            feature_names: Vec::new(),
            feature_importance: Vec::new(),
            decay_profile: Vec::new(),
        }
    }

    pub fn config(&self) -> &AlphaConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_importance(&self) -> &[(String, f64)] {
        &self.feature_importance
    }

    pub fn decay_profile(&self) -> &[DecayPoint] {
        &self.decay_profile
    }

    pub(crate) fn fitted_model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub(crate) fn from_parts(
        config: AlphaConfig,
        model: Model,
        feature_names: Vec<String>,
        feature_importance: Vec<(String, f64)>,
    ) -> Self {
        Self {
            config,
            model: Some(model),
            feature_names,
            feature_importance,
            decay_profile: Vec::new(),
        }
    }

    fn build_model(config: &AlphaConfig) -> Model {
        match config.model_type {
            ModelType::Ridge => Model::Ridge(RidgeRegression::new(config.regularization)),
            ModelType::Lasso => Model::Lasso(LassoRegression::new(config.regularization)),
            ModelType::Gbm => Model::Gbm(GradientBoosting::new(
                config.n_estimators,
                config.max_depth,
            )),
            ModelType::Rf => Model::Rf(RandomForest::new(config.n_estimators, config.max_depth)),
        }
    }

    /// Derive the training target from forward returns per the configured
    /// target kind. NaN is preserved.
    pub fn build_target(&self, forward_returns: &[f64]) -> Vec<f64> {
        forward_returns
            .iter()
            .map(|&r| {
                if r.is_nan() {
                    f64::NAN
                } else {
                    match self.config.target {
                        TargetKind::Return => r,
                        TargetKind::Direction => sign(r),
                        TargetKind::Magnitude => r.abs(),
                    }
                }
            })
            .collect()
    }

    /// Fit on (features, target) with a temporal split: the last
    /// `validation_pct` of the cleaned rows validate, never train.
    pub fn fit(
        &mut self,
        features: &FeatureFrame,
        target: &[f64],
        validation_pct: f64,
    ) -> Result<AlphaFitReport, EngineError> {
        if features.n_rows() != target.len() {
            return Err(EngineError::InvalidInput(format!(
                "feature rows ({}) != target length ({})",
                features.n_rows(),
                target.len()
            )));
        }

        self.feature_names = features.names().to_vec();

        let clean: Vec<usize> = features
            .finite_row_indices()
            .into_iter()
            .filter(|&i| target[i].is_finite())
            .collect();
        if clean.is_empty() {
            return Err(EngineError::InsufficientData(
                "no rows survive NaN filtering".to_string(),
            ));
        }

        let split = ((1.0 - validation_pct) * clean.len() as f64).floor() as usize;
        if split == 0 {
            return Err(EngineError::InsufficientData(format!(
                "temporal split leaves no training rows ({} clean)",
                clean.len()
            )));
        }
        let (train_idx, val_idx) = clean.split_at(split);

        let x_train = features.select_rows(train_idx);
        let y_train: Vec<f64> = train_idx.iter().map(|&i| target[i]).collect();
        let x_val = features.select_rows(val_idx);
        let y_val: Vec<f64> = val_idx.iter().map(|&i| target[i]).collect();

        let mut model = Self::build_model(&self.config);
        model.fit(&x_train, &y_train)?;

        let train_pred = model.predict(&x_train)?;
        let train_ic = pearson(&train_pred, &y_train);
        let train_r2 = model.score(&x_train, &y_train)?;

        let (val_ic, val_r2) = if x_val.n_rows() >= 2 {
            let val_pred = model.predict(&x_val)?;
            (pearson(&val_pred, &y_val), model.score(&x_val, &y_val)?)
        } else {
            (f64::NAN, f64::NAN)
        };

        // Normalized absolute importances.
        let raw = model.feature_importances().unwrap_or_default();
        let total: f64 = raw.iter().sum::<f64>() + 1e-10;
        self.feature_importance = self
            .feature_names
            .iter()
            .cloned()
            .zip(raw.iter().map(|v| v / total))
            .collect();

        // Decay profile over the full cleaned set.
        let x_clean = features.select_rows(&clean);
        let y_clean: Vec<f64> = clean.iter().map(|&i| target[i]).collect();
        let clean_pred = model.predict(&x_clean)?;
        self.decay_profile = Self::analyze_decay(&clean_pred, &y_clean);
        let decay_half_life = self.half_life();

        self.model = Some(model);

        info!(
            name = %self.config.name,
            train_ic,
            val_ic,
            n_train = train_idx.len(),
            n_val = val_idx.len(),
            "alpha model fitted"
        );

        Ok(AlphaFitReport {
            train_ic,
            val_ic,
            train_r2,
            val_r2,
            feature_importance: self.feature_importance.clone(),
            decay_half_life,
            decay_profile: self.decay_profile.clone(),
            n_train: train_idx.len(),
            n_val: val_idx.len(),
        })
    }

    /// IC of fixed predictions against the target shifted by each lag,
    /// normalized by the lag-1 IC.
    fn analyze_decay(predictions: &[f64], target: &[f64]) -> Vec<DecayPoint> {
        let n = predictions.len().min(target.len());
        let mut profile = Vec::new();
        let mut initial_ic = f64::NAN;

        for lag in 1..=DECAY_MAX_LAG {
            if n <= lag || n - lag < DECAY_MIN_SAMPLES {
                break;
            }
            let preds = &predictions[..n - lag];
            let shifted = &target[lag..n];
            let ic = pearson(preds, shifted);

            if lag == 1 {
                initial_ic = ic;
            }
            let ic_normalized = if initial_ic.is_finite() && initial_ic != 0.0 {
                ic / initial_ic
            } else {
                1.0
            };
            profile.push(DecayPoint {
                lag,
                ic,
                ic_normalized,
            });
        }
        profile
    }

    /// Smallest lag whose normalized IC drops below 0.5, else the deepest
    /// lag analyzed. None when no profile exists.
    pub fn half_life(&self) -> Option<usize> {
        if self.decay_profile.is_empty() {
            return None;
        }
        for point in &self.decay_profile {
            if point.ic_normalized < 0.5 {
                return Some(point.lag);
            }
        }
        Some(self.decay_profile.len())
    }

    /// Align caller columns to the training schema: unknown columns are
    /// dropped, missing columns filled with 0, residual NaN replaced with 0.
    fn align(&self, features: &FeatureFrame) -> Result<FeatureFrame, EngineError> {
        let mapping: Vec<Option<usize>> = self
            .feature_names
            .iter()
            .map(|name| features.column_index(name))
            .collect();
        if mapping.iter().all(|m| m.is_none()) && !self.feature_names.is_empty() {
            debug!("no caller column matches the training schema; predicting on zeros");
        }

        let mut aligned = FeatureFrame::new(self.feature_names.clone());
        let mut row_buf = vec![0.0; self.feature_names.len()];
        for i in 0..features.n_rows() {
            let src = features.row(i);
            for (slot, m) in row_buf.iter_mut().zip(&mapping) {
                *slot = match m {
                    Some(j) if src[*j].is_finite() => src[*j],
                    _ => 0.0,
                };
            }
            aligned.push_row(&row_buf)?;
        }
        Ok(aligned)
    }

    /// Predict on caller features (aligned to the training schema).
    pub fn predict(&self, features: &FeatureFrame) -> Result<Vec<f64>, EngineError> {
        let model = self.model.as_ref().ok_or(EngineError::NotFitted)?;
        let aligned = self.align(features)?;
        model.predict(&aligned)
    }

    /// Predict on a single named row (used tick-by-tick by strategies).
    pub fn predict_one(&self, row: &FeatureRow<'_>) -> Result<f64, EngineError> {
        let model = self.model.as_ref().ok_or(EngineError::NotFitted)?;
        let mut aligned = FeatureFrame::new(self.feature_names.clone());
        let values: Vec<f64> = self
            .feature_names
            .iter()
            .map(|name| match row.get(name) {
                Some(v) if v.is_finite() => v,
                _ => 0.0,
            })
            .collect();
        aligned.push_row(&values)?;
        Ok(model.predict(&aligned)?[0])
    }

    /// Predictions plus a confidence heuristic: `tanh(|prediction|)` for
    /// linear models, a flat 0.5 for tree ensembles. The magnitude is
    /// intentionally unspecified.
    pub fn predict_with_confidence(
        &self,
        features: &FeatureFrame,
    ) -> Result<(Vec<f64>, Vec<f64>), EngineError> {
        let predictions = self.predict(features)?;
        let confidence = match self.config.model_type {
            ModelType::Gbm | ModelType::Rf => vec![0.5; predictions.len()],
            _ => predictions.iter().map(|p| p.abs().tanh()).collect(),
        };
        Ok((predictions, confidence))
    }

    /// Rolling IC over windows of `window_size` stepping by `step_size`.
    pub fn ic_stability(
        &self,
        features: &FeatureFrame,
        target: &[f64],
        window_size: usize,
        step_size: usize,
    ) -> Result<Vec<IcWindow>, EngineError> {
        if window_size == 0 || step_size == 0 {
            return Err(EngineError::InvalidInput(
                "window and step must be positive".to_string(),
            ));
        }
        let predictions = self.predict(features)?;
        let n = predictions.len().min(target.len());

        let mut windows = Vec::new();
        let mut start = 0;
        while start + window_size < n {
            let end = start + window_size;
            let mut preds = Vec::with_capacity(window_size);
            let mut actuals = Vec::with_capacity(window_size);
            for i in start..end {
                if target[i].is_finite() {
                    preds.push(predictions[i]);
                    actuals.push(target[i]);
                }
            }
            if preds.len() >= STABILITY_MIN_SAMPLES {
                windows.push(IcWindow {
                    start_idx: start,
                    end_idx: end,
                    ic: pearson(&preds, &actuals),
                });
            }
            start += step_size;
        }
        Ok(windows)
    }

    /// Top `n` features by importance.
    pub fn top_features(&self, n: usize) -> Vec<(String, f64)> {
        let mut sorted = self.feature_importance.clone();
        sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        sorted.truncate(n);
        sorted
    }
}
