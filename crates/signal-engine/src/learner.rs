//! Learner abstraction and the concrete regressors behind it.
//!
//! The engine only depends on the small `fit / predict / score /
//! feature_importances` surface; the closed [`Model`] enum keeps the set
//! serializable for persistence.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use market_core::{EngineError, FeatureFrame};

use crate::stats::r_squared;
use crate::tree::{GradientBoosting, RandomForest};

/// Opaque fit/predict contract the validator and alpha wrapper depend on.
pub trait Learner {
    fn fit(&mut self, x: &FeatureFrame, y: &[f64]) -> Result<(), EngineError>;

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<f64>, EngineError>;

    /// Coefficient of determination on (x, y).
    fn score(&self, x: &FeatureFrame, y: &[f64]) -> Result<f64, EngineError> {
        let predictions = self.predict(x)?;
        Ok(r_squared(&predictions, y))
    }

    /// Raw importances (|coefficients| or split gains), unnormalized.
    /// None before fit.
    fn feature_importances(&self) -> Option<Vec<f64>>;
}

fn check_fit_inputs(x: &FeatureFrame, y: &[f64]) -> Result<(), EngineError> {
    if x.n_rows() != y.len() {
        return Err(EngineError::InvalidInput(format!(
            "feature rows ({}) != target length ({})",
            x.n_rows(),
            y.len()
        )));
    }
    if x.n_rows() == 0 {
        return Err(EngineError::InsufficientData(
            "empty training set".to_string(),
        ));
    }
    Ok(())
}

// --- Ridge ---

/// L2-regularized linear regression, solved in closed form on centered data
/// with an unpenalized intercept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    pub alpha: f64,
    coefficients: Vec<f64>,
    intercept: f64,
    fitted: bool,
}

impl RidgeRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            coefficients: Vec::new(),
            intercept: 0.0,
            fitted: false,
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Learner for RidgeRegression {
    fn fit(&mut self, x: &FeatureFrame, y: &[f64]) -> Result<(), EngineError> {
        check_fit_inputs(x, y)?;
        let n = x.n_rows();
        let m = x.n_cols();

        let col_means: Vec<f64> = (0..m)
            .map(|j| x.column(j).iter().sum::<f64>() / n as f64)
            .collect();
        let y_mean = y.iter().sum::<f64>() / n as f64;

        let mut xc = DMatrix::zeros(n, m);
        for i in 0..n {
            let row = x.row(i);
            for j in 0..m {
                xc[(i, j)] = row[j] - col_means[j];
            }
        }
        let yc = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));

        // (Xc^T Xc + alpha I) w = Xc^T y
        let mut gram = xc.transpose() * &xc;
        for j in 0..m {
            gram[(j, j)] += self.alpha;
        }
        let rhs = xc.transpose() * yc;

        let weights = gram
            .clone()
            .cholesky()
            .map(|chol| chol.solve(&rhs))
            .or_else(|| gram.lu().solve(&rhs))
            .ok_or_else(|| {
                EngineError::LearnerFault("ridge normal equations are singular".to_string())
            })?;

        self.coefficients = weights.iter().copied().collect();
        self.intercept = y_mean
            - self
                .coefficients
                .iter()
                .zip(&col_means)
                .map(|(w, m)| w * m)
                .sum::<f64>();
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<f64>, EngineError> {
        if !self.fitted {
            return Err(EngineError::NotFitted);
        }
        if x.n_cols() != self.coefficients.len() {
            return Err(EngineError::SchemaMismatch(format!(
                "model has {} coefficients, input has {} columns",
                self.coefficients.len(),
                x.n_cols()
            )));
        }
        Ok((0..x.n_rows())
            .map(|i| {
                self.intercept
                    + x.row(i)
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(v, w)| v * w)
                        .sum::<f64>()
            })
            .collect())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        if !self.fitted {
            return None;
        }
        Some(self.coefficients.iter().map(|c| c.abs()).collect())
    }
}

// --- Lasso ---

/// L1-regularized linear regression via cyclic coordinate descent with
/// soft thresholding on standardized features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LassoRegression {
    pub alpha: f64,
    pub max_iter: usize,
    pub tolerance: f64,
    coefficients: Vec<f64>,
    intercept: f64,
    fitted: bool,
}

impl LassoRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            max_iter: 1000,
            tolerance: 1e-6,
            coefficients: Vec::new(),
            intercept: 0.0,
            fitted: false,
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

impl Learner for LassoRegression {
    fn fit(&mut self, x: &FeatureFrame, y: &[f64]) -> Result<(), EngineError> {
        check_fit_inputs(x, y)?;
        let n = x.n_rows();
        let m = x.n_cols();
        let nf = n as f64;

        let col_means: Vec<f64> = (0..m)
            .map(|j| x.column(j).iter().sum::<f64>() / nf)
            .collect();
        let col_stds: Vec<f64> = (0..m)
            .map(|j| {
                let var = x
                    .column(j)
                    .iter()
                    .map(|v| (v - col_means[j]).powi(2))
                    .sum::<f64>()
                    / nf;
                var.sqrt()
            })
            .collect();
        let y_mean = y.iter().sum::<f64>() / nf;

        // Standardized design; constant columns stay zero and get coef 0.
        let mut xs = vec![0.0; n * m];
        for i in 0..n {
            let row = x.row(i);
            for j in 0..m {
                if col_stds[j] > 1e-12 {
                    xs[i * m + j] = (row[j] - col_means[j]) / col_stds[j];
                }
            }
        }

        let mut weights = vec![0.0; m];
        let mut residual: Vec<f64> = y.iter().map(|v| v - y_mean).collect();

        for _ in 0..self.max_iter {
            let mut max_delta = 0.0f64;
            for j in 0..m {
                if col_stds[j] <= 1e-12 {
                    continue;
                }
                // rho_j = (1/n) sum x_ij (r_i + x_ij w_j); columns have unit
                // population variance so the curvature term is 1.
                let mut rho = 0.0;
                for i in 0..n {
                    rho += xs[i * m + j] * (residual[i] + xs[i * m + j] * weights[j]);
                }
                rho /= nf;

                let new_weight = soft_threshold(rho, self.alpha);
                let delta = new_weight - weights[j];
                if delta != 0.0 {
                    for i in 0..n {
                        residual[i] -= xs[i * m + j] * delta;
                    }
                    weights[j] = new_weight;
                }
                max_delta = max_delta.max(delta.abs());
            }
            if max_delta < self.tolerance {
                break;
            }
        }

        self.coefficients = weights
            .iter()
            .zip(&col_stds)
            .map(|(w, s)| if *s > 1e-12 { w / s } else { 0.0 })
            .collect();
        self.intercept = y_mean
            - self
                .coefficients
                .iter()
                .zip(&col_means)
                .map(|(w, m)| w * m)
                .sum::<f64>();
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<f64>, EngineError> {
        if !self.fitted {
            return Err(EngineError::NotFitted);
        }
        if x.n_cols() != self.coefficients.len() {
            return Err(EngineError::SchemaMismatch(format!(
                "model has {} coefficients, input has {} columns",
                self.coefficients.len(),
                x.n_cols()
            )));
        }
        Ok((0..x.n_rows())
            .map(|i| {
                self.intercept
                    + x.row(i)
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(v, w)| v * w)
                        .sum::<f64>()
            })
            .collect())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        if !self.fitted {
            return None;
        }
        Some(self.coefficients.iter().map(|c| c.abs()).collect())
    }
}

// --- Closed model set ---

/// The supported learner kinds. Closed so artifacts stay self-describing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Ridge(RidgeRegression),
    Lasso(LassoRegression),
    Gbm(GradientBoosting),
    Rf(RandomForest),
}

impl Learner for Model {
    fn fit(&mut self, x: &FeatureFrame, y: &[f64]) -> Result<(), EngineError> {
        match self {
            Model::Ridge(m) => m.fit(x, y),
            Model::Lasso(m) => m.fit(x, y),
            Model::Gbm(m) => m.fit(x, y),
            Model::Rf(m) => m.fit(x, y),
        }
    }

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<f64>, EngineError> {
        match self {
            Model::Ridge(m) => m.predict(x),
            Model::Lasso(m) => m.predict(x),
            Model::Gbm(m) => {
                if !m.is_fitted() {
                    return Err(EngineError::NotFitted);
                }
                Ok((0..x.n_rows()).map(|i| m.predict_row(x.row(i))).collect())
            }
            Model::Rf(m) => {
                if !m.is_fitted() {
                    return Err(EngineError::NotFitted);
                }
                Ok((0..x.n_rows()).map(|i| m.predict_row(x.row(i))).collect())
            }
        }
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            Model::Ridge(m) => m.feature_importances(),
            Model::Lasso(m) => m.feature_importances(),
            Model::Gbm(m) => m.is_fitted().then(|| m.feature_gains()),
            Model::Rf(m) => m.is_fitted().then(|| m.feature_gains()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_data() -> (FeatureFrame, Vec<f64>) {
        // y = 2 x0 - 3 x1 + 5
        let mut frame = FeatureFrame::new(vec!["x0", "x1"]);
        let mut y = Vec::new();
        for i in 0..100 {
            let x0 = (i as f64) / 10.0;
            let x1 = ((i * 31) % 17) as f64 / 5.0;
            frame.push_row(&[x0, x1]).unwrap();
            y.push(2.0 * x0 - 3.0 * x1 + 5.0);
        }
        (frame, y)
    }

    #[test]
    fn ridge_recovers_linear_relation() {
        let (x, y) = linear_data();
        let mut ridge = RidgeRegression::new(1e-6);
        ridge.fit(&x, &y).unwrap();
        assert!((ridge.coefficients()[0] - 2.0).abs() < 1e-4);
        assert!((ridge.coefficients()[1] + 3.0).abs() < 1e-4);
        assert!((ridge.intercept() - 5.0).abs() < 1e-3);
        let r2 = ridge.score(&x, &y).unwrap();
        assert!(r2 > 0.9999);
    }

    #[test]
    fn ridge_shrinks_with_regularization() {
        let (x, y) = linear_data();
        let mut loose = RidgeRegression::new(1e-6);
        let mut tight = RidgeRegression::new(1e4);
        loose.fit(&x, &y).unwrap();
        tight.fit(&x, &y).unwrap();
        assert!(tight.coefficients()[0].abs() < loose.coefficients()[0].abs());
    }

    #[test]
    fn predict_before_fit_is_not_fitted() {
        let (x, _) = linear_data();
        let ridge = RidgeRegression::new(1.0);
        assert!(matches!(ridge.predict(&x), Err(EngineError::NotFitted)));
    }

    #[test]
    fn lasso_zeroes_irrelevant_features() {
        // y depends on x0 only; x1 is noise-ish.
        let mut frame = FeatureFrame::new(vec!["x0", "x1"]);
        let mut y = Vec::new();
        for i in 0..200 {
            let x0 = (i as f64) / 20.0;
            let x1 = ((i * 7919) % 23) as f64 / 23.0;
            frame.push_row(&[x0, x1]).unwrap();
            y.push(4.0 * x0 + 1.0);
        }
        let mut lasso = LassoRegression::new(0.5);
        lasso.fit(&frame, &y).unwrap();
        assert!(
            lasso.coefficients()[1].abs() < 0.05,
            "noise coefficient should be shrunk to ~0, got {}",
            lasso.coefficients()[1]
        );
        assert!(lasso.coefficients()[0] > 1.0);
    }

    #[test]
    fn lasso_handles_constant_column() {
        let mut frame = FeatureFrame::new(vec!["x0", "const"]);
        let mut y = Vec::new();
        for i in 0..50 {
            frame.push_row(&[i as f64, 1.0]).unwrap();
            y.push(2.0 * i as f64);
        }
        let mut lasso = LassoRegression::new(0.01);
        lasso.fit(&frame, &y).unwrap();
        assert_eq!(lasso.coefficients()[1], 0.0);
        let preds = lasso.predict(&frame).unwrap();
        assert!(r_squared(&preds, &y) > 0.99);
    }

    #[test]
    fn fit_rejects_mismatched_lengths() {
        let (x, mut y) = linear_data();
        y.pop();
        let mut ridge = RidgeRegression::new(1.0);
        assert!(matches!(
            ridge.fit(&x, &y),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn model_enum_delegates() {
        let (x, y) = linear_data();
        let mut model = Model::Ridge(RidgeRegression::new(1e-6));
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        assert!(r_squared(&preds, &y) > 0.999);
        assert!(model.feature_importances().is_some());
    }

    #[test]
    fn model_roundtrips_predictions_exactly() {
        let (x, y) = linear_data();
        let mut model = Model::Ridge(RidgeRegression::new(0.1));
        model.fit(&x, &y).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: Model = serde_json::from_str(&json).unwrap();
        assert_eq!(model.predict(&x).unwrap(), restored.predict(&x).unwrap());
    }
}
