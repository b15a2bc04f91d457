//! Feature pipeline: generator concatenation and online normalization.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use market_core::{EngineError, FeatureFrame, MarketContext};

use crate::generators::{
    FeatureGenerator, MicrostructureFeatures, OrderBookFeatures, TradeFeatures,
    VolatilityFeatures,
};

const NORM_EPS: f64 = 1e-8;

fn default_true() -> bool {
    true
}
fn default_outlier_std() -> f64 {
    5.0
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Z-score normalize features with running statistics.
    #[serde(default = "default_true")]
    pub normalize: bool,
    /// Clip normalized values to +/- `outlier_std`.
    #[serde(default = "default_true")]
    pub clip_outliers: bool,
    #[serde(default = "default_outlier_std")]
    pub outlier_std: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            clip_outliers: true,
            outlier_std: 5.0,
        }
    }
}

/// Per-component Welford moments. Non-finite observations are skipped, so
/// each component keeps its own observation count.
#[derive(Debug, Clone)]
struct RunningMoments {
    counts: Vec<u64>,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningMoments {
    fn new(width: usize) -> Self {
        Self {
            counts: vec![0; width],
            mean: vec![0.0; width],
            m2: vec![0.0; width],
        }
    }

    fn update(&mut self, values: &[f64]) {
        for (j, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                continue;
            }
            self.counts[j] += 1;
            let delta = v - self.mean[j];
            self.mean[j] += delta / self.counts[j] as f64;
            let delta2 = v - self.mean[j];
            self.m2[j] += delta * delta2;
        }
    }

    fn mean_std(&self) -> (Vec<f64>, Vec<f64>) {
        let std = self
            .counts
            .iter()
            .zip(&self.m2)
            .map(|(&n, &m2)| {
                if n > 1 {
                    (m2 / (n - 1) as f64).max(NORM_EPS).sqrt()
                } else {
                    1.0
                }
            })
            .collect();
        (self.mean.clone(), std)
    }
}

/// Ordered collection of feature generators with online normalization.
///
/// The schema is the concatenation of the generators' names, fixed once the
/// generators are added. Normalization statistics update on every `compute`
/// unless they have been frozen with [`FeaturePipeline::set_normalization`].
pub struct FeaturePipeline {
    generators: Vec<Box<dyn FeatureGenerator>>,
    config: PipelineConfig,
    names: Vec<String>,
    moments: Option<RunningMoments>,
    frozen: Option<(Vec<f64>, Vec<f64>)>,
}

impl FeaturePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            generators: Vec::new(),
            config,
            names: Vec::new(),
            moments: None,
            frozen: None,
        }
    }

    /// Pipeline with the four standard generators (55 features).
    pub fn with_defaults() -> Self {
        let mut pipeline = Self::new(PipelineConfig::default());
        pipeline.add_generator(Box::new(OrderBookFeatures::new()));
        pipeline.add_generator(Box::new(TradeFeatures::new()));
        pipeline.add_generator(Box::new(VolatilityFeatures::new()));
        pipeline.add_generator(Box::new(MicrostructureFeatures::new()));
        pipeline
    }

    /// Append a generator. Invalidates any accumulated or frozen statistics.
    pub fn add_generator(&mut self, generator: Box<dyn FeatureGenerator>) {
        debug!(
            features = generator.num_features(),
            total = self.names.len() + generator.num_features(),
            "pipeline generator added"
        );
        self.names
            .extend(generator.feature_names().iter().map(|n| n.to_string()));
        self.generators.push(generator);
        self.moments = None;
        self.frozen = None;
    }

    pub fn feature_names(&self) -> &[String] {
        &self.names
    }

    pub fn num_features(&self) -> usize {
        self.names.len()
    }

    /// Concatenated raw feature vector. Updates running statistics unless
    /// normalization is disabled or frozen.
    pub fn compute(&mut self, ctx: &MarketContext) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.names.len());
        for generator in &self.generators {
            values.extend(generator.compute(ctx));
        }

        if self.config.normalize && self.frozen.is_none() {
            self.moments
                .get_or_insert_with(|| RunningMoments::new(values.len()))
                .update(&values);
        }
        values
    }

    /// Z-score a raw vector with the current (or frozen) statistics, clip
    /// outliers, and replace non-finite slots with 0.
    pub fn normalize(&self, values: &[f64]) -> Vec<f64> {
        if !self.config.normalize {
            return values.to_vec();
        }
        let (mean, std) = match self.current_params() {
            Some(params) => params,
            None => return values.to_vec(),
        };

        values
            .iter()
            .enumerate()
            .map(|(j, &v)| {
                let mut z = (v - mean[j]) / (std[j] + NORM_EPS);
                if self.config.clip_outliers {
                    z = z.clamp(-self.config.outlier_std, self.config.outlier_std);
                }
                if z.is_finite() {
                    z
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn compute_normalized(&mut self, ctx: &MarketContext) -> Vec<f64> {
        let values = self.compute(ctx);
        self.normalize(&values)
    }

    /// Freeze statistics to caller-supplied values (e.g. training-set
    /// moments carried into evaluation). `compute` stops updating.
    pub fn set_normalization(&mut self, mean: Vec<f64>, std: Vec<f64>) -> Result<(), EngineError> {
        if mean.len() != self.names.len() || std.len() != self.names.len() {
            return Err(EngineError::SchemaMismatch(format!(
                "normalization params have {}/{} values, schema has {} features",
                mean.len(),
                std.len(),
                self.names.len()
            )));
        }
        self.frozen = Some((mean, std));
        Ok(())
    }

    /// Current (mean, std), frozen or accumulated. None before any update.
    pub fn normalization_params(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        self.current_params()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    fn current_params(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        if let Some((mean, std)) = &self.frozen {
            return Some((mean.clone(), std.clone()));
        }
        self.moments.as_ref().map(|m| m.mean_std())
    }

    /// Raw feature matrix for a batch of states (n_states x n_features).
    pub fn compute_batch(&mut self, states: &[MarketContext]) -> Result<FeatureFrame, EngineError> {
        let mut frame = FeatureFrame::new(self.names.clone());
        for ctx in states {
            let row = self.compute(ctx);
            frame.push_row(&row)?;
        }
        Ok(frame)
    }

    /// Batch computation normalized with the batch's own NaN-aware
    /// mean/std. Intended for bulk offline use, not streaming.
    pub fn compute_batch_normalized(
        &mut self,
        states: &[MarketContext],
    ) -> Result<FeatureFrame, EngineError> {
        let raw = self.compute_batch(states)?;
        if !self.config.normalize {
            return Ok(raw);
        }

        let n_cols = raw.n_cols();
        let mut mean = vec![0.0; n_cols];
        let mut std = vec![0.0; n_cols];
        for j in 0..n_cols {
            let col = raw.column(j);
            let finite: Vec<f64> = col.into_iter().filter(|v| !v.is_nan()).collect();
            if finite.is_empty() {
                continue;
            }
            let m = finite.iter().sum::<f64>() / finite.len() as f64;
            let var = finite.iter().map(|v| (v - m).powi(2)).sum::<f64>() / finite.len() as f64;
            mean[j] = m;
            std[j] = var.sqrt();
        }

        let mut out = FeatureFrame::new(self.names.clone());
        for i in 0..raw.n_rows() {
            let row: Vec<f64> = raw
                .row(i)
                .iter()
                .enumerate()
                .map(|(j, &v)| {
                    let mut z = (v - mean[j]) / (std[j] + NORM_EPS);
                    if self.config.clip_outliers {
                        z = z.clamp(-self.config.outlier_std, self.config.outlier_std);
                    }
                    if z.is_finite() {
                        z
                    } else {
                        0.0
                    }
                })
                .collect();
            out.push_row(&row)?;
        }
        Ok(out)
    }

    /// Name -> value map for a single vector.
    pub fn feature_dict(&self, values: &[f64]) -> HashMap<String, f64> {
        self.names
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect()
    }

    /// Clear generator state and all statistics; un-freezes.
    pub fn reset(&mut self) {
        for generator in &mut self.generators {
            generator.reset();
        }
        self.moments = None;
        self.frozen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_ctx() -> MarketContext {
        MarketContext {
            bid_prices: vec![100.0, 99.9, 99.8, 99.7, 99.6],
            bid_sizes: vec![100.0, 200.0, 150.0, 300.0, 250.0],
            ask_prices: vec![100.1, 100.2, 100.3, 100.4, 100.5],
            ask_sizes: vec![120.0, 180.0, 200.0, 150.0, 100.0],
            trade_prices: vec![100.0, 100.1, 99.9, 100.05],
            trade_sizes: vec![50.0, 100.0, 75.0, 25.0],
            trade_sides: vec![1.0, 1.0, -1.0, 1.0],
            trade_times: vec![0, 1_000_000, 2_000_000, 3_000_000],
            prices: vec![100.0, 100.1, 99.9, 100.05],
            ..Default::default()
        }
    }

    #[test]
    fn default_pipeline_has_55_features() {
        let pipeline = FeaturePipeline::with_defaults();
        assert_eq!(pipeline.num_features(), 55);
        assert_eq!(pipeline.feature_names().len(), 55);
    }

    #[test]
    fn schema_stable_across_computes() {
        let mut pipeline = FeaturePipeline::with_defaults();
        let names_before = pipeline.feature_names().to_vec();
        let out = pipeline.compute(&full_ctx());
        assert_eq!(out.len(), names_before.len());
        assert_eq!(pipeline.feature_names(), names_before.as_slice());
    }

    #[test]
    fn welford_matches_batch_moments() {
        let mut moments = RunningMoments::new(1);
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        for x in xs {
            moments.update(&[x]);
        }
        let (mean, std) = moments.mean_std();
        let batch_mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let batch_var =
            xs.iter().map(|x| (x - batch_mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
        assert!((mean[0] - batch_mean).abs() < 1e-9);
        assert!((std[0] - batch_var.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn welford_skips_nan_observations() {
        let mut moments = RunningMoments::new(2);
        moments.update(&[1.0, f64::NAN]);
        moments.update(&[3.0, 10.0]);
        moments.update(&[5.0, 20.0]);
        let (mean, _) = moments.mean_std();
        assert!((mean[0] - 3.0).abs() < 1e-12);
        assert!((mean[1] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn frozen_stats_do_not_update() {
        let mut pipeline = FeaturePipeline::with_defaults();
        let mean = vec![0.0; 55];
        let std = vec![1.0; 55];
        pipeline.set_normalization(mean.clone(), std.clone()).unwrap();

        let first = pipeline.compute_normalized(&full_ctx());
        let second = pipeline.compute_normalized(&full_ctx());
        assert_eq!(first, second, "frozen stats must make compute idempotent");

        let (m, s) = pipeline.normalization_params().unwrap();
        assert_eq!(m, mean);
        assert_eq!(s, std);
    }

    #[test]
    fn set_normalization_rejects_wrong_width() {
        let mut pipeline = FeaturePipeline::with_defaults();
        let err = pipeline.set_normalization(vec![0.0; 3], vec![1.0; 3]);
        assert!(matches!(err, Err(EngineError::SchemaMismatch(_))));
    }

    #[test]
    fn normalized_output_has_no_nan() {
        let mut pipeline = FeaturePipeline::with_defaults();
        // Sparse context: many features are NaN before normalization.
        let ctx = MarketContext {
            bid_prices: vec![100.0],
            bid_sizes: vec![10.0],
            ask_prices: vec![100.1],
            ask_sizes: vec![12.0],
            ..Default::default()
        };
        pipeline.compute(&ctx);
        let out = pipeline.compute_normalized(&ctx);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn clipping_bounds_normalized_values() {
        let mut pipeline = FeaturePipeline::with_defaults();
        pipeline
            .set_normalization(vec![0.0; 55], vec![1e-6; 55])
            .unwrap();
        let out = pipeline.compute_normalized(&full_ctx());
        for v in out {
            assert!(v.abs() <= 5.0 + 1e-12, "clip failed: {v}");
        }
    }

    #[test]
    fn batch_matches_streaming_shape() {
        let mut pipeline = FeaturePipeline::with_defaults();
        let states = vec![full_ctx(), full_ctx(), full_ctx()];
        let frame = pipeline.compute_batch(&states).unwrap();
        assert_eq!(frame.n_rows(), 3);
        assert_eq!(frame.n_cols(), 55);
    }

    #[test]
    fn batch_normalized_is_finite() {
        let mut pipeline = FeaturePipeline::with_defaults();
        let states = vec![full_ctx(), full_ctx(), full_ctx(), full_ctx()];
        let frame = pipeline.compute_batch_normalized(&states).unwrap();
        for i in 0..frame.n_rows() {
            assert!(frame.row(i).iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn reset_clears_statistics() {
        let mut pipeline = FeaturePipeline::with_defaults();
        pipeline.compute(&full_ctx());
        assert!(pipeline.normalization_params().is_some());
        pipeline.reset();
        assert!(pipeline.normalization_params().is_none());
        assert!(!pipeline.is_frozen());
    }
}
