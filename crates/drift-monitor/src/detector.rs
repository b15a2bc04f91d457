//! Per-feature distribution drift and rolling model-performance drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::debug;

use market_core::FeatureFrame;

use crate::distance::{ks_test, population_stability_index};

/// PSI severity thresholds (strict `<` at every comparison).
pub const PSI_LOW: f64 = 0.1;
pub const PSI_MEDIUM: f64 = 0.2;
pub const PSI_HIGH: f64 = 0.25;
/// KS p-value above which a low-PSI feature counts as stable.
pub const KS_STABLE_P: f64 = 0.05;

fn default_reference_window() -> usize {
    10_000
}
fn default_current_window() -> usize {
    1_000
}
fn default_n_bins() -> usize {
    10
}

/// Drift detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Older slab used as the reference distribution.
    #[serde(default = "default_reference_window")]
    pub reference_window: usize,
    /// Most recent slab compared against the reference.
    #[serde(default = "default_current_window")]
    pub current_window: usize,
    #[serde(default = "default_n_bins")]
    pub n_bins: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            reference_window: default_reference_window(),
            current_window: default_current_window(),
            n_bins: default_n_bins(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    None,
    Low,
    Medium,
    High,
}

/// Drift verdict for a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftResult {
    pub feature_name: String,
    pub metric_name: String,
    pub value: f64,
    pub threshold: f64,
    pub is_drifted: bool,
    pub severity: DriftSeverity,
    pub computed_at: DateTime<Utc>,
}

/// Aggregate over one detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSummary {
    pub total_features: usize,
    pub drifted_features: usize,
    pub high_severity: usize,
    pub drift_rate: f64,
    pub mean_psi: f64,
    pub max_psi: f64,
    pub drifted_names: Vec<String>,
}

/// One rolling model-performance window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelDriftPoint {
    pub start_idx: usize,
    pub end_idx: usize,
    pub ic: f64,
    pub sign_accuracy: f64,
    pub mae: f64,
}

/// Detects distribution shift between an older reference slab and the most
/// recent slab of each feature column.
pub struct FeatureDriftDetector {
    config: DriftConfig,
}

impl FeatureDriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Compare the reference and current slabs of every column.
    ///
    /// Returns an empty list when the frame holds fewer rows than
    /// `reference_window + current_window`. Features whose PSI is NaN
    /// (insufficient clean samples) are omitted.
    pub fn detect(&self, frame: &FeatureFrame) -> Vec<DriftResult> {
        let needed = self.config.reference_window + self.config.current_window;
        let n = frame.n_rows();
        if n < needed {
            debug!(rows = n, needed, "not enough history for drift detection");
            return Vec::new();
        }

        let ref_start = n - needed;
        let cur_start = n - self.config.current_window;
        let computed_at = Utc::now();
        let mut results = Vec::new();

        for (j, name) in frame.names().iter().enumerate() {
            let column = frame.column(j);
            let reference = &column[ref_start..cur_start];
            let current = &column[cur_start..];

            let psi = population_stability_index(reference, current, self.config.n_bins);
            if psi.is_nan() {
                continue;
            }
            let (_ks_stat, ks_p) = ks_test(reference, current);

            let severity = if psi < PSI_LOW && (ks_p.is_nan() || ks_p > KS_STABLE_P) {
                DriftSeverity::None
            } else if psi < PSI_MEDIUM {
                DriftSeverity::Low
            } else if psi < PSI_HIGH {
                DriftSeverity::Medium
            } else {
                DriftSeverity::High
            };

            results.push(DriftResult {
                feature_name: name.clone(),
                metric_name: "psi".to_string(),
                value: psi,
                threshold: PSI_LOW,
                is_drifted: severity != DriftSeverity::None,
                severity,
                computed_at,
            });
        }
        results
    }

    /// Summarize a detection pass.
    pub fn summary(&self, results: &[DriftResult]) -> DriftSummary {
        if results.is_empty() {
            return DriftSummary {
                total_features: 0,
                drifted_features: 0,
                high_severity: 0,
                drift_rate: 0.0,
                mean_psi: 0.0,
                max_psi: 0.0,
                drifted_names: Vec::new(),
            };
        }

        let drifted: Vec<&DriftResult> = results.iter().filter(|r| r.is_drifted).collect();
        let high = results
            .iter()
            .filter(|r| r.severity == DriftSeverity::High)
            .count();
        let psis: Vec<f64> = results.iter().map(|r| r.value).collect();

        DriftSummary {
            total_features: results.len(),
            drifted_features: drifted.len(),
            high_severity: high,
            drift_rate: drifted.len() as f64 / results.len() as f64,
            mean_psi: (&psis).mean(),
            max_psi: psis.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            drifted_names: drifted.iter().map(|r| r.feature_name.clone()).collect(),
        }
    }

    /// Rolling model-quality windows over aligned (prediction, actual)
    /// sequences: per-window IC, sign accuracy, and MAE.
    pub fn model_drift(
        &self,
        predictions: &[f64],
        actuals: &[f64],
        window_size: usize,
        step_size: usize,
    ) -> Vec<ModelDriftPoint> {
        let n = predictions.len().min(actuals.len());
        let mut points = Vec::new();
        if window_size == 0 || step_size == 0 || n <= window_size {
            return points;
        }

        let mut start = 0;
        while start + window_size < n {
            let end = start + window_size;
            let preds = &predictions[start..end];
            let acts = &actuals[start..end];

            let sign_accuracy = preds
                .iter()
                .zip(acts)
                .filter(|(p, a)| sign(**p) == sign(**a))
                .count() as f64
                / window_size as f64;
            let mae = preds
                .iter()
                .zip(acts)
                .map(|(p, a)| (p - a).abs())
                .sum::<f64>()
                / window_size as f64;

            points.push(ModelDriftPoint {
                start_idx: start,
                end_idx: end,
                ic: pearson(preds, acts),
                sign_accuracy,
                mae,
            });
            start += step_size;
        }
        points
    }
}

impl Default for FeatureDriftDetector {
    fn default() -> Self {
        Self::new(DriftConfig::default())
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let nf = n as f64;
    let mean_x = x[..n].iter().sum::<f64>() / nf;
    let mean_y = y[..n].iter().sum::<f64>() / nf;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x < 1e-20 || var_y < 1e-20 {
        return f64::NAN;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn gaussian(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);
        mean + std * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn small_detector() -> FeatureDriftDetector {
        FeatureDriftDetector::new(DriftConfig {
            reference_window: 1000,
            current_window: 500,
            n_bins: 10,
        })
    }

    /// Frame with one exactly-cyclic stable column (both slabs share the
    /// same empirical distribution) and one whose tail jumps regime.
    fn shifted_frame(n: usize, shift_at: usize) -> FeatureFrame {
        let mut frame = FeatureFrame::new(vec!["stable", "shifting"]);
        for i in 0..n {
            let stable = (i % 100) as f64 / 100.0;
            let shifting = if i < shift_at {
                (i % 100) as f64 / 100.0
            } else {
                4.0 + (i % 100) as f64 / 1000.0
            };
            frame.push_row(&[stable, shifting]).unwrap();
        }
        frame
    }

    #[test]
    fn detects_only_the_shifted_feature() {
        let detector = small_detector();
        // The shift covers exactly the current slab.
        let frame = shifted_frame(1500, 1000);
        let results = detector.detect(&frame);
        assert_eq!(results.len(), 2);

        let stable = results.iter().find(|r| r.feature_name == "stable").unwrap();
        let shifting = results.iter().find(|r| r.feature_name == "shifting").unwrap();

        assert!(!stable.is_drifted, "stable feature flagged: psi={}", stable.value);
        assert_eq!(stable.severity, DriftSeverity::None);
        assert!(shifting.is_drifted);
        assert_eq!(shifting.severity, DriftSeverity::High);
        assert!(shifting.value > PSI_HIGH);
    }

    #[test]
    fn insufficient_history_yields_nothing() {
        let detector = small_detector();
        let frame = shifted_frame(800, 400);
        assert!(detector.detect(&frame).is_empty());
    }

    #[test]
    fn summary_counts_and_names() {
        let detector = small_detector();
        let frame = shifted_frame(1500, 1000);
        let results = detector.detect(&frame);
        let summary = detector.summary(&results);

        assert_eq!(summary.total_features, 2);
        assert_eq!(summary.drifted_features, 1);
        assert_eq!(summary.high_severity, 1);
        assert!((summary.drift_rate - 0.5).abs() < 1e-12);
        assert_eq!(summary.drifted_names, vec!["shifting".to_string()]);
        assert!(summary.max_psi >= summary.mean_psi);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let detector = small_detector();
        let summary = detector.summary(&[]);
        assert_eq!(summary.total_features, 0);
        assert_eq!(summary.drift_rate, 0.0);
    }

    #[test]
    fn model_drift_tracks_degrading_predictions() {
        let detector = small_detector();
        let mut rng = StdRng::seed_from_u64(29);
        let n = 2000;
        let actuals: Vec<f64> = (0..n).map(|_| gaussian(&mut rng, 0.0, 1.0)).collect();
        // First half predicts well, second half is pure noise.
        let predictions: Vec<f64> = actuals
            .iter()
            .enumerate()
            .map(|(i, &a)| {
                if i < n / 2 {
                    a + 0.1 * gaussian(&mut rng, 0.0, 1.0)
                } else {
                    gaussian(&mut rng, 0.0, 1.0)
                }
            })
            .collect();

        let points = detector.model_drift(&predictions, &actuals, 500, 250);
        assert!(points.len() >= 3);
        let first = points.first().unwrap();
        let last = points.last().unwrap();
        assert!(first.ic > 0.9, "early IC {}", first.ic);
        assert!(last.ic < 0.3, "late IC {}", last.ic);
        assert!(last.mae > first.mae);
        for p in &points {
            assert!((0.0..=1.0).contains(&p.sign_accuracy));
        }
    }
}
