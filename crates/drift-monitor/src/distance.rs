//! Distribution distances: PSI, two-sample KS, Wasserstein-1.
//!
//! All three drop NaN inputs and return NaN when either cleaned sample has
//! fewer than 10 points.

const MIN_SAMPLES: usize = 10;
const PSI_EPS: f64 = 1e-6;

fn finite(xs: &[f64]) -> Vec<f64> {
    xs.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Population Stability Index between a reference and a current sample.
///
/// Bin edges are equal-width over the reference range (a degenerate range
/// is widened by +/-0.5); out-of-range current values fall outside every
/// bin. Proportions use additive smoothing with eps = 1e-6 per bin.
pub fn population_stability_index(reference: &[f64], current: &[f64], n_bins: usize) -> f64 {
    let reference = finite(reference);
    let current = finite(current);
    if reference.len() < MIN_SAMPLES || current.len() < MIN_SAMPLES || n_bins == 0 {
        return f64::NAN;
    }

    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in &reference {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if hi <= lo {
        lo -= 0.5;
        hi += 0.5;
    }

    let ref_counts = histogram(&reference, lo, hi, n_bins);
    let cur_counts = histogram(&current, lo, hi, n_bins);

    let ref_denom = reference.len() as f64 + PSI_EPS * n_bins as f64;
    let cur_denom = current.len() as f64 + PSI_EPS * n_bins as f64;

    let mut psi = 0.0;
    for bin in 0..n_bins {
        let ref_prop = (ref_counts[bin] as f64 + PSI_EPS) / ref_denom;
        let cur_prop = (cur_counts[bin] as f64 + PSI_EPS) / cur_denom;
        psi += (cur_prop - ref_prop) * (cur_prop / ref_prop).ln();
    }
    psi
}

/// Equal-width histogram over [lo, hi]; the last bin is right-inclusive.
fn histogram(xs: &[f64], lo: f64, hi: f64, n_bins: usize) -> Vec<usize> {
    let width = (hi - lo) / n_bins as f64;
    let mut counts = vec![0usize; n_bins];
    for &v in xs {
        if v < lo || v > hi {
            continue;
        }
        let bin = (((v - lo) / width) as usize).min(n_bins - 1);
        counts[bin] += 1;
    }
    counts
}

/// Two-sample Kolmogorov-Smirnov test. Returns (statistic, p-value) using
/// the asymptotic Kolmogorov distribution for the p-value.
pub fn ks_test(reference: &[f64], current: &[f64]) -> (f64, f64) {
    let mut a = finite(reference);
    let mut b = finite(current);
    if a.len() < MIN_SAMPLES || b.len() < MIN_SAMPLES {
        return (f64::NAN, f64::NAN);
    }
    a.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    b.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let (n1, n2) = (a.len(), b.len());
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < n1 && j < n2 {
        let x1 = a[i];
        let x2 = b[j];
        let x = x1.min(x2);
        while i < n1 && a[i] <= x {
            i += 1;
        }
        while j < n2 && b[j] <= x {
            j += 1;
        }
        let f1 = i as f64 / n1 as f64;
        let f2 = j as f64 / n2 as f64;
        d = d.max((f1 - f2).abs());
    }

    let en = ((n1 * n2) as f64 / (n1 + n2) as f64).sqrt();
    let p = kolmogorov_survival((en + 0.12 + 0.11 / en) * d);
    (d, p)
}

/// Survival function of the Kolmogorov distribution,
/// `Q(lambda) = 2 sum_{k>=1} (-1)^{k-1} exp(-2 k^2 lambda^2)`.
fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 1..=100 {
        let term = (-2.0 * (k as f64).powi(2) * lambda * lambda).exp();
        sum += sign * term;
        if term < 1e-12 {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

/// Wasserstein-1 distance between two empirical distributions: the area
/// between their CDFs.
pub fn wasserstein_distance(reference: &[f64], current: &[f64]) -> f64 {
    let mut a = finite(reference);
    let mut b = finite(current);
    if a.len() < MIN_SAMPLES || b.len() < MIN_SAMPLES {
        return f64::NAN;
    }
    a.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    b.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let mut all: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
    all.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let mut distance = 0.0;
    for w in all.windows(2) {
        let delta = w[1] - w[0];
        if delta == 0.0 {
            continue;
        }
        let cdf_a = a.partition_point(|&v| v <= w[0]) as f64 / a.len() as f64;
        let cdf_b = b.partition_point(|&v| v <= w[0]) as f64 / b.len() as f64;
        distance += (cdf_a - cdf_b).abs() * delta;
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn normal_sample(rng: &mut StdRng, n: usize, mean: f64, std: f64) -> Vec<f64> {
        // Box-Muller from uniform draws.
        (0..n)
            .map(|_| {
                let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
                let u2: f64 = rng.gen_range(0.0..1.0);
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                mean + std * z
            })
            .collect()
    }

    #[test]
    fn psi_identity_is_near_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = normal_sample(&mut rng, 10_000, 0.0, 1.0);
        let psi = population_stability_index(&sample, &sample, 10);
        assert!(psi.abs() < 1e-6, "PSI(X,X) should be ~0, got {psi}");
    }

    #[test]
    fn psi_detects_shifted_distribution() {
        let mut rng = StdRng::seed_from_u64(7);
        let reference = normal_sample(&mut rng, 10_000, 0.0, 1.0);
        let shifted = normal_sample(&mut rng, 10_000, 5.0, 0.5);
        let psi = population_stability_index(&reference, &shifted, 10);
        assert!(psi > 0.25, "shifted normals should exceed 0.25, got {psi}");
    }

    #[test]
    fn psi_small_samples_are_nan() {
        assert!(population_stability_index(&[1.0; 5], &[1.0; 50], 10).is_nan());
        assert!(population_stability_index(&[1.0; 50], &[1.0; 5], 10).is_nan());
    }

    #[test]
    fn psi_drops_nan_inputs() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut sample = normal_sample(&mut rng, 1000, 0.0, 1.0);
        let clean = sample.clone();
        sample.extend([f64::NAN; 100]);
        let psi = population_stability_index(&sample, &clean, 10);
        assert!(psi.abs() < 0.01);
    }

    #[test]
    fn ks_statistic_bounds_and_identity() {
        let mut rng = StdRng::seed_from_u64(11);
        let a = normal_sample(&mut rng, 2000, 0.0, 1.0);
        // Same distribution up to a tiny deterministic jitter.
        let b: Vec<f64> = a
            .iter()
            .enumerate()
            .map(|(i, v)| v + if i % 2 == 0 { 1e-4 } else { -1e-4 })
            .collect();
        let (d, p) = ks_test(&a, &b);
        assert!((0.0..=1.0).contains(&d));
        assert!(p > 0.05, "same-distribution p-value {p} should exceed 0.05");

        let (d_same, p_same) = ks_test(&a, &a);
        assert!(d_same.abs() < 1e-12);
        assert!((p_same - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ks_separates_shifted_distributions() {
        let mut rng = StdRng::seed_from_u64(13);
        let a = normal_sample(&mut rng, 1000, 0.0, 1.0);
        let b = normal_sample(&mut rng, 1000, 3.0, 1.0);
        let (d, p) = ks_test(&a, &b);
        assert!(d > 0.5);
        assert!(p < 0.001);
    }

    #[test]
    fn wasserstein_is_shift_distance_for_translates() {
        let mut rng = StdRng::seed_from_u64(17);
        let a = normal_sample(&mut rng, 5000, 0.0, 1.0);
        let b: Vec<f64> = a.iter().map(|v| v + 2.0).collect();
        let w = wasserstein_distance(&a, &b);
        assert!((w - 2.0).abs() < 0.05, "translate by 2 -> W1 ~2, got {w}");
        assert!(wasserstein_distance(&a, &a).abs() < 1e-12);
    }
}
