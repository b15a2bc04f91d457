//! Correlation and goodness-of-fit helpers shared across the signal stack.

/// `np.sign` semantics: exactly 0 for 0, never NaN-propagating sign of +0.
pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Pearson correlation. NaN below 2 pairs or with a degenerate marginal.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
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

/// Spearman rank correlation (ties receive average ranks).
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let rx = ranks(&x[..n]);
    let ry = ranks(&y[..n]);
    pearson(&rx, &ry)
}

/// Average ranks (1-based), ties averaged.
fn ranks(xs: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..xs.len()).collect();
    order.sort_by(|&a, &b| xs[a].partial_cmp(&xs[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = vec![0.0; xs.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && xs[order[j + 1]] == xs[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            out[idx] = avg_rank;
        }
        i = j + 1;
    }
    out
}

/// Coefficient of determination. 0 when the target is constant.
pub fn r_squared(predictions: &[f64], actuals: &[f64]) -> f64 {
    let n = predictions.len().min(actuals.len());
    if n == 0 {
        return 0.0;
    }
    let mean = actuals[..n].iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = actuals[..n].iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = predictions[..n]
        .iter()
        .zip(&actuals[..n])
        .map(|(p, a)| (a - p).powi(2))
        .sum();
    if ss_tot < 1e-20 {
        return 0.0;
    }
    1.0 - ss_res / ss_tot
}

/// Mean ignoring NaN; NaN when nothing survives.
pub fn nan_mean(xs: &[f64]) -> f64 {
    let finite: Vec<f64> = xs.iter().copied().filter(|v| !v.is_nan()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}

/// Population standard deviation ignoring NaN.
pub fn nan_std(xs: &[f64]) -> f64 {
    let finite: Vec<f64> = xs.iter().copied().filter(|v| !v.is_nan()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / finite.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_perfect_correlation() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        assert!((pearson(&x, &y) - 1.0).abs() < 1e-12);
        let neg: Vec<f64> = x.iter().map(|v| -v).collect();
        assert!((pearson(&x, &neg) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_degenerate_is_nan() {
        assert!(pearson(&[1.0], &[1.0]).is_nan());
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
    }

    #[test]
    fn spearman_monotone_is_one() {
        let x = [1.0, 2.0, 5.0, 9.0];
        let y = [10.0, 20.0, 21.0, 400.0]; // monotone but nonlinear
        assert!((spearman(&x, &y) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ranks_average_ties() {
        let r = ranks(&[10.0, 20.0, 20.0, 30.0]);
        assert_eq!(r, vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn r_squared_perfect_and_constant() {
        let y = [1.0, 2.0, 3.0];
        assert!((r_squared(&y, &y) - 1.0).abs() < 1e-12);
        assert_eq!(r_squared(&[5.0, 5.0], &[5.0, 5.0]), 0.0);
    }

    #[test]
    fn nan_aware_aggregates() {
        let xs = [1.0, f64::NAN, 3.0];
        assert!((nan_mean(&xs) - 2.0).abs() < 1e-12);
        assert!((nan_std(&xs) - 1.0).abs() < 1e-12);
        assert!(nan_mean(&[f64::NAN]).is_nan());
    }

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(2.5), 1.0);
        assert_eq!(sign(-0.1), -1.0);
    }
}
