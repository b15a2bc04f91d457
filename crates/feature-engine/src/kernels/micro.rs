//! Microstructure kernels: Kyle's lambda, spreads, impact, illiquidity.

use super::{joint_tail_len, tail};

const VAR_EPS: f64 = 1e-10;

/// Kyle's lambda: `cov(dP, signed_vol) / var(signed_vol)` over the last `k`
/// aligned observations. NaN below 10 samples or with degenerate volume
/// variance.
pub fn kyles_lambda(price_changes: &[f64], signed_volumes: &[f64], k: usize) -> f64 {
    let n = joint_tail_len(k, &[price_changes.len(), signed_volumes.len()]);
    if n < 10 {
        return f64::NAN;
    }
    let dp = tail(price_changes, n);
    let sv = tail(signed_volumes, n);

    let mean_dp = dp.iter().sum::<f64>() / n as f64;
    let mean_sv = sv.iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_sv) = (0.0, 0.0);
    for i in 0..n {
        cov += (dp[i] - mean_dp) * (sv[i] - mean_sv);
        var_sv += (sv[i] - mean_sv).powi(2);
    }
    cov /= (n - 1) as f64;
    var_sv /= (n - 1) as f64;

    if var_sv < VAR_EPS {
        return f64::NAN;
    }
    cov / var_sv
}

/// Effective spread `2 * mean(|trade - mid|)` over the last `k` trades.
pub fn effective_spread(trade_prices: &[f64], mid_prices: &[f64], k: usize) -> f64 {
    let n = joint_tail_len(k, &[trade_prices.len(), mid_prices.len()]);
    if n == 0 {
        return f64::NAN;
    }
    let spread_sum: f64 = tail(trade_prices, n)
        .iter()
        .zip(tail(mid_prices, n))
        .map(|(tp, mid)| (tp - mid).abs())
        .sum();
    2.0 * spread_sum / n as f64
}

/// Realized spread `mean(2 * side * (trade - future_mid))` over the last `k`
/// trades, skipping trades whose future mid is not yet known (NaN).
pub fn realized_spread(
    trade_prices: &[f64],
    trade_sides: &[f64],
    future_mid_prices: &[f64],
    k: usize,
) -> f64 {
    let n = joint_tail_len(
        k,
        &[trade_prices.len(), trade_sides.len(), future_mid_prices.len()],
    );
    if n == 0 {
        return f64::NAN;
    }
    let tp = tail(trade_prices, n);
    let sides = tail(trade_sides, n);
    let fm = tail(future_mid_prices, n);

    let (mut spread_sum, mut valid) = (0.0, 0usize);
    for i in 0..n {
        if !fm[i].is_nan() {
            spread_sum += 2.0 * sides[i] * (tp[i] - fm[i]);
            valid += 1;
        }
    }
    if valid == 0 {
        return f64::NAN;
    }
    spread_sum / valid as f64
}

/// Permanent price impact `mean(side * (mid_after - mid_before))` over the
/// last `k` trades, skipping pairs with an unknown after-mid.
pub fn price_impact(
    trade_sides: &[f64],
    mid_prices_before: &[f64],
    mid_prices_after: &[f64],
    k: usize,
) -> f64 {
    let n = joint_tail_len(
        k,
        &[
            trade_sides.len(),
            mid_prices_before.len(),
            mid_prices_after.len(),
        ],
    );
    if n == 0 {
        return f64::NAN;
    }
    let sides = tail(trade_sides, n);
    let before = tail(mid_prices_before, n);
    let after = tail(mid_prices_after, n);

    let (mut impact_sum, mut valid) = (0.0, 0usize);
    for i in 0..n {
        if !before[i].is_nan() && !after[i].is_nan() {
            impact_sum += sides[i] * (after[i] - before[i]);
            valid += 1;
        }
    }
    if valid == 0 {
        return f64::NAN;
    }
    impact_sum / valid as f64
}

/// Roll spread estimator `2 * sqrt(-cov(dP_t, dP_{t-1}))` when the lag-1
/// autocovariance is negative, else 0. NaN below 10 usable pairs.
pub fn roll_spread(price_changes: &[f64], k: usize) -> f64 {
    let n = k.min(price_changes.len().saturating_sub(1));
    if n < 10 {
        return f64::NAN;
    }
    let xs = tail(price_changes, n + 1);
    let mean = xs.iter().sum::<f64>() / (n + 1) as f64;

    let mut cov = 0.0;
    for w in xs.windows(2) {
        cov += (w[1] - mean) * (w[0] - mean);
    }
    cov /= n as f64;

    if cov >= 0.0 {
        return 0.0;
    }
    2.0 * (-cov).sqrt()
}

/// Amihud illiquidity `mean(|return| / volume)` over observations with
/// positive volume. NaN when none qualify.
pub fn amihud_illiquidity(returns: &[f64], volumes: &[f64], k: usize) -> f64 {
    let n = joint_tail_len(k, &[returns.len(), volumes.len()]);
    if n == 0 {
        return f64::NAN;
    }
    let rets = tail(returns, n);
    let vols = tail(volumes, n);

    let (mut illiq_sum, mut valid) = (0.0, 0usize);
    for i in 0..n {
        if vols[i] > 0.0 {
            illiq_sum += rets[i].abs() / vols[i];
            valid += 1;
        }
    }
    if valid == 0 {
        return f64::NAN;
    }
    illiq_sum / valid as f64
}

/// Autocorrelation of the order-side sequence at `lag` over the last `k`
/// usable pairs. NaN below 10 pairs; 0 with degenerate side variance.
pub fn order_flow_autocorr(order_sides: &[f64], lag: usize, k: usize) -> f64 {
    let n = k.min(order_sides.len().saturating_sub(lag));
    if n < 10 {
        return f64::NAN;
    }
    let xs = tail(order_sides, n + lag);
    let mean = xs.iter().sum::<f64>() / (n + lag) as f64;

    let (mut cov, mut var) = (0.0, 0.0);
    for i in lag..xs.len() {
        cov += (xs[i] - mean) * (xs[i - lag] - mean);
        var += (xs[i] - mean).powi(2);
    }
    if var < VAR_EPS {
        return 0.0;
    }
    cov / var
}
