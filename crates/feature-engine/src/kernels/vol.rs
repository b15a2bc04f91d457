//! Volatility estimators and return-distribution moments.

use super::tail;

/// Log returns of a price series; non-positive bases contribute 0.
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    if prices.len() < 2 {
        return Vec::new();
    }
    prices
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] / w[0]).ln() } else { 0.0 })
        .collect()
}

/// Annualized realized volatility `sqrt(mean(log-return^2)) * annualization`
/// over the last `k` returns. NaN below 2 usable returns.
pub fn realized_vol(prices: &[f64], k: usize, annualization: f64) -> f64 {
    let n = k.min(prices.len().saturating_sub(1));
    if n < 2 {
        return f64::NAN;
    }
    let window = tail(prices, n + 1);
    let mut realized_var = 0.0;
    for w in window.windows(2) {
        if w[0] > 0.0 {
            let ret = (w[1] / w[0]).ln();
            realized_var += ret * ret;
        }
    }
    (realized_var / n as f64).sqrt() * annualization
}

/// Parkinson high-low estimator: `sqrt(mean(ln(H/L)^2) / (4 ln 2))`.
pub fn parkinson_vol(highs: &[f64], lows: &[f64], k: usize, annualization: f64) -> f64 {
    let n = k.min(highs.len()).min(lows.len());
    if n == 0 {
        return f64::NAN;
    }
    let (mut sum_sq, mut valid) = (0.0, 0usize);
    for (h, l) in tail(highs, n).iter().zip(tail(lows, n)) {
        if *l > 0.0 {
            let log_hl = (h / l).ln();
            sum_sq += log_hl * log_hl;
            valid += 1;
        }
    }
    if valid == 0 {
        return f64::NAN;
    }
    let variance = sum_sq / valid as f64 / (4.0 * 2.0f64.ln());
    variance.sqrt() * annualization
}

/// Garman-Klass OHLC estimator:
/// `0.5 ln(H/L)^2 - (2 ln 2 - 1) ln(C/O)^2` averaged per bar.
pub fn garman_klass_vol(
    opens: &[f64],
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k: usize,
    annualization: f64,
) -> f64 {
    let n = k
        .min(opens.len())
        .min(highs.len())
        .min(lows.len())
        .min(closes.len());
    if n == 0 {
        return f64::NAN;
    }
    let (o, h, l, c) = (tail(opens, n), tail(highs, n), tail(lows, n), tail(closes, n));
    let (mut sum_var, mut valid) = (0.0, 0usize);
    for i in 0..n {
        if l[i] > 0.0 && o[i] > 0.0 {
            let log_hl = (h[i] / l[i]).ln();
            let log_co = (c[i] / o[i]).ln();
            sum_var += 0.5 * log_hl * log_hl - (2.0 * 2.0f64.ln() - 1.0) * log_co * log_co;
            valid += 1;
        }
    }
    if valid == 0 {
        return f64::NAN;
    }
    let variance = (sum_var / valid as f64).max(0.0);
    variance.sqrt() * annualization
}

/// Yang-Zhang estimator combining overnight, open-to-close, and
/// Rogers-Satchell variances with mixing weight
/// `k = 0.34 / (1 + (n+1)/(n-1))`. NaN below 2 bar pairs.
pub fn yang_zhang_vol(
    opens: &[f64],
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k: usize,
    annualization: f64,
) -> f64 {
    let len = opens
        .len()
        .min(highs.len())
        .min(lows.len())
        .min(closes.len());
    let n = k.min(len.saturating_sub(1));
    if n < 2 {
        return f64::NAN;
    }
    let (o, h, l, c) = (
        tail(opens, len),
        tail(highs, len),
        tail(lows, len),
        tail(closes, len),
    );

    let mut overnight_var = 0.0;
    let mut open_close_var = 0.0;
    let mut rs_var = 0.0;
    for i in 0..n {
        let idx = len - 1 - i;
        if c[idx - 1] > 0.0 && o[idx] > 0.0 && l[idx] > 0.0 {
            let log_overnight = (o[idx] / c[idx - 1]).ln();
            overnight_var += log_overnight * log_overnight;

            let log_oc = (c[idx] / o[idx]).ln();
            open_close_var += log_oc * log_oc;

            let log_ho = (h[idx] / o[idx]).ln();
            let log_hc = (h[idx] / c[idx]).ln();
            let log_lo = (l[idx] / o[idx]).ln();
            let log_lc = (l[idx] / c[idx]).ln();
            rs_var += log_ho * log_hc + log_lo * log_lc;
        }
    }
    let nf = n as f64;
    overnight_var /= nf - 1.0;
    open_close_var /= nf - 1.0;
    rs_var /= nf;

    let mix = 0.34 / (1.0 + (nf + 1.0) / (nf - 1.0));
    let variance = (overnight_var + mix * open_close_var + (1.0 - mix) * rs_var).max(0.0);
    variance.sqrt() * annualization
}

/// Sample standard deviation of a trailing volatility series. NaN below 2.
pub fn vol_of_vol(volatilities: &[f64], k: usize) -> f64 {
    let n = k.min(volatilities.len());
    if n < 2 {
        return f64::NAN;
    }
    let xs = tail(volatilities, n);
    let mean = xs.iter().sum::<f64>() / n as f64;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Skewness `m3 / sigma^3` of the last `k` returns (population moments).
/// NaN below 3 samples; 0 when sigma is below 1e-10.
pub fn skewness(returns: &[f64], k: usize) -> f64 {
    let n = k.min(returns.len());
    if n < 3 {
        return f64::NAN;
    }
    let xs = tail(returns, n);
    let nf = n as f64;
    let mean = xs.iter().sum::<f64>() / nf;
    let (mut var, mut m3) = (0.0, 0.0);
    for x in xs {
        let d = x - mean;
        var += d * d;
        m3 += d * d * d;
    }
    var /= nf;
    m3 /= nf;
    let std = var.sqrt();
    if std < 1e-10 {
        return 0.0;
    }
    m3 / std.powi(3)
}

/// Excess kurtosis `m4 / sigma^4 - 3` of the last `k` returns (population
/// moments). NaN below 4 samples; 0 when the variance is degenerate.
pub fn excess_kurtosis(returns: &[f64], k: usize) -> f64 {
    let n = k.min(returns.len());
    if n < 4 {
        return f64::NAN;
    }
    let xs = tail(returns, n);
    let nf = n as f64;
    let mean = xs.iter().sum::<f64>() / nf;
    let (mut var, mut m4) = (0.0, 0.0);
    for x in xs {
        let d = x - mean;
        var += d * d;
        m4 += d * d * d * d;
    }
    var /= nf;
    m4 /= nf;
    let var_sq = var * var;
    if var_sq < 1e-20 {
        return 0.0;
    }
    m4 / var_sq - 3.0
}
