//! Trade-flow kernels: imbalance, signed volume, VWAP, toxicity, arrival.

use super::{joint_tail_len, tail};

const VOL_EPS: f64 = 1e-10;

/// Net aggressor imbalance `(buy_vol - sell_vol) / total_vol` over the last
/// `k` trades, in [-1, 1]. Returns 0 with no volume.
pub fn trade_imbalance(sides: &[f64], sizes: &[f64], k: usize) -> f64 {
    let n = joint_tail_len(k, &[sides.len(), sizes.len()]);
    if n == 0 {
        return 0.0;
    }
    let (mut buy_vol, mut sell_vol) = (0.0, 0.0);
    for (side, size) in tail(sides, n).iter().zip(tail(sizes, n)) {
        if *side > 0.0 {
            buy_vol += size;
        } else {
            sell_vol += size;
        }
    }
    let total = buy_vol + sell_vol;
    if total < VOL_EPS {
        return 0.0;
    }
    (buy_vol - sell_vol) / total
}

/// Net signed volume over the last `k` trades.
pub fn signed_volume(sides: &[f64], sizes: &[f64], k: usize) -> f64 {
    let n = joint_tail_len(k, &[sides.len(), sizes.len()]);
    tail(sides, n)
        .iter()
        .zip(tail(sizes, n))
        .map(|(side, size)| side * size)
        .sum()
}

/// Volume-weighted average price over the last `k` trades. NaN with no
/// trades or no volume.
pub fn vwap(prices: &[f64], sizes: &[f64], k: usize) -> f64 {
    let n = joint_tail_len(k, &[prices.len(), sizes.len()]);
    if n == 0 {
        return f64::NAN;
    }
    let (mut value, mut volume) = (0.0, 0.0);
    for (p, s) in tail(prices, n).iter().zip(tail(sizes, n)) {
        value += p * s;
        volume += s;
    }
    if volume < VOL_EPS {
        return f64::NAN;
    }
    value / volume
}

/// Deviation of `last_price` from the trailing VWAP, in basis points.
pub fn vwap_deviation_bps(last_price: f64, prices: &[f64], sizes: &[f64], k: usize) -> f64 {
    let anchor = vwap(prices, sizes, k);
    if anchor.is_nan() || anchor < VOL_EPS {
        return f64::NAN;
    }
    (last_price - anchor) / anchor * 10_000.0
}

/// VPIN-like flow toxicity `|net signed volume| / total volume` over the
/// last `k` trades, in [0, 1]. Returns 0 with no volume.
pub fn flow_toxicity(sides: &[f64], sizes: &[f64], k: usize) -> f64 {
    let n = joint_tail_len(k, &[sides.len(), sizes.len()]);
    if n == 0 {
        return 0.0;
    }
    let (mut signed, mut total) = (0.0, 0.0);
    for (side, size) in tail(sides, n).iter().zip(tail(sizes, n)) {
        signed += side * size;
        total += size;
    }
    if total < VOL_EPS {
        return 0.0;
    }
    signed.abs() / total
}

/// Trades per second within the trailing `window_ns` window, measured from
/// the newest print backwards. Returns 0 with fewer than 2 trades.
pub fn trade_arrival_rate(times: &[i64], window_ns: i64) -> f64 {
    if times.len() < 2 {
        return 0.0;
    }
    let latest = times[times.len() - 1];
    let cutoff = latest - window_ns;
    let mut count = 0usize;
    for t in times.iter().rev() {
        if *t >= cutoff {
            count += 1;
        } else {
            break;
        }
    }
    let duration_sec = window_ns as f64 / 1e9;
    count as f64 / duration_sec
}

/// Mean trade size over the last `k` trades. NaN with no trades.
pub fn mean_trade_size(sizes: &[f64], k: usize) -> f64 {
    let n = k.min(sizes.len());
    if n == 0 {
        return f64::NAN;
    }
    tail(sizes, n).iter().sum::<f64>() / n as f64
}

/// Sample standard deviation of the last `k` trade sizes. NaN below 2.
pub fn trade_size_std(sizes: &[f64], k: usize) -> f64 {
    let n = k.min(sizes.len());
    if n < 2 {
        return f64::NAN;
    }
    let xs = tail(sizes, n);
    let mean = xs.iter().sum::<f64>() / n as f64;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}
