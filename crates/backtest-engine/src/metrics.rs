//! Pure performance metrics over return and equity series.
//!
//! Annualization is always an explicit `periods_per_year` parameter; the
//! simulator passes `252 * bars_per_day` for per-bar series.

use statrs::statistics::Statistics;

use market_core::EngineError;

/// Annualized Sharpe ratio of periodic returns against a constant annual
/// risk-free rate. 0 below 2 samples or with degenerate dispersion.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let rf_per_period = risk_free_rate / periods_per_year;
    let excess: Vec<f64> = returns.iter().map(|r| r - rf_per_period).collect();
    let std = (&excess).std_dev();
    if std < 1e-10 {
        return 0.0;
    }
    (&excess).mean() / std * periods_per_year.sqrt()
}

/// Annualized Sortino ratio: downside deviation in the denominator.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let target = risk_free_rate / periods_per_year;
    let excess: Vec<f64> = returns.iter().map(|r| r - target).collect();
    let downside: Vec<f64> = excess.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.len() < 2 {
        return 0.0;
    }
    let downside_std = (&downside).std_dev();
    if downside_std == 0.0 {
        return 0.0;
    }
    (&excess).mean() / downside_std * periods_per_year.sqrt()
}

/// Maximum peak-to-trough drawdown of an equity curve.
///
/// Returns `(max_drawdown, peak_idx, trough_idx)`; the drawdown fraction is
/// in [0, 1] for non-negative equity.
pub fn max_drawdown(equity: &[f64]) -> (f64, usize, usize) {
    if equity.len() < 2 {
        return (0.0, 0, 0);
    }

    let mut running_max = equity[0];
    let mut max_dd = 0.0;
    let mut trough_idx = 0;
    for (i, &e) in equity.iter().enumerate() {
        if e > running_max {
            running_max = e;
        }
        let dd = (running_max - e) / running_max;
        if dd > max_dd {
            max_dd = dd;
            trough_idx = i;
        }
    }

    // Peak is the argmax before (or at) the trough.
    let mut peak_idx = 0;
    let mut peak = f64::NEG_INFINITY;
    for (i, &e) in equity[..=trough_idx].iter().enumerate() {
        if e > peak {
            peak = e;
            peak_idx = i;
        }
    }
    (max_dd, peak_idx, trough_idx)
}

/// Calmar ratio: annualized return over max drawdown of the compounded
/// equity curve.
pub fn calmar_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mut equity = Vec::with_capacity(returns.len());
    let mut acc = 1.0;
    for r in returns {
        acc *= 1.0 + r;
        equity.push(acc);
    }
    let (max_dd, _, _) = max_drawdown(&equity);
    if max_dd == 0.0 {
        return 0.0;
    }
    let total_return = equity[equity.len() - 1] / equity[0] - 1.0;
    let years = returns.len() as f64 / periods_per_year;
    let annual_return = if years > 0.0 {
        (1.0 + total_return).powf(1.0 / years) - 1.0
    } else {
        0.0
    };
    annual_return / max_dd
}

/// Annualized information ratio against a benchmark return series.
pub fn information_ratio(
    returns: &[f64],
    benchmark_returns: &[f64],
    periods_per_year: f64,
) -> Result<f64, EngineError> {
    if returns.len() != benchmark_returns.len() {
        return Err(EngineError::InvalidInput(format!(
            "returns ({}) and benchmark ({}) must have the same length",
            returns.len(),
            benchmark_returns.len()
        )));
    }
    if returns.len() < 2 {
        return Ok(0.0);
    }
    let active: Vec<f64> = returns
        .iter()
        .zip(benchmark_returns)
        .map(|(r, b)| r - b)
        .collect();
    let tracking_error = (&active).std_dev();
    if tracking_error == 0.0 {
        return Ok(0.0);
    }
    Ok((&active).mean() / tracking_error * periods_per_year.sqrt())
}

/// Fraction of positive entries.
pub fn win_rate(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64
}

/// Gross profit over gross loss. Infinity for all-win, 0 for no profit.
pub fn profit_factor(returns: &[f64]) -> f64 {
    let gross_profit: f64 = returns.iter().filter(|r| **r > 0.0).sum();
    let gross_loss: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
    if gross_loss == 0.0 {
        return if gross_profit > 0.0 { f64::INFINITY } else { 0.0 };
    }
    gross_profit / gross_loss
}

/// Average win over average |loss|. 0 when either side is empty.
pub fn avg_win_loss_ratio(returns: &[f64]) -> f64 {
    let wins: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
    let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if wins.is_empty() || losses.is_empty() {
        return 0.0;
    }
    let avg_win = wins.iter().sum::<f64>() / wins.len() as f64;
    let avg_loss = (losses.iter().sum::<f64>() / losses.len() as f64).abs();
    if avg_loss == 0.0 {
        return f64::INFINITY;
    }
    avg_win / avg_loss
}
