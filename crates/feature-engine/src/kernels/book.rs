//! Order-book kernels: mid, spread, imbalance, pressure, depth, impact.

const SIZE_EPS: f64 = 1e-10;
const DIST_FLOOR: f64 = 1e-6;

/// Mid price. NaN when either side is non-positive.
pub fn mid_price(bid: f64, ask: f64) -> f64 {
    if bid <= 0.0 || ask <= 0.0 {
        return f64::NAN;
    }
    (bid + ask) / 2.0
}

/// Quoted spread in basis points of the mid. NaN on invalid prices.
pub fn spread_bps(bid: f64, ask: f64) -> f64 {
    let mid = mid_price(bid, ask);
    if mid.is_nan() {
        return f64::NAN;
    }
    (ask - bid) / mid * 10_000.0
}

/// Size-weighted mid. Degenerates to the populated side's price when one
/// queue is empty; NaN when both are.
pub fn weighted_mid_price(bid: f64, ask: f64, bid_qty: f64, ask_qty: f64) -> f64 {
    if bid <= 0.0 || ask <= 0.0 {
        return f64::NAN;
    }
    let total = bid_qty + ask_qty;
    if total < SIZE_EPS {
        return f64::NAN;
    }
    (bid_qty * ask + ask_qty * bid) / total
}

/// Depth imbalance over the top `levels` levels, in [-1, 1].
/// Returns 0 when the book is (effectively) empty.
pub fn imbalance(bid_sizes: &[f64], ask_sizes: &[f64], levels: usize) -> f64 {
    let bid_total: f64 = bid_sizes.iter().take(levels).sum();
    let ask_total: f64 = ask_sizes.iter().take(levels).sum();
    let total = bid_total + ask_total;
    if total < SIZE_EPS {
        return 0.0;
    }
    (bid_total - ask_total) / total
}

/// Imbalance with per-level weights `1 / (1 + |mid - price|)`, so levels
/// near the touch dominate.
pub fn weighted_imbalance(
    bid_prices: &[f64],
    bid_sizes: &[f64],
    ask_prices: &[f64],
    ask_sizes: &[f64],
    levels: usize,
) -> f64 {
    if bid_prices.is_empty() || ask_prices.is_empty() {
        return f64::NAN;
    }
    let mid = mid_price(bid_prices[0], ask_prices[0]);
    if mid.is_nan() {
        return f64::NAN;
    }

    let mut weighted_bid = 0.0;
    for (p, s) in bid_prices.iter().zip(bid_sizes).take(levels) {
        weighted_bid += s / (1.0 + (mid - p).abs());
    }
    let mut weighted_ask = 0.0;
    for (p, s) in ask_prices.iter().zip(ask_sizes).take(levels) {
        weighted_ask += s / (1.0 + (p - mid).abs());
    }

    let total = weighted_bid + weighted_ask;
    if total < SIZE_EPS {
        return 0.0;
    }
    (weighted_bid - weighted_ask) / total
}

/// Net book pressure: distance-discounted bid depth minus ask depth.
/// Distances are floored at 1e-6.
pub fn book_pressure(
    bid_prices: &[f64],
    bid_sizes: &[f64],
    ask_prices: &[f64],
    ask_sizes: &[f64],
    levels: usize,
) -> f64 {
    if bid_prices.is_empty() || ask_prices.is_empty() {
        return f64::NAN;
    }
    let mid = mid_price(bid_prices[0], ask_prices[0]);
    if mid.is_nan() {
        return f64::NAN;
    }

    let mut pressure = 0.0;
    for (p, s) in bid_prices.iter().zip(bid_sizes).take(levels) {
        pressure += s / (mid - p).abs().max(DIST_FLOOR);
    }
    for (p, s) in ask_prices.iter().zip(ask_sizes).take(levels) {
        pressure -= s / (p - mid).abs().max(DIST_FLOOR);
    }
    pressure
}

/// Total displayed size over the top `levels` levels of one side.
pub fn depth(sizes: &[f64], levels: usize) -> f64 {
    sizes.iter().take(levels).sum()
}

/// Bid depth over ask depth. NaN when the ask side is empty.
pub fn depth_ratio(bid_sizes: &[f64], ask_sizes: &[f64], levels: usize) -> f64 {
    let ask_total = depth(ask_sizes, levels);
    if ask_total < SIZE_EPS {
        return f64::NAN;
    }
    depth(bid_sizes, levels) / ask_total
}

/// Cost of sweeping `target_qty` against one side of the book: the absolute
/// deviation of the fill VWAP from the touch, in basis points. The walk
/// stops at the deepest level; a partial fill prices the filled portion.
pub fn price_impact(prices: &[f64], sizes: &[f64], target_qty: f64) -> f64 {
    if prices.is_empty() || sizes.is_empty() || target_qty <= 0.0 {
        return f64::NAN;
    }
    let best = prices[0];
    if best <= 0.0 {
        return f64::NAN;
    }

    let mut remaining = target_qty;
    let mut value = 0.0;
    let mut filled = 0.0;
    for (p, s) in prices.iter().zip(sizes) {
        let take = s.min(remaining);
        value += p * take;
        filled += take;
        remaining -= take;
        if remaining <= 0.0 {
            break;
        }
    }
    if filled < SIZE_EPS {
        return f64::NAN;
    }
    let vwap = value / filled;
    ((vwap - best) / best).abs() * 10_000.0
}
