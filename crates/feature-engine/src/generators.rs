//! Feature generators: fixed-schema producers over a [`MarketContext`].

use market_core::MarketContext;

use crate::kernels::{book, micro, trade, vol};

/// A producer of a fixed, ordered list of features.
///
/// Implementations are pure with respect to shared state: `compute` never
/// mutates anything outside the generator, and the name list is immutable
/// for the life of the instance.
pub trait FeatureGenerator: Send {
    /// Ordered, immutable feature names.
    fn feature_names(&self) -> &'static [&'static str];

    /// Compute one value per name; NaN marks "insufficient data".
    fn compute(&self, ctx: &MarketContext) -> Vec<f64>;

    fn num_features(&self) -> usize {
        self.feature_names().len()
    }

    /// Clear any per-generator rolling state.
    fn reset(&mut self) {}
}

// --- Order book ---

const ORDER_BOOK_NAMES: [&str; 17] = [
    "mid_price",
    "spread_bps",
    "weighted_mid_price",
    "imbalance_1",
    "imbalance_5",
    "imbalance_10",
    "weighted_imbalance_5",
    "book_pressure",
    "depth_ratio_5",
    "bid_depth_5",
    "ask_depth_5",
    "bid_depth_10",
    "ask_depth_10",
    "bid_impact_100",
    "ask_impact_100",
    "bid_impact_1000",
    "ask_impact_1000",
];

/// Order-book shape features: mid/spread, multi-level imbalance, pressure,
/// depth, and sweep impact at reference sizes.
#[derive(Debug, Clone, Default)]
pub struct OrderBookFeatures;

impl OrderBookFeatures {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureGenerator for OrderBookFeatures {
    fn feature_names(&self) -> &'static [&'static str] {
        &ORDER_BOOK_NAMES
    }

    fn compute(&self, ctx: &MarketContext) -> Vec<f64> {
        if ctx.bid_prices.is_empty() || ctx.ask_prices.is_empty() {
            return vec![f64::NAN; ORDER_BOOK_NAMES.len()];
        }

        let best_bid = ctx.bid_prices[0];
        let best_ask = ctx.ask_prices[0];
        let bid_qty = ctx.bid_sizes.first().copied().unwrap_or(0.0);
        let ask_qty = ctx.ask_sizes.first().copied().unwrap_or(0.0);

        vec![
            book::mid_price(best_bid, best_ask),
            book::spread_bps(best_bid, best_ask),
            book::weighted_mid_price(best_bid, best_ask, bid_qty, ask_qty),
            book::imbalance(&ctx.bid_sizes, &ctx.ask_sizes, 1),
            book::imbalance(&ctx.bid_sizes, &ctx.ask_sizes, 5),
            book::imbalance(&ctx.bid_sizes, &ctx.ask_sizes, 10),
            book::weighted_imbalance(
                &ctx.bid_prices,
                &ctx.bid_sizes,
                &ctx.ask_prices,
                &ctx.ask_sizes,
                5,
            ),
            book::book_pressure(
                &ctx.bid_prices,
                &ctx.bid_sizes,
                &ctx.ask_prices,
                &ctx.ask_sizes,
                5,
            ),
            book::depth_ratio(&ctx.bid_sizes, &ctx.ask_sizes, 5),
            book::depth(&ctx.bid_sizes, 5),
            book::depth(&ctx.ask_sizes, 5),
            book::depth(&ctx.bid_sizes, 10),
            book::depth(&ctx.ask_sizes, 10),
            book::price_impact(&ctx.bid_prices, &ctx.bid_sizes, 100.0),
            book::price_impact(&ctx.ask_prices, &ctx.ask_sizes, 100.0),
            book::price_impact(&ctx.bid_prices, &ctx.bid_sizes, 1000.0),
            book::price_impact(&ctx.ask_prices, &ctx.ask_sizes, 1000.0),
        ]
    }
}

// --- Trades ---

const TRADE_NAMES: [&str; 16] = [
    "trade_imbalance_100",
    "trade_imbalance_500",
    "signed_volume_100",
    "signed_volume_500",
    "vwap_100",
    "vwap_500",
    "vwap_deviation_100",
    "vwap_deviation_500",
    "flow_toxicity_100",
    "flow_toxicity_500",
    "trade_count_1s",
    "trade_rate_1s",
    "avg_trade_size_100",
    "trade_size_std_100",
    "last_trade_side",
    "last_trade_size",
];

const ONE_SECOND_NS: i64 = 1_000_000_000;

/// Trade-tape features: aggressor imbalance, signed volume, VWAP anchoring,
/// flow toxicity, arrival intensity, and print-size statistics.
#[derive(Debug, Clone, Default)]
pub struct TradeFeatures;

impl TradeFeatures {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureGenerator for TradeFeatures {
    fn feature_names(&self) -> &'static [&'static str] {
        &TRADE_NAMES
    }

    fn compute(&self, ctx: &MarketContext) -> Vec<f64> {
        if ctx.trade_prices.is_empty() {
            return vec![f64::NAN; TRADE_NAMES.len()];
        }

        let last_price = ctx.trade_prices[ctx.trade_prices.len() - 1];
        // Count and rate coincide at the 1-second window.
        let rate_1s = trade::trade_arrival_rate(&ctx.trade_times, ONE_SECOND_NS);

        vec![
            trade::trade_imbalance(&ctx.trade_sides, &ctx.trade_sizes, 100),
            trade::trade_imbalance(&ctx.trade_sides, &ctx.trade_sizes, 500),
            trade::signed_volume(&ctx.trade_sides, &ctx.trade_sizes, 100),
            trade::signed_volume(&ctx.trade_sides, &ctx.trade_sizes, 500),
            trade::vwap(&ctx.trade_prices, &ctx.trade_sizes, 100),
            trade::vwap(&ctx.trade_prices, &ctx.trade_sizes, 500),
            trade::vwap_deviation_bps(last_price, &ctx.trade_prices, &ctx.trade_sizes, 100),
            trade::vwap_deviation_bps(last_price, &ctx.trade_prices, &ctx.trade_sizes, 500),
            trade::flow_toxicity(&ctx.trade_sides, &ctx.trade_sizes, 100),
            trade::flow_toxicity(&ctx.trade_sides, &ctx.trade_sizes, 500),
            rate_1s,
            rate_1s,
            trade::mean_trade_size(&ctx.trade_sizes, 100),
            trade::trade_size_std(&ctx.trade_sizes, 100),
            ctx.trade_sides.last().copied().unwrap_or(0.0),
            ctx.trade_sizes.last().copied().unwrap_or(0.0),
        ]
    }
}

// --- Volatility ---

const VOLATILITY_NAMES: [&str; 11] = [
    "realized_vol_100",
    "realized_vol_500",
    "parkinson_vol_100",
    "garman_klass_vol_100",
    "yang_zhang_vol_100",
    "vol_of_vol_20",
    "return_skewness_100",
    "return_kurtosis_100",
    "max_return_100",
    "min_return_100",
    "return_range_100",
];

/// Volatility estimators and return-distribution moments.
#[derive(Debug, Clone)]
pub struct VolatilityFeatures {
    /// Annualization for the tick/close realized-vol estimator. The default
    /// assumes 1-minute observations.
    pub realized_annualization: f64,
    /// Annualization for the OHLC (per-bar) estimators.
    pub ohlc_annualization: f64,
}

impl Default for VolatilityFeatures {
    fn default() -> Self {
        Self {
            realized_annualization: (252.0f64 * 390.0 * 60.0).sqrt(),
            ohlc_annualization: 252.0f64.sqrt(),
        }
    }
}

impl VolatilityFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_annualization(realized: f64, ohlc: f64) -> Self {
        Self {
            realized_annualization: realized,
            ohlc_annualization: ohlc,
        }
    }
}

impl FeatureGenerator for VolatilityFeatures {
    fn feature_names(&self) -> &'static [&'static str] {
        &VOLATILITY_NAMES
    }

    fn compute(&self, ctx: &MarketContext) -> Vec<f64> {
        if ctx.prices.len() < 2 {
            return vec![f64::NAN; VOLATILITY_NAMES.len()];
        }

        let returns = vol::log_returns(&ctx.prices);
        let have_hl = !ctx.highs.is_empty() && !ctx.lows.is_empty();
        let have_ohlc = have_hl && !ctx.opens.is_empty() && !ctx.closes.is_empty();

        let parkinson = if have_hl {
            vol::parkinson_vol(&ctx.highs, &ctx.lows, 100, self.ohlc_annualization)
        } else {
            f64::NAN
        };
        let (garman_klass, yang_zhang) = if have_ohlc {
            (
                vol::garman_klass_vol(
                    &ctx.opens,
                    &ctx.highs,
                    &ctx.lows,
                    &ctx.closes,
                    100,
                    self.ohlc_annualization,
                ),
                vol::yang_zhang_vol(
                    &ctx.opens,
                    &ctx.highs,
                    &ctx.lows,
                    &ctx.closes,
                    100,
                    self.ohlc_annualization,
                ),
            )
        } else {
            (f64::NAN, f64::NAN)
        };

        let n = 100.min(returns.len());
        let (max_ret, min_ret, range) = if n > 0 {
            let recent = &returns[returns.len() - n..];
            let max = recent.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = recent.iter().cloned().fold(f64::INFINITY, f64::min);
            (max, min, max - min)
        } else {
            (f64::NAN, f64::NAN, f64::NAN)
        };

        vec![
            vol::realized_vol(&ctx.prices, 100, self.realized_annualization),
            vol::realized_vol(&ctx.prices, 500, self.realized_annualization),
            parkinson,
            garman_klass,
            yang_zhang,
            if ctx.volatilities.is_empty() {
                f64::NAN
            } else {
                vol::vol_of_vol(&ctx.volatilities, 20)
            },
            vol::skewness(&returns, 100),
            vol::excess_kurtosis(&returns, 100),
            max_ret,
            min_ret,
            range,
        ]
    }
}

// --- Microstructure ---

const MICROSTRUCTURE_NAMES: [&str; 11] = [
    "kyles_lambda_100",
    "kyles_lambda_500",
    "effective_spread_100",
    "realized_spread_100",
    "price_impact_100",
    "roll_spread_100",
    "amihud_illiquidity_20",
    "order_flow_autocorr_1",
    "order_flow_autocorr_5",
    "adverse_selection",
    "liquidity_score",
];

/// Market-quality features: impact coefficients, spread decompositions,
/// flow persistence, and a composite liquidity score.
#[derive(Debug, Clone, Default)]
pub struct MicrostructureFeatures;

impl MicrostructureFeatures {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureGenerator for MicrostructureFeatures {
    fn feature_names(&self) -> &'static [&'static str] {
        &MICROSTRUCTURE_NAMES
    }

    fn compute(&self, ctx: &MarketContext) -> Vec<f64> {
        let lambda_100 = micro::kyles_lambda(&ctx.price_changes, &ctx.signed_volumes, 100);
        let lambda_500 = micro::kyles_lambda(&ctx.price_changes, &ctx.signed_volumes, 500);

        let effective = if !ctx.trade_prices.is_empty() && !ctx.mid_prices.is_empty() {
            micro::effective_spread(&ctx.trade_prices, &ctx.mid_prices, 100)
        } else {
            f64::NAN
        };
        let realized = if !ctx.future_mid_prices.is_empty() {
            micro::realized_spread(
                &ctx.trade_prices,
                &ctx.trade_sides,
                &ctx.future_mid_prices,
                100,
            )
        } else {
            f64::NAN
        };
        let impact = if !ctx.mid_prices_before.is_empty() && !ctx.mid_prices_after.is_empty() {
            micro::price_impact(
                &ctx.trade_sides,
                &ctx.mid_prices_before,
                &ctx.mid_prices_after,
                100,
            )
        } else {
            f64::NAN
        };
        let amihud = micro::amihud_illiquidity(&ctx.returns, &ctx.volumes, 20);

        // Positive adverse selection: effective cost exceeds what the maker
        // keeps after the mid moves against the fill.
        let adverse_selection = if !effective.is_nan() && !realized.is_nan() {
            effective - realized
        } else {
            f64::NAN
        };

        let lambda_score = if lambda_100.is_nan() {
            0.5
        } else {
            1.0 / (1.0 + lambda_100.abs())
        };
        let spread_score = if effective.is_nan() {
            0.5
        } else {
            1.0 / (1.0 + effective)
        };
        let amihud_score = if amihud.is_nan() {
            0.5
        } else {
            1.0 / (1.0 + amihud * 1e6)
        };

        vec![
            lambda_100,
            lambda_500,
            effective,
            realized,
            impact,
            micro::roll_spread(&ctx.price_changes, 100),
            amihud,
            micro::order_flow_autocorr(&ctx.trade_sides, 1, 100),
            micro::order_flow_autocorr(&ctx.trade_sides, 5, 100),
            adverse_selection,
            (lambda_score + spread_score + amihud_score) / 3.0,
        ]
    }
}
