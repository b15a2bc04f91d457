//! Streaming market history: bounded rolling state materialized into a
//! [`MarketContext`] for the generators.

use serde::{Deserialize, Serialize};
use tracing::warn;

use market_core::{Bar, EngineError, MarketContext, MarketSnapshot, TradePrint, MAX_BOOK_LEVELS};

use crate::rolling::RollingWindow;

fn default_price_window() -> usize {
    1024
}
fn default_trade_window() -> usize {
    1024
}
fn default_bar_window() -> usize {
    256
}
fn default_vol_window() -> usize {
    64
}
fn default_book_levels() -> usize {
    MAX_BOOK_LEVELS
}

/// Capacities for the rolling history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_price_window")]
    pub price_window: usize,
    #[serde(default = "default_trade_window")]
    pub trade_window: usize,
    #[serde(default = "default_bar_window")]
    pub bar_window: usize,
    #[serde(default = "default_vol_window")]
    pub vol_window: usize,
    /// Book levels retained per side (truncated on ingest).
    #[serde(default = "default_book_levels")]
    pub book_levels: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            price_window: default_price_window(),
            trade_window: default_trade_window(),
            bar_window: default_bar_window(),
            vol_window: default_vol_window(),
            book_levels: default_book_levels(),
        }
    }
}

/// Bounded-memory event history.
///
/// Feed it snapshots, trade prints, and bars in time order; `context()`
/// materializes the arrays the feature generators consume. Mid prices
/// observed *after* a trade are back-filled on the next snapshot, so
/// realized-spread and permanent-impact inputs stay strictly causal.
pub struct MarketHistory {
    config: HistoryConfig,

    // Latest book levels (best-first).
    bid_prices: Vec<f64>,
    bid_sizes: Vec<f64>,
    ask_prices: Vec<f64>,
    ask_sizes: Vec<f64>,

    mids: RollingWindow<f64>,
    mid_changes: RollingWindow<f64>,
    mid_returns: RollingWindow<f64>,

    trade_prices: RollingWindow<f64>,
    trade_sizes: RollingWindow<f64>,
    trade_sides: RollingWindow<f64>,
    trade_times: RollingWindow<i64>,
    trade_mids: RollingWindow<f64>,
    mids_before: RollingWindow<f64>,
    mids_after: RollingWindow<f64>,
    signed_volumes: RollingWindow<f64>,
    volumes: RollingWindow<f64>,

    opens: RollingWindow<f64>,
    highs: RollingWindow<f64>,
    lows: RollingWindow<f64>,
    closes: RollingWindow<f64>,

    volatilities: RollingWindow<f64>,

    /// Trades since the last snapshot still awaiting an "after" mid.
    pending_after: usize,
    last_mid: f64,
}

impl MarketHistory {
    pub fn new(config: HistoryConfig) -> Self {
        let p = config.price_window;
        let t = config.trade_window;
        let b = config.bar_window;
        let v = config.vol_window;
        Self {
            config,
            bid_prices: Vec::new(),
            bid_sizes: Vec::new(),
            ask_prices: Vec::new(),
            ask_sizes: Vec::new(),
            mids: RollingWindow::new(p),
            mid_changes: RollingWindow::new(p),
            mid_returns: RollingWindow::new(p),
            trade_prices: RollingWindow::new(t),
            trade_sizes: RollingWindow::new(t),
            trade_sides: RollingWindow::new(t),
            trade_times: RollingWindow::new(t),
            trade_mids: RollingWindow::new(t),
            mids_before: RollingWindow::new(t),
            mids_after: RollingWindow::new(t),
            signed_volumes: RollingWindow::new(t),
            volumes: RollingWindow::new(t),
            opens: RollingWindow::new(b),
            highs: RollingWindow::new(b),
            lows: RollingWindow::new(b),
            closes: RollingWindow::new(b),
            volatilities: RollingWindow::new(v),
            pending_after: 0,
            last_mid: f64::NAN,
        }
    }

    /// Ingest a validated book snapshot.
    pub fn on_snapshot(&mut self, snapshot: &MarketSnapshot) -> Result<(), EngineError> {
        snapshot.validate()?;

        let levels = self.config.book_levels;
        self.bid_prices.clear();
        self.bid_prices
            .extend(snapshot.bid_prices.iter().take(levels));
        self.bid_sizes.clear();
        self.bid_sizes.extend(snapshot.bid_sizes.iter().take(levels));
        self.ask_prices.clear();
        self.ask_prices
            .extend(snapshot.ask_prices.iter().take(levels));
        self.ask_sizes.clear();
        self.ask_sizes.extend(snapshot.ask_sizes.iter().take(levels));

        let mid = snapshot.mid_price();
        if self.last_mid.is_finite() {
            self.mid_changes.push(mid - self.last_mid);
            self.mid_returns.push(if self.last_mid > 0.0 {
                (mid / self.last_mid).ln()
            } else {
                0.0
            });
        }
        self.mids.push(mid);

        // Back-fill the after-mid for trades printed since the last book.
        let pending = self.pending_after.min(self.mids_after.len());
        for slot in self.mids_after.tail_mut(pending) {
            *slot = mid;
        }
        self.pending_after = 0;
        self.last_mid = mid;
        Ok(())
    }

    /// Ingest a validated trade print.
    pub fn on_trade(&mut self, print: &TradePrint) -> Result<(), EngineError> {
        print.validate()?;

        self.trade_prices.push(print.price);
        self.trade_sizes.push(print.size);
        self.trade_sides.push(print.side as f64);
        self.trade_times.push(print.timestamp);
        self.trade_mids.push(self.last_mid);
        self.mids_before.push(self.last_mid);
        self.mids_after.push(f64::NAN);
        self.signed_volumes.push(print.side as f64 * print.size);
        self.volumes.push(print.size);
        self.pending_after = (self.pending_after + 1).min(self.config.trade_window);
        Ok(())
    }

    /// Ingest an OHLC bar.
    pub fn on_bar(&mut self, bar: &Bar) -> Result<(), EngineError> {
        if !(bar.open.is_finite() && bar.high.is_finite() && bar.low.is_finite() && bar.close.is_finite())
        {
            return Err(EngineError::InvalidInput("non-finite bar".to_string()));
        }
        if bar.high < bar.low {
            warn!(high = bar.high, low = bar.low, "bar with high < low rejected");
            return Err(EngineError::InvalidInput(format!(
                "bar high {} below low {}",
                bar.high, bar.low
            )));
        }
        self.opens.push(bar.open);
        self.highs.push(bar.high);
        self.lows.push(bar.low);
        self.closes.push(bar.close);
        Ok(())
    }

    /// Record an externally computed volatility observation (vol-of-vol
    /// input).
    pub fn observe_volatility(&mut self, vol: f64) {
        if vol.is_finite() {
            self.volatilities.push(vol);
        }
    }

    pub fn last_mid(&self) -> f64 {
        self.last_mid
    }

    /// Materialize the current rolling state for the generators.
    pub fn context(&self) -> MarketContext {
        MarketContext {
            bid_prices: self.bid_prices.clone(),
            bid_sizes: self.bid_sizes.clone(),
            ask_prices: self.ask_prices.clone(),
            ask_sizes: self.ask_sizes.clone(),
            trade_prices: self.trade_prices.to_vec(),
            trade_sizes: self.trade_sizes.to_vec(),
            trade_sides: self.trade_sides.to_vec(),
            trade_times: self.trade_times.to_vec(),
            prices: self.mids.to_vec(),
            opens: self.opens.to_vec(),
            highs: self.highs.to_vec(),
            lows: self.lows.to_vec(),
            closes: self.closes.to_vec(),
            volumes: self.volumes.to_vec(),
            volatilities: self.volatilities.to_vec(),
            signed_volumes: self.signed_volumes.to_vec(),
            price_changes: self.mid_changes.to_vec(),
            mid_prices: self.trade_mids.to_vec(),
            mid_prices_before: self.mids_before.to_vec(),
            mid_prices_after: self.mids_after.to_vec(),
            future_mid_prices: self.mids_after.to_vec(),
            returns: self.mid_returns.to_vec(),
        }
    }

    /// Drop all state for a fresh experiment.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

impl Default for MarketHistory {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(ts: i64, bid: f64, ask: f64) -> MarketSnapshot {
        MarketSnapshot {
            timestamp: ts,
            bid_price: bid,
            bid_size: 100.0,
            ask_price: ask,
            ask_size: 120.0,
            bid_prices: vec![bid, bid - 0.1],
            bid_sizes: vec![100.0, 200.0],
            ask_prices: vec![ask, ask + 0.1],
            ask_sizes: vec![120.0, 180.0],
            last_trade_price: None,
            last_trade_size: None,
            last_trade_side: None,
        }
    }

    #[test]
    fn snapshot_feeds_mid_series() {
        let mut history = MarketHistory::default();
        history.on_snapshot(&snapshot(1, 100.0, 100.1)).unwrap();
        history.on_snapshot(&snapshot(2, 100.1, 100.2)).unwrap();
        let ctx = history.context();
        assert_eq!(ctx.prices.len(), 2);
        assert_eq!(ctx.price_changes.len(), 1);
        assert!((ctx.price_changes[0] - 0.1).abs() < 1e-9);
        assert_eq!(ctx.returns.len(), 1);
    }

    #[test]
    fn trade_after_mid_backfilled_on_next_snapshot() {
        let mut history = MarketHistory::default();
        history.on_snapshot(&snapshot(1, 100.0, 100.1)).unwrap();
        history
            .on_trade(&TradePrint {
                timestamp: 2,
                price: 100.1,
                size: 50.0,
                side: 1,
            })
            .unwrap();

        let ctx = history.context();
        assert!(ctx.mid_prices_after[0].is_nan(), "after-mid unknown pre-snapshot");
        assert!((ctx.mid_prices_before[0] - 100.05).abs() < 1e-9);

        history.on_snapshot(&snapshot(3, 100.1, 100.2)).unwrap();
        let ctx = history.context();
        assert!((ctx.mid_prices_after[0] - 100.15).abs() < 1e-9);
        assert!((ctx.future_mid_prices[0] - 100.15).abs() < 1e-9);
    }

    #[test]
    fn trades_accumulate_signed_volume() {
        let mut history = MarketHistory::default();
        history.on_snapshot(&snapshot(1, 100.0, 100.1)).unwrap();
        for (side, size) in [(1i8, 50.0), (-1, 30.0)] {
            history
                .on_trade(&TradePrint {
                    timestamp: 2,
                    price: 100.05,
                    size,
                    side,
                })
                .unwrap();
        }
        let ctx = history.context();
        assert_eq!(ctx.signed_volumes, vec![50.0, -30.0]);
        assert_eq!(ctx.volumes, vec![50.0, 30.0]);
    }

    #[test]
    fn book_levels_truncated() {
        let mut history = MarketHistory::new(HistoryConfig {
            book_levels: 1,
            ..Default::default()
        });
        history.on_snapshot(&snapshot(1, 100.0, 100.1)).unwrap();
        let ctx = history.context();
        assert_eq!(ctx.bid_prices.len(), 1);
        assert_eq!(ctx.ask_prices.len(), 1);
    }

    #[test]
    fn invalid_inputs_rejected() {
        let mut history = MarketHistory::default();
        let mut bad = snapshot(1, 100.2, 100.1);
        bad.bid_price = 100.2;
        bad.ask_price = 100.1;
        assert!(history.on_snapshot(&bad).is_err());

        assert!(history
            .on_bar(&Bar {
                timestamp: 0,
                open: 100.0,
                high: 99.0,
                low: 100.5,
                close: 100.2,
            })
            .is_err());
    }

    #[test]
    fn reset_clears_everything() {
        let mut history = MarketHistory::default();
        history.on_snapshot(&snapshot(1, 100.0, 100.1)).unwrap();
        history.reset();
        let ctx = history.context();
        assert!(ctx.prices.is_empty());
        assert!(ctx.bid_prices.is_empty());
        assert!(history.last_mid().is_nan());
    }
}
