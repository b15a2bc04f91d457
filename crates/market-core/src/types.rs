use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Maximum number of book levels retained per side.
pub const MAX_BOOK_LEVELS: usize = 15;

/// A top-of-book market snapshot with per-level depth.
///
/// Bid levels are ordered best-first (descending price), ask levels
/// best-first (ascending price). Level vectors are truncated to
/// [`MAX_BOOK_LEVELS`] on ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
    pub bid_prices: Vec<f64>,
    pub bid_sizes: Vec<f64>,
    pub ask_prices: Vec<f64>,
    pub ask_sizes: Vec<f64>,
    #[serde(default)]
    pub last_trade_price: Option<f64>,
    #[serde(default)]
    pub last_trade_size: Option<f64>,
    #[serde(default)]
    pub last_trade_side: Option<i8>,
}

impl MarketSnapshot {
    /// Validate boundary invariants: finite positive BBO prices, a
    /// non-reversed book, and non-negative sizes.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.bid_price.is_finite() || !self.ask_price.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "non-finite BBO: bid={} ask={}",
                self.bid_price, self.ask_price
            )));
        }
        if self.bid_price <= 0.0 || self.ask_price <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "non-positive BBO: bid={} ask={}",
                self.bid_price, self.ask_price
            )));
        }
        if self.ask_price < self.bid_price {
            return Err(EngineError::InvalidInput(format!(
                "reversed book: bid={} > ask={}",
                self.bid_price, self.ask_price
            )));
        }
        if self.bid_size < 0.0 || self.ask_size < 0.0 {
            return Err(EngineError::InvalidInput("negative BBO size".to_string()));
        }
        for sz in self.bid_sizes.iter().chain(self.ask_sizes.iter()) {
            if *sz < 0.0 {
                return Err(EngineError::InvalidInput("negative level size".to_string()));
            }
        }
        Ok(())
    }

    pub fn mid_price(&self) -> f64 {
        (self.bid_price + self.ask_price) / 2.0
    }
}

/// A single trade print.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradePrint {
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    pub price: f64,
    pub size: f64,
    /// Aggressor side: +1 buy, -1 sell.
    pub side: i8,
}

impl TradePrint {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "invalid trade price: {}",
                self.price
            )));
        }
        if !self.size.is_finite() || self.size < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "invalid trade size: {}",
                self.size
            )));
        }
        if self.side != 1 && self.side != -1 {
            return Err(EngineError::InvalidInput(format!(
                "trade side must be +1 or -1, got {}",
                self.side
            )));
        }
        Ok(())
    }
}

/// An OHLC bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Generic per-event state bag consumed by feature generators.
///
/// Every field is optional in the sense that an empty vector means "not
/// supplied"; generators emit NaN for slots whose inputs are missing.
/// Arrays are oldest-first, newest-last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketContext {
    pub bid_prices: Vec<f64>,
    pub bid_sizes: Vec<f64>,
    pub ask_prices: Vec<f64>,
    pub ask_sizes: Vec<f64>,

    pub trade_prices: Vec<f64>,
    pub trade_sizes: Vec<f64>,
    /// +1.0 buy / -1.0 sell per trade.
    pub trade_sides: Vec<f64>,
    /// Nanosecond timestamps per trade.
    pub trade_times: Vec<i64>,

    /// Last/mid price series used for return computations.
    pub prices: Vec<f64>,
    pub opens: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
    pub volatilities: Vec<f64>,

    pub signed_volumes: Vec<f64>,
    pub price_changes: Vec<f64>,
    /// Mid price at each trade time.
    pub mid_prices: Vec<f64>,
    pub mid_prices_before: Vec<f64>,
    pub mid_prices_after: Vec<f64>,
    pub future_mid_prices: Vec<f64>,
    pub returns: Vec<f64>,
}

impl MarketContext {
    pub fn new() -> Self {
        Self::default()
    }
}
