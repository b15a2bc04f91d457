use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use market_core::EngineError;

fn default_initial_capital() -> f64 {
    100_000.0
}
fn default_commission_per_share() -> f64 {
    0.001
}
fn default_commission_min() -> f64 {
    1.0
}
fn default_slippage_bps() -> f64 {
    1.0
}
fn default_market_impact_coef() -> f64 {
    0.1
}
fn default_max_position() -> f64 {
    10_000.0
}
fn default_margin_requirement() -> f64 {
    0.5
}
fn default_borrowing_rate() -> f64 {
    0.02
}
fn default_risk_free_rate() -> f64 {
    0.02
}
fn default_bars_per_day() -> f64 {
    390.0
}

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_commission_per_share")]
    pub commission_per_share: f64,
    #[serde(default = "default_commission_min")]
    pub commission_min: f64,
    /// Slippage in basis points of the base price.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    /// Square-root market impact coefficient.
    #[serde(default = "default_market_impact_coef")]
    pub market_impact_coef: f64,
    /// Position cap strategies are expected to honor.
    #[serde(default = "default_max_position")]
    pub max_position: f64,
    /// Margin fraction required against short exposure.
    #[serde(default = "default_margin_requirement")]
    pub margin_requirement: f64,
    /// Annual borrowing rate on short proceeds.
    #[serde(default = "default_borrowing_rate")]
    pub borrowing_rate: f64,
    /// Annual risk-free rate used by the metrics library.
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Bars per trading day; drives annualization (252 * bars_per_day
    /// periods per year for per-bar ratios).
    #[serde(default = "default_bars_per_day")]
    pub bars_per_day: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            commission_per_share: default_commission_per_share(),
            commission_min: default_commission_min(),
            slippage_bps: default_slippage_bps(),
            market_impact_coef: default_market_impact_coef(),
            max_position: default_max_position(),
            margin_requirement: default_margin_requirement(),
            borrowing_rate: default_borrowing_rate(),
            risk_free_rate: default_risk_free_rate(),
            bars_per_day: default_bars_per_day(),
        }
    }
}

/// One input row of the time-ordered market stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRow {
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    pub bid_price: f64,
    pub ask_price: f64,
    #[serde(default)]
    pub bid_size: Option<f64>,
    #[serde(default)]
    pub ask_size: Option<f64>,
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub mid_price: Option<f64>,
}

impl TickRow {
    pub fn new(timestamp: i64, bid_price: f64, ask_price: f64) -> Self {
        Self {
            timestamp,
            bid_price,
            ask_price,
            bid_size: None,
            ask_size: None,
            last_price: None,
            volume: None,
            mid_price: None,
        }
    }

    /// Mid price, derived from the BBO when not supplied.
    pub fn mid(&self) -> f64 {
        self.mid_price
            .unwrap_or((self.bid_price + self.ask_price) / 2.0)
    }

    /// Boundary validation: finite positive prices, non-reversed book,
    /// non-negative sizes.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.bid_price.is_finite() || !self.ask_price.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "non-finite prices at ts {}",
                self.timestamp
            )));
        }
        if self.bid_price <= 0.0 || self.ask_price <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "non-positive prices at ts {}",
                self.timestamp
            )));
        }
        if self.ask_price < self.bid_price {
            return Err(EngineError::InvalidInput(format!(
                "reversed book at ts {}: bid={} ask={}",
                self.timestamp, self.bid_price, self.ask_price
            )));
        }
        for size in [self.bid_size, self.ask_size, self.volume].into_iter().flatten() {
            if size < 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "negative size at ts {}",
                    self.timestamp
                )));
            }
        }
        Ok(())
    }
}

/// A point on the recorded equity curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: f64,
    pub position: f64,
}

/// How a fill changed the book position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    /// Opened a position from flat.
    Entry,
    /// Increased an existing position.
    Add,
    /// Bought against a short.
    Cover,
    /// Sold against a long.
    Close,
}

/// One row of the trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: i64,
    pub order_id: u64,
    /// +1 buy, -1 sell.
    pub side: i8,
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub slippage: f64,
    pub kind: TradeKind,
    /// Realized PnL of the closing portion, net of commission.
    pub pnl: f64,
}

/// Per-calendar-day aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStat {
    pub date: NaiveDate,
    /// Closing equity for the day.
    pub equity: f64,
    /// Day-over-day equity return.
    #[serde(rename = "return")]
    pub ret: f64,
    pub trades: usize,
}

/// Results of a completed backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    // Summary metrics
    pub total_return: f64,
    pub annual_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Peak-to-trough drawdown fraction, in [0, 1].
    pub max_drawdown: f64,
    pub calmar_ratio: f64,
    pub win_rate: f64,
    pub profit_factor: f64,

    // Trade statistics
    pub total_trades: usize,
    pub avg_trade_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,

    // Terminal state
    pub final_equity: f64,
    pub realized_pnl: f64,
    pub total_commission: f64,
    pub total_slippage: f64,

    // Time series (aligned with the input stream)
    pub equity_curve: Vec<EquityPoint>,
    pub returns: Vec<f64>,
    /// Drawdown fraction at each tick (<= 0).
    pub drawdowns: Vec<f64>,

    // Detail
    pub trades: Vec<TradeRecord>,
    pub daily_stats: Vec<DailyStat>,
}
