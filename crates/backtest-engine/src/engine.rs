//! Event-driven backtest simulator with fill model and PnL bookkeeping.

use chrono::{DateTime, NaiveDate};
use tracing::{debug, info, warn};

use market_core::{EngineError, FeatureFrame};

use crate::metrics;
use crate::models::{
    BacktestConfig, BacktestResult, DailyStat, EquityPoint, TickRow, TradeKind, TradeRecord,
};
use crate::strategy::{Fill, MarketState, Signal, Strategy};

/// Trading days per year used for annualization.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Backtest engine with realistic execution simulation: directional
/// slippage, square-root market impact, commissions, and a signed-position
/// state machine marked to mid on every tick.
pub struct BacktestEngine {
    config: BacktestConfig,

    cash: f64,
    position: f64,
    avg_cost: f64,
    realized_pnl: f64,
    unrealized_pnl: f64,

    equity_history: Vec<EquityPoint>,
    fills: Vec<Fill>,
    total_commission: f64,
    total_slippage: f64,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        let cash = config.initial_capital;
        Self {
            config,
            cash,
            position: 0.0,
            avg_cost: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            equity_history: Vec::new(),
            fills: Vec::new(),
            total_commission: 0.0,
            total_slippage: 0.0,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    fn reset(&mut self) {
        self.cash = self.config.initial_capital;
        self.position = 0.0;
        self.avg_cost = 0.0;
        self.realized_pnl = 0.0;
        self.unrealized_pnl = 0.0;
        self.equity_history.clear();
        self.fills.clear();
        self.total_commission = 0.0;
        self.total_slippage = 0.0;
    }

    /// Run the strategy over a time-ordered stream of rows.
    ///
    /// `features`, when supplied, must be row-aligned with `rows`; row `i`
    /// of the frame is exposed to the strategy at event `i`.
    pub fn run(
        &mut self,
        strategy: &mut dyn Strategy,
        rows: &[TickRow],
        features: Option<&FeatureFrame>,
    ) -> Result<BacktestResult, EngineError> {
        if rows.is_empty() {
            return Err(EngineError::InsufficientData(
                "empty market stream".to_string(),
            ));
        }
        if let Some(frame) = features {
            if frame.n_rows() != rows.len() {
                return Err(EngineError::InvalidInput(format!(
                    "feature rows ({}) != market rows ({})",
                    frame.n_rows(),
                    rows.len()
                )));
            }
        }

        self.reset();
        strategy.reset();
        info!(
            strategy = strategy.name(),
            rows = rows.len(),
            capital = self.config.initial_capital,
            "backtest started"
        );

        let mut current_date: Option<NaiveDate> = None;
        for (i, row) in rows.iter().enumerate() {
            row.validate()?;

            let date = date_of(row.timestamp);
            if current_date != Some(date) {
                if let Some(prev) = current_date {
                    strategy.on_day_end(prev);
                }
                strategy.on_day_start(date);
                current_date = Some(date);
            }

            let mid = row.mid();
            let state = MarketState {
                timestamp: row.timestamp,
                mid_price: mid,
                bid_price: row.bid_price,
                ask_price: row.ask_price,
                spread: row.ask_price - row.bid_price,
                bid_size: row.bid_size.unwrap_or(0.0),
                ask_size: row.ask_size.unwrap_or(0.0),
                last_trade_price: row.last_price.unwrap_or(mid),
                last_trade_size: row.volume.unwrap_or(0.0),
                features: features.map(|f| f.row_view(i)),
                position: self.position,
                avg_cost: self.avg_cost,
                unrealized_pnl: self.unrealized_pnl,
                realized_pnl: self.realized_pnl,
                cash: self.cash,
                equity: self.cash + self.position * mid,
            };

            let signal = strategy.on_market_data(&state).map_err(|e| match e {
                EngineError::StrategyFault(_) => e,
                other => EngineError::StrategyFault(other.to_string()),
            })?;

            if let Some(signal) = signal {
                if signal.size > 0.0 && signal.direction != 0 {
                    if let Some(fill) = self.execute_signal(&signal, row) {
                        strategy.on_fill(&fill);
                    }
                } else if signal.size <= 0.0 {
                    debug!(size = signal.size, "signal with non-positive size ignored");
                }
            }

            // Mark-to-market.
            self.unrealized_pnl = if self.position != 0.0 {
                self.position * (mid - self.avg_cost)
            } else {
                0.0
            };
            self.equity_history.push(EquityPoint {
                timestamp: row.timestamp,
                equity: self.cash + self.position * mid,
                position: self.position,
            });
        }
        if let Some(date) = current_date {
            strategy.on_day_end(date);
        }

        let result = self.build_result();
        info!(
            trades = result.total_trades,
            final_equity = result.final_equity,
            total_return = result.total_return,
            "backtest finished"
        );
        Ok(result)
    }

    /// Apply the fill model and the position state machine. Returns None
    /// when the fill is rejected (executed price <= 0).
    fn execute_signal(&mut self, signal: &Signal, row: &TickRow) -> Option<Fill> {
        let buying = signal.direction > 0;
        let base_price = if signal.price > 0.0 {
            signal.price
        } else if buying {
            row.ask_price
        } else {
            row.bid_price
        };

        // Slippage: the taker crosses the spread in their own direction.
        let slippage_mag = base_price * self.config.slippage_bps / 10_000.0;
        let slippage = if buying { slippage_mag } else { -slippage_mag };

        // Square-root impact.
        let impact_mag = self.config.market_impact_coef
            * (signal.size.abs() / 1000.0).sqrt()
            * base_price
            / 100.0;
        let impact = if buying { impact_mag } else { -impact_mag };

        let exec_price = base_price + slippage + impact;
        if exec_price <= 0.0 {
            warn!(exec_price, "fill rejected: non-positive executed price");
            return None;
        }

        let commission = (signal.size.abs() * self.config.commission_per_share)
            .max(self.config.commission_min);

        self.apply_fill(signal.direction, signal.size, exec_price);
        self.cash -= signal.direction as f64 * signal.size * exec_price + commission;
        self.total_commission += commission;
        self.total_slippage += slippage_mag + impact_mag;

        let fill = Fill {
            timestamp: signal.timestamp,
            order_id: self.fills.len() as u64 + 1,
            side: signal.direction,
            price: exec_price,
            quantity: signal.size,
            commission,
            slippage: slippage_mag + impact_mag,
        };
        self.fills.push(fill);
        Some(fill)
    }

    /// Position/average-cost state machine for a signed fill.
    fn apply_fill(&mut self, direction: i8, quantity: f64, price: f64) {
        if direction > 0 {
            let new_position = self.position + quantity;
            if self.position >= 0.0 {
                // Adding to (or opening) a long.
                self.avg_cost = if new_position > 0.0 {
                    (self.avg_cost * self.position + price * quantity) / new_position
                } else {
                    0.0
                };
            } else {
                // Covering a short; any residual opens a long at the fill.
                let covered = quantity.min(self.position.abs());
                self.realized_pnl += covered * (self.avg_cost - price);
                if quantity - covered > 0.0 {
                    self.avg_cost = price;
                }
            }
            self.position = new_position;
        } else {
            let new_position = self.position - quantity;
            if self.position <= 0.0 {
                // Adding to (or opening) a short.
                self.avg_cost = if new_position < 0.0 {
                    (self.avg_cost * self.position.abs() + price * quantity) / new_position.abs()
                } else {
                    0.0
                };
            } else {
                // Closing a long; any residual opens a short at the fill.
                let closed = quantity.min(self.position);
                self.realized_pnl += closed * (price - self.avg_cost);
                if quantity - closed > 0.0 {
                    self.avg_cost = price;
                }
            }
            self.position = new_position;
        }
    }

    // --- Result assembly ---

    fn build_result(&self) -> BacktestResult {
        let equity: Vec<f64> = self.equity_history.iter().map(|p| p.equity).collect();
        let returns: Vec<f64> = equity.windows(2).map(|w| w[1] / w[0] - 1.0).collect();

        // Drawdown series (<= 0) against the running peak.
        let mut drawdowns = Vec::with_capacity(equity.len());
        let mut peak = f64::NEG_INFINITY;
        for &e in &equity {
            peak = peak.max(e);
            drawdowns.push(if peak > 0.0 { (e - peak) / peak } else { 0.0 });
        }

        let trades = self.build_ledger();
        let trade_pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
        let wins: Vec<f64> = trade_pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = trade_pnls.iter().copied().filter(|p| *p < 0.0).collect();

        let final_equity = equity.last().copied().unwrap_or(self.config.initial_capital);
        let total_return = final_equity / self.config.initial_capital - 1.0;

        let n_days = (equity.len() as f64 / self.config.bars_per_day).max(1.0);
        let annual_return =
            (1.0 + total_return).powf(TRADING_DAYS_PER_YEAR / n_days) - 1.0;

        let periods_per_year = TRADING_DAYS_PER_YEAR * self.config.bars_per_day;
        let sharpe = metrics::sharpe_ratio(&returns, 0.0, periods_per_year);
        let sortino = metrics::sortino_ratio(&returns, 0.0, periods_per_year);

        let (max_dd, _, _) = metrics::max_drawdown(&equity);
        let calmar = if max_dd > 0.0 {
            annual_return / max_dd
        } else {
            0.0
        };

        BacktestResult {
            total_return,
            annual_return,
            sharpe_ratio: sharpe,
            sortino_ratio: sortino,
            max_drawdown: max_dd,
            calmar_ratio: calmar,
            win_rate: metrics::win_rate(&trade_pnls),
            profit_factor: metrics::profit_factor(&trade_pnls),
            total_trades: self.fills.len(),
            avg_trade_pnl: mean_or_zero(&trade_pnls),
            avg_win: mean_or_zero(&wins),
            avg_loss: mean_or_zero(&losses),
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            final_equity,
            realized_pnl: self.realized_pnl,
            total_commission: self.total_commission,
            total_slippage: self.total_slippage,
            equity_curve: self.equity_history.clone(),
            returns,
            drawdowns,
            trades,
            daily_stats: self.build_daily_stats(),
        }
    }

    /// Replay the fills through a fresh position/cost state to classify
    /// each one and attribute the realized PnL of its closing portion.
    fn build_ledger(&self) -> Vec<TradeRecord> {
        let mut records = Vec::with_capacity(self.fills.len());
        let mut position = 0.0f64;
        let mut avg_cost = 0.0f64;

        for fill in &self.fills {
            let mut pnl = 0.0;
            let kind;

            if fill.side > 0 {
                if position >= 0.0 {
                    kind = if position == 0.0 {
                        TradeKind::Entry
                    } else {
                        TradeKind::Add
                    };
                    let new_position = position + fill.quantity;
                    avg_cost = (avg_cost * position + fill.price * fill.quantity) / new_position;
                } else {
                    kind = TradeKind::Cover;
                    let covered = fill.quantity.min(position.abs());
                    pnl = covered * (avg_cost - fill.price);
                    if fill.quantity - covered > 0.0 {
                        avg_cost = fill.price;
                    }
                }
                position += fill.quantity;
            } else {
                if position <= 0.0 {
                    kind = if position == 0.0 {
                        TradeKind::Entry
                    } else {
                        TradeKind::Add
                    };
                    let new_position = position - fill.quantity;
                    avg_cost =
                        (avg_cost * position.abs() + fill.price * fill.quantity) / new_position.abs();
                } else {
                    kind = TradeKind::Close;
                    let closed = fill.quantity.min(position);
                    pnl = closed * (fill.price - avg_cost);
                    if fill.quantity - closed > 0.0 {
                        avg_cost = fill.price;
                    }
                }
                position -= fill.quantity;
            }

            records.push(TradeRecord {
                timestamp: fill.timestamp,
                order_id: fill.order_id,
                side: fill.side,
                price: fill.price,
                quantity: fill.quantity,
                commission: fill.commission,
                slippage: fill.slippage,
                kind,
                pnl: pnl - fill.commission,
            });
        }
        records
    }

    fn build_daily_stats(&self) -> Vec<DailyStat> {
        let mut stats: Vec<DailyStat> = Vec::new();
        let mut prev_close = self.config.initial_capital;

        for point in &self.equity_history {
            let date = date_of(point.timestamp);
            let same_day = stats.last().is_some_and(|s| s.date == date);
            if same_day {
                if let Some(last) = stats.last_mut() {
                    last.equity = point.equity;
                    last.ret = point.equity / prev_close - 1.0;
                }
            } else {
                if let Some(last) = stats.last() {
                    prev_close = last.equity;
                }
                stats.push(DailyStat {
                    date,
                    equity: point.equity,
                    ret: point.equity / prev_close - 1.0,
                    trades: 0,
                });
            }
        }
        for fill in &self.fills {
            let date = date_of(fill.timestamp);
            if let Some(stat) = stats.iter_mut().find(|s| s.date == date) {
                stat.trades += 1;
            }
        }
        stats
    }
}

fn mean_or_zero(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn date_of(timestamp_ns: i64) -> NaiveDate {
    DateTime::from_timestamp_nanos(timestamp_ns).date_naive()
}
