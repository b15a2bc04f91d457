use chrono::NaiveDate;

use market_core::{EngineError, FeatureFrame, MarketContext};

use crate::engine::BacktestEngine;
use crate::models::*;
use crate::strategy::*;

/// Helper: a tick with the given BBO, 1 second apart per index.
fn tick(i: usize, bid: f64, ask: f64) -> TickRow {
    TickRow::new(i as i64 * 1_000_000_000, bid, ask)
}

/// Helper: a flat stream of n identical ticks.
fn flat_stream(n: usize, bid: f64, ask: f64) -> Vec<TickRow> {
    (0..n).map(|i| tick(i, bid, ask)).collect()
}

/// Helper: config with known cost parameters.
fn test_config() -> BacktestConfig {
    BacktestConfig {
        initial_capital: 100_000.0,
        commission_per_share: 0.001,
        commission_min: 1.0,
        slippage_bps: 1.0,
        market_impact_coef: 0.1,
        ..Default::default()
    }
}

/// Strategy that emits a fixed script of (tick_index, direction, size,
/// limit_price) orders.
struct ScriptedStrategy {
    script: Vec<(usize, i8, f64, f64)>,
    tick: usize,
    fills: Vec<Fill>,
    day_starts: Vec<NaiveDate>,
    day_ends: Vec<NaiveDate>,
}

impl ScriptedStrategy {
    fn new(script: Vec<(usize, i8, f64, f64)>) -> Self {
        Self {
            script,
            tick: 0,
            fills: Vec::new(),
            day_starts: Vec::new(),
            day_ends: Vec::new(),
        }
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn on_market_data(
        &mut self,
        state: &MarketState<'_>,
    ) -> Result<Option<Signal>, EngineError> {
        let current = self.tick;
        self.tick += 1;
        for (at, direction, size, price) in &self.script {
            if *at == current {
                return Ok(Some(Signal::new(state.timestamp, *direction, *size, *price)));
            }
        }
        Ok(None)
    }

    fn on_fill(&mut self, fill: &Fill) {
        self.fills.push(*fill);
    }

    fn on_day_start(&mut self, date: NaiveDate) {
        self.day_starts.push(date);
    }

    fn on_day_end(&mut self, date: NaiveDate) {
        self.day_ends.push(date);
    }

    fn reset(&mut self) {
        self.tick = 0;
        self.fills.clear();
        self.day_starts.clear();
        self.day_ends.clear();
    }
}

// =============================================================================
// Fill model: slippage, impact, and commission arithmetic
// =============================================================================

#[test]
fn buy_fills_above_ask_sell_below_bid() {
    let rows = flat_stream(4, 100.0, 100.1);
    // Market buy at tick 0, market sell at tick 2 (price 0 -> at the touch).
    let mut strategy = ScriptedStrategy::new(vec![(0, 1, 100.0, 0.0), (2, -1, 100.0, 0.0)]);
    let mut engine = BacktestEngine::new(test_config());
    let result = engine.run(&mut strategy, &rows, None).unwrap();

    assert_eq!(result.total_trades, 2);
    let buy = &result.trades[0];
    let sell = &result.trades[1];
    assert!(buy.price > 100.1, "buy fill {} must exceed the ask", buy.price);
    assert!(sell.price < 100.0, "sell fill {} must undercut the bid", sell.price);
}

#[test]
fn round_trip_obeys_state_machine_exactly() {
    let config = test_config();
    let rows = flat_stream(4, 100.0, 100.1);
    let mut strategy = ScriptedStrategy::new(vec![(0, 1, 100.0, 0.0), (2, -1, 100.0, 0.0)]);
    let mut engine = BacktestEngine::new(config.clone());
    let result = engine.run(&mut strategy, &rows, None).unwrap();

    // Reproduce the fill model by hand.
    let buy_base: f64 = 100.1;
    let buy_exec = buy_base
        + buy_base * config.slippage_bps / 10_000.0
        + config.market_impact_coef * (100.0f64 / 1000.0).sqrt() * buy_base / 100.0;
    let sell_base: f64 = 100.0;
    let sell_exec = sell_base
        - sell_base * config.slippage_bps / 10_000.0
        - config.market_impact_coef * (100.0f64 / 1000.0).sqrt() * sell_base / 100.0;
    let commission = (100.0f64 * config.commission_per_share).max(config.commission_min);

    assert!((result.trades[0].price - buy_exec).abs() < 1e-9);
    assert!((result.trades[1].price - sell_exec).abs() < 1e-9);
    assert!((result.trades[0].commission - commission).abs() < 1e-12);

    let expected_realized = 100.0 * (sell_exec - buy_exec);
    assert!(
        (result.realized_pnl - expected_realized).abs() < 1e-9,
        "realized {} vs expected {}",
        result.realized_pnl,
        expected_realized
    );

    // Cash conservation: equity ends at initial + realized - commissions.
    let expected_equity = config.initial_capital + expected_realized - 2.0 * commission;
    assert!((result.final_equity - expected_equity).abs() < 1e-9);
}

#[test]
fn commission_floor_applies_to_small_orders() {
    let rows = flat_stream(2, 100.0, 100.1);
    let mut strategy = ScriptedStrategy::new(vec![(0, 1, 5.0, 0.0)]);
    let mut engine = BacktestEngine::new(test_config());
    let result = engine.run(&mut strategy, &rows, None).unwrap();
    // 5 * 0.001 = 0.005 < min commission of 1.0
    assert!((result.trades[0].commission - 1.0).abs() < 1e-12);
}

#[test]
fn limit_price_overrides_touch() {
    let rows = flat_stream(2, 100.0, 100.1);
    let mut strategy = ScriptedStrategy::new(vec![(0, 1, 100.0, 99.5)]);
    let mut engine = BacktestEngine::new(test_config());
    let result = engine.run(&mut strategy, &rows, None).unwrap();
    // Base price is the limit, not the ask.
    assert!(result.trades[0].price < 99.6);
}

// =============================================================================
// Position state machine: long/short transitions and average cost
// =============================================================================

#[test]
fn averaging_up_a_long() {
    let rows = flat_stream(4, 100.0, 100.1);
    let mut strategy = ScriptedStrategy::new(vec![(0, 1, 100.0, 100.0), (1, 1, 100.0, 102.0)]);
    let mut engine = BacktestEngine::new(BacktestConfig {
        slippage_bps: 0.0,
        market_impact_coef: 0.0,
        ..test_config()
    });
    let result = engine.run(&mut strategy, &rows, None).unwrap();

    assert_eq!(result.trades[0].kind, TradeKind::Entry);
    assert_eq!(result.trades[1].kind, TradeKind::Add);
    // avg cost = (100*100 + 102*100)/200 = 101; position 200 marked at mid 100.05.
    let last = result.equity_curve.last().unwrap();
    assert_eq!(last.position, 200.0);
}

#[test]
fn flip_long_to_short_realizes_then_reopens() {
    let rows = flat_stream(4, 100.0, 100.1);
    // Buy 100 @ 100, then sell 150 @ 103: close 100, open short 50 @ 103.
    let mut strategy = ScriptedStrategy::new(vec![(0, 1, 100.0, 100.0), (1, -1, 150.0, 103.0)]);
    let mut engine = BacktestEngine::new(BacktestConfig {
        slippage_bps: 0.0,
        market_impact_coef: 0.0,
        commission_per_share: 0.0,
        commission_min: 0.0,
        ..test_config()
    });
    let result = engine.run(&mut strategy, &rows, None).unwrap();

    assert!((result.realized_pnl - 100.0 * 3.0).abs() < 1e-9);
    let last = result.equity_curve.last().unwrap();
    assert_eq!(last.position, -50.0);
    assert_eq!(result.trades[1].kind, TradeKind::Close);
}

#[test]
fn short_cover_realizes_inverse_pnl() {
    let rows = flat_stream(4, 100.0, 100.1);
    // Short 100 @ 103, cover 100 @ 100 -> +300.
    let mut strategy = ScriptedStrategy::new(vec![(0, -1, 100.0, 103.0), (1, 1, 100.0, 100.0)]);
    let mut engine = BacktestEngine::new(BacktestConfig {
        slippage_bps: 0.0,
        market_impact_coef: 0.0,
        commission_per_share: 0.0,
        commission_min: 0.0,
        ..test_config()
    });
    let result = engine.run(&mut strategy, &rows, None).unwrap();
    assert!((result.realized_pnl - 300.0).abs() < 1e-9);
    assert_eq!(result.trades[0].kind, TradeKind::Entry);
    assert_eq!(result.trades[1].kind, TradeKind::Cover);
    assert!((result.trades[1].pnl - 300.0).abs() < 1e-9);
}

// =============================================================================
// Equity identity: cash + position * mid = equity at every tick
// =============================================================================

#[test]
fn equity_identity_holds_at_every_tick() {
    let rows: Vec<TickRow> = (0..60)
        .map(|i| {
            let drift = (i as f64 * 0.7).sin() * 0.5;
            tick(i, 100.0 + drift, 100.1 + drift)
        })
        .collect();
    let mut strategy = ScriptedStrategy::new(vec![
        (5, 1, 100.0, 0.0),
        (20, -1, 50.0, 0.0),
        (40, -1, 100.0, 0.0),
    ]);
    let mut engine = BacktestEngine::new(test_config());
    let result = engine.run(&mut strategy, &rows, None).unwrap();

    // Replay cash and position from the ledger; at each tick the recorded
    // equity must equal cash + position * mid.
    let mut cash = test_config().initial_capital;
    let mut position = 0.0;
    let mut fill_iter = result.trades.iter().peekable();
    for (i, point) in result.equity_curve.iter().enumerate() {
        while let Some(fill) = fill_iter.peek() {
            if fill.timestamp <= point.timestamp
                && (fill.timestamp > if i == 0 { i64::MIN } else { result.equity_curve[i - 1].timestamp })
            {
                cash -= fill.side as f64 * fill.quantity * fill.price + fill.commission;
                position += fill.side as f64 * fill.quantity;
                fill_iter.next();
            } else {
                break;
            }
        }
        let mid = rows[i].mid();
        assert!(
            (point.equity - (cash + position * mid)).abs() < 1e-6,
            "tick {i}: equity {} != cash {} + pos {} * mid {}",
            point.equity,
            cash,
            position,
            mid
        );
        assert_eq!(point.position, position);
    }
}

// =============================================================================
// Drawdown and result series
// =============================================================================

#[test]
fn drawdown_series_is_bounded() {
    let rows: Vec<TickRow> = (0..100)
        .map(|i| {
            let level = 100.0 + (i as f64 * 0.3).sin() * 5.0;
            tick(i, level, level + 0.1)
        })
        .collect();
    let mut strategy = ScriptedStrategy::new(vec![(0, 1, 500.0, 0.0)]);
    let mut engine = BacktestEngine::new(test_config());
    let result = engine.run(&mut strategy, &rows, None).unwrap();

    assert!(result.max_drawdown >= 0.0 && result.max_drawdown <= 1.0);
    for dd in &result.drawdowns {
        assert!(*dd <= 1e-12, "drawdown series must be <= 0, got {dd}");
    }
    assert_eq!(result.returns.len(), result.equity_curve.len() - 1);
    assert_eq!(result.drawdowns.len(), result.equity_curve.len());
}

// =============================================================================
// Failure semantics
// =============================================================================

struct FaultingStrategy;

impl Strategy for FaultingStrategy {
    fn on_market_data(
        &mut self,
        _state: &MarketState<'_>,
    ) -> Result<Option<Signal>, EngineError> {
        Err(EngineError::InvalidInput("strategy blew up".to_string()))
    }
}

#[test]
fn strategy_fault_terminates_run() {
    let rows = flat_stream(4, 100.0, 100.1);
    let mut engine = BacktestEngine::new(test_config());
    let err = engine.run(&mut FaultingStrategy, &rows, None).unwrap_err();
    assert!(matches!(err, EngineError::StrategyFault(_)));
}

#[test]
fn non_positive_size_is_ignored() {
    let rows = flat_stream(3, 100.0, 100.1);
    let mut strategy = ScriptedStrategy::new(vec![(0, 1, 0.0, 0.0), (1, 1, -10.0, 0.0)]);
    let mut engine = BacktestEngine::new(test_config());
    let result = engine.run(&mut strategy, &rows, None).unwrap();
    assert_eq!(result.total_trades, 0);
    assert_eq!(result.final_equity, 100_000.0);
}

#[test]
fn invalid_rows_are_rejected() {
    let mut rows = flat_stream(3, 100.0, 100.1);
    rows[1].bid_price = 101.0; // reversed book
    let mut strategy = ScriptedStrategy::new(vec![]);
    let mut engine = BacktestEngine::new(test_config());
    assert!(matches!(
        engine.run(&mut strategy, &rows, None),
        Err(EngineError::InvalidInput(_))
    ));

    let mut engine = BacktestEngine::new(test_config());
    assert!(matches!(
        engine.run(&mut strategy, &[], None),
        Err(EngineError::InsufficientData(_))
    ));
}

#[test]
fn misaligned_features_are_rejected() {
    let rows = flat_stream(4, 100.0, 100.1);
    let mut frame = FeatureFrame::new(vec!["imbalance_5"]);
    frame.push_row(&[0.1]).unwrap();
    let mut strategy = ScriptedStrategy::new(vec![]);
    let mut engine = BacktestEngine::new(test_config());
    assert!(matches!(
        engine.run(&mut strategy, &rows, Some(&frame)),
        Err(EngineError::InvalidInput(_))
    ));
}

// =============================================================================
// Day boundaries and daily stats
// =============================================================================

#[test]
fn day_callbacks_fire_on_boundaries() {
    const DAY_NS: i64 = 86_400_000_000_000;
    let rows: Vec<TickRow> = (0..6)
        .map(|i| TickRow::new((i / 3) as i64 * DAY_NS + i as i64, 100.0, 100.1))
        .collect();
    let mut strategy = ScriptedStrategy::new(vec![(0, 1, 10.0, 0.0)]);
    let mut engine = BacktestEngine::new(test_config());
    let result = engine.run(&mut strategy, &rows, None).unwrap();

    assert_eq!(strategy.day_starts.len(), 2);
    assert_eq!(strategy.day_ends.len(), 2);
    assert_eq!(result.daily_stats.len(), 2);
    assert_eq!(result.daily_stats[0].trades, 1);
    assert_eq!(result.daily_stats[1].trades, 0);

    // Day returns compound to the total return.
    let compounded: f64 = result
        .daily_stats
        .iter()
        .map(|d| 1.0 + d.ret)
        .product::<f64>()
        - 1.0;
    assert!((compounded - result.total_return).abs() < 1e-9);
}

// =============================================================================
// Strategy integration through the feature pipeline
// =============================================================================

fn bullish_context() -> MarketContext {
    MarketContext {
        bid_prices: vec![100.0, 99.9, 99.8, 99.7, 99.6],
        bid_sizes: vec![500.0, 400.0, 300.0, 200.0, 100.0],
        ask_prices: vec![100.1, 100.2, 100.3, 100.4, 100.5],
        ask_sizes: vec![50.0, 40.0, 30.0, 20.0, 10.0],
        ..Default::default()
    }
}

#[test]
fn simple_strategy_trades_on_pipeline_features() {
    use feature_engine::FeaturePipeline;

    let mut pipeline = FeaturePipeline::new(feature_engine::PipelineConfig {
        normalize: false,
        ..Default::default()
    });
    pipeline.add_generator(Box::new(feature_engine::OrderBookFeatures::new()));

    let states: Vec<MarketContext> = (0..10).map(|_| bullish_context()).collect();
    let frame = pipeline.compute_batch(&states).unwrap();
    let rows = flat_stream(10, 100.0, 100.1);

    let mut strategy = SimpleStrategy::new(0.3, 1_000.0);
    let mut engine = BacktestEngine::new(test_config());
    let result = engine.run(&mut strategy, &rows, Some(&frame)).unwrap();

    // Heavy bid-side depth -> persistent long entries.
    assert!(result.total_trades > 0, "bullish book should trigger longs");
    assert!(result.equity_curve.last().unwrap().position > 0.0);
}

#[test]
fn backtest_is_deterministic() {
    let rows: Vec<TickRow> = (0..50)
        .map(|i| {
            let level = 100.0 + (i as f64 * 0.9).cos();
            tick(i, level, level + 0.1)
        })
        .collect();

    let run = || {
        let mut strategy =
            ScriptedStrategy::new(vec![(3, 1, 200.0, 0.0), (30, -1, 200.0, 0.0)]);
        let mut engine = BacktestEngine::new(test_config());
        engine.run(&mut strategy, &rows, None).unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.final_equity, b.final_equity);
    assert_eq!(a.realized_pnl, b.realized_pnl);
    assert_eq!(a.returns, b.returns);
}
