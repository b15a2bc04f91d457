//! Strategy protocol and the two reference strategies.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::trace;

use market_core::{EngineError, FeatureRow};
use signal_engine::AlphaSignal;

/// Order type attached to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Limit,
    Market,
}

/// Trading signal emitted by a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    /// +1 buy, -1 sell, 0 flat.
    pub direction: i8,
    /// Target quantity, must be > 0 to act.
    pub size: f64,
    /// Limit price; 0 means "at the touch".
    pub price: f64,
    /// Execution aggressiveness in [0, 1].
    pub urgency: f64,
    /// Expected alpha behind the signal.
    pub alpha: f64,
    /// Signal confidence in [0, 1].
    pub confidence: f64,
    pub order_type: OrderType,
}

impl Signal {
    pub fn new(timestamp: i64, direction: i8, size: f64, price: f64) -> Self {
        Self {
            timestamp,
            direction,
            size,
            price,
            urgency: 0.5,
            alpha: 0.0,
            confidence: 0.5,
            order_type: OrderType::Limit,
        }
    }
}

/// Execution fill notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fill {
    pub timestamp: i64,
    /// Monotonically increasing per run.
    pub order_id: u64,
    /// +1 buy, -1 sell.
    pub side: i8,
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    /// Combined slippage and impact magnitude.
    pub slippage: f64,
}

/// Market view handed to the strategy on every event.
#[derive(Debug, Clone, Copy)]
pub struct MarketState<'a> {
    pub timestamp: i64,
    pub mid_price: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub spread: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub last_trade_price: f64,
    pub last_trade_size: f64,
    /// Pre-computed features for this event, if supplied to the run.
    pub features: Option<FeatureRow<'a>>,

    // Portfolio view
    pub position: f64,
    pub avg_cost: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub cash: f64,
    pub equity: f64,
}

impl MarketState<'_> {
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.and_then(|row| row.get(name))
    }
}

/// Trading strategy callback interface.
///
/// Strategies never mutate engine state; they observe a [`MarketState`] and
/// may return one [`Signal`]. An `Err` from `on_market_data` terminates the
/// run as a strategy fault.
pub trait Strategy {
    fn name(&self) -> &str {
        "unnamed"
    }

    fn on_market_data(&mut self, state: &MarketState<'_>)
        -> Result<Option<Signal>, EngineError>;

    fn on_fill(&mut self, _fill: &Fill) {}

    fn on_day_start(&mut self, _date: NaiveDate) {}

    fn on_day_end(&mut self, _date: NaiveDate) {}

    /// Clear internal state before a fresh run.
    fn reset(&mut self) {}
}

// --- Reference strategies ---

/// Book-imbalance threshold strategy: long when `imbalance_5` exceeds the
/// threshold (below the position cap), short symmetrically. Fixed clip.
pub struct SimpleStrategy {
    pub imbalance_threshold: f64,
    pub trade_size: f64,
    pub max_position: f64,
}

impl SimpleStrategy {
    pub fn new(imbalance_threshold: f64, max_position: f64) -> Self {
        Self {
            imbalance_threshold,
            trade_size: 100.0,
            max_position,
        }
    }
}

impl Strategy for SimpleStrategy {
    fn name(&self) -> &str {
        "simple_strategy"
    }

    fn on_market_data(
        &mut self,
        state: &MarketState<'_>,
    ) -> Result<Option<Signal>, EngineError> {
        let imbalance = state.feature("imbalance_5").unwrap_or(0.0);

        if state.position < self.max_position && imbalance > self.imbalance_threshold {
            let mut signal = Signal::new(state.timestamp, 1, self.trade_size, state.bid_price);
            signal.alpha = imbalance;
            return Ok(Some(signal));
        }
        if state.position > -self.max_position && imbalance < -self.imbalance_threshold {
            let mut signal = Signal::new(state.timestamp, -1, self.trade_size, state.ask_price);
            signal.alpha = imbalance;
            return Ok(Some(signal));
        }
        Ok(None)
    }
}

/// Alpha-model strategy: queries the fitted model per tick, scales entries
/// by `|alpha| / 0.05` against the position cap, exits when the signal
/// fades below the exit threshold. Prediction failures count as alpha = 0.
pub struct AlphaStrategy {
    model: AlphaSignal,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub max_position: f64,
    current_alpha: f64,
}

/// Alpha magnitude treated as "full conviction" for sizing and urgency.
const FULL_CONVICTION_ALPHA: f64 = 0.05;

impl AlphaStrategy {
    pub fn new(model: AlphaSignal, entry_threshold: f64, exit_threshold: f64) -> Self {
        Self {
            model,
            entry_threshold,
            exit_threshold,
            max_position: 1000.0,
            current_alpha: 0.0,
        }
    }

    pub fn current_alpha(&self) -> f64 {
        self.current_alpha
    }
}

impl Strategy for AlphaStrategy {
    fn name(&self) -> &str {
        "alpha_strategy"
    }

    fn on_market_data(
        &mut self,
        state: &MarketState<'_>,
    ) -> Result<Option<Signal>, EngineError> {
        let alpha = match state.features {
            Some(row) => self.model.predict_one(&row).unwrap_or_else(|e| {
                trace!(error = %e, "alpha predict failed; treating as 0");
                0.0
            }),
            None => 0.0,
        };
        self.current_alpha = alpha;

        let conviction = (alpha.abs() / FULL_CONVICTION_ALPHA).min(1.0);

        // Entries while below the cap.
        if state.position.abs() < self.max_position {
            if alpha > self.entry_threshold {
                let size = (self.max_position - state.position)
                    .min(self.max_position * alpha.abs() / FULL_CONVICTION_ALPHA);
                let mut signal = Signal::new(state.timestamp, 1, size, state.bid_price);
                signal.urgency = conviction;
                signal.alpha = alpha;
                signal.confidence = 0.6;
                return Ok(Some(signal));
            }
            if alpha < -self.entry_threshold {
                let size = (self.max_position + state.position)
                    .min(self.max_position * alpha.abs() / FULL_CONVICTION_ALPHA);
                let mut signal = Signal::new(state.timestamp, -1, size, state.ask_price);
                signal.urgency = conviction;
                signal.alpha = alpha;
                signal.confidence = 0.6;
                return Ok(Some(signal));
            }
        }

        // Exits when the signal fades.
        if state.position > 0.0 && alpha < self.exit_threshold {
            let mut signal = Signal::new(state.timestamp, -1, state.position, state.ask_price);
            signal.urgency = 0.3;
            signal.alpha = alpha;
            return Ok(Some(signal));
        }
        if state.position < 0.0 && alpha > -self.exit_threshold {
            let mut signal = Signal::new(state.timestamp, 1, -state.position, state.bid_price);
            signal.urgency = 0.3;
            signal.alpha = alpha;
            return Ok(Some(signal));
        }

        Ok(None)
    }

    fn reset(&mut self) {
        self.current_alpha = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::FeatureFrame;

    fn state_with_features<'a>(
        frame: &'a FeatureFrame,
        position: f64,
    ) -> MarketState<'a> {
        MarketState {
            timestamp: 1_000,
            mid_price: 100.0,
            bid_price: 99.95,
            ask_price: 100.05,
            spread: 0.1,
            bid_size: 100.0,
            ask_size: 100.0,
            last_trade_price: 100.0,
            last_trade_size: 10.0,
            features: Some(frame.row_view(0)),
            position,
            avg_cost: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            cash: 100_000.0,
            equity: 100_000.0,
        }
    }

    fn imbalance_frame(value: f64) -> FeatureFrame {
        let mut frame = FeatureFrame::new(vec!["imbalance_5"]);
        frame.push_row(&[value]).unwrap();
        frame
    }

    #[test]
    fn simple_strategy_goes_long_on_positive_imbalance() {
        let frame = imbalance_frame(0.5);
        let mut strategy = SimpleStrategy::new(0.3, 100.0);
        let signal = strategy
            .on_market_data(&state_with_features(&frame, 0.0))
            .unwrap()
            .expect("imbalance above threshold should trade");
        assert_eq!(signal.direction, 1);
        assert_eq!(signal.size, 100.0);
        assert_eq!(signal.price, 99.95);
    }

    #[test]
    fn simple_strategy_respects_position_cap() {
        let frame = imbalance_frame(0.5);
        let mut strategy = SimpleStrategy::new(0.3, 100.0);
        let signal = strategy
            .on_market_data(&state_with_features(&frame, 100.0))
            .unwrap();
        assert!(signal.is_none(), "at the cap, no further longs");
    }

    #[test]
    fn simple_strategy_quiet_below_threshold() {
        let frame = imbalance_frame(0.1);
        let mut strategy = SimpleStrategy::new(0.3, 100.0);
        assert!(strategy
            .on_market_data(&state_with_features(&frame, 0.0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn simple_strategy_shorts_on_negative_imbalance() {
        let frame = imbalance_frame(-0.6);
        let mut strategy = SimpleStrategy::new(0.3, 100.0);
        let signal = strategy
            .on_market_data(&state_with_features(&frame, 0.0))
            .unwrap()
            .unwrap();
        assert_eq!(signal.direction, -1);
        assert_eq!(signal.price, 100.05);
    }

    #[test]
    fn signal_defaults() {
        let signal = Signal::new(0, 1, 100.0, 100.0);
        assert_eq!(signal.urgency, 0.5);
        assert_eq!(signal.alpha, 0.0);
        assert_eq!(signal.confidence, 0.5);
        assert_eq!(signal.order_type, OrderType::Limit);
    }
}
