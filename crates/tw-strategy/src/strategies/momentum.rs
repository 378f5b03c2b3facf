//! Rate-of-change momentum breakout.

use rust_decimal::prelude::ToPrimitive;
use std::collections::VecDeque;

use tw_types::{MarketData, Signal, SignalKind, Symbol};

use crate::strategy::{param_f64, param_usize, Strategy, StrategyError};

pub struct MomentumStrategy {
    symbol: Option<Symbol>,
    lookback: usize,
    threshold: f64,
    closes: VecDeque<f64>,
}

impl MomentumStrategy {
    pub fn new() -> Self {
        Self {
            symbol: None,
            lookback: 10,
            threshold: 0.02,
            closes: VecDeque::new(),
        }
    }
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn init(&mut self, symbol: &Symbol, params: &serde_json::Value) -> Result<(), StrategyError> {
        self.symbol = Some(symbol.clone());
        self.lookback = param_usize(params, "lookback", 10)?;
        self.threshold = param_f64(params, "threshold", 0.02)?;
        if self.lookback < 1 || self.threshold <= 0.0 {
            return Err(StrategyError::InvalidParameter {
                parameter: "lookback".into(),
                message: "lookback >= 1 and threshold > 0 required".into(),
            });
        }
        Ok(())
    }

    fn generate_signal(&mut self, data: &MarketData) -> Option<Signal> {
        let close = data.close.to_f64()?;
        self.closes.push_back(close);
        if self.closes.len() > self.lookback + 1 {
            self.closes.pop_front();
        }
        if self.closes.len() < self.lookback + 1 {
            return None;
        }

        let base = *self.closes.front()?;
        if base <= 0.0 {
            return None;
        }
        let roc = close / base - 1.0;
        let kind = if roc > self.threshold {
            SignalKind::Buy
        } else if roc < -self.threshold {
            SignalKind::Sell
        } else {
            SignalKind::Hold
        };
        let strength = (roc.abs() / (self.threshold * 3.0)).clamp(0.1, 1.0);
        Some(
            Signal::new(data.symbol.clone(), kind, strength, data.close)
                .with_reason(format!("roc({}) = {:+.4}", self.lookback, roc)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(close: f64) -> MarketData {
        let close = Decimal::from_f64_retain(close).unwrap();
        MarketData {
            symbol: Symbol::new("sz300750"),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1000),
            amount: dec!(10000),
            pre_close: close,
            change: Decimal::ZERO,
            change_pct: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    fn warmed(lookback: usize, threshold: f64) -> MomentumStrategy {
        let mut strategy = MomentumStrategy::new();
        strategy
            .init(
                &Symbol::new("sz300750"),
                &serde_json::json!({"lookback": lookback, "threshold": threshold}),
            )
            .unwrap();
        strategy
    }

    #[test]
    fn breakout_buys() {
        let mut strategy = warmed(3, 0.02);
        for close in [10.0, 10.0, 10.0] {
            assert!(strategy.generate_signal(&snapshot(close)).is_none());
        }
        let signal = strategy.generate_signal(&snapshot(10.5)).unwrap();
        assert_eq!(signal.kind, SignalKind::Buy);
    }

    #[test]
    fn breakdown_sells() {
        let mut strategy = warmed(3, 0.02);
        for close in [10.0, 10.0, 10.0] {
            strategy.generate_signal(&snapshot(close));
        }
        let signal = strategy.generate_signal(&snapshot(9.5)).unwrap();
        assert_eq!(signal.kind, SignalKind::Sell);
    }

    #[test]
    fn dead_zone_holds() {
        let mut strategy = warmed(3, 0.02);
        for close in [10.0, 10.0, 10.0] {
            strategy.generate_signal(&snapshot(close));
        }
        let signal = strategy.generate_signal(&snapshot(10.1)).unwrap();
        assert_eq!(signal.kind, SignalKind::Hold);
    }
}
