//! Moving-average crossover.
//!
//! Buys when the fast simple moving average crosses above the slow one,
//! sells on the opposite cross, holds otherwise.

use rust_decimal::prelude::ToPrimitive;
use std::collections::VecDeque;

use tw_types::{MarketData, Signal, SignalKind, Symbol};

use crate::strategy::{param_usize, Strategy, StrategyError};

pub struct MaCrossStrategy {
    symbol: Option<Symbol>,
    fast: usize,
    slow: usize,
    closes: VecDeque<f64>,
    prev_diff: Option<f64>,
}

impl MaCrossStrategy {
    pub fn new() -> Self {
        Self {
            symbol: None,
            fast: 5,
            slow: 20,
            closes: VecDeque::new(),
            prev_diff: None,
        }
    }

    fn sma(&self, period: usize) -> f64 {
        self.closes.iter().rev().take(period).sum::<f64>() / period as f64
    }
}

impl Default for MaCrossStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for MaCrossStrategy {
    fn name(&self) -> &str {
        "ma_cross"
    }

    fn init(&mut self, symbol: &Symbol, params: &serde_json::Value) -> Result<(), StrategyError> {
        self.symbol = Some(symbol.clone());
        self.fast = param_usize(params, "fast", 5)?;
        self.slow = param_usize(params, "slow", 20)?;
        if self.fast >= self.slow {
            return Err(StrategyError::InvalidParameter {
                parameter: "fast".into(),
                message: format!("fast ({}) must be below slow ({})", self.fast, self.slow),
            });
        }
        Ok(())
    }

    fn generate_signal(&mut self, data: &MarketData) -> Option<Signal> {
        let close = data.close.to_f64()?;
        self.closes.push_back(close);
        if self.closes.len() > self.slow {
            self.closes.pop_front();
        }
        if self.closes.len() < self.slow {
            return None;
        }

        let diff = self.sma(self.fast) - self.sma(self.slow);
        let crossed = match self.prev_diff {
            Some(prev) if prev <= 0.0 && diff > 0.0 => Some(SignalKind::Buy),
            Some(prev) if prev >= 0.0 && diff < 0.0 => Some(SignalKind::Sell),
            _ => None,
        };
        self.prev_diff = Some(diff);

        let kind = crossed.unwrap_or(SignalKind::Hold);
        let strength = match kind {
            SignalKind::Hold => 0.0,
            _ => (diff.abs() / close * 50.0).clamp(0.1, 1.0),
        };
        Some(
            Signal::new(data.symbol.clone(), kind, strength, data.close).with_reason(format!(
                "ma({}/{}) diff {:.4}",
                self.fast, self.slow, diff
            )),
        )
    }
}
