//! RSI mean-reversion.
//!
//! Buys oversold symbols, sells overbought ones, using a simple-average RSI
//! over a fixed period.

use rust_decimal::prelude::ToPrimitive;
use std::collections::VecDeque;

use tw_types::{MarketData, Signal, SignalKind, Symbol};

use crate::strategy::{param_f64, param_usize, Strategy, StrategyError};

pub struct RsiStrategy {
    symbol: Option<Symbol>,
    period: usize,
    oversold: f64,
    overbought: f64,
    closes: VecDeque<f64>,
}

impl RsiStrategy {
    pub fn new() -> Self {
        Self {
            symbol: None,
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
            closes: VecDeque::new(),
        }
    }

    /// Simple-average RSI over the buffered closes. `None` until warm.
    fn rsi(&self) -> Option<f64> {
        if self.closes.len() < self.period + 1 {
            return None;
        }
        let mut gains = 0.0;
        let mut losses = 0.0;
        let closes: Vec<f64> = self.closes.iter().copied().collect();
        for pair in closes.windows(2) {
            let change = pair[1] - pair[0];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }
        if gains + losses == 0.0 {
            return Some(50.0);
        }
        if losses == 0.0 {
            return Some(100.0);
        }
        let rs = (gains / self.period as f64) / (losses / self.period as f64);
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &str {
        "rsi"
    }

    fn init(&mut self, symbol: &Symbol, params: &serde_json::Value) -> Result<(), StrategyError> {
        self.symbol = Some(symbol.clone());
        self.period = param_usize(params, "period", 14)?;
        self.oversold = param_f64(params, "oversold", 30.0)?;
        self.overbought = param_f64(params, "overbought", 70.0)?;
        if self.period < 2 || self.oversold >= self.overbought {
            return Err(StrategyError::InvalidParameter {
                parameter: "period".into(),
                message: "period >= 2 and oversold < overbought required".into(),
            });
        }
        Ok(())
    }

    fn generate_signal(&mut self, data: &MarketData) -> Option<Signal> {
        let close = data.close.to_f64()?;
        self.closes.push_back(close);
        if self.closes.len() > self.period + 1 {
            self.closes.pop_front();
        }
        let rsi = self.rsi()?;

        let (kind, strength) = if rsi <= self.oversold {
            (SignalKind::Buy, (self.oversold - rsi) / self.oversold)
        } else if rsi >= self.overbought {
            (
                SignalKind::Sell,
                (rsi - self.overbought) / (100.0 - self.overbought),
            )
        } else {
            (SignalKind::Hold, 0.0)
        };
        Some(
            Signal::new(data.symbol.clone(), kind, strength.max(0.1), data.close)
                .with_reason(format!("rsi({}) = {:.1}", self.period, rsi)),
        )
    }
}
