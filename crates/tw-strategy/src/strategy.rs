use chrono::NaiveDate;
use thiserror::Error;

use tw_types::{MarketData, Signal, Symbol, Trade};

/// Strategy-layer errors.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("unknown strategy type: {0}")]
    UnknownKind(String),

    #[error("invalid parameter {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },
}

/// A single trading strategy bound to one symbol.
///
/// Strategies are pure per call: they read the snapshot, update their own
/// rolling windows, and return a value. No I/O, no shared state.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Bind the strategy to a symbol and apply its configured parameters.
    fn init(&mut self, symbol: &Symbol, params: &serde_json::Value) -> Result<(), StrategyError>;

    /// Evaluate one market snapshot. `None` while the strategy is still
    /// warming up its windows.
    fn generate_signal(&mut self, data: &MarketData) -> Option<Signal>;

    /// Observe an executed fill on the bound symbol.
    fn on_trade(&mut self, _trade: &Trade) {}

    /// Observe the session close.
    fn on_daily_close(&mut self, _date: NaiveDate) {}
}

/// Pull a numeric parameter out of a JSON params object, falling back to a
/// default when absent.
pub(crate) fn param_usize(
    params: &serde_json::Value,
    key: &str,
    default: usize,
) -> Result<usize, StrategyError> {
    match params.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| StrategyError::InvalidParameter {
                parameter: key.to_string(),
                message: format!("expected unsigned integer, got {value}"),
            }),
    }
}

pub(crate) fn param_f64(
    params: &serde_json::Value,
    key: &str,
    default: f64,
) -> Result<f64, StrategyError> {
    match params.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| StrategyError::InvalidParameter {
                parameter: key.to_string(),
                message: format!("expected number, got {value}"),
            }),
    }
}
