//! Built-in strategies, registered by `type` name.

pub mod ma_cross;
pub mod momentum;
pub mod rsi;

pub use ma_cross::MaCrossStrategy;
pub use momentum::MomentumStrategy;
pub use rsi::RsiStrategy;

use crate::strategy::{Strategy, StrategyError};

/// Instantiate a strategy by its configured `type`.
pub fn build_strategy(kind: &str) -> Result<Box<dyn Strategy>, StrategyError> {
    match kind {
        "ma_cross" => Ok(Box::new(MaCrossStrategy::new())),
        "rsi" => Ok(Box::new(RsiStrategy::new())),
        "momentum" => Ok(Box::new(MomentumStrategy::new())),
        other => Err(StrategyError::UnknownKind(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_build() {
        assert!(build_strategy("ma_cross").is_ok());
        assert!(build_strategy("rsi").is_ok());
        assert!(build_strategy("momentum").is_ok());
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(matches!(
            build_strategy("astrology"),
            Err(StrategyError::UnknownKind(_))
        ));
    }
}
