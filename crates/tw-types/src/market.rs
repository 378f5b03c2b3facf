use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CoreError;

/// An exchange-qualified equity code, e.g. `sh600000` or `sz000001`.
///
/// Symbols are normalized to lower case on construction and treated as
/// opaque keys everywhere except for market-bucket classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric part of the code, with any exchange prefix stripped.
    pub fn code_digits(&self) -> &str {
        self.0.trim_start_matches(|c: char| c.is_ascii_alphabetic())
    }

    /// Market bucket derived from the first three digits of the code.
    pub fn bucket(&self) -> MarketBucket {
        match self.code_digits().get(..3) {
            Some("600" | "601" | "603" | "605") => MarketBucket::MainBoardSh,
            Some("000" | "002" | "003") => MarketBucket::MainBoardSz,
            Some("300") => MarketBucket::GrowthEnterprise,
            Some("688") => MarketBucket::SciTechInnovation,
            _ => MarketBucket::Unknown,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(code: &str) -> Self {
        Symbol::new(code)
    }
}

/// Coarse market classification used for exposure bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketBucket {
    MainBoardSh,
    MainBoardSz,
    GrowthEnterprise,
    SciTechInnovation,
    Unknown,
}

impl fmt::Display for MarketBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketBucket::MainBoardSh => "main-board-sh",
            MarketBucket::MainBoardSz => "main-board-sz",
            MarketBucket::GrowthEnterprise => "growth-enterprise",
            MarketBucket::SciTechInnovation => "sci-tech-innovation",
            MarketBucket::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// One market snapshot for a symbol, produced by an external provider per
/// tick and discarded after processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: Symbol,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub amount: Decimal,
    pub pre_close: Decimal,
    pub change: Decimal,
    pub change_pct: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl MarketData {
    /// Check the structural invariants of a snapshot.
    ///
    /// `grace` bounds how far in the future the timestamp may lie (provider
    /// clocks are not trusted to the millisecond).
    pub fn validate(&self, grace: Duration) -> Result<(), CoreError> {
        if self.low > self.open || self.low > self.close {
            return Err(CoreError::Validation(format!(
                "{}: low {} above open/close",
                self.symbol, self.low
            )));
        }
        if self.high < self.open || self.high < self.close {
            return Err(CoreError::Validation(format!(
                "{}: high {} below open/close",
                self.symbol, self.high
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(CoreError::Validation(format!(
                "{}: negative volume {}",
                self.symbol, self.volume
            )));
        }
        if self.timestamp > Utc::now() + grace {
            return Err(CoreError::Validation(format!(
                "{}: timestamp {} is in the future",
                self.symbol, self.timestamp
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(symbol: &str, close: Decimal) -> MarketData {
        MarketData {
            symbol: Symbol::new(symbol),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(10000),
            amount: close * dec!(10000),
            pre_close: close,
            change: Decimal::ZERO,
            change_pct: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn symbol_normalizes_case() {
        assert_eq!(Symbol::new(" SH600000 ").as_str(), "sh600000");
    }

    #[test]
    fn bucket_classification() {
        assert_eq!(Symbol::new("sh600000").bucket(), MarketBucket::MainBoardSh);
        assert_eq!(Symbol::new("sh601988").bucket(), MarketBucket::MainBoardSh);
        assert_eq!(Symbol::new("sz000001").bucket(), MarketBucket::MainBoardSz);
        assert_eq!(Symbol::new("sz002594").bucket(), MarketBucket::MainBoardSz);
        assert_eq!(
            Symbol::new("sz300750").bucket(),
            MarketBucket::GrowthEnterprise
        );
        assert_eq!(
            Symbol::new("sh688981").bucket(),
            MarketBucket::SciTechInnovation
        );
        assert_eq!(Symbol::new("sh900901").bucket(), MarketBucket::Unknown);
        assert_eq!(Symbol::new("xx").bucket(), MarketBucket::Unknown);
    }

    #[test]
    fn valid_snapshot_passes() {
        let md = snapshot("sh600000", dec!(10.5));
        assert!(md.validate(Duration::seconds(60)).is_ok());
    }

    #[test]
    fn low_above_close_rejected() {
        let mut md = snapshot("sh600000", dec!(10));
        md.low = dec!(11);
        assert!(md.validate(Duration::seconds(60)).is_err());
    }

    #[test]
    fn future_timestamp_rejected() {
        let mut md = snapshot("sh600000", dec!(10));
        md.timestamp = Utc::now() + Duration::minutes(10);
        assert!(md.validate(Duration::seconds(60)).is_err());
    }

    #[test]
    fn negative_volume_rejected() {
        let mut md = snapshot("sh600000", dec!(10));
        md.volume = dec!(-1);
        assert!(md.validate(Duration::seconds(60)).is_err());
    }
}
