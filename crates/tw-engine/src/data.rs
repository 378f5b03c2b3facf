//! Market-data provider seam.
//!
//! The fan-in of real tick/K-line feeds lives outside this crate; the
//! scheduler only needs one snapshot per symbol per tick.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use tw_types::{CoreError, MarketData, Symbol};

/// One-snapshot-per-call market data source.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(&self, symbol: &Symbol) -> Result<MarketData, CoreError>;
}

/// Provider backed by a settable in-memory quote table. Used by tests and
/// as an idle stand-in when no feed is configured.
#[derive(Debug, Default)]
pub struct FixtureProvider {
    quotes: DashMap<Symbol, MarketData>,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, data: MarketData) {
        self.quotes.insert(data.symbol.clone(), data);
    }

    /// Convenience: a flat snapshot at `close`.
    pub fn set_close(&self, symbol: &Symbol, close: Decimal) {
        self.set_quote(MarketData {
            symbol: symbol.clone(),
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::from(10_000),
            amount: close * Decimal::from(10_000),
            pre_close: close,
            change: Decimal::ZERO,
            change_pct: Decimal::ZERO,
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl MarketDataProvider for FixtureProvider {
    async fn fetch(&self, symbol: &Symbol) -> Result<MarketData, CoreError> {
        self.quotes
            .get(symbol)
            .map(|entry| {
                let mut data = entry.clone();
                data.timestamp = Utc::now();
                data
            })
            .ok_or_else(|| CoreError::DataUnavailable(symbol.to_string()))
    }
}

/// Quote provider over the broker bridge's HTTP service.
///
/// `GET {base}/quote?symbol=<code>` with the shared response envelope; the
/// data object carries OHLC, volume, amount, and pre-close fields.
pub struct HttpQuoteProvider {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpQuoteProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn parse_quote(symbol: &Symbol, data: &Value) -> Result<MarketData, CoreError> {
        let field = |keys: &[&str]| -> Result<Decimal, CoreError> {
            for key in keys {
                match data.get(key) {
                    Some(Value::Number(n)) => {
                        return Decimal::from_str(&n.to_string())
                            .map_err(|e| CoreError::DataUnavailable(e.to_string()))
                    }
                    Some(Value::String(s)) => {
                        return Decimal::from_str(s.trim())
                            .map_err(|e| CoreError::DataUnavailable(e.to_string()))
                    }
                    _ => continue,
                }
            }
            Err(CoreError::DataUnavailable(format!(
                "{symbol}: missing field {keys:?}"
            )))
        };

        let close = field(&["close", "price", "现价"])?;
        let pre_close = field(&["pre_close", "昨收"]).unwrap_or(close);
        Ok(MarketData {
            symbol: symbol.clone(),
            open: field(&["open", "今开"]).unwrap_or(close),
            high: field(&["high", "最高"]).unwrap_or(close),
            low: field(&["low", "最低"]).unwrap_or(close),
            close,
            volume: field(&["volume", "成交量"]).unwrap_or(Decimal::ZERO),
            amount: field(&["amount", "成交额"]).unwrap_or(Decimal::ZERO),
            pre_close,
            change: close - pre_close,
            change_pct: if pre_close > Decimal::ZERO {
                (close - pre_close) / pre_close
            } else {
                Decimal::ZERO
            },
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl MarketDataProvider for HttpQuoteProvider {
    async fn fetch(&self, symbol: &Symbol) -> Result<MarketData, CoreError> {
        let url = format!("{}/quote", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("symbol", symbol.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CoreError::DataUnavailable(format!("{symbol}: {e}")))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::DataUnavailable(format!("{symbol}: {e}")))?;

        if !body.get("success").and_then(Value::as_bool).unwrap_or(false) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("quote request failed");
            return Err(CoreError::DataUnavailable(format!("{symbol}: {message}")));
        }
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let quote = Self::parse_quote(symbol, &data)?;
        quote.validate(chrono::Duration::minutes(5))?;
        Ok(quote)
    }
}
