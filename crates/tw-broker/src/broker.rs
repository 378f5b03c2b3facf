//! Broker capability set.

use async_trait::async_trait;
use rust_decimal::Decimal;

use tw_types::{Balance, Order, PositionState, Symbol, Trade};

/// Errors surfaced by broker operations, categorized so callers can decide
/// between retry, surface, and abort.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No live session; the connector may retry.
    #[error("not connected to broker")]
    NotConnected,

    /// Business rejection from the broker (bad price, insufficient funds).
    /// Never retried.
    #[error("rejected by broker: {0}")]
    RemoteRejected(String),

    /// Network-level failure, including exceeded deadlines.
    #[error("transport error: {0}")]
    Transport(String),

    /// The broker answered with a payload we could not interpret.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        BrokerError::Transport(err.to_string())
    }
}

/// Result alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Core broker interface.
///
/// Implementations talk to a real execution endpoint (see
/// [`crate::http::HttpBroker`]) or simulate fills locally (see
/// [`crate::sim::SimBroker`]). Quantities are share counts in whole lots;
/// order and trade identifiers are opaque broker-assigned strings.
///
/// Implementations do not serialize or deadline their own calls; the
/// [`crate::connector::BrokerConnector`] owns both concerns.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Authenticate a session with the broker process.
    async fn login(&self, username: &str, password: &str, client_path: &str) -> BrokerResult<()>;

    /// Tear down the session.
    async fn logout(&self) -> BrokerResult<()>;

    /// Submit a buy for `quantity` shares. Returns the broker order id.
    async fn buy(&self, symbol: &Symbol, price: Decimal, quantity: Decimal) -> BrokerResult<String>;

    /// Submit a sell for `quantity` shares. Returns the broker order id.
    async fn sell(&self, symbol: &Symbol, price: Decimal, quantity: Decimal)
        -> BrokerResult<String>;

    /// Cancel an open order.
    async fn cancel(&self, order_id: &str) -> BrokerResult<()>;

    /// Current account balance.
    async fn balance(&self) -> BrokerResult<Balance>;

    /// All positions currently held at the broker.
    async fn positions(&self) -> BrokerResult<Vec<PositionState>>;

    /// Today's orders.
    async fn orders(&self) -> BrokerResult<Vec<Order>>;

    /// Today's executions.
    async fn today_trades(&self) -> BrokerResult<Vec<Trade>>;

    /// Liveness probe.
    async fn is_connected(&self) -> bool;
}
