//! Broker access layer: the capability trait, the HTTP JSON adapter, the
//! in-process simulator, and the managed connector that owns reconnection
//! and call serialization.

pub mod broker;
pub mod connector;
pub mod http;
pub mod sim;

pub use broker::{BrokerApi, BrokerError, BrokerResult};
pub use connector::{BrokerConnector, ConnectorConfig};
pub use http::HttpBroker;
pub use sim::{SimBroker, SimBrokerConfig};
