//! In-process simulated broker.
//!
//! Fills every order immediately at the requested price. Used for sandbox
//! runs and as the execution stub in engine tests; no external dependencies.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::info;

use tw_types::{Balance, Order, OrderStatus, PositionState, Side, Symbol, Trade};

use crate::broker::{BrokerApi, BrokerError, BrokerResult};

/// Configuration for the simulated broker.
#[derive(Debug, Clone)]
pub struct SimBrokerConfig {
    pub initial_cash: Decimal,
    /// Commission as a fraction of traded notional.
    pub commission_rate: Decimal,
}

impl Default for SimBrokerConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(1_000_000),
            commission_rate: Decimal::new(3, 4), // 0.03%
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    cash: Decimal,
    holdings: HashMap<Symbol, Holding>,
    orders: Vec<Order>,
    trades: Vec<Trade>,
    next_id: u64,
}

#[derive(Debug, Clone)]
struct Holding {
    quantity: Decimal,
    avg_cost: Decimal,
    last_price: Decimal,
}

/// A broker that executes everything instantly against its own books.
pub struct SimBroker {
    config: SimBrokerConfig,
    state: Mutex<SimState>,
}

impl SimBroker {
    pub fn new(config: SimBrokerConfig) -> Self {
        let cash = config.initial_cash;
        Self {
            config,
            state: Mutex::new(SimState {
                cash,
                ..Default::default()
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SimBrokerConfig::default())
    }

    /// Seed a holding directly (test setup).
    pub fn seed_position(&self, symbol: &Symbol, quantity: Decimal, avg_cost: Decimal) {
        self.state.lock().holdings.insert(
            symbol.clone(),
            Holding {
                quantity,
                avg_cost,
                last_price: avg_cost,
            },
        );
    }

    fn execute(
        &self,
        symbol: &Symbol,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> BrokerResult<String> {
        if quantity <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(BrokerError::RemoteRejected(format!(
                "invalid order: {quantity} @ {price}"
            )));
        }

        let mut state = self.state.lock();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }

        let notional = price * quantity;
        let commission = notional * self.config.commission_rate;
        match side {
            Side::Buy => {
                if notional + commission > state.cash {
                    return Err(BrokerError::RemoteRejected(format!(
                        "insufficient funds: need {}, have {}",
                        notional + commission,
                        state.cash
                    )));
                }
                state.cash -= notional + commission;
                let holding = state.holdings.entry(symbol.clone()).or_insert(Holding {
                    quantity: Decimal::ZERO,
                    avg_cost: Decimal::ZERO,
                    last_price: price,
                });
                let total_cost = holding.quantity * holding.avg_cost + notional;
                holding.quantity += quantity;
                holding.avg_cost = total_cost / holding.quantity;
                holding.last_price = price;
            }
            Side::Sell => {
                let holding = state.holdings.get_mut(symbol).ok_or_else(|| {
                    BrokerError::RemoteRejected(format!("no position in {symbol}"))
                })?;
                if quantity > holding.quantity {
                    return Err(BrokerError::RemoteRejected(format!(
                        "insufficient position: selling {quantity}, hold {}",
                        holding.quantity
                    )));
                }
                holding.quantity -= quantity;
                holding.last_price = price;
                if holding.quantity == Decimal::ZERO {
                    state.holdings.remove(symbol);
                }
                state.cash += notional - commission;
            }
        }

        state.next_id += 1;
        let order_id = format!("SIM{}", state.next_id);
        let trade_id = format!("T{}", state.next_id);

        let mut order = Order::submitted(order_id.clone(), symbol.clone(), side, price, quantity);
        order.record_fill(quantity);
        state.orders.push(order);
        state.trades.push(Trade {
            trade_id,
            order_id: order_id.clone(),
            symbol: symbol.clone(),
            side,
            price,
            quantity,
            commission,
            traded_at: Utc::now(),
        });

        info!(%symbol, ?side, %price, %quantity, order_id, "sim fill");
        Ok(order_id)
    }
}

#[async_trait]
impl BrokerApi for SimBroker {
    async fn login(&self, _username: &str, _password: &str, _client_path: &str) -> BrokerResult<()> {
        self.state.lock().connected = true;
        Ok(())
    }

    async fn logout(&self) -> BrokerResult<()> {
        self.state.lock().connected = false;
        Ok(())
    }

    async fn buy(
        &self,
        symbol: &Symbol,
        price: Decimal,
        quantity: Decimal,
    ) -> BrokerResult<String> {
        self.execute(symbol, Side::Buy, price, quantity)
    }

    async fn sell(
        &self,
        symbol: &Symbol,
        price: Decimal,
        quantity: Decimal,
    ) -> BrokerResult<String> {
        self.execute(symbol, Side::Sell, price, quantity)
    }

    async fn cancel(&self, order_id: &str) -> BrokerResult<()> {
        let mut state = self.state.lock();
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| BrokerError::RemoteRejected(format!("unknown order {order_id}")))?;
        if !order.status.can_cancel() {
            return Err(BrokerError::RemoteRejected("order already filled".into()));
        }
        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn balance(&self) -> BrokerResult<Balance> {
        let state = self.state.lock();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        let market_value: Decimal = state
            .holdings
            .values()
            .map(|h| h.quantity * h.last_price)
            .sum();
        Ok(Balance {
            total_assets: state.cash + market_value,
            cash: state.cash,
            available: state.cash,
            frozen: Decimal::ZERO,
            market_value,
            profit: state
                .holdings
                .values()
                .map(|h| h.quantity * (h.last_price - h.avg_cost))
                .sum(),
        })
    }

    async fn positions(&self) -> BrokerResult<Vec<PositionState>> {
        let state = self.state.lock();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        Ok(state
            .holdings
            .iter()
            .map(|(symbol, h)| {
                let mut pos = PositionState::opened(
                    symbol.clone(),
                    symbol.as_str(),
                    h.quantity,
                    h.avg_cost,
                );
                pos.refresh_price(h.last_price);
                pos
            })
            .collect())
    }

    async fn orders(&self) -> BrokerResult<Vec<Order>> {
        Ok(self.state.lock().orders.clone())
    }

    async fn today_trades(&self) -> BrokerResult<Vec<Trade>> {
        Ok(self.state.lock().trades.clone())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::new("sh600000")
    }

    async fn connected_broker() -> SimBroker {
        let broker = SimBroker::new(SimBrokerConfig {
            initial_cash: dec!(100_000),
            commission_rate: Decimal::ZERO,
        });
        broker.login("u", "p", "").await.unwrap();
        broker
    }

    #[tokio::test]
    async fn requires_login() {
        let broker = SimBroker::with_defaults();
        let err = broker.buy(&sym(), dec!(10), dec!(100)).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected));
    }

    #[tokio::test]
    async fn buy_fills_immediately_and_books_trade() {
        let broker = connected_broker().await;
        let order_id = broker.buy(&sym(), dec!(10), dec!(100)).await.unwrap();

        let orders = broker.orders().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, order_id);
        assert_eq!(orders[0].status, OrderStatus::Filled);

        let trades = broker.today_trades().await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].order_id, order_id);
        assert_eq!(trades[0].quantity, dec!(100));

        let balance = broker.balance().await.unwrap();
        assert_eq!(balance.cash, dec!(99_000));
        assert_eq!(balance.market_value, dec!(1000));
        assert_eq!(balance.total_assets, dec!(100_000));
    }

    #[tokio::test]
    async fn buy_beyond_cash_is_rejected() {
        let broker = connected_broker().await;
        let err = broker
            .buy(&sym(), dec!(10), dec!(100_000))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::RemoteRejected(_)));
    }

    #[tokio::test]
    async fn sell_releases_position_and_cash() {
        let broker = connected_broker().await;
        broker.buy(&sym(), dec!(10), dec!(200)).await.unwrap();
        broker.sell(&sym(), dec!(12), dec!(200)).await.unwrap();

        assert!(broker.positions().await.unwrap().is_empty());
        let balance = broker.balance().await.unwrap();
        assert_eq!(balance.cash, dec!(100_400));
    }

    #[tokio::test]
    async fn oversell_is_rejected() {
        let broker = connected_broker().await;
        broker.buy(&sym(), dec!(10), dec!(100)).await.unwrap();
        let err = broker.sell(&sym(), dec!(10), dec!(200)).await.unwrap_err();
        assert!(matches!(err, BrokerError::RemoteRejected(_)));
    }

    #[tokio::test]
    async fn cancel_filled_order_reports_already_filled() {
        let broker = connected_broker().await;
        let order_id = broker.buy(&sym(), dec!(10), dec!(100)).await.unwrap();
        let err = broker.cancel(&order_id).await.unwrap_err();
        match err {
            BrokerError::RemoteRejected(msg) => assert!(msg.contains("already filled")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
