//! HTTP JSON broker adapter.
//!
//! Talks to the broker service described by `trading.broker.service_url`.
//! Every response shares the envelope `{success, message, data, timestamp}`;
//! row payloads use the broker's localized column names, which are mapped to
//! the core entities here. Unknown keys are ignored.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use tw_types::{Balance, Order, OrderStatus, PositionState, Side, Symbol, Trade};

use crate::broker::{BrokerApi, BrokerError, BrokerResult};

/// Shared response envelope of the broker service.
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: String,
}

/// Broker adapter over HTTP JSON.
pub struct HttpBroker {
    base_url: String,
    broker_type: String,
    client: reqwest::Client,
    call_timeout: Duration,
    logged_in: AtomicBool,
}

impl HttpBroker {
    pub fn new(service_url: &str, broker_type: &str, call_timeout: Duration) -> Self {
        Self {
            base_url: service_url.trim_end_matches('/').to_string(),
            broker_type: broker_type.to_string(),
            client: reqwest::Client::new(),
            call_timeout,
            logged_in: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn require_session(&self) -> BrokerResult<()> {
        if self.logged_in.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    async fn post(&self, path: &str, body: Value) -> BrokerResult<Value> {
        let response = self
            .client
            .post(self.url(path))
            .timeout(self.call_timeout)
            .json(&body)
            .send()
            .await?;
        Self::unwrap_envelope(path, &response.text().await?)
    }

    async fn get(&self, path: &str) -> BrokerResult<Value> {
        let response = self
            .client
            .get(self.url(path))
            .timeout(self.call_timeout)
            .send()
            .await?;
        Self::unwrap_envelope(path, &response.text().await?)
    }

    fn unwrap_envelope(path: &str, text: &str) -> BrokerResult<Value> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| BrokerError::Decode(format!("{path}: {e}")))?;
        if !envelope.success {
            return Err(BrokerError::RemoteRejected(envelope.message));
        }
        Ok(envelope.data)
    }

    fn order_id_from(data: &Value) -> BrokerResult<String> {
        field_str(data, &["order_id", "委托编号"])
            .ok_or_else(|| BrokerError::Decode("missing order_id in response".into()))
    }
}

#[async_trait]
impl BrokerApi for HttpBroker {
    async fn login(&self, username: &str, password: &str, client_path: &str) -> BrokerResult<()> {
        self.post(
            "/login",
            json!({
                "broker_type": self.broker_type,
                "username": username,
                "password": password,
                "exe_path": client_path,
            }),
        )
        .await?;
        self.logged_in.store(true, Ordering::SeqCst);
        debug!(broker_type = %self.broker_type, "broker session established");
        Ok(())
    }

    async fn logout(&self) -> BrokerResult<()> {
        let result = self.get("/logout").await;
        self.logged_in.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    async fn buy(
        &self,
        symbol: &Symbol,
        price: Decimal,
        quantity: Decimal,
    ) -> BrokerResult<String> {
        self.require_session()?;
        let data = self
            .post(
                "/buy",
                json!({"symbol": symbol.as_str(), "price": price, "amount": quantity}),
            )
            .await?;
        Self::order_id_from(&data)
    }

    async fn sell(
        &self,
        symbol: &Symbol,
        price: Decimal,
        quantity: Decimal,
    ) -> BrokerResult<String> {
        self.require_session()?;
        let data = self
            .post(
                "/sell",
                json!({"symbol": symbol.as_str(), "price": price, "amount": quantity}),
            )
            .await?;
        Self::order_id_from(&data)
    }

    async fn cancel(&self, order_id: &str) -> BrokerResult<()> {
        self.require_session()?;
        self.post("/cancel", json!({ "order_id": order_id }))
            .await
            .map(|_| ())
    }

    async fn balance(&self) -> BrokerResult<Balance> {
        self.require_session()?;
        let data = self.get("/balance").await?;
        Ok(Balance {
            total_assets: field_decimal(&data, &["total_assets", "总资产"]).unwrap_or_default(),
            cash: field_decimal(&data, &["cash", "资金余额"]).unwrap_or_default(),
            available: field_decimal(&data, &["available", "可用金额"]).unwrap_or_default(),
            frozen: field_decimal(&data, &["frozen", "冻结金额"]).unwrap_or_default(),
            market_value: field_decimal(&data, &["market_value", "总市值"]).unwrap_or_default(),
            profit: field_decimal(&data, &["profit", "盈亏"]).unwrap_or_default(),
        })
    }

    async fn positions(&self) -> BrokerResult<Vec<PositionState>> {
        self.require_session()?;
        let data = self.get("/portfolio").await?;
        let rows = data
            .as_array()
            .ok_or_else(|| BrokerError::Decode("portfolio payload is not an array".into()))?;
        Ok(rows.iter().filter_map(parse_position_row).collect())
    }

    async fn orders(&self) -> BrokerResult<Vec<Order>> {
        self.require_session()?;
        let data = self.get("/orders").await?;
        let rows = data
            .as_array()
            .ok_or_else(|| BrokerError::Decode("orders payload is not an array".into()))?;
        Ok(rows.iter().filter_map(parse_order_row).collect())
    }

    async fn today_trades(&self) -> BrokerResult<Vec<Trade>> {
        self.require_session()?;
        let data = self.get("/today_trades").await?;
        let rows = data
            .as_array()
            .ok_or_else(|| BrokerError::Decode("trades payload is not an array".into()))?;
        Ok(rows.iter().filter_map(parse_trade_row).collect())
    }

    async fn is_connected(&self) -> bool {
        // The service exposes no dedicated health endpoint; a balance read is
        // the cheapest authenticated probe.
        if !self.logged_in.load(Ordering::SeqCst) {
            return false;
        }
        self.get("/balance").await.is_ok()
    }
}

// -- row parsing ------------------------------------------------------------

fn parse_position_row(row: &Value) -> Option<PositionState> {
    let code = field_str(row, &["证券代码", "symbol", "code"])?;
    let quantity = field_decimal(row, &["股票余额", "quantity"])?;
    let avg_cost = field_decimal(row, &["成本价", "cost_price"]).unwrap_or_default();
    let current = field_decimal(row, &["市价", "current_price"]).unwrap_or(avg_cost);

    let mut position =
        PositionState::opened(Symbol::new(&code), &field_str(row, &["证券名称", "name"]).unwrap_or_else(|| code.clone()), quantity, avg_cost);
    position.available = field_decimal(row, &["可用余额", "available"]).unwrap_or(quantity);
    position.refresh_price(current);
    Some(position)
}

fn parse_order_row(row: &Value) -> Option<Order> {
    let order_id = field_str(row, &["委托编号", "order_id"])?;
    let code = field_str(row, &["证券代码", "symbol"])?;
    let side = parse_side(&field_str(row, &["操作", "operation", "side"])?)?;
    let price = field_decimal(row, &["委托价格", "price"]).unwrap_or_default();
    let quantity = field_decimal(row, &["委托数量", "quantity"]).unwrap_or_default();

    let mut order = Order::submitted(order_id, Symbol::new(&code), side, price, quantity);
    order.filled = field_decimal(row, &["成交数量", "filled"]).unwrap_or_default();
    order.status = field_str(row, &["状态", "备注", "status"])
        .map(|s| parse_status(&s))
        .unwrap_or(OrderStatus::Submitted);
    if let Some(at) = field_str(row, &["委托时间", "submitted_at"]).and_then(|s| parse_time(&s)) {
        order.submitted_at = at;
    }
    Some(order)
}

fn parse_trade_row(row: &Value) -> Option<Trade> {
    let trade_id = field_str(row, &["成交编号", "trade_id"])?;
    let order_id = field_str(row, &["委托编号", "order_id"]).unwrap_or_default();
    let code = field_str(row, &["证券代码", "symbol"])?;
    let side = parse_side(&field_str(row, &["操作", "operation", "side"])?)?;
    let price = field_decimal(row, &["成交价格", "price"])?;
    let quantity = field_decimal(row, &["成交数量", "quantity"])?;

    Some(Trade {
        trade_id,
        order_id,
        symbol: Symbol::new(&code),
        side,
        price,
        quantity,
        commission: field_decimal(row, &["手续费", "commission"]).unwrap_or_default(),
        traded_at: field_str(row, &["成交时间", "traded_at"])
            .and_then(|s| parse_time(&s))
            .unwrap_or_else(Utc::now),
    })
}

fn parse_side(op: &str) -> Option<Side> {
    if op.contains('买') || op.eq_ignore_ascii_case("buy") {
        Some(Side::Buy)
    } else if op.contains('卖') || op.eq_ignore_ascii_case("sell") {
        Some(Side::Sell)
    } else {
        warn!(operation = %op, "unrecognized order operation");
        None
    }
}

fn parse_status(status: &str) -> OrderStatus {
    if status.contains("已成") || status.eq_ignore_ascii_case("filled") {
        OrderStatus::Filled
    } else if status.contains("部成") || status.eq_ignore_ascii_case("partial") {
        OrderStatus::Partial
    } else if status.contains('撤') || status.eq_ignore_ascii_case("cancelled") {
        OrderStatus::Cancelled
    } else if status.contains('废') || status.eq_ignore_ascii_case("rejected") {
        OrderStatus::Rejected
    } else {
        OrderStatus::Submitted
    }
}

/// Parse broker timestamps: full datetimes or bare intraday times (assumed
/// today, UTC).
fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(t) = NaiveTime::parse_from_str(raw, "%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&Utc::now().date_naive().and_time(t)));
    }
    None
}

fn field_str(row: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match row.get(key) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

fn field_decimal(row: &Value, keys: &[&str]) -> Option<Decimal> {
    for key in keys {
        match row.get(key) {
            Some(Value::Number(n)) => return Decimal::from_str(&n.to_string()).ok(),
            Some(Value::String(s)) => return Decimal::from_str(s.trim()).ok(),
            _ => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn envelope_rejection_maps_to_remote_rejected() {
        let text = r#"{"success": false, "message": "余额不足", "data": null, "timestamp": "2024-01-02T09:31:00"}"#;
        let err = HttpBroker::unwrap_envelope("/buy", text).unwrap_err();
        match err {
            BrokerError::RemoteRejected(msg) => assert_eq!(msg, "余额不足"),
            other => panic!("expected RemoteRejected, got {other:?}"),
        }
    }

    #[test]
    fn malformed_envelope_maps_to_decode() {
        let err = HttpBroker::unwrap_envelope("/buy", "<html>502</html>").unwrap_err();
        assert!(matches!(err, BrokerError::Decode(_)));
    }

    #[test]
    fn position_row_localized_keys() {
        let row = serde_json::json!({
            "证券代码": "600000",
            "证券名称": "浦发银行",
            "股票余额": 200,
            "可用余额": 100,
            "成本价": "10.00",
            "市价": 9.4,
            "这是未知字段": "ignored"
        });
        let pos = parse_position_row(&row).unwrap();
        assert_eq!(pos.symbol.as_str(), "600000");
        assert_eq!(pos.name, "浦发银行");
        assert_eq!(pos.quantity, dec!(200));
        assert_eq!(pos.available, dec!(100));
        assert_eq!(pos.avg_cost, dec!(10));
        assert_eq!(pos.current_price, dec!(9.4));
        assert_eq!(pos.market_value, dec!(1880.0));
    }

    #[test]
    fn order_row_status_and_side() {
        let row = serde_json::json!({
            "委托编号": "8837",
            "证券代码": "sh600000",
            "操作": "买入",
            "委托价格": "10.00",
            "委托数量": 100,
            "成交数量": 100,
            "状态": "已成",
            "委托时间": "09:31:05"
        });
        let order = parse_order_row(&row).unwrap();
        assert_eq!(order.order_id, "8837");
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled, dec!(100));
    }

    #[test]
    fn trade_row_parses() {
        let row = serde_json::json!({
            "成交编号": "T1",
            "委托编号": "8837",
            "证券代码": "sh600000",
            "操作": "卖出",
            "成交价格": 9.4,
            "成交数量": 100,
            "成交时间": "2024-01-02 10:00:00"
        });
        let trade = parse_trade_row(&row).unwrap();
        assert_eq!(trade.trade_id, "T1");
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.gross_amount(), dec!(940.0));
        assert_eq!(trade.commission, Decimal::ZERO);
    }

    #[test]
    fn rows_with_missing_required_keys_are_skipped() {
        assert!(parse_trade_row(&serde_json::json!({"成交编号": "T1"})).is_none());
        assert!(parse_order_row(&serde_json::json!({"操作": "买入"})).is_none());
    }
}
