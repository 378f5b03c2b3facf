//! The trade journal: in-memory caches in front of a durable row store.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use tw_types::{CoreError, DailyEquity, Order, OrderStatus, PositionState, Trade};

use crate::performance::{self, PerformanceReport};
use crate::store::JournalStore;

/// Errors raised by journal writes.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("unknown order: {0}")]
    UnknownOrder(String),

    #[error("invalid status transition for order {order_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("store error: {0}")]
    Store(#[from] CoreError),
}

/// Append-only journal of orders, fills, and daily equity.
///
/// Reads serve from the in-memory caches; every write also lands in the
/// durable store. One instance per process, shared behind an [`Arc`].
pub struct TradeJournal {
    store: Arc<dyn JournalStore>,
    orders: RwLock<Vec<Order>>,
    trades: RwLock<Vec<Trade>>,
    trade_ids: RwLock<HashSet<String>>,
    daily: RwLock<Vec<DailyEquity>>,
}

impl TradeJournal {
    pub fn new(store: Arc<dyn JournalStore>) -> Self {
        Self {
            store,
            orders: RwLock::new(Vec::new()),
            trades: RwLock::new(Vec::new()),
            trade_ids: RwLock::new(HashSet::new()),
            daily: RwLock::new(Vec::new()),
        }
    }

    /// Record a freshly submitted order.
    pub async fn record_order(&self, order: Order) -> Result<(), JournalError> {
        self.store.append_order(&order).await?;
        self.orders.write().push(order);
        Ok(())
    }

    /// Advance an order's status, enforcing the one-way lifecycle.
    pub async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), JournalError> {
        let updated = {
            let mut orders = self.orders.write();
            let order = orders
                .iter_mut()
                .find(|o| o.order_id == order_id)
                .ok_or_else(|| JournalError::UnknownOrder(order_id.to_string()))?;
            if !order.status.can_transition_to(status) {
                return Err(JournalError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from: order.status,
                    to: status,
                });
            }
            order.status = status;
            order.clone()
        };
        self.store.append_order(&updated).await?;
        Ok(())
    }

    /// Record one fill. Idempotent on trade id: a duplicate is a no-op and
    /// returns `false`. The matching order, if still active, accrues the
    /// filled quantity.
    pub async fn record_trade(&self, trade: Trade) -> Result<bool, JournalError> {
        if !self.trade_ids.write().insert(trade.trade_id.clone()) {
            debug!(trade_id = %trade.trade_id, "duplicate trade ignored");
            return Ok(false);
        }

        self.store.append_trade(&trade).await?;

        let updated_order = {
            let mut orders = self.orders.write();
            match orders.iter_mut().find(|o| o.order_id == trade.order_id) {
                Some(order) if order.is_active() => {
                    order.record_fill(trade.quantity);
                    Some(order.clone())
                }
                Some(_) => None,
                None => {
                    // Fill for an order we never recorded (e.g. manual trade
                    // from another terminal). Keep the fill, note the gap.
                    warn!(order_id = %trade.order_id, trade_id = %trade.trade_id,
                        "fill references unknown order");
                    None
                }
            }
        };
        if let Some(order) = updated_order {
            self.store.append_order(&order).await?;
        }

        self.trades.write().push(trade);
        Ok(true)
    }

    /// Whether a fill with this id has already been recorded.
    pub fn has_trade(&self, trade_id: &str) -> bool {
        self.trade_ids.read().contains(trade_id)
    }

    /// Persist a position snapshot row.
    pub async fn upsert_position(&self, position: &PositionState) -> Result<(), JournalError> {
        self.store.upsert_position(position).await?;
        Ok(())
    }

    /// Write (or overwrite) the equity row for one date.
    pub async fn record_daily_equity(&self, row: DailyEquity) -> Result<(), JournalError> {
        self.store.upsert_daily_equity(&row).await?;
        let mut daily = self.daily.write();
        match daily.iter_mut().find(|r| r.date == row.date) {
            Some(existing) => *existing = row,
            None => {
                daily.push(row);
                daily.sort_by_key(|r| r.date);
            }
        }
        Ok(())
    }

    // -- reads --------------------------------------------------------------

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.orders
            .read()
            .iter()
            .find(|o| o.order_id == order_id)
            .cloned()
    }

    /// Most recent orders, newest first.
    pub fn recent_orders(&self, limit: usize) -> Vec<Order> {
        let orders = self.orders.read();
        orders.iter().rev().take(limit).cloned().collect()
    }

    /// Most recent fills, newest first.
    pub fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        let trades = self.trades.read();
        trades.iter().rev().take(limit).cloned().collect()
    }

    /// Fills recorded today (journal arrival order).
    pub fn trade_count(&self) -> usize {
        self.trades.read().len()
    }

    /// Daily equity rows in date order.
    pub fn daily_series(&self) -> Vec<DailyEquity> {
        self.daily.read().clone()
    }

    /// Derived performance metrics over everything recorded so far.
    pub fn performance(&self) -> PerformanceReport {
        let daily = self.daily.read();
        let trades = self.trades.read();
        performance::compute(&daily, &trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use tw_types::{Side, Symbol};

    fn journal() -> TradeJournal {
        TradeJournal::new(Arc::new(MemoryStore::new()))
    }

    fn order(id: &str) -> Order {
        Order::submitted(
            id.into(),
            Symbol::new("sh600000"),
            Side::Buy,
            dec!(10),
            dec!(200),
        )
    }

    fn trade(id: &str, order_id: &str, qty: rust_decimal::Decimal) -> Trade {
        Trade {
            trade_id: id.into(),
            order_id: order_id.into(),
            symbol: Symbol::new("sh600000"),
            side: Side::Buy,
            price: dec!(10),
            quantity: qty,
            commission: dec!(0),
            traded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn order_lifecycle_is_one_way() {
        let journal = journal();
        journal.record_order(order("1")).await.unwrap();
        journal
            .update_order_status("1", OrderStatus::Cancelled)
            .await
            .unwrap();

        let err = journal
            .update_order_status("1", OrderStatus::Filled)
            .await
            .unwrap_err();
        assert!(matches!(err, JournalError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_order_update_fails() {
        let journal = journal();
        let err = journal
            .update_order_status("missing", OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, JournalError::UnknownOrder(_)));
    }

    #[tokio::test]
    async fn duplicate_trade_is_ignored() {
        let journal = journal();
        journal.record_order(order("1")).await.unwrap();
        assert!(journal.record_trade(trade("T1", "1", dec!(100))).await.unwrap());
        assert!(!journal.record_trade(trade("T1", "1", dec!(100))).await.unwrap());
        assert_eq!(journal.trade_count(), 1);
        assert!(journal.has_trade("T1"));
    }

    #[tokio::test]
    async fn fills_advance_order_status() {
        let journal = journal();
        journal.record_order(order("1")).await.unwrap();
        journal.record_trade(trade("T1", "1", dec!(100))).await.unwrap();
        assert_eq!(journal.order("1").unwrap().status, OrderStatus::Partial);
        journal.record_trade(trade("T2", "1", dec!(100))).await.unwrap();
        let filled = journal.order("1").unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(filled.filled, dec!(200));
    }

    #[tokio::test]
    async fn daily_rows_upsert_by_date() {
        let journal = journal();
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let row = DailyEquity {
            date,
            open_equity: dec!(100_000),
            close_equity: dec!(101_000),
            daily_pnl: dec!(1000),
            daily_pnl_pct: dec!(0.01),
            trade_count: 2,
        };
        journal.record_daily_equity(row.clone()).await.unwrap();
        let mut updated = row;
        updated.close_equity = dec!(100_500);
        journal.record_daily_equity(updated).await.unwrap();

        let series = journal.daily_series();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].close_equity, dec!(100_500));
    }

    #[tokio::test]
    async fn recent_reads_return_newest_first() {
        let journal = journal();
        for i in 0..5 {
            journal.record_order(order(&i.to_string())).await.unwrap();
        }
        let recent = journal.recent_orders(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].order_id, "4");
        assert_eq!(recent[1].order_id, "3");
    }
}
