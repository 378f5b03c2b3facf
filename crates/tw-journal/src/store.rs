//! Durable row stores behind the journal.
//!
//! Four logical tables (`orders`, `trades`, `positions`,
//! `daily_performance`) persisted as one JSON document per line. The store
//! is authoritative for historical queries; the in-memory ledger stays
//! authoritative for live state.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use tw_types::{CoreError, DailyEquity, Order, PositionState, Trade};

/// Persistence seam for journal rows. Append or upsert only.
#[async_trait]
pub trait JournalStore: Send + Sync {
    async fn append_order(&self, order: &Order) -> Result<(), CoreError>;
    async fn append_trade(&self, trade: &Trade) -> Result<(), CoreError>;
    async fn upsert_position(&self, position: &PositionState) -> Result<(), CoreError>;
    async fn upsert_daily_equity(&self, row: &DailyEquity) -> Result<(), CoreError>;
}

/// JSON-lines store under a data root, one file per table.
#[derive(Debug)]
pub struct JsonlStore {
    data_root: PathBuf,
    // Guards concurrent appends to the same file.
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new<P: AsRef<Path>>(data_root: P) -> Result<Self, CoreError> {
        let data_root = data_root.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_root)?;
        Ok(Self {
            data_root,
            write_lock: Mutex::new(()),
        })
    }

    fn append_line<T: Serialize>(&self, table: &str, row: &T) -> Result<(), CoreError> {
        let line = serde_json::to_string(row)?;
        let path = self.data_root.join(format!("{table}.jsonl"));
        let _guard = self.write_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[async_trait]
impl JournalStore for JsonlStore {
    async fn append_order(&self, order: &Order) -> Result<(), CoreError> {
        self.append_line("orders", order)
    }

    async fn append_trade(&self, trade: &Trade) -> Result<(), CoreError> {
        self.append_line("trades", trade)
    }

    async fn upsert_position(&self, position: &PositionState) -> Result<(), CoreError> {
        // Upserts are modeled as append-latest-wins; readers take the last
        // row per key.
        self.append_line("positions", position)
    }

    async fn upsert_daily_equity(&self, row: &DailyEquity) -> Result<(), CoreError> {
        self.append_line("daily_performance", row)
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub orders: Mutex<Vec<Order>>,
    pub trades: Mutex<Vec<Trade>>,
    pub positions: Mutex<Vec<PositionState>>,
    pub daily: Mutex<Vec<DailyEquity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JournalStore for MemoryStore {
    async fn append_order(&self, order: &Order) -> Result<(), CoreError> {
        self.orders.lock().push(order.clone());
        Ok(())
    }

    async fn append_trade(&self, trade: &Trade) -> Result<(), CoreError> {
        self.trades.lock().push(trade.clone());
        Ok(())
    }

    async fn upsert_position(&self, position: &PositionState) -> Result<(), CoreError> {
        let mut rows = self.positions.lock();
        match rows.iter_mut().find(|p| p.symbol == position.symbol) {
            Some(existing) => *existing = position.clone(),
            None => rows.push(position.clone()),
        }
        Ok(())
    }

    async fn upsert_daily_equity(&self, row: &DailyEquity) -> Result<(), CoreError> {
        let mut rows = self.daily.lock();
        match rows.iter_mut().find(|r| r.date == row.date) {
            Some(existing) => *existing = row.clone(),
            None => rows.push(row.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tw_types::{Side, Symbol};

    #[tokio::test]
    async fn jsonl_store_appends_one_line_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path()).unwrap();

        for i in 0..3 {
            let order = Order::submitted(
                format!("{i}"),
                Symbol::new("sh600000"),
                Side::Buy,
                dec!(10),
                dec!(100),
            );
            store.append_order(&order).await.unwrap();
        }

        let raw = std::fs::read_to_string(dir.path().join("orders.jsonl")).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: Order = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.order_id, "0");
    }

    #[tokio::test]
    async fn memory_store_upserts_daily_by_date() {
        let store = MemoryStore::new();
        let mut row = DailyEquity {
            date: chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open_equity: dec!(100_000),
            close_equity: dec!(101_000),
            daily_pnl: dec!(1000),
            daily_pnl_pct: dec!(0.01),
            trade_count: 4,
        };
        store.upsert_daily_equity(&row).await.unwrap();
        row.close_equity = dec!(99_000);
        store.upsert_daily_equity(&row).await.unwrap();

        let rows = store.daily.lock();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close_equity, dec!(99_000));
    }
}
