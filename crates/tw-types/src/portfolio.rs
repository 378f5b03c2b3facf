use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::LedgerError;
use crate::market::Symbol;
use crate::orders::{Side, Trade};

/// Live state of one held position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub symbol: Symbol,
    pub name: String,
    /// Total held share quantity.
    pub quantity: Decimal,
    /// Sellable quantity; the delta to `quantity` is a broker-side hold for
    /// pending sells. Informational only, refreshed on reconciliation.
    pub available: Decimal,
    pub avg_cost: Decimal,
    pub total_cost: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl PositionState {
    pub fn opened(symbol: Symbol, name: &str, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol,
            name: name.to_string(),
            quantity,
            available: quantity,
            avg_cost: price,
            total_cost: quantity * price,
            current_price: price,
            market_value: quantity * price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Unrealized PnL as a fraction of cost, e.g. `-0.06` for a 6% loss.
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        if self.total_cost > Decimal::ZERO {
            self.unrealized_pnl / self.total_cost
        } else {
            Decimal::ZERO
        }
    }

    /// Apply a buy fill: weighted-average cost basis.
    fn apply_buy(&mut self, quantity: Decimal, price: Decimal) {
        self.total_cost += quantity * price;
        self.quantity += quantity;
        self.available += quantity;
        self.avg_cost = self.total_cost / self.quantity;
        self.refresh_price(price);
    }

    /// Apply a sell fill and return the realized PnL increment.
    ///
    /// Cost is released proportionally to the aggregate quantity; no
    /// lot-level identification is attempted.
    fn apply_sell(&mut self, quantity: Decimal, price: Decimal) -> Decimal {
        let realized = quantity * (price - self.avg_cost);
        self.total_cost = self.total_cost * (self.quantity - quantity) / self.quantity;
        self.quantity -= quantity;
        self.available = self.available.min(self.quantity);
        self.realized_pnl += realized;
        if self.quantity > Decimal::ZERO {
            self.avg_cost = self.total_cost / self.quantity;
        }
        self.refresh_price(price);
        realized
    }

    /// Recompute market value and unrealized PnL at `price`. Never touches
    /// cost basis.
    pub fn refresh_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.market_value = self.quantity * price;
        self.unrealized_pnl = self.market_value - self.total_cost;
        self.updated_at = Utc::now();
    }
}

/// Authoritative in-memory map of live positions.
///
/// The ledger owns every [`PositionState`]; the broker remains the source of
/// truth until a snapshot is folded back in via [`PositionLedger::reconcile`].
#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    positions: HashMap<Symbol, PositionState>,
    /// Realized PnL of fully closed positions, per symbol. Survives entry
    /// removal and reconciliation.
    closed_realized: HashMap<Symbol, Decimal>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&PositionState> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &PositionState> {
        self.positions.values()
    }

    pub fn open_symbols(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn total_market_value(&self) -> Decimal {
        self.positions.values().map(|p| p.market_value).sum()
    }

    pub fn symbol_market_value(&self, symbol: &Symbol) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.market_value)
            .unwrap_or(Decimal::ZERO)
    }

    /// Total realized PnL: closed positions plus the realized part of open
    /// ones.
    pub fn realized_pnl_total(&self) -> Decimal {
        let closed: Decimal = self.closed_realized.values().copied().sum();
        let open: Decimal = self.positions.values().map(|p| p.realized_pnl).sum();
        closed + open
    }

    pub fn apply_buy(&mut self, symbol: &Symbol, quantity: Decimal, price: Decimal) {
        match self.positions.get_mut(symbol) {
            Some(pos) => pos.apply_buy(quantity, price),
            None => {
                self.positions.insert(
                    symbol.clone(),
                    PositionState::opened(symbol.clone(), symbol.as_str(), quantity, price),
                );
            }
        }
    }

    /// Apply a sell fill; removes the entry when quantity reaches zero and
    /// folds its realized PnL into the per-symbol running counter.
    pub fn apply_sell(
        &mut self,
        symbol: &Symbol,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let pos = self
            .positions
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::PositionNotFound {
                symbol: symbol.to_string(),
            })?;
        if quantity > pos.quantity {
            return Err(LedgerError::InsufficientPosition {
                requested: quantity,
                available: pos.quantity,
            });
        }

        let realized = pos.apply_sell(quantity, price);
        if pos.quantity == Decimal::ZERO {
            let closed = self.positions.remove(symbol).expect("entry exists");
            *self
                .closed_realized
                .entry(symbol.clone())
                .or_insert(Decimal::ZERO) += closed.realized_pnl;
        }
        Ok(realized)
    }

    /// Apply one broker fill to the ledger.
    pub fn apply_trade(&mut self, trade: &Trade) -> Result<(), LedgerError> {
        match trade.side {
            Side::Buy => {
                self.apply_buy(&trade.symbol, trade.quantity, trade.price);
                Ok(())
            }
            Side::Sell => self
                .apply_sell(&trade.symbol, trade.quantity, trade.price)
                .map(|_| ()),
        }
    }

    /// Refresh the mark price of one symbol, if held.
    pub fn refresh_price(&mut self, symbol: &Symbol, price: Decimal) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.refresh_price(price);
        }
    }

    /// Replace the in-memory map with the broker's snapshot, preserving
    /// realized-PnL counters by symbol.
    pub fn reconcile(&mut self, snapshot: Vec<PositionState>) {
        let old = std::mem::take(&mut self.positions);
        for mut incoming in snapshot {
            if let Some(previous) = old.get(&incoming.symbol) {
                incoming.realized_pnl = previous.realized_pnl;
            }
            self.positions.insert(incoming.symbol.clone(), incoming);
        }
    }
}

/// Account balance snapshot as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub total_assets: Decimal,
    pub cash: Decimal,
    pub available: Decimal,
    pub frozen: Decimal,
    pub market_value: Decimal,
    pub profit: Decimal,
}

impl Balance {
    /// A balance holding only cash, fully available.
    pub fn all_cash(cash: Decimal) -> Self {
        Self {
            total_assets: cash,
            cash,
            available: cash,
            frozen: Decimal::ZERO,
            market_value: Decimal::ZERO,
            profit: Decimal::ZERO,
        }
    }
}

/// One end-of-session equity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyEquity {
    pub date: NaiveDate,
    pub open_equity: Decimal,
    pub close_equity: Decimal,
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: Decimal,
    pub trade_count: u32,
}
