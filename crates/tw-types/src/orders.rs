use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::Symbol;

/// Minimum tradable quantity on the target exchange (shares per lot).
pub const LOT_SIZE: u32 = 100;

/// Direction of an order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn sign(&self) -> i32 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

/// Order status during its lifecycle. Transitions are one-way toward a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Whether a cancel request is still meaningful in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Submitted | OrderStatus::Partial)
    }

    /// Whether moving to `next` respects the one-way lifecycle.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Submitted, Partial | Filled | Cancelled | Rejected) => true,
            (Partial, Filled | Cancelled) => true,
            _ => false,
        }
    }
}

/// An ephemeral request to trade, denominated in currency for buys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: Side,
    pub symbol: Symbol,
    pub price: Decimal,
    /// Currency amount for the trade (`price × quantity` for sells).
    pub amount: Decimal,
}

impl OrderRequest {
    pub fn buy(symbol: Symbol, price: Decimal, amount: Decimal) -> Self {
        Self {
            side: Side::Buy,
            symbol,
            price,
            amount,
        }
    }

    pub fn sell(symbol: Symbol, price: Decimal, quantity: Decimal) -> Self {
        Self {
            side: Side::Sell,
            symbol,
            price,
            amount: price * quantity,
        }
    }

    /// Share quantity purchasable with `amount`, rounded down to whole lots.
    /// Returns zero when the amount does not cover a single lot.
    pub fn lot_quantity(&self) -> Decimal {
        lot_quantity(self.amount, self.price)
    }

    /// The same request with a (risk-adjusted) amount substituted.
    pub fn with_amount(&self, amount: Decimal) -> Self {
        Self {
            amount,
            ..self.clone()
        }
    }
}

/// Share quantity purchasable with `amount` at `price`, rounded down to
/// whole lots of [`LOT_SIZE`].
pub fn lot_quantity(amount: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let lot = Decimal::from(LOT_SIZE);
    (amount / price / lot).floor() * lot
}

/// A broker-acknowledged order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Identifier assigned by the broker on submission.
    pub order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    /// Ordered share quantity (whole lots).
    pub quantity: Decimal,
    /// Filled share quantity, `filled ≤ quantity`.
    pub filled: Decimal,
    pub status: OrderStatus,
    pub submitted_at: DateTime<Utc>,
}

impl Order {
    pub fn submitted(
        order_id: String,
        symbol: Symbol,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self {
            order_id,
            symbol,
            side,
            price,
            quantity,
            filled: Decimal::ZERO,
            status: OrderStatus::Submitted,
            submitted_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Record an additional fill, capping at the ordered quantity and
    /// advancing the status.
    pub fn record_fill(&mut self, quantity: Decimal) {
        self.filled = (self.filled + quantity).min(self.quantity);
        self.status = if self.filled >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
    }
}

/// A single execution (fill) reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub traded_at: DateTime<Utc>,
}

impl Trade {
    pub fn gross_amount(&self) -> Decimal {
        self.price * self.quantity
    }
}
