//! The order executor: the single entry point for buys, sells, cancels, and
//! stop-loss exits.
//!
//! Every request passes the risk chain before it may reach the broker; every
//! accepted order lands in the trade journal. All operations are serialized
//! behind one async mutex to keep ledger and journal updates consistent.
//! Lock order is always executor → (ledger | journal | connector); nothing
//! here acquires locks in any other order.

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use tw_broker::{BrokerApi, BrokerConnector, BrokerError};
use tw_journal::{JournalError, TradeJournal};
use tw_risk::{DenialKind, RiskEngine, Verdict};
use tw_types::{
    lot_quantity, Balance, LedgerError, Order, OrderRequest, OrderStatus, PositionLedger, Side,
    Symbol, Trade,
};

/// Errors surfaced by executor operations.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// A risk gate denied the request; never retried.
    #[error("risk denied by {gate} ({kind}): {message}")]
    Risk {
        gate: &'static str,
        kind: DenialKind,
        message: String,
    },

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

impl ExecutorError {
    pub fn denial_kind(&self) -> Option<DenialKind> {
        match self {
            ExecutorError::Risk { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Serialized order-lifecycle manager.
pub struct OrderExecutor<B: BrokerApi + 'static> {
    connector: Arc<BrokerConnector<B>>,
    ledger: Arc<RwLock<PositionLedger>>,
    journal: Arc<TradeJournal>,
    risk: Arc<parking_lot::Mutex<RiskEngine>>,
    /// Serializes all executor operations process-wide.
    exec_gate: Mutex<()>,
}

impl<B: BrokerApi + 'static> OrderExecutor<B> {
    pub fn new(
        connector: Arc<BrokerConnector<B>>,
        ledger: Arc<RwLock<PositionLedger>>,
        journal: Arc<TradeJournal>,
        risk: Arc<parking_lot::Mutex<RiskEngine>>,
    ) -> Self {
        Self {
            connector,
            ledger,
            journal,
            risk,
            exec_gate: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &Arc<RwLock<PositionLedger>> {
        &self.ledger
    }

    pub fn journal(&self) -> &Arc<TradeJournal> {
        &self.journal
    }

    pub fn risk(&self) -> &Arc<parking_lot::Mutex<RiskEngine>> {
        &self.risk
    }

    /// Buy `amount` (currency) of `symbol` at `price`. The risk chain may
    /// shrink the amount; the result is converted to whole lots before
    /// submission.
    pub async fn execute_buy(
        &self,
        symbol: &Symbol,
        price: Decimal,
        amount: Decimal,
    ) -> Result<String, ExecutorError> {
        let _gate = self.exec_gate.lock().await;

        let balance = self.connector.balance().await?;
        let request = OrderRequest::buy(symbol.clone(), price, amount);
        let outcome = self.run_chain(&request, &balance);

        if !outcome.liquidate.is_empty() {
            self.liquidate_all(&outcome.liquidate).await;
        }
        let approved = match outcome.verdict {
            Verdict::Approved { amount } => amount,
            Verdict::Denied {
                gate,
                kind,
                message,
            } => {
                return Err(ExecutorError::Risk {
                    gate,
                    kind,
                    message,
                })
            }
        };

        let quantity = lot_quantity(approved, price);
        if quantity <= Decimal::ZERO {
            return Err(ExecutorError::InvalidOrder(format!(
                "approved amount {approved} at {price} is below one lot"
            )));
        }

        let order_id = self.connector.buy(symbol, price, quantity).await?;
        info!(%symbol, %price, %quantity, order_id, "buy submitted");
        self.journal
            .record_order(Order::submitted(
                order_id.clone(),
                symbol.clone(),
                Side::Buy,
                price,
                quantity,
            ))
            .await?;
        self.risk.lock().state_mut().record_trade(symbol, Utc::now());
        Ok(order_id)
    }

    /// Sell `quantity` shares of `symbol` at `price`. The quantity must be
    /// covered by the ledger's available holding.
    pub async fn execute_sell(
        &self,
        symbol: &Symbol,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<String, ExecutorError> {
        let _gate = self.exec_gate.lock().await;
        self.sell_inner(symbol, price, quantity, true).await
    }

    /// Close the full position of `symbol` at `current_price`.
    pub async fn execute_stop_loss(
        &self,
        symbol: &Symbol,
        current_price: Decimal,
    ) -> Result<String, ExecutorError> {
        let _gate = self.exec_gate.lock().await;
        let quantity = self
            .ledger
            .read()
            .position(symbol)
            .map(|p| p.quantity)
            .ok_or_else(|| LedgerError::PositionNotFound {
                symbol: symbol.to_string(),
            })?;
        info!(%symbol, %current_price, %quantity, "stop-loss exit");
        self.sell_inner(symbol, current_price, quantity, true).await
    }

    /// Cancel an order. If the broker reports it already filled, the cancel
    /// is treated as done and no status update is written.
    pub async fn execute_cancel(&self, order_id: &str) -> Result<(), ExecutorError> {
        let _gate = self.exec_gate.lock().await;
        match self.connector.cancel(order_id).await {
            Ok(()) => {
                if let Err(e) = self
                    .journal
                    .update_order_status(order_id, OrderStatus::Cancelled)
                    .await
                {
                    warn!(order_id, error = %e, "cancel succeeded but journal update failed");
                }
                Ok(())
            }
            Err(BrokerError::RemoteRejected(message)) if message.contains("filled") => {
                info!(order_id, "cancel raced a fill; leaving status to reconciliation");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch today's fills and fold the new ones into the ledger and
    /// journal, per symbol in trade-id order. Idempotent on trade id.
    /// Returns the newly applied fills.
    pub async fn sync_trades(&self) -> Result<Vec<Trade>, ExecutorError> {
        let _gate = self.exec_gate.lock().await;

        let mut trades = self.connector.today_trades().await?;
        trades.sort_by(|a, b| {
            a.symbol
                .as_str()
                .cmp(b.symbol.as_str())
                .then_with(|| a.trade_id.cmp(&b.trade_id))
        });

        let mut applied = Vec::new();
        for trade in trades {
            if self.journal.has_trade(&trade.trade_id) {
                continue;
            }
            if let Err(e) = self.ledger.write().apply_trade(&trade) {
                // Ledger/journal disagreement; reconciliation is the only
                // recovery path.
                error!(
                    trade_id = %trade.trade_id,
                    symbol = %trade.symbol,
                    error = %e,
                    "fill could not be applied to the ledger; run reconcile"
                );
                continue;
            }
            self.journal.record_trade(trade.clone()).await?;
            applied.push(trade);
        }

        // Persist fresh snapshots for every touched symbol.
        for symbol in applied
            .iter()
            .map(|t| t.symbol.clone())
            .collect::<std::collections::HashSet<_>>()
        {
            let snapshot = self.ledger.read().position(&symbol).cloned();
            if let Some(position) = snapshot {
                self.journal.upsert_position(&position).await?;
            }
        }
        Ok(applied)
    }

    /// Replace the ledger with the broker's position snapshot.
    pub async fn reconcile_positions(&self) -> Result<(), ExecutorError> {
        let _gate = self.exec_gate.lock().await;
        let positions = self.connector.positions().await?;
        info!(count = positions.len(), "reconciling ledger from broker");
        self.ledger.write().reconcile(positions);
        Ok(())
    }

    /// Current equity: broker cash plus ledger market value.
    pub async fn current_equity(&self) -> Result<Decimal, ExecutorError> {
        let balance = self.connector.balance().await?;
        Ok(balance.cash + self.ledger.read().total_market_value())
    }

    // -- internals ----------------------------------------------------------

    fn run_chain(&self, request: &OrderRequest, balance: &Balance) -> tw_risk::EvaluationOutcome {
        let ledger = self.ledger.read();
        let mut risk = self.risk.lock();
        let equity = balance.cash + ledger.total_market_value();
        risk.state_mut().update_equity(equity);
        risk.evaluate(request, &ledger, balance)
    }

    async fn sell_inner(
        &self,
        symbol: &Symbol,
        price: Decimal,
        quantity: Decimal,
        through_chain: bool,
    ) -> Result<String, ExecutorError> {
        let available = self
            .ledger
            .read()
            .position(symbol)
            .map(|p| p.available)
            .ok_or_else(|| LedgerError::PositionNotFound {
                symbol: symbol.to_string(),
            })?;
        if quantity > available {
            return Err(LedgerError::InsufficientPosition {
                requested: quantity,
                available,
            }
            .into());
        }

        if through_chain {
            let balance = self.connector.balance().await?;
            let request = OrderRequest::sell(symbol.clone(), price, quantity);
            let outcome = self.run_chain(&request, &balance);
            if let Verdict::Denied {
                gate,
                kind,
                message,
            } = outcome.verdict
            {
                return Err(ExecutorError::Risk {
                    gate,
                    kind,
                    message,
                });
            }
        }

        let order_id = self.connector.sell(symbol, price, quantity).await?;
        info!(%symbol, %price, %quantity, order_id, "sell submitted");
        self.journal
            .record_order(Order::submitted(
                order_id.clone(),
                symbol.clone(),
                Side::Sell,
                price,
                quantity,
            ))
            .await?;
        self.risk.lock().state_mut().record_trade(symbol, Utc::now());
        Ok(order_id)
    }

    /// Best-effort market-sell of every position named by the daily-loss
    /// gate. Failures are logged, never propagated: the emergency exit must
    /// not die on its first error.
    async fn liquidate_all(&self, symbols: &[Symbol]) {
        warn!(count = symbols.len(), "emergency liquidation begins");
        for symbol in symbols {
            let position = self.ledger.read().position(symbol).cloned();
            let Some(position) = position else { continue };
            if position.quantity <= Decimal::ZERO {
                continue;
            }
            match self
                .sell_inner(symbol, position.current_price, position.quantity, false)
                .await
            {
                Ok(order_id) => {
                    info!(%symbol, order_id, "liquidation sell submitted")
                }
                Err(e) => error!(%symbol, error = %e, "liquidation sell failed"),
            }
        }
    }
}
