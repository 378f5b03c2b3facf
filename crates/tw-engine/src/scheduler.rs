//! The strategy scheduler: the single periodic driver of the pipeline.
//!
//! Each tick rotates the watch list by one symbol, pulls a market snapshot,
//! runs the strategy manager, fuses the advisor caches, and forwards any
//! non-hold decision to the order executor. Stop-loss exits and trade
//! reconciliation ride on the same tick.

use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use tw_broker::{BrokerApi, BrokerConnector};
use tw_risk::{DenialKind, StopLossMonitor};
use tw_strategy::StrategyManager;
use tw_types::{AppConfig, MarketData, Side, SignalKind, Symbol};

use crate::data::MarketDataProvider;
use crate::executor::{ExecutorError, OrderExecutor};
use crate::fusion::{AdvisorCache, SignalFusion};

/// Grace allowed for snapshot timestamps from provider clocks.
const DATA_GRACE: chrono::Duration = chrono::Duration::minutes(5);

/// Events emitted for external consumption (logging, UI, alerting).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started,
    Stopped {
        reason: String,
    },
    TickSkipped {
        symbol: Symbol,
        reason: String,
    },
    SignalCombined {
        symbol: Symbol,
        kind: SignalKind,
        strength: f64,
    },
    Fused {
        symbol: Symbol,
        action: SignalKind,
        confidence: f64,
    },
    OrderSubmitted {
        symbol: Symbol,
        side: Side,
        order_id: String,
    },
    OrderDenied {
        symbol: Symbol,
        kind: DenialKind,
    },
    StopLossExit {
        symbol: Symbol,
    },
    SessionClosed {
        date: NaiveDate,
    },
}

/// The cooperative driver. One instance per process; everything downstream
/// happens on its tick or on an explicit manual trigger.
pub struct Scheduler<B: BrokerApi + 'static> {
    config: AppConfig,
    connector: Arc<BrokerConnector<B>>,
    executor: Arc<OrderExecutor<B>>,
    manager: StrategyManager,
    fusion: SignalFusion,
    advisors: Arc<AdvisorCache>,
    provider: Arc<dyn MarketDataProvider>,
    stop_monitor: StopLossMonitor,
    cursor: usize,
    trades_at_session_start: usize,
    events: Vec<EngineEvent>,
}

impl<B: BrokerApi + 'static> Scheduler<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        connector: Arc<BrokerConnector<B>>,
        executor: Arc<OrderExecutor<B>>,
        manager: StrategyManager,
        fusion: SignalFusion,
        advisors: Arc<AdvisorCache>,
        provider: Arc<dyn MarketDataProvider>,
        stop_monitor: StopLossMonitor,
    ) -> Self {
        Self {
            config,
            connector,
            executor,
            manager,
            fusion,
            advisors,
            provider,
            stop_monitor,
            cursor: 0,
            trades_at_session_start: 0,
            events: Vec::new(),
        }
    }

    /// Shared advisor cache handle, for wiring external LLM/ML producers.
    pub fn advisors(&self) -> Arc<AdvisorCache> {
        Arc::clone(&self.advisors)
    }

    /// Drain all emitted events (consuming them).
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Run until the shutdown signal flips. An ordinary tick runs unbounded;
    /// only on shutdown is the in-flight tick given a grace deadline, after
    /// which it is cancelled and its partial work discarded.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.trading.auto_trade.check_interval_secs.max(1));
        let grace = interval.max(Duration::from_secs(5));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.emit(EngineEvent::Started);
        info!(
            interval_secs = interval.as_secs(),
            symbols = self.config.symbols.len(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let tick = self.tick_once();
                    tokio::pin!(tick);
                    tokio::select! {
                        _ = &mut tick => {}
                        result = shutdown.changed() => {
                            let stopping = result.is_err() || *shutdown.borrow();
                            if stopping {
                                if tokio::time::timeout(grace, &mut tick).await.is_err() {
                                    warn!(
                                        grace_secs = grace.as_secs(),
                                        "in-flight tick cancelled at the shutdown grace deadline"
                                    );
                                }
                                break;
                            }
                            // Spurious wakeup: let the tick finish normally.
                            tick.await;
                        }
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.emit(EngineEvent::Stopped {
            reason: "shutdown signal".into(),
        });
        info!("scheduler stopped");
    }

    /// One scheduled tick: session upkeep plus the next watch-list symbol.
    pub async fn tick_once(&mut self) {
        if !self.config.trading.auto_trade.enabled {
            debug!("auto-trade disabled; tick is a no-op");
            return;
        }
        self.roll_session_if_needed().await;

        if !self.connector.is_connected() {
            // The liveness loop is already retrying in the background.
            warn!("broker disconnected; tick skipped");
            return;
        }
        if self.config.symbols.is_empty() {
            return;
        }
        let symbol = self.config.symbols[self.cursor % self.config.symbols.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        self.execute_symbol(&symbol).await;
    }

    /// Manual trigger: run the pipeline for every watched symbol now.
    pub async fn execute_now(&mut self) {
        let symbols = self.config.symbols.clone();
        for symbol in &symbols {
            self.execute_symbol(symbol).await;
        }
    }

    /// Manual trigger: run the pipeline for one symbol now.
    pub async fn execute_symbol(&mut self, symbol: &Symbol) {
        let data = match self.provider.fetch(symbol).await {
            Ok(data) => data,
            Err(e) => {
                debug!(%symbol, error = %e, "no market data; tick skipped");
                self.emit(EngineEvent::TickSkipped {
                    symbol: symbol.clone(),
                    reason: e.to_string(),
                });
                return;
            }
        };
        if let Err(e) = data.validate(DATA_GRACE) {
            warn!(%symbol, error = %e, "snapshot failed validation; tick skipped");
            self.emit(EngineEvent::TickSkipped {
                symbol: symbol.clone(),
                reason: e.to_string(),
            });
            return;
        }

        self.observe_price(&data);
        self.run_stop_loss_pass().await;

        if let Some(combined) = self.manager.evaluate(&data).await {
            self.emit(EngineEvent::SignalCombined {
                symbol: symbol.clone(),
                kind: combined.kind,
                strength: combined.strength,
            });
            if combined.kind != SignalKind::Hold {
                self.act_on_signal(symbol, combined.price).await;
            }
        }

        self.reconcile_fills().await;
    }

    // -- tick stages --------------------------------------------------------

    fn observe_price(&mut self, data: &MarketData) {
        let ledger = self.executor.ledger();
        ledger.write().refresh_price(&data.symbol, data.close);
        let mut risk = self.executor.risk().lock();
        if let Some(close) = data.close.to_f64() {
            risk.state_mut().push_price(&data.symbol, close);
        }
    }

    /// Issue stop-loss exits for every breached position. The sells pass
    /// through the risk chain like any other order.
    async fn run_stop_loss_pass(&mut self) {
        let breaches = {
            let ledger = self.executor.ledger().read();
            self.stop_monitor.scan(&ledger)
        };
        for breach in breaches {
            match self
                .executor
                .execute_stop_loss(&breach.symbol, breach.current_price)
                .await
            {
                Ok(order_id) => {
                    self.emit(EngineEvent::StopLossExit {
                        symbol: breach.symbol.clone(),
                    });
                    self.emit(EngineEvent::OrderSubmitted {
                        symbol: breach.symbol.clone(),
                        side: Side::Sell,
                        order_id,
                    });
                }
                Err(e) => self.log_order_error(&breach.symbol, e),
            }
        }
    }

    async fn act_on_signal(&mut self, symbol: &Symbol, price: Decimal) {
        let (llm, ml, position) = {
            let ttl = self.fusion_ttl();
            let ledger = self.executor.ledger().read();
            (
                self.advisors.llm(symbol, ttl),
                self.advisors.ml(symbol, ttl),
                ledger.position(symbol).cloned(),
            )
        };
        let fused = self.fusion.fuse(symbol, llm, ml, position.as_ref());
        self.emit(EngineEvent::Fused {
            symbol: symbol.clone(),
            action: fused.action,
            confidence: fused.confidence,
        });
        debug!(%symbol, action = %fused.action, confidence = fused.confidence, "fused decision");

        match fused.action {
            SignalKind::Buy => {
                let amount =
                    self.config.trading.risk.initial_capital * self.config.trading.risk.max_single_position;
                match self.executor.execute_buy(symbol, price, amount).await {
                    Ok(order_id) => self.emit(EngineEvent::OrderSubmitted {
                        symbol: symbol.clone(),
                        side: Side::Buy,
                        order_id,
                    }),
                    Err(e) => self.log_order_error(symbol, e),
                }
            }
            SignalKind::Sell => {
                let Some(position) = position else { return };
                if position.available <= Decimal::ZERO {
                    debug!(%symbol, "sell decision with nothing available; skipped");
                    return;
                }
                match self
                    .executor
                    .execute_sell(symbol, price, position.available)
                    .await
                {
                    Ok(order_id) => self.emit(EngineEvent::OrderSubmitted {
                        symbol: symbol.clone(),
                        side: Side::Sell,
                        order_id,
                    }),
                    Err(e) => self.log_order_error(symbol, e),
                }
            }
            SignalKind::Hold => {}
        }
    }

    /// Fold any new fills into the ledger/journal and notify strategies.
    async fn reconcile_fills(&mut self) {
        match self.executor.sync_trades().await {
            Ok(applied) => {
                for trade in &applied {
                    self.manager.notify_trade(trade).await;
                }
            }
            Err(e) => warn!(error = %e, "trade sync failed; will retry next tick"),
        }
    }

    /// Close the session and open a new one when the calendar date rolled.
    async fn roll_session_if_needed(&mut self) {
        let today = Utc::now().date_naive();
        let session_date = self.executor.risk().lock().state().session_date();
        if session_date == today {
            return;
        }
        self.close_session(session_date).await;
        let equity = self.session_equity().await;
        self.executor
            .risk()
            .lock()
            .state_mut()
            .begin_session(today, equity);
        self.trades_at_session_start = self.executor.journal().trade_count();
    }

    /// Write the daily equity row and notify strategies of the close.
    pub async fn close_session(&mut self, date: NaiveDate) {
        let close_equity = self.session_equity().await;
        let (open_equity, trade_count) = {
            let risk = self.executor.risk().lock();
            let trades = self
                .executor
                .journal()
                .trade_count()
                .saturating_sub(self.trades_at_session_start);
            (risk.state().daily_start_equity(), trades as u32)
        };
        let daily_pnl = close_equity - open_equity;
        let daily_pnl_pct = if open_equity > Decimal::ZERO {
            daily_pnl / open_equity
        } else {
            Decimal::ZERO
        };
        let row = tw_types::DailyEquity {
            date,
            open_equity,
            close_equity,
            daily_pnl,
            daily_pnl_pct,
            trade_count,
        };
        if let Err(e) = self.executor.journal().record_daily_equity(row).await {
            error!(error = %e, "failed to persist daily equity row");
        }
        self.manager.notify_daily_close(date).await;
        self.emit(EngineEvent::SessionClosed { date });
        info!(%date, %close_equity, "session closed");
    }

    // -- helpers ------------------------------------------------------------

    fn fusion_ttl(&self) -> u64 {
        self.config.trading.ai_risk.cache_expiry_secs
    }

    async fn session_equity(&self) -> Decimal {
        match self.executor.current_equity().await {
            Ok(equity) => equity,
            Err(e) => {
                warn!(error = %e, "balance unavailable; using last known equity");
                self.executor.risk().lock().state().current_equity()
            }
        }
    }

    fn log_order_error(&mut self, symbol: &Symbol, error: ExecutorError) {
        match error.denial_kind() {
            Some(kind) => {
                // Already audit-logged by the chain.
                self.emit(EngineEvent::OrderDenied {
                    symbol: symbol.clone(),
                    kind,
                });
            }
            None => {
                warn!(%symbol, error = %error, "order attempt failed");
            }
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }
}
