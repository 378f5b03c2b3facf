//! Managed broker connection.
//!
//! Wraps exactly one [`BrokerApi`] adapter and owns session lifecycle:
//! bounded-retry login, a periodic liveness probe with automatic reconnect,
//! serialization of mutating calls, and a deadline on every call.

use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tw_types::{Balance, BrokerConfig, Order, PositionState, Symbol, Trade};

use crate::broker::{BrokerApi, BrokerError, BrokerResult};

/// Connection policy.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub username: String,
    pub password: String,
    pub client_path: String,
    /// Login attempts per `connect` before giving up.
    pub connect_attempts: u32,
    /// Fixed backoff between login attempts.
    pub connect_backoff: Duration,
    /// Cadence of the liveness probe.
    pub liveness_interval: Duration,
    /// Deadline applied to every broker call.
    pub call_timeout: Duration,
    /// Short deadline for best-effort logouts during reconnect/disconnect.
    pub logout_timeout: Duration,
}

impl From<&BrokerConfig> for ConnectorConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            client_path: config.exe_path.clone(),
            connect_attempts: config.connect_attempts.max(1),
            connect_backoff: Duration::from_secs(config.connect_backoff_secs),
            liveness_interval: Duration::from_secs(config.liveness_interval_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            logout_timeout: Duration::from_secs(config.call_timeout_secs.min(3)),
        }
    }
}

/// Owns one broker adapter; all trading code goes through here.
pub struct BrokerConnector<B: BrokerApi> {
    adapter: Arc<B>,
    config: ConnectorConfig,
    /// Serializes mutating calls (login/logout/buy/sell/cancel). Reads run
    /// concurrently.
    write_gate: Mutex<()>,
    connected: AtomicBool,
    liveness: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<B: BrokerApi + 'static> BrokerConnector<B> {
    pub fn new(adapter: B, config: ConnectorConfig) -> Arc<Self> {
        Arc::new(Self {
            adapter: Arc::new(adapter),
            config,
            write_gate: Mutex::new(()),
            connected: AtomicBool::new(false),
            liveness: parking_lot::Mutex::new(None),
        })
    }

    /// Login under bounded retry, then start the liveness loop.
    pub async fn connect(self: &Arc<Self>) -> BrokerResult<()> {
        self.login_with_retry().await?;
        self.spawn_liveness();
        Ok(())
    }

    /// Stop the liveness loop and log out (best-effort, short deadline).
    pub async fn disconnect(&self) {
        if let Some(handle) = self.liveness.lock().take() {
            handle.abort();
        }
        let _gate = self.write_gate.lock().await;
        if let Err(e) = deadline(self.config.logout_timeout, self.adapter.logout()).await {
            warn!(error = %e, "logout failed during disconnect");
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("broker disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Direct read access to the wrapped adapter.
    pub fn adapter(&self) -> &Arc<B> {
        &self.adapter
    }

    async fn login_with_retry(&self) -> BrokerResult<()> {
        let _gate = self.write_gate.lock().await;
        let mut last_err = BrokerError::NotConnected;
        for attempt in 1..=self.config.connect_attempts {
            match deadline(
                self.config.call_timeout,
                self.adapter.login(
                    &self.config.username,
                    &self.config.password,
                    &self.config.client_path,
                ),
            )
            .await
            {
                Ok(()) => {
                    self.connected.store(true, Ordering::SeqCst);
                    info!(attempt, "broker login succeeded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "broker login failed");
                    last_err = e;
                    if attempt < self.config.connect_attempts {
                        tokio::time::sleep(self.config.connect_backoff).await;
                    }
                }
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        Err(last_err)
    }

    /// Best-effort logout followed by a fresh login cycle.
    pub async fn reconnect(self: &Arc<Self>) -> BrokerResult<()> {
        {
            let _gate = self.write_gate.lock().await;
            if let Err(e) = deadline(self.config.logout_timeout, self.adapter.logout()).await {
                debug!(error = %e, "logout before reconnect failed (ignored)");
            }
        }
        self.login_with_retry().await
    }

    fn spawn_liveness(self: &Arc<Self>) {
        let connector = Arc::clone(self);
        let handle = tokio::spawn(async move {
            connector.liveness_loop().await;
        });
        if let Some(previous) = self.liveness.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Probe `is_connected` at a fixed cadence. Two consecutive negative
    /// probes trigger one reconnect attempt per interval until a probe or a
    /// reconnect succeeds.
    async fn liveness_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.liveness_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick
        let mut failed_probes = 0u32;
        loop {
            ticker.tick().await;
            let alive = deadline(self.config.call_timeout, async {
                Ok(self.adapter.is_connected().await)
            })
            .await
            .unwrap_or(false);

            if alive {
                failed_probes = 0;
                self.connected.store(true, Ordering::SeqCst);
                continue;
            }

            failed_probes += 1;
            self.connected.store(false, Ordering::SeqCst);
            warn!(failed_probes, "liveness probe failed");
            if failed_probes >= 2 {
                match self.reconnect().await {
                    Ok(()) => {
                        info!("automatic reconnect succeeded");
                        failed_probes = 0;
                    }
                    Err(e) => warn!(error = %e, "automatic reconnect failed"),
                }
            }
        }
    }

    // -- serialized trading calls -------------------------------------------

    pub async fn buy(
        &self,
        symbol: &Symbol,
        price: Decimal,
        quantity: Decimal,
    ) -> BrokerResult<String> {
        let _gate = self.write_gate.lock().await;
        deadline(
            self.config.call_timeout,
            self.adapter.buy(symbol, price, quantity),
        )
        .await
    }

    pub async fn sell(
        &self,
        symbol: &Symbol,
        price: Decimal,
        quantity: Decimal,
    ) -> BrokerResult<String> {
        let _gate = self.write_gate.lock().await;
        deadline(
            self.config.call_timeout,
            self.adapter.sell(symbol, price, quantity),
        )
        .await
    }

    pub async fn cancel(&self, order_id: &str) -> BrokerResult<()> {
        let _gate = self.write_gate.lock().await;
        deadline(self.config.call_timeout, self.adapter.cancel(order_id)).await
    }

    // -- concurrent read calls ----------------------------------------------

    pub async fn balance(&self) -> BrokerResult<Balance> {
        deadline(self.config.call_timeout, self.adapter.balance()).await
    }

    pub async fn positions(&self) -> BrokerResult<Vec<PositionState>> {
        deadline(self.config.call_timeout, self.adapter.positions()).await
    }

    pub async fn orders(&self) -> BrokerResult<Vec<Order>> {
        deadline(self.config.call_timeout, self.adapter.orders()).await
    }

    pub async fn today_trades(&self) -> BrokerResult<Vec<Trade>> {
        deadline(self.config.call_timeout, self.adapter.today_trades()).await
    }
}

/// Bound `fut` by `limit`; an elapsed deadline surfaces as a transport error.
async fn deadline<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = BrokerResult<T>>,
) -> BrokerResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Transport(format!(
            "deadline of {limit:?} exceeded"
        ))),
    }
}
