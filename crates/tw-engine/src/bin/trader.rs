//! Trading engine service binary.
//!
//! Loads the JSON configuration, wires the pipeline, and runs the scheduler
//! until ctrl-c. The config path comes from the first argument or the
//! `TRADEWIND_CONFIG` environment variable.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tw_broker::{BrokerApi, BrokerConnector, ConnectorConfig, HttpBroker, SimBroker};
use tw_engine::{
    AdvisorCache, FixtureProvider, FusionConfig, HttpQuoteProvider, MarketDataProvider,
    OrderExecutor, Scheduler, SignalFusion,
};
use tw_journal::{JsonlStore, TradeJournal};
use tw_risk::{RiskAlert, RiskEngine, StopLossMonitor};
use tw_strategy::{CombinePolicy, StrategyManager};
use tw_types::{AppConfig, PositionLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TRADEWIND_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::from_file(&config_path)?;
    info!(config = %config_path, symbols = config.symbols.len(), "configuration loaded");

    match config.trading.broker.kind.as_str() {
        "sim" => {
            run_engine(SimBroker::with_defaults(), config).await
        }
        _ => {
            let broker = HttpBroker::new(
                &config.trading.broker.service_url,
                &config.trading.broker.broker_type,
                Duration::from_secs(config.trading.broker.call_timeout_secs),
            );
            run_engine(broker, config).await
        }
    }
}

async fn run_engine<B: BrokerApi + 'static>(broker: B, config: AppConfig) -> anyhow::Result<()> {
    let connector = BrokerConnector::new(broker, ConnectorConfig::from(&config.trading.broker));
    connector
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("broker connect failed: {e}"))?;

    // Risk alerts drain into the log; swap the receiver for a real sink
    // (notifier, dashboard feed) when one exists.
    let (alert_tx, alert_rx) = crossbeam_channel::unbounded::<RiskAlert>();
    tokio::task::spawn_blocking(move || {
        while let Ok(alert) = alert_rx.recv() {
            warn!(severity = ?alert.severity, kind = ?alert.kind, "{}", alert.message);
        }
    });

    let data_root =
        std::env::var("TRADEWIND_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let journal = Arc::new(TradeJournal::new(Arc::new(JsonlStore::new(&data_root)?)));
    let ledger = Arc::new(RwLock::new(PositionLedger::new()));
    let risk = Arc::new(parking_lot::Mutex::new(RiskEngine::new(
        config.trading.clone(),
        Some(alert_tx.clone()),
    )));
    let executor = Arc::new(OrderExecutor::new(
        Arc::clone(&connector),
        ledger,
        journal,
        risk,
    ));

    // Start from the broker's authoritative position snapshot.
    if let Err(e) = executor.reconcile_positions().await {
        warn!(error = %e, "initial reconciliation failed; ledger starts empty");
    }

    let manager = StrategyManager::from_config(
        &config.trading.strategies,
        CombinePolicy::from_config(&config.trading)?,
        Duration::from_secs(5),
    )?;
    let fusion = SignalFusion::new(FusionConfig::from_config(&config.trading));
    let stop_monitor =
        StopLossMonitor::new(config.trading.risk.stop_loss_percent, Some(alert_tx));
    let provider: Arc<dyn MarketDataProvider> = if config.trading.broker.service_url.is_empty() {
        warn!("no quote service configured; ticks will skip until quotes arrive");
        Arc::new(FixtureProvider::new())
    } else {
        Arc::new(HttpQuoteProvider::new(
            &config.trading.broker.service_url,
            Duration::from_secs(config.trading.broker.call_timeout_secs),
        ))
    };

    let mut scheduler = Scheduler::new(
        config,
        Arc::clone(&connector),
        executor,
        manager,
        fusion,
        Arc::new(AdvisorCache::new()),
        provider,
        stop_monitor,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received; shutting down");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    connector.disconnect().await;
    Ok(())
}
