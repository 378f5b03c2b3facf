//! Multi-strategy evaluation and signal combination.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tw_types::{MarketData, Signal, SignalKind, StrategySpec, Symbol, Trade, TradingConfig};

use crate::strategies::build_strategy;
use crate::strategy::{Strategy, StrategyError};

/// How per-strategy signals are folded into one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CombinePolicy {
    /// Majority among buy/sell/hold; ties hold. Strength is the majority
    /// fraction.
    Vote,
    /// Weighted signed sum of strengths, normalized by total weight and
    /// compared against the trigger threshold.
    Weighted { threshold: f64 },
    /// The signal from the enabled strategy with the lowest priority number.
    Priority,
}

impl CombinePolicy {
    pub fn from_config(config: &TradingConfig) -> Result<Self, StrategyError> {
        match config.combine_policy.as_str() {
            "vote" => Ok(CombinePolicy::Vote),
            "weighted" => Ok(CombinePolicy::Weighted {
                threshold: config.combine_threshold,
            }),
            "priority" => Ok(CombinePolicy::Priority),
            other => Err(StrategyError::UnknownKind(format!(
                "combine policy {other}"
            ))),
        }
    }
}

/// One configured strategy plus its per-symbol instances, created lazily on
/// a symbol's first tick.
struct LoadedStrategy {
    spec: StrategySpec,
    instances: HashMap<Symbol, Arc<Mutex<Box<dyn Strategy>>>>,
}

/// Holds the loaded strategies, fans ticks out to them in parallel, and
/// combines the per-symbol signals.
pub struct StrategyManager {
    strategies: Vec<LoadedStrategy>,
    policy: CombinePolicy,
    /// Per-strategy evaluation deadline; late results are discarded.
    strategy_deadline: Duration,
}

impl StrategyManager {
    /// Load the enabled strategies from config. Unknown strategy types and
    /// invalid parameters abort startup.
    pub fn from_config(
        specs: &[StrategySpec],
        policy: CombinePolicy,
        strategy_deadline: Duration,
    ) -> Result<Self, StrategyError> {
        let mut strategies = Vec::new();
        for spec in specs.iter().filter(|s| s.enabled) {
            // Probe the registry now so a bad type fails at startup, not on
            // the first tick.
            build_strategy(&spec.kind)?;
            strategies.push(LoadedStrategy {
                spec: spec.clone(),
                instances: HashMap::new(),
            });
        }
        Ok(Self {
            strategies,
            policy,
            strategy_deadline,
        })
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Evaluate one snapshot across all strategies in parallel and combine.
    ///
    /// Strategies that miss the deadline or fail are skipped for this tick.
    /// If the evaluation itself is cancelled (the caller drops this future),
    /// the spawned per-strategy tasks are aborted and their partial results
    /// discarded.
    pub async fn evaluate(&mut self, data: &MarketData) -> Option<Signal> {
        let symbol = data.symbol.clone();
        let mut tasks = Vec::new();

        for loaded in &mut self.strategies {
            let instance = match loaded.instances.get(&symbol) {
                Some(instance) => Arc::clone(instance),
                None => {
                    let mut strategy = match build_strategy(&loaded.spec.kind) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(strategy = %loaded.spec.name, error = %e, "strategy build failed");
                            continue;
                        }
                    };
                    if let Err(e) = strategy.init(&symbol, &loaded.spec.parameters) {
                        warn!(strategy = %loaded.spec.name, error = %e, "strategy init failed");
                        continue;
                    }
                    let instance = Arc::new(Mutex::new(strategy));
                    loaded
                        .instances
                        .insert(symbol.clone(), Arc::clone(&instance));
                    instance
                }
            };

            let name = loaded.spec.name.clone();
            let weight = loaded.spec.weight;
            let priority = loaded.spec.priority;
            let snapshot = data.clone();
            let deadline = self.strategy_deadline;
            tasks.push(tokio::spawn(async move {
                let result = tokio::time::timeout(deadline, async {
                    instance.lock().await.generate_signal(&snapshot)
                })
                .await;
                match result {
                    Ok(signal) => signal.map(|s| (name, weight, priority, s)),
                    Err(_) => {
                        warn!(strategy = %name, "strategy missed its deadline; result discarded");
                        None
                    }
                }
            }));
        }

        // Dropping a JoinHandle detaches its task; the guard aborts whatever
        // is still running if this future dies before the join loop ends.
        let _abort_guard = AbortOnDrop(tasks.iter().map(|t| t.abort_handle()).collect());

        let mut contributions = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Some(contribution)) => contributions.push(contribution),
                Ok(None) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!(error = %e, "strategy task failed"),
            }
        }
        if contributions.is_empty() {
            return None;
        }
        debug!(
            symbol = %symbol,
            signals = contributions.len(),
            policy = ?self.policy,
            "combining strategy signals"
        );
        Some(self.combine(data, contributions))
    }

    fn combine(
        &self,
        data: &MarketData,
        contributions: Vec<(String, f64, u32, Signal)>,
    ) -> Signal {
        match self.policy {
            CombinePolicy::Vote => {
                let total = contributions.len();
                let mut buys = 0usize;
                let mut sells = 0usize;
                let mut holds = 0usize;
                for (_, _, _, signal) in &contributions {
                    match signal.kind {
                        SignalKind::Buy => buys += 1,
                        SignalKind::Sell => sells += 1,
                        SignalKind::Hold => holds += 1,
                    }
                }
                let (kind, majority) = if buys > sells && buys > holds {
                    (SignalKind::Buy, buys)
                } else if sells > buys && sells > holds {
                    (SignalKind::Sell, sells)
                } else if holds > buys && holds > sells {
                    (SignalKind::Hold, holds)
                } else {
                    (SignalKind::Hold, holds.max(buys).max(sells))
                };
                let strength = majority as f64 / total as f64;
                Signal::new(data.symbol.clone(), kind, strength, data.close).with_reason(format!(
                    "vote {}buy/{}sell/{}hold of {}",
                    buys, sells, holds, total
                ))
            }
            CombinePolicy::Weighted { threshold } => {
                let total_weight: f64 = contributions.iter().map(|(_, w, _, _)| w.abs()).sum();
                let score: f64 = contributions
                    .iter()
                    .map(|(_, weight, _, signal)| signal.kind.sign() * signal.strength * weight)
                    .sum();
                let normalized = if total_weight > 0.0 {
                    score / total_weight
                } else {
                    0.0
                };
                let kind = if normalized > threshold {
                    SignalKind::Buy
                } else if normalized < -threshold {
                    SignalKind::Sell
                } else {
                    SignalKind::Hold
                };
                Signal::new(
                    data.symbol.clone(),
                    kind,
                    normalized.abs().min(1.0),
                    data.close,
                )
                .with_reason(format!(
                    "weighted score {:+.3} vs {:.3}",
                    normalized, threshold
                ))
            }
            CombinePolicy::Priority => {
                let (name, _, _, signal) = contributions
                    .into_iter()
                    .min_by_key(|(_, _, priority, _)| *priority)
                    .expect("contributions checked non-empty");
                signal.with_reason(format!("priority pick: {name}"))
            }
        }
    }

    /// Forward a fill to every instance bound to its symbol.
    pub async fn notify_trade(&self, trade: &Trade) {
        for loaded in &self.strategies {
            if let Some(instance) = loaded.instances.get(&trade.symbol) {
                instance.lock().await.on_trade(trade);
            }
        }
    }

    /// Forward the session close to every instance.
    pub async fn notify_daily_close(&self, date: NaiveDate) {
        for loaded in &self.strategies {
            for instance in loaded.instances.values() {
                instance.lock().await.on_daily_close(date);
            }
        }
    }
}

/// Aborts the held tasks on drop. Aborting an already-finished task is a
/// no-op, so the guard is safe to hold across a normal join.
struct AbortOnDrop(Vec<tokio::task::AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}
