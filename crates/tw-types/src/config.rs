//! Startup configuration tree.
//!
//! Loaded once from a JSON file; invalid or missing fields abort startup
//! with [`CoreError::Config`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::CoreError;
use crate::market::Symbol;

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub trading: TradingConfig,
    /// Watch-list the scheduler rotates through.
    #[serde(default)]
    pub symbols: Vec<Symbol>,
}

impl AppConfig {
    /// Load and validate the configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.trading.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub auto_trade: AutoTradeConfig,
    #[serde(default)]
    pub portfolio_risk: PortfolioRiskConfig,
    #[serde(default)]
    pub volatility_risk: VolatilityRiskConfig,
    #[serde(default)]
    pub cooldown_risk: CooldownRiskConfig,
    #[serde(default)]
    pub ai_risk: AiRiskConfig,
    #[serde(default)]
    pub strategies: Vec<StrategySpec>,
    /// How per-strategy signals combine: `vote`, `weighted`, or `priority`.
    #[serde(default = "default_combine_policy")]
    pub combine_policy: String,
    /// Normalized-score trigger for the `weighted` policy.
    #[serde(default = "default_combine_threshold")]
    pub combine_threshold: f64,
}

fn default_combine_policy() -> String {
    "weighted".into()
}
fn default_combine_threshold() -> f64 {
    0.5
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            risk: RiskConfig::default(),
            auto_trade: AutoTradeConfig::default(),
            portfolio_risk: PortfolioRiskConfig::default(),
            volatility_risk: VolatilityRiskConfig::default(),
            cooldown_risk: CooldownRiskConfig::default(),
            ai_risk: AiRiskConfig::default(),
            strategies: Vec::new(),
            combine_policy: default_combine_policy(),
            combine_threshold: default_combine_threshold(),
        }
    }
}

impl TradingConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        let r = &self.risk;
        if r.initial_capital <= Decimal::ZERO {
            return Err(CoreError::Config("risk.initial_capital must be > 0".into()));
        }
        if !unit_range(r.max_single_position) {
            return Err(CoreError::Config(
                "risk.max_single_position must be in [0, 1]".into(),
            ));
        }
        if !unit_range(r.max_daily_loss) {
            return Err(CoreError::Config(
                "risk.max_daily_loss must be in [0, 1]".into(),
            ));
        }
        if !unit_range(r.stop_loss_percent) {
            return Err(CoreError::Config(
                "risk.stop_loss_percent must be in [0, 1]".into(),
            ));
        }
        if r.max_positions == 0 {
            return Err(CoreError::Config("risk.max_positions must be > 0".into()));
        }
        if r.min_order_amount < Decimal::ZERO {
            return Err(CoreError::Config(
                "risk.min_order_amount must be >= 0".into(),
            ));
        }

        let v = &self.volatility_risk;
        if v.max_volatility <= v.volatility_threshold {
            return Err(CoreError::Config(
                "volatility_risk.max_volatility must exceed volatility_threshold".into(),
            ));
        }
        if v.lookback_period < 2 {
            return Err(CoreError::Config(
                "volatility_risk.lookback_period must be >= 2".into(),
            ));
        }
        if !(0.0..=1.0).contains(&v.adjustment_factor) {
            return Err(CoreError::Config(
                "volatility_risk.adjustment_factor must be in [0, 1]".into(),
            ));
        }

        if self.broker.kind == "http" && self.broker.service_url.is_empty() {
            return Err(CoreError::Config(
                "broker.service_url is required for the http broker".into(),
            ));
        }

        if !matches!(self.combine_policy.as_str(), "vote" | "weighted" | "priority") {
            return Err(CoreError::Config(format!(
                "unknown combine_policy: {}",
                self.combine_policy
            )));
        }
        Ok(())
    }
}

fn unit_range(v: Decimal) -> bool {
    v >= Decimal::ZERO && v <= Decimal::ONE
}

/// Broker endpoint and connection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Adapter selector: `http` or `sim`.
    #[serde(rename = "type", default = "default_broker_kind")]
    pub kind: String,
    #[serde(default)]
    pub service_url: String,
    #[serde(default)]
    pub broker_type: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub exe_path: String,
    /// Login attempts before `connect` gives up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Fixed backoff between login attempts.
    #[serde(default = "default_connect_backoff_secs")]
    pub connect_backoff_secs: u64,
    /// Cadence of the liveness probe.
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,
    /// Deadline applied to every broker call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_broker_kind() -> String {
    "http".into()
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_connect_backoff_secs() -> u64 {
    5
}
fn default_liveness_interval_secs() -> u64 {
    30
}
fn default_call_timeout_secs() -> u64 {
    10
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_broker_kind(),
            service_url: String::new(),
            broker_type: String::new(),
            username: String::new(),
            password: String::new(),
            exe_path: String::new(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_secs: default_connect_backoff_secs(),
            liveness_interval_secs: default_liveness_interval_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// Capital and position limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub initial_capital: Decimal,
    /// Cap on one symbol's market value as a fraction of initial capital.
    pub max_single_position: Decimal,
    pub max_positions: usize,
    /// Daily loss fraction that trips the emergency stop.
    pub max_daily_loss: Decimal,
    pub min_order_amount: Decimal,
    /// Unrealized loss fraction that triggers the stop-loss scan.
    pub stop_loss_percent: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from(100_000),
            max_single_position: Decimal::new(3, 1), // 30%
            max_positions: 5,
            max_daily_loss: Decimal::new(1, 1), // 10%
            min_order_amount: Decimal::from(100),
            stop_loss_percent: Decimal::new(5, 2), // 5%
        }
    }
}

/// Automatic trading loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoTradeConfig {
    pub enabled: bool,
    /// Scheduler tick interval in seconds.
    #[serde(alias = "check_interval")]
    pub check_interval_secs: u64,
    /// Minimum fused confidence for a buy or sell to stand.
    pub ai_threshold: f64,
    /// ML outputs below this confidence are treated as absent.
    pub ml_confidence: f64,
}

impl Default for AutoTradeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_secs: 60,
            ai_threshold: 0.3,
            ml_confidence: 0.5,
        }
    }
}

/// Portfolio concentration caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRiskConfig {
    /// Cap on one symbol's weight of total market value.
    pub max_symbol_weight: Decimal,
    /// Cap on one market bucket's weight of total market value.
    pub max_industry_weight: Decimal,
    /// Fraction of a cap at which a warning alert fires.
    pub alert_threshold: Decimal,
}

impl Default for PortfolioRiskConfig {
    fn default() -> Self {
        Self {
            max_symbol_weight: Decimal::new(35, 2),   // 35%
            max_industry_weight: Decimal::new(60, 2), // 60%
            alert_threshold: Decimal::new(8, 1),      // 80% of cap
        }
    }
}

/// Volatility-scaled sizing parameters (annualized fractions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityRiskConfig {
    /// Above this, buys are denied outright.
    pub max_volatility: f64,
    /// Above this, amounts scale down linearly.
    pub volatility_threshold: f64,
    /// Rolling window length in observations.
    pub lookback_period: usize,
    pub adjustment_factor: f64,
}

impl Default for VolatilityRiskConfig {
    fn default() -> Self {
        Self {
            max_volatility: 0.8,
            volatility_threshold: 0.4,
            lookback_period: 20,
            adjustment_factor: 0.9,
        }
    }
}

/// Anti-churn intervals and caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownRiskConfig {
    /// Minimum interval between trades on the same symbol.
    pub min_trade_interval_secs: u64,
    /// Minimum interval between any two trades.
    pub min_order_interval_secs: u64,
    pub max_daily_trades: u32,
    pub max_weekly_trades: u32,
}

impl Default for CooldownRiskConfig {
    fn default() -> Self {
        Self {
            min_trade_interval_secs: 300,
            min_order_interval_secs: 30,
            max_daily_trades: 10,
            max_weekly_trades: 30,
        }
    }
}

/// Cached AI risk-score settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRiskConfig {
    pub enabled: bool,
    /// Cadence at which fresh scores are requested (advisory; the producer
    /// is external).
    pub analysis_interval_secs: u64,
    /// Scores older than this are treated as absent.
    pub cache_expiry_secs: u64,
    /// Scores above this deny new buys.
    pub risk_threshold: f64,
}

impl Default for AiRiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analysis_interval_secs: 600,
            cache_expiry_secs: 1800,
            risk_threshold: 0.7,
        }
    }
}

/// One strategy to load, with its combine weight and priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

fn default_true() -> bool {
    true
}
fn default_weight() -> f64 {
    1.0
}
