use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::market::Symbol;

/// Trade direction expressed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl SignalKind {
    pub fn sign(&self) -> f64 {
        match self {
            SignalKind::Buy => 1.0,
            SignalKind::Sell => -1.0,
            SignalKind::Hold => 0.0,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::Buy => "buy",
            SignalKind::Sell => "sell",
            SignalKind::Hold => "hold",
        };
        write!(f, "{}", s)
    }
}

/// Output of a single strategy for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub kind: SignalKind,
    /// Conviction in [0, 1]; clamped on construction.
    pub strength: f64,
    /// Reference price: the market close at generation time.
    pub price: Decimal,
    pub target_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reason: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(symbol: Symbol, kind: SignalKind, strength: f64, price: Decimal) -> Self {
        Self {
            symbol,
            kind,
            strength: strength.clamp(0.0, 1.0),
            price,
            target_price: None,
            stop_price: None,
            reason: String::new(),
            metadata: HashMap::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn hold(symbol: Symbol, price: Decimal) -> Self {
        Self::new(symbol, SignalKind::Hold, 0.0, price)
    }
}

/// Action recommended by the LLM advisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmAction {
    Buy,
    Sell,
    Hold,
    Uncertain,
}

/// Risk level attached to an LLM recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Confidence discount applied to the LLM score.
    pub fn factor(&self) -> f64 {
        match self {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => 0.8,
            RiskLevel::High => 0.5,
        }
    }
}

/// Market trend as seen by the LLM advisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Sideways,
}

/// Cached output of the LLM advisor for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LlmSignal {
    pub action: LlmAction,
    pub confidence: f64,
    pub risk: RiskLevel,
    pub trend: Trend,
}

impl LlmSignal {
    /// Whether the recommended action runs with the reported trend.
    pub fn agrees_with_trend(&self) -> bool {
        matches!(
            (self.action, self.trend),
            (LlmAction::Buy, Trend::Up) | (LlmAction::Sell, Trend::Down)
        )
    }
}

/// Class label produced by the ML model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MlLabel {
    Sell = 0,
    Hold = 1,
    Buy = 2,
}

/// Cached output of the ML model for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlSignal {
    pub label: MlLabel,
    pub confidence: f64,
}

impl MlSignal {
    /// Signed score in [-1, +1]: `(label − 1) × confidence`.
    pub fn score(&self) -> f64 {
        (self.label as i32 - 1) as f64 * self.confidence
    }
}

/// The fused, actionable decision for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub symbol: Symbol,
    pub action: SignalKind,
    /// Aggregate confidence in [0, 1].
    pub confidence: f64,
    pub llm_score: f64,
    pub ml_score: f64,
    pub aggregate: f64,
    /// Set when a sell closes a losing position; audit marker only.
    pub stop_loss_priority: bool,
    /// Why the decision came out this way, innermost reason first.
    pub reasons: Vec<String>,
    pub generated_at: DateTime<Utc>,
}
