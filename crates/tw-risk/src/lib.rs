//! Pre-trade risk controls for the trading pipeline.
//!
//! Provides:
//! - An ordered cascade of independent risk gates with short-circuit denial
//!   and composable size adjustment
//! - Session-scoped [`state::RiskState`] (daily equity, cooldowns,
//!   blacklists, rolling volatility windows, cached AI scores)
//! - A read-only stop-loss scan over the position ledger
//! - Severity-tagged alerts over a channel

pub mod alerts;
pub mod chain;
pub mod gates;
pub mod monitor;
pub mod state;
pub mod volatility;

pub use alerts::{RiskAlert, RiskAlertKind, RiskSeverity};
pub use chain::{EvaluationOutcome, RiskChain, RiskEngine, Verdict};
pub use gates::{DenialKind, GateContext, GateDecision, RiskGate};
pub use monitor::{StopLossBreach, StopLossMonitor};
pub use state::{AiRiskScore, RiskState};
