//! The ordered risk-gate cascade.

use chrono::Utc;
use crossbeam_channel::Sender;
use rust_decimal::Decimal;
use tracing::{info, warn};

use tw_types::{Balance, OrderRequest, PositionLedger, Symbol, TradingConfig};

use crate::alerts::{RiskAlert, RiskAlertKind, RiskSeverity};
use crate::gates::{
    AiRiskGate, CashGate, ConcentrationGate, CooldownGate, DailyLossGate, DenialKind,
    EmergencyStopGate, GateContext, GateDecision, MinAmountGate, PositionCountGate, RiskGate,
    SinglePositionGate, VolatilitySizingGate,
};
use crate::state::RiskState;

/// Final decision of the chain for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// All gates passed; `amount` is the composed (possibly reduced)
    /// currency amount to execute.
    Approved { amount: Decimal },
    /// Short-circuited by the named gate.
    Denied {
        gate: &'static str,
        kind: DenialKind,
        message: String,
    },
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved { .. })
    }

    pub fn denial_kind(&self) -> Option<DenialKind> {
        match self {
            Verdict::Denied { kind, .. } => Some(*kind),
            Verdict::Approved { .. } => None,
        }
    }
}

/// Chain evaluation result plus any liquidation work the gates scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub verdict: Verdict,
    /// Symbols to market-sell because the daily-loss gate tripped.
    pub liquidate: Vec<Symbol>,
}

/// Ordered list of gates; first deny wins, `AllowWith` composes by minimum.
pub struct RiskChain {
    gates: Vec<Box<dyn RiskGate>>,
}

impl RiskChain {
    /// The standard cascade, in evaluation order.
    pub fn standard() -> Self {
        Self {
            gates: vec![
                Box::new(EmergencyStopGate),
                Box::new(MinAmountGate),
                Box::new(SinglePositionGate),
                Box::new(PositionCountGate),
                Box::new(CashGate),
                Box::new(DailyLossGate),
                Box::new(CooldownGate),
                Box::new(VolatilitySizingGate),
                Box::new(ConcentrationGate),
                Box::new(AiRiskGate),
            ],
        }
    }

    pub fn evaluate(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> Verdict {
        let mut amount = request.amount;
        for gate in &self.gates {
            match gate.check(request, ctx) {
                GateDecision::Allow => {}
                GateDecision::AllowWith(adjusted) => {
                    if adjusted < amount {
                        info!(
                            gate = gate.name(),
                            symbol = %request.symbol,
                            requested = %amount,
                            adjusted = %adjusted,
                            "gate reduced order amount"
                        );
                        amount = adjusted;
                    }
                }
                GateDecision::Deny(kind, message) => {
                    warn!(
                        gate = gate.name(),
                        symbol = %request.symbol,
                        kind = %kind,
                        message = %message,
                        "order denied"
                    );
                    return Verdict::Denied {
                        gate: gate.name(),
                        kind,
                        message,
                    };
                }
            }
        }

        if amount < ctx.config.risk.min_order_amount {
            let message = format!(
                "adjusted amount {} fell below minimum {}",
                amount, ctx.config.risk.min_order_amount
            );
            warn!(symbol = %request.symbol, message = %message, "order denied");
            return Verdict::Denied {
                gate: "min_amount",
                kind: DenialKind::BelowMin,
                message,
            };
        }
        Verdict::Approved { amount }
    }
}

impl Default for RiskChain {
    fn default() -> Self {
        Self::standard()
    }
}

/// The chain plus its session state, evaluated as a unit.
///
/// One instance per process, owned by the order executor behind a single
/// lock.
pub struct RiskEngine {
    chain: RiskChain,
    state: RiskState,
    config: TradingConfig,
    alert_tx: Option<Sender<RiskAlert>>,
}

impl RiskEngine {
    pub fn new(config: TradingConfig, alert_tx: Option<Sender<RiskAlert>>) -> Self {
        let state = RiskState::new(
            Utc::now().date_naive(),
            config.risk.initial_capital,
            config.volatility_risk.lookback_period + 1,
        );
        Self {
            chain: RiskChain::standard(),
            state,
            config,
            alert_tx,
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RiskState {
        &mut self.state
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    /// Run the full cascade against the current ledger and balance.
    pub fn evaluate(
        &mut self,
        request: &OrderRequest,
        ledger: &PositionLedger,
        balance: &Balance,
    ) -> EvaluationOutcome {
        let mut ctx = GateContext {
            config: &self.config,
            state: &mut self.state,
            ledger,
            balance,
            now: Utc::now(),
            liquidate: Vec::new(),
        };
        let verdict = self.chain.evaluate(request, &mut ctx);
        let liquidate = std::mem::take(&mut ctx.liquidate);

        if let Verdict::Denied { gate, kind, message } = &verdict {
            self.emit_denial(request, gate, *kind, message);
        }

        EvaluationOutcome { verdict, liquidate }
    }

    fn emit_denial(&self, request: &OrderRequest, gate: &str, kind: DenialKind, message: &str) {
        let Some(tx) = &self.alert_tx else {
            return;
        };
        let alert = match kind {
            DenialKind::DailyLossExceeded | DenialKind::Emergency => RiskAlert::new(
                RiskSeverity::Critical,
                RiskAlertKind::EmergencyStop {
                    daily_loss_pct: self.state.daily_pnl_pct(),
                },
                message.to_string(),
            ),
            _ => RiskAlert::new(
                RiskSeverity::Warning,
                RiskAlertKind::OrderDenied {
                    gate: gate.to_string(),
                    symbol: request.symbol.to_string(),
                },
                message.to_string(),
            ),
        };
        // Best-effort send; a dropped receiver only loses telemetry.
        let _ = tx.try_send(alert);
    }
}
