//! Risk alert types and severity levels.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a risk alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskSeverity {
    /// Informational — within normal operating range.
    Info,
    /// Warning — approaching a limit, or a single order denied.
    Warning,
    /// Critical — session-level control tripped; action required.
    Critical,
}

/// Discriminant for the kind of risk alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskAlertKind {
    /// A pre-trade gate denied an order.
    OrderDenied { gate: String, symbol: String },
    /// The daily-loss emergency stop tripped; liquidation scheduled.
    EmergencyStop { daily_loss_pct: Decimal },
    /// A position breached the stop-loss threshold.
    StopLossTriggered {
        symbol: String,
        loss_pct: Decimal,
    },
    /// A symbol or industry weight is approaching its concentration cap.
    ConcentrationNearCap {
        scope: String,
        weight: Decimal,
        cap: Decimal,
    },
}

/// A single risk alert emitted by the chain or the stop-loss monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: RiskSeverity,
    pub kind: RiskAlertKind,
    pub message: String,
}

impl RiskAlert {
    pub fn new(severity: RiskSeverity, kind: RiskAlertKind, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            kind,
            message,
        }
    }
}
