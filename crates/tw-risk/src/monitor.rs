//! Stop-loss detection.
//!
//! A read-only scan over the position ledger, not a gate: it reports the
//! symbols whose unrealized loss breached the threshold, and the scheduler
//! issues the resulting sell orders (which pass through the chain like any
//! other order).

use crossbeam_channel::Sender;
use rust_decimal::Decimal;
use tracing::warn;

use tw_types::{PositionLedger, Symbol};

use crate::alerts::{RiskAlert, RiskAlertKind, RiskSeverity};

/// One position breaching the stop-loss threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct StopLossBreach {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub current_price: Decimal,
    /// Unrealized PnL over cost, negative for losses.
    pub loss_pct: Decimal,
}

/// Scans the ledger for positions past their stop-loss.
pub struct StopLossMonitor {
    stop_loss_percent: Decimal,
    alert_tx: Option<Sender<RiskAlert>>,
}

impl StopLossMonitor {
    pub fn new(stop_loss_percent: Decimal, alert_tx: Option<Sender<RiskAlert>>) -> Self {
        Self {
            stop_loss_percent,
            alert_tx,
        }
    }

    /// Return every position whose unrealized PnL fraction is at or below
    /// `-stop_loss_percent`.
    pub fn scan(&self, ledger: &PositionLedger) -> Vec<StopLossBreach> {
        let mut breaches = Vec::new();
        for position in ledger.positions() {
            let pnl_pct = position.unrealized_pnl_pct();
            if pnl_pct <= -self.stop_loss_percent {
                warn!(
                    symbol = %position.symbol,
                    pnl_pct = %pnl_pct,
                    threshold = %self.stop_loss_percent,
                    "stop-loss threshold breached"
                );
                if let Some(tx) = &self.alert_tx {
                    let _ = tx.try_send(RiskAlert::new(
                        RiskSeverity::Warning,
                        RiskAlertKind::StopLossTriggered {
                            symbol: position.symbol.to_string(),
                            loss_pct: pnl_pct,
                        },
                        format!(
                            "{} unrealized pnl {} breached stop-loss {}",
                            position.symbol, pnl_pct, self.stop_loss_percent
                        ),
                    ));
                }
                breaches.push(StopLossBreach {
                    symbol: position.symbol.clone(),
                    quantity: position.quantity,
                    current_price: position.current_price,
                    loss_pct: pnl_pct,
                });
            }
        }
        breaches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::new("sh600000")
    }

    #[test]
    fn breach_detected_at_threshold() {
        let mut ledger = PositionLedger::new();
        ledger.apply_buy(&sym(), dec!(100), dec!(10));
        ledger.refresh_price(&sym(), dec!(9.4)); // −6%

        let monitor = StopLossMonitor::new(dec!(0.05), None);
        let breaches = monitor.scan(&ledger);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].symbol, sym());
        assert_eq!(breaches[0].quantity, dec!(100));
        assert_eq!(breaches[0].current_price, dec!(9.4));
        assert_eq!(breaches[0].loss_pct, dec!(-0.06));
    }

    #[test]
    fn small_losses_do_not_breach() {
        let mut ledger = PositionLedger::new();
        ledger.apply_buy(&sym(), dec!(100), dec!(10));
        ledger.refresh_price(&sym(), dec!(9.6)); // −4%

        let monitor = StopLossMonitor::new(dec!(0.05), None);
        assert!(monitor.scan(&ledger).is_empty());
    }

    #[test]
    fn winners_never_breach() {
        let mut ledger = PositionLedger::new();
        ledger.apply_buy(&sym(), dec!(100), dec!(10));
        ledger.refresh_price(&sym(), dec!(12));

        let monitor = StopLossMonitor::new(dec!(0.05), None);
        assert!(monitor.scan(&ledger).is_empty());
    }

    #[test]
    fn breach_emits_alert() {
        let (tx, rx) = unbounded();
        let mut ledger = PositionLedger::new();
        ledger.apply_buy(&sym(), dec!(100), dec!(10));
        ledger.refresh_price(&sym(), dec!(9));

        let monitor = StopLossMonitor::new(dec!(0.05), Some(tx));
        monitor.scan(&ledger);

        let alert = rx.try_recv().unwrap();
        assert!(matches!(alert.kind, RiskAlertKind::StopLossTriggered { .. }));
    }
}
