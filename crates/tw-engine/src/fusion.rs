//! Fusing LLM and ML advisor outputs into one actionable decision.
//!
//! The advisors are opaque external producers; their latest outputs sit in a
//! TTL cache and a stale entry is treated as absent. Fusion itself is a pure
//! function of its inputs, so repeated evaluation of the same cache state
//! yields the same decision.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use tw_types::{
    LlmAction, LlmSignal, MlSignal, PositionState, SignalKind, Symbol, TradingConfig,
    TradingSignal,
};

/// Tunables for the fusion step.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Aggregate score above which the decision is a buy.
    pub buy_trigger: f64,
    /// Aggregate score below which the decision is a sell.
    pub sell_trigger: f64,
    /// Minimum fused confidence; weaker decisions demote to hold.
    pub confidence_threshold: f64,
    /// ML outputs below this confidence are treated as absent.
    pub ml_min_confidence: f64,
    /// Advisor cache entries older than this are treated as absent.
    pub cache_ttl_secs: u64,
}

impl FusionConfig {
    pub fn from_config(config: &TradingConfig) -> Self {
        Self {
            buy_trigger: 1.0,
            sell_trigger: -0.5,
            confidence_threshold: config.auto_trade.ai_threshold,
            ml_min_confidence: config.auto_trade.ml_confidence,
            cache_ttl_secs: config.ai_risk.cache_expiry_secs,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            buy_trigger: 1.0,
            sell_trigger: -0.5,
            confidence_threshold: 0.3,
            ml_min_confidence: 0.5,
            cache_ttl_secs: 1800,
        }
    }
}

/// TTL cache of the latest advisor outputs per symbol.
#[derive(Debug, Default)]
pub struct AdvisorCache {
    llm: DashMap<Symbol, (LlmSignal, DateTime<Utc>)>,
    ml: DashMap<Symbol, (MlSignal, DateTime<Utc>)>,
}

impl AdvisorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_llm(&self, symbol: &Symbol, signal: LlmSignal) {
        self.llm.insert(symbol.clone(), (signal, Utc::now()));
    }

    pub fn set_ml(&self, symbol: &Symbol, signal: MlSignal) {
        self.ml.insert(symbol.clone(), (signal, Utc::now()));
    }

    pub fn llm(&self, symbol: &Symbol, ttl_secs: u64) -> Option<LlmSignal> {
        self.llm.get(symbol).and_then(|entry| {
            let (signal, at) = *entry;
            fresh(at, ttl_secs).then_some(signal)
        })
    }

    pub fn ml(&self, symbol: &Symbol, ttl_secs: u64) -> Option<MlSignal> {
        self.ml.get(symbol).and_then(|entry| {
            let (signal, at) = *entry;
            fresh(at, ttl_secs).then_some(signal)
        })
    }
}

fn fresh(at: DateTime<Utc>, ttl_secs: u64) -> bool {
    let age = Utc::now().signed_duration_since(at);
    age.num_seconds() >= 0 && (age.num_seconds() as u64) < ttl_secs
}

/// Combines advisor outputs into a [`TradingSignal`].
#[derive(Debug, Clone)]
pub struct SignalFusion {
    config: FusionConfig,
}

impl SignalFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Fuse the available advisor outputs for `symbol`.
    ///
    /// `position` enables the position-aware overrides: buys never average
    /// down a losing position, and sells of losing positions are tagged
    /// stop-loss-priority for the audit trail.
    pub fn fuse(
        &self,
        symbol: &Symbol,
        llm: Option<LlmSignal>,
        ml: Option<MlSignal>,
        position: Option<&PositionState>,
    ) -> TradingSignal {
        let mut reasons = Vec::new();

        let llm_score = llm.map(|signal| self.llm_score(&signal)).unwrap_or(0.0);
        let signed_llm = match llm.map(|s| s.action) {
            Some(LlmAction::Buy) => llm_score,
            Some(LlmAction::Sell) => -llm_score,
            _ => 0.0,
        };
        match llm {
            Some(signal) => reasons.push(format!(
                "llm {:?} conf {:.2} risk {:?} -> {:+.2}",
                signal.action, signal.confidence, signal.risk, signed_llm
            )),
            None => reasons.push("llm absent".into()),
        }

        let ml_score = match ml {
            Some(signal) if signal.confidence >= self.config.ml_min_confidence => {
                let score = signal.score();
                reasons.push(format!(
                    "ml label {:?} conf {:.2} -> {:+.2}",
                    signal.label, signal.confidence, score
                ));
                score
            }
            Some(signal) => {
                reasons.push(format!(
                    "ml conf {:.2} below floor; ignored",
                    signal.confidence
                ));
                0.0
            }
            None => {
                reasons.push("ml absent".into());
                0.0
            }
        };

        let aggregate = signed_llm + ml_score;
        let (mut action, mut confidence) = if aggregate > self.config.buy_trigger {
            (
                SignalKind::Buy,
                ((aggregate - self.config.buy_trigger) / 2.0).clamp(0.0, 1.0),
            )
        } else if aggregate < self.config.sell_trigger {
            (
                SignalKind::Sell,
                ((self.config.sell_trigger - aggregate) / 2.0).clamp(0.0, 1.0),
            )
        } else {
            (SignalKind::Hold, 0.0)
        };
        reasons.push(format!("aggregate {aggregate:+.3} -> {action}"));

        if action != SignalKind::Hold && confidence <= self.config.confidence_threshold {
            reasons.push(format!(
                "confidence {:.3} below threshold {:.3}; demoted to hold",
                confidence, self.config.confidence_threshold
            ));
            action = SignalKind::Hold;
            confidence = 0.0;
        }

        let mut stop_loss_priority = false;
        if let Some(position) = position {
            if action == SignalKind::Buy && position.unrealized_pnl <= rust_decimal::Decimal::ZERO
            {
                reasons.push(format!(
                    "holding {} at {:.2}% unrealized; refusing to average down",
                    symbol,
                    position.unrealized_pnl_pct() * rust_decimal::Decimal::from(100)
                ));
                action = SignalKind::Hold;
                confidence = 0.0;
            }
            if action == SignalKind::Sell && position.unrealized_pnl < rust_decimal::Decimal::ZERO
            {
                stop_loss_priority = true;
                reasons.push("sell closes a losing position; stop-loss priority".into());
            }
        }

        debug!(%symbol, ?action, aggregate, confidence, "fusion decision");
        TradingSignal {
            symbol: symbol.clone(),
            action,
            confidence,
            llm_score: signed_llm,
            ml_score,
            aggregate,
            stop_loss_priority,
            reasons,
            generated_at: Utc::now(),
        }
    }

    /// Unsigned LLM score: confidence scaled by risk, boosted 10% when the
    /// action runs with the trend, clamped to [0, 1].
    fn llm_score(&self, signal: &LlmSignal) -> f64 {
        let mut score = signal.confidence * signal.risk.factor();
        if signal.agrees_with_trend() {
            score *= 1.1;
        }
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tw_types::{MlLabel, RiskLevel, Trend};

    fn sym() -> Symbol {
        Symbol::new("sh600000")
    }

    fn fusion(threshold: f64) -> SignalFusion {
        SignalFusion::new(FusionConfig {
            confidence_threshold: threshold,
            ml_min_confidence: 0.5,
            ..Default::default()
        })
    }

    fn llm(action: LlmAction, confidence: f64, risk: RiskLevel, trend: Trend) -> LlmSignal {
        LlmSignal {
            action,
            confidence,
            risk,
            trend,
        }
    }

    #[test]
    fn high_risk_llm_alone_holds() {
        // LLM buy at 0.6 scaled ×0.5 for high risk = 0.30; ML hold adds 0.
        let fused = fusion(0.3).fuse(
            &sym(),
            Some(llm(LlmAction::Buy, 0.6, RiskLevel::High, Trend::Sideways)),
            Some(MlSignal {
                label: MlLabel::Hold,
                confidence: 0.7,
            }),
            None,
        );
        assert_eq!(fused.action, SignalKind::Hold);
        assert!((fused.aggregate - 0.30).abs() < 1e-9);
    }

    #[test]
    fn strong_agreement_buys_with_mapped_confidence() {
        // LLM 0.9 × 1.0 × 1.1 = 0.99; ML (2−1)·0.8 = +0.8; aggregate 1.79.
        let fused = fusion(0.3).fuse(
            &sym(),
            Some(llm(LlmAction::Buy, 0.9, RiskLevel::Low, Trend::Up)),
            Some(MlSignal {
                label: MlLabel::Buy,
                confidence: 0.8,
            }),
            None,
        );
        assert_eq!(fused.action, SignalKind::Buy);
        assert!((fused.aggregate - 1.79).abs() < 1e-9);
        assert!((fused.confidence - 0.395).abs() < 1e-9);

        // The same inputs under a stricter threshold demote to hold.
        let strict = fusion(0.5).fuse(
            &sym(),
            Some(llm(LlmAction::Buy, 0.9, RiskLevel::Low, Trend::Up)),
            Some(MlSignal {
                label: MlLabel::Buy,
                confidence: 0.8,
            }),
            None,
        );
        assert_eq!(strict.action, SignalKind::Hold);
    }

    #[test]
    fn llm_score_clamps_at_one() {
        let fusion = fusion(0.3);
        let score = fusion.llm_score(&llm(LlmAction::Buy, 0.95, RiskLevel::Low, Trend::Up));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn strong_disagreement_sells() {
        let fused = fusion(0.1).fuse(
            &sym(),
            Some(llm(LlmAction::Sell, 0.9, RiskLevel::Low, Trend::Down)),
            Some(MlSignal {
                label: MlLabel::Sell,
                confidence: 0.9,
            }),
            None,
        );
        // −0.99 − 0.9 = −1.89 < −0.5
        assert_eq!(fused.action, SignalKind::Sell);
        assert!(fused.confidence > 0.1);
    }

    #[test]
    fn low_confidence_ml_is_ignored() {
        let fused = fusion(0.3).fuse(
            &sym(),
            None,
            Some(MlSignal {
                label: MlLabel::Buy,
                confidence: 0.4, // below the 0.5 floor
            }),
            None,
        );
        assert_eq!(fused.ml_score, 0.0);
        assert_eq!(fused.action, SignalKind::Hold);
    }

    #[test]
    fn uncertain_llm_contributes_nothing() {
        let fused = fusion(0.3).fuse(
            &sym(),
            Some(llm(LlmAction::Uncertain, 0.9, RiskLevel::Low, Trend::Up)),
            None,
            None,
        );
        assert_eq!(fused.llm_score, 0.0);
        assert_eq!(fused.action, SignalKind::Hold);
    }

    #[test]
    fn fusion_is_idempotent() {
        let fusion = fusion(0.3);
        let inputs = (
            Some(llm(LlmAction::Hold, 0.8, RiskLevel::Medium, Trend::Sideways)),
            Some(MlSignal {
                label: MlLabel::Hold,
                confidence: 0.9,
            }),
        );
        let first = fusion.fuse(&sym(), inputs.0, inputs.1, None);
        let second = fusion.fuse(&sym(), inputs.0, inputs.1, None);
        assert_eq!(first.action, second.action);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.aggregate, second.aggregate);
        assert_eq!(first.reasons, second.reasons);
    }

    #[test]
    fn never_averages_down_a_losing_position() {
        let mut position = PositionState::opened(sym(), "test", dec!(100), dec!(10));
        position.refresh_price(dec!(9.5)); // losing

        let fused = fusion(0.3).fuse(
            &sym(),
            Some(llm(LlmAction::Buy, 0.9, RiskLevel::Low, Trend::Up)),
            Some(MlSignal {
                label: MlLabel::Buy,
                confidence: 0.9,
            }),
            Some(&position),
        );
        assert_eq!(fused.action, SignalKind::Hold);

        // A winning position may be added to.
        position.refresh_price(dec!(11));
        let fused = fusion(0.3).fuse(
            &sym(),
            Some(llm(LlmAction::Buy, 0.9, RiskLevel::Low, Trend::Up)),
            Some(MlSignal {
                label: MlLabel::Buy,
                confidence: 0.9,
            }),
            Some(&position),
        );
        assert_eq!(fused.action, SignalKind::Buy);
    }

    #[test]
    fn losing_sell_is_tagged_stop_loss_priority() {
        let mut position = PositionState::opened(sym(), "test", dec!(100), dec!(10));
        position.refresh_price(dec!(9));

        let fused = fusion(0.1).fuse(
            &sym(),
            Some(llm(LlmAction::Sell, 0.9, RiskLevel::Low, Trend::Down)),
            Some(MlSignal {
                label: MlLabel::Sell,
                confidence: 0.9,
            }),
            Some(&position),
        );
        assert_eq!(fused.action, SignalKind::Sell);
        assert!(fused.stop_loss_priority);
    }

    #[test]
    fn advisor_cache_expires_entries() {
        let cache = AdvisorCache::new();
        let signal = llm(LlmAction::Buy, 0.9, RiskLevel::Low, Trend::Up);
        cache.set_llm(&sym(), signal);
        assert!(cache.llm(&sym(), 3600).is_some());
        assert!(cache.llm(&sym(), 0).is_none());
        assert!(cache.ml(&sym(), 3600).is_none());
    }
}
