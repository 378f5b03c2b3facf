//! Individual pre-trade risk gates.
//!
//! Each gate is an independent predicate-plus-adjuster over one
//! [`OrderRequest`]. Gates that guard new exposure evaluate buys only; a
//! sell that reduces risk must never be blocked by them.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::fmt;
use tracing::warn;

use tw_types::{
    Balance, MarketBucket, OrderRequest, PositionLedger, Side, Symbol, TradingConfig,
};

use crate::state::RiskState;
use crate::volatility::annualized_volatility;

/// Why an order was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    Emergency,
    BelowMin,
    MaxPosition,
    MaxPositions,
    InsufficientCash,
    DailyLossExceeded,
    Cooldown,
    Blacklisted,
    HighVolatility,
    Concentration,
    AiRisk,
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenialKind::Emergency => "emergency-stop",
            DenialKind::BelowMin => "below-min-amount",
            DenialKind::MaxPosition => "max-single-position",
            DenialKind::MaxPositions => "max-position-count",
            DenialKind::InsufficientCash => "insufficient-cash",
            DenialKind::DailyLossExceeded => "daily-loss-exceeded",
            DenialKind::Cooldown => "cooldown",
            DenialKind::Blacklisted => "blacklisted",
            DenialKind::HighVolatility => "high-volatility",
            DenialKind::Concentration => "concentration",
            DenialKind::AiRisk => "ai-risk",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a single gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow,
    /// Allow, but cap the currency amount. Adjustments compose by minimum
    /// across gates.
    AllowWith(Decimal),
    Deny(DenialKind, String),
}

/// Everything a gate may look at (and the bits of state it may mutate).
pub struct GateContext<'a> {
    pub config: &'a TradingConfig,
    pub state: &'a mut RiskState,
    pub ledger: &'a PositionLedger,
    pub balance: &'a Balance,
    pub now: DateTime<Utc>,
    /// Symbols the daily-loss gate scheduled for best-effort liquidation.
    pub liquidate: Vec<Symbol>,
}

/// A single pre-trade predicate+adjuster in the cascade.
pub trait RiskGate: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision;
}

// ---------------------------------------------------------------------------

/// Denies all buys while the sticky emergency stop is set.
pub struct EmergencyStopGate;

impl RiskGate for EmergencyStopGate {
    fn name(&self) -> &'static str {
        "emergency_stop"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        if request.side == Side::Buy && ctx.state.emergency_stopped() {
            return GateDecision::Deny(
                DenialKind::Emergency,
                "emergency stop active; buys are halted for the session".into(),
            );
        }
        GateDecision::Allow
    }
}

/// Denies any order below the configured currency floor.
pub struct MinAmountGate;

impl RiskGate for MinAmountGate {
    fn name(&self) -> &'static str {
        "min_amount"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        let floor = ctx.config.risk.min_order_amount;
        if request.amount < floor {
            return GateDecision::Deny(
                DenialKind::BelowMin,
                format!("amount {} below minimum {}", request.amount, floor),
            );
        }
        GateDecision::Allow
    }
}

/// Caps one symbol's projected market value at
/// `max_single_position × initial_capital` (buys only).
pub struct SinglePositionGate;

impl RiskGate for SinglePositionGate {
    fn name(&self) -> &'static str {
        "single_position_cap"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        if request.side != Side::Buy {
            return GateDecision::Allow;
        }
        let cap = ctx.config.risk.max_single_position * ctx.config.risk.initial_capital;
        let projected = ctx.ledger.symbol_market_value(&request.symbol) + request.amount;
        if projected > cap {
            return GateDecision::Deny(
                DenialKind::MaxPosition,
                format!(
                    "projected position value {} exceeds cap {} for {}",
                    projected, cap, request.symbol
                ),
            );
        }
        GateDecision::Allow
    }
}

/// Bounds the number of distinct open symbols (buys only). Adding to an
/// existing position is always count-neutral.
pub struct PositionCountGate;

impl RiskGate for PositionCountGate {
    fn name(&self) -> &'static str {
        "position_count"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        if request.side != Side::Buy {
            return GateDecision::Allow;
        }
        let holds_symbol = ctx.ledger.position(&request.symbol).is_some();
        if !holds_symbol && ctx.ledger.open_symbols() >= ctx.config.risk.max_positions {
            return GateDecision::Deny(
                DenialKind::MaxPositions,
                format!(
                    "already holding {} symbols (cap {})",
                    ctx.ledger.open_symbols(),
                    ctx.config.risk.max_positions
                ),
            );
        }
        GateDecision::Allow
    }
}

/// Requires the full amount in available cash (buys only).
pub struct CashGate;

impl RiskGate for CashGate {
    fn name(&self) -> &'static str {
        "available_cash"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        if request.side != Side::Buy {
            return GateDecision::Allow;
        }
        if request.amount > ctx.balance.available {
            return GateDecision::Deny(
                DenialKind::InsufficientCash,
                format!(
                    "amount {} exceeds available cash {}",
                    request.amount, ctx.balance.available
                ),
            );
        }
        GateDecision::Allow
    }
}

/// Trips the emergency stop once the daily loss breaches the limit and
/// schedules liquidation of every open position (buys only).
pub struct DailyLossGate;

impl RiskGate for DailyLossGate {
    fn name(&self) -> &'static str {
        "daily_loss"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        if request.side != Side::Buy {
            return GateDecision::Allow;
        }
        let loss_limit = ctx.config.risk.max_daily_loss;
        let pnl_pct = ctx.state.daily_pnl_pct();
        if ctx.state.daily_start_equity() > Decimal::ZERO && pnl_pct <= -loss_limit {
            ctx.state.trip_emergency();
            ctx.liquidate = ctx.ledger.positions().map(|p| p.symbol.clone()).collect();
            warn!(
                daily_pnl_pct = %pnl_pct,
                limit = %loss_limit,
                positions = ctx.liquidate.len(),
                "daily loss limit breached; emergency stop set"
            );
            return GateDecision::Deny(
                DenialKind::DailyLossExceeded,
                format!("daily pnl {} breaches -{} limit", pnl_pct, loss_limit),
            );
        }
        GateDecision::Allow
    }
}

/// Enforces per-symbol and global trade intervals, daily/weekly trade count
/// caps, and blacklist windows.
pub struct CooldownGate;

impl RiskGate for CooldownGate {
    fn name(&self) -> &'static str {
        "cooldown"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        let config = &ctx.config.cooldown_risk;
        let symbol = &request.symbol;

        if ctx.state.blacklisted_at(symbol, ctx.now) {
            return GateDecision::Deny(
                DenialKind::Blacklisted,
                format!("{} is blacklisted", symbol),
            );
        }

        if let Some(last) = ctx.state.last_trade_on(symbol) {
            let min = Duration::seconds(config.min_trade_interval_secs as i64);
            if ctx.now.signed_duration_since(last) < min {
                return GateDecision::Deny(
                    DenialKind::Cooldown,
                    format!("last trade on {} within {}s", symbol, config.min_trade_interval_secs),
                );
            }
        }

        if let Some(last) = ctx.state.last_trade_any() {
            let min = Duration::seconds(config.min_order_interval_secs as i64);
            if ctx.now.signed_duration_since(last) < min {
                return GateDecision::Deny(
                    DenialKind::Cooldown,
                    format!("global trade within {}s", config.min_order_interval_secs),
                );
            }
        }

        if ctx.state.daily_trade_count(symbol) >= config.max_daily_trades {
            return GateDecision::Deny(
                DenialKind::Cooldown,
                format!("daily trade cap {} reached for {}", config.max_daily_trades, symbol),
            );
        }
        if ctx.state.weekly_trade_count(symbol) >= config.max_weekly_trades {
            return GateDecision::Deny(
                DenialKind::Cooldown,
                format!(
                    "weekly trade cap {} reached for {}",
                    config.max_weekly_trades, symbol
                ),
            );
        }

        GateDecision::Allow
    }
}

/// Scales buy amounts down as annualized volatility rises; denies outright
/// above the hard ceiling.
pub struct VolatilitySizingGate;

impl RiskGate for VolatilitySizingGate {
    fn name(&self) -> &'static str {
        "volatility_sizing"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        if request.side != Side::Buy {
            return GateDecision::Allow;
        }
        let config = &ctx.config.volatility_risk;
        let window: Vec<f64> = match ctx.state.price_window(&request.symbol) {
            Some(w) if w.len() >= config.lookback_period => w.iter().copied().collect(),
            _ => return GateDecision::Allow, // not enough history to judge
        };
        let vol = match annualized_volatility(&window) {
            Some(v) => v,
            None => return GateDecision::Allow,
        };

        if vol > config.max_volatility {
            return GateDecision::Deny(
                DenialKind::HighVolatility,
                format!(
                    "volatility {:.3} above ceiling {:.3} for {}",
                    vol, config.max_volatility, request.symbol
                ),
            );
        }
        if vol > config.volatility_threshold {
            let span = config.max_volatility - config.volatility_threshold;
            let scale = (1.0 - config.adjustment_factor * (vol - config.volatility_threshold) / span)
                .clamp(1.0 - config.adjustment_factor, 1.0);
            let amount = request.amount.to_f64().unwrap_or(0.0) * scale;
            let adjusted = Decimal::from_f64(amount).unwrap_or(Decimal::ZERO).round_dp(2);
            return GateDecision::AllowWith(adjusted);
        }
        GateDecision::Allow
    }
}

/// Denies buys that would push one symbol or one market bucket past its
/// configured share of portfolio equity (cash plus holdings).
pub struct ConcentrationGate;

impl RiskGate for ConcentrationGate {
    fn name(&self) -> &'static str {
        "concentration"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        if request.side != Side::Buy {
            return GateDecision::Allow;
        }
        let config = &ctx.config.portfolio_risk;
        // Cash spent on the buy stays inside the basis as market value, so
        // equity is cash + current holdings either way.
        let total = ctx.balance.cash + ctx.ledger.total_market_value();
        if total <= Decimal::ZERO {
            return GateDecision::Allow;
        }

        let symbol_value = ctx.ledger.symbol_market_value(&request.symbol) + request.amount;
        let symbol_weight = symbol_value / total;
        if symbol_weight > config.max_symbol_weight {
            return GateDecision::Deny(
                DenialKind::Concentration,
                format!(
                    "{} weight {:.4} exceeds cap {}",
                    request.symbol, symbol_weight, config.max_symbol_weight
                ),
            );
        }

        let bucket = request.symbol.bucket();
        let industry_value = bucket_value(ctx.ledger, bucket) + request.amount;
        let industry_weight = industry_value / total;
        if industry_weight > config.max_industry_weight {
            return GateDecision::Deny(
                DenialKind::Concentration,
                format!(
                    "bucket {} weight {:.4} exceeds cap {}",
                    bucket, industry_weight, config.max_industry_weight
                ),
            );
        }

        if symbol_weight > config.max_symbol_weight * config.alert_threshold {
            warn!(
                symbol = %request.symbol,
                weight = %symbol_weight,
                cap = %config.max_symbol_weight,
                "symbol weight approaching concentration cap"
            );
        }
        GateDecision::Allow
    }
}

fn bucket_value(ledger: &PositionLedger, bucket: MarketBucket) -> Decimal {
    ledger
        .positions()
        .filter(|p| p.symbol.bucket() == bucket)
        .map(|p| p.market_value)
        .sum()
}

/// Denies buys of symbols whose cached AI risk score exceeds the threshold.
/// A stale or missing score never blocks.
pub struct AiRiskGate;

impl RiskGate for AiRiskGate {
    fn name(&self) -> &'static str {
        "ai_risk"
    }

    fn check(&self, request: &OrderRequest, ctx: &mut GateContext<'_>) -> GateDecision {
        if request.side != Side::Buy || !ctx.config.ai_risk.enabled {
            return GateDecision::Allow;
        }
        let config = &ctx.config.ai_risk;
        if let Some(score) = ctx
            .state
            .ai_score(&request.symbol, config.cache_expiry_secs, ctx.now)
        {
            if score > config.risk_threshold {
                return GateDecision::Deny(
                    DenialKind::AiRisk,
                    format!(
                        "AI risk score {:.2} above threshold {:.2} for {}",
                        score, config.risk_threshold, request.symbol
                    ),
                );
            }
        }
        GateDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tw_types::Symbol;

    fn sym() -> Symbol {
        Symbol::new("sh600000")
    }

    fn context<'a>(
        config: &'a TradingConfig,
        state: &'a mut RiskState,
        ledger: &'a PositionLedger,
        balance: &'a Balance,
    ) -> GateContext<'a> {
        GateContext {
            config,
            state,
            ledger,
            balance,
            now: Utc::now(),
            liquidate: Vec::new(),
        }
    }

    fn fresh_state() -> RiskState {
        RiskState::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            dec!(100_000),
            20,
        )
    }

    #[test]
    fn emergency_gate_blocks_buys_not_sells() {
        let config = TradingConfig::default();
        let mut state = fresh_state();
        state.trip_emergency();
        let ledger = PositionLedger::new();
        let balance = Balance::all_cash(dec!(100_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        let buy = OrderRequest::buy(sym(), dec!(10), dec!(1000));
        assert!(matches!(
            EmergencyStopGate.check(&buy, &mut ctx),
            GateDecision::Deny(DenialKind::Emergency, _)
        ));

        let sell = OrderRequest::sell(sym(), dec!(10), dec!(100));
        assert_eq!(EmergencyStopGate.check(&sell, &mut ctx), GateDecision::Allow);
    }

    #[test]
    fn single_position_cap_counts_existing_holdings() {
        let mut config = TradingConfig::default();
        config.risk.initial_capital = dec!(100_000);
        config.risk.max_single_position = dec!(0.3);
        let mut state = fresh_state();
        let mut ledger = PositionLedger::new();
        ledger.apply_buy(&sym(), dec!(2000), dec!(10)); // 20k held
        let balance = Balance::all_cash(dec!(100_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        // 20k + 15k > 30k cap
        let over = OrderRequest::buy(sym(), dec!(10), dec!(15_000));
        assert!(matches!(
            SinglePositionGate.check(&over, &mut ctx),
            GateDecision::Deny(DenialKind::MaxPosition, _)
        ));

        let within = OrderRequest::buy(sym(), dec!(10), dec!(9000));
        assert_eq!(SinglePositionGate.check(&within, &mut ctx), GateDecision::Allow);
    }

    #[test]
    fn position_count_gate_allows_existing_symbols_at_cap() {
        let mut config = TradingConfig::default();
        config.risk.max_positions = 2;
        let mut state = fresh_state();
        let mut ledger = PositionLedger::new();
        ledger.apply_buy(&Symbol::new("sh600000"), dec!(100), dec!(10));
        ledger.apply_buy(&Symbol::new("sz000001"), dec!(100), dec!(10));
        let balance = Balance::all_cash(dec!(100_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        let new_symbol = OrderRequest::buy(Symbol::new("sz300750"), dec!(10), dec!(1000));
        assert!(matches!(
            PositionCountGate.check(&new_symbol, &mut ctx),
            GateDecision::Deny(DenialKind::MaxPositions, _)
        ));

        let existing = OrderRequest::buy(Symbol::new("sh600000"), dec!(10), dec!(1000));
        assert_eq!(PositionCountGate.check(&existing, &mut ctx), GateDecision::Allow);
    }

    #[test]
    fn cash_gate_checks_available() {
        let config = TradingConfig::default();
        let mut state = fresh_state();
        let ledger = PositionLedger::new();
        let mut balance = Balance::all_cash(dec!(5000));
        balance.available = dec!(4000);
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        let over = OrderRequest::buy(sym(), dec!(10), dec!(4500));
        assert!(matches!(
            CashGate.check(&over, &mut ctx),
            GateDecision::Deny(DenialKind::InsufficientCash, _)
        ));
    }

    #[test]
    fn daily_loss_gate_trips_emergency_and_schedules_liquidation() {
        let mut config = TradingConfig::default();
        config.risk.max_daily_loss = dec!(0.10);
        let mut state = fresh_state();
        state.update_equity(dec!(89_900)); // −10.1%
        let mut ledger = PositionLedger::new();
        ledger.apply_buy(&sym(), dec!(100), dec!(10));
        let balance = Balance::all_cash(dec!(89_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        let buy = OrderRequest::buy(sym(), dec!(10), dec!(1000));
        assert!(matches!(
            DailyLossGate.check(&buy, &mut ctx),
            GateDecision::Deny(DenialKind::DailyLossExceeded, _)
        ));
        assert_eq!(ctx.liquidate, vec![sym()]);
        assert!(ctx.state.emergency_stopped());
    }

    #[test]
    fn cooldown_gate_enforces_intervals_and_caps() {
        let mut config = TradingConfig::default();
        config.cooldown_risk.min_trade_interval_secs = 300;
        config.cooldown_risk.min_order_interval_secs = 30;
        config.cooldown_risk.max_daily_trades = 2;
        let mut state = fresh_state();
        let now = Utc::now();
        state.record_trade(&sym(), now - Duration::seconds(60));
        let ledger = PositionLedger::new();
        let balance = Balance::all_cash(dec!(100_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        // Within the 300s per-symbol interval.
        let buy = OrderRequest::buy(sym(), dec!(10), dec!(1000));
        assert!(matches!(
            CooldownGate.check(&buy, &mut ctx),
            GateDecision::Deny(DenialKind::Cooldown, _)
        ));

        // Different symbol: per-symbol interval clear, global interval clear
        // (60s > 30s), so it passes.
        let other = OrderRequest::buy(Symbol::new("sz000001"), dec!(10), dec!(1000));
        assert_eq!(CooldownGate.check(&other, &mut ctx), GateDecision::Allow);
    }

    #[test]
    fn cooldown_gate_daily_cap() {
        let mut config = TradingConfig::default();
        config.cooldown_risk.min_trade_interval_secs = 0;
        config.cooldown_risk.min_order_interval_secs = 0;
        config.cooldown_risk.max_daily_trades = 2;
        let mut state = fresh_state();
        let now = Utc::now();
        state.record_trade(&sym(), now - Duration::hours(2));
        state.record_trade(&sym(), now - Duration::hours(1));
        let ledger = PositionLedger::new();
        let balance = Balance::all_cash(dec!(100_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        let buy = OrderRequest::buy(sym(), dec!(10), dec!(1000));
        assert!(matches!(
            CooldownGate.check(&buy, &mut ctx),
            GateDecision::Deny(DenialKind::Cooldown, _)
        ));
    }

    #[test]
    fn blacklisted_symbol_is_denied() {
        let config = TradingConfig::default();
        let mut state = fresh_state();
        state.blacklist(&sym(), Utc::now() + Duration::hours(1));
        let ledger = PositionLedger::new();
        let balance = Balance::all_cash(dec!(100_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        let buy = OrderRequest::buy(sym(), dec!(10), dec!(1000));
        assert!(matches!(
            CooldownGate.check(&buy, &mut ctx),
            GateDecision::Deny(DenialKind::Blacklisted, _)
        ));
    }

    #[test]
    fn volatility_gate_scales_then_denies() {
        let mut config = TradingConfig::default();
        config.volatility_risk.volatility_threshold = 0.1;
        config.volatility_risk.max_volatility = 2.0;
        config.volatility_risk.lookback_period = 4;
        config.volatility_risk.adjustment_factor = 0.9;
        let mut state = fresh_state();
        let ledger = PositionLedger::new();
        let balance = Balance::all_cash(dec!(100_000));

        // Moderately volatile window: scaled but allowed.
        for p in [100.0, 103.0, 99.0, 104.0] {
            state.push_price(&sym(), p);
        }
        let mut ctx = context(&config, &mut state, &ledger, &balance);
        let buy = OrderRequest::buy(sym(), dec!(10), dec!(10_000));
        match VolatilitySizingGate.check(&buy, &mut ctx) {
            GateDecision::AllowWith(adjusted) => {
                assert!(adjusted < dec!(10_000));
                assert!(adjusted >= dec!(1000)); // floor at 10% of the request
            }
            other => panic!("expected AllowWith, got {other:?}"),
        }

        // Violent window: denied.
        let mut wild = fresh_state();
        for p in [100.0, 140.0, 80.0, 150.0] {
            wild.push_price(&sym(), p);
        }
        let mut ctx = context(&config, &mut wild, &ledger, &balance);
        assert!(matches!(
            VolatilitySizingGate.check(&buy, &mut ctx),
            GateDecision::Deny(DenialKind::HighVolatility, _)
        ));
    }

    #[test]
    fn volatility_gate_passes_without_history() {
        let config = TradingConfig::default();
        let mut state = fresh_state();
        let ledger = PositionLedger::new();
        let balance = Balance::all_cash(dec!(100_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);
        let buy = OrderRequest::buy(sym(), dec!(10), dec!(10_000));
        assert_eq!(VolatilitySizingGate.check(&buy, &mut ctx), GateDecision::Allow);
    }

    #[test]
    fn concentration_gate_denies_symbol_over_cap() {
        let mut config = TradingConfig::default();
        config.portfolio_risk.max_symbol_weight = dec!(0.35);
        let mut state = fresh_state();
        let mut ledger = PositionLedger::new();
        ledger.apply_buy(&sym(), dec!(3000), dec!(10)); // 30k
        ledger.apply_buy(&Symbol::new("sz000001"), dec!(3000), dec!(10)); // 30k
        let balance = Balance::all_cash(dec!(40_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        // (30k + 20k) of 100k equity = 50% > 35%
        let buy = OrderRequest::buy(sym(), dec!(10), dec!(20_000));
        assert!(matches!(
            ConcentrationGate.check(&buy, &mut ctx),
            GateDecision::Deny(DenialKind::Concentration, _)
        ));
    }

    #[test]
    fn concentration_gate_first_buy_within_cap_passes() {
        let config = TradingConfig::default();
        let mut state = fresh_state();
        let ledger = PositionLedger::new();
        let balance = Balance::all_cash(dec!(100_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        // 10k of 100k equity = 10%, well under the default 35% cap.
        let buy = OrderRequest::buy(sym(), dec!(10), dec!(10_000));
        assert_eq!(ConcentrationGate.check(&buy, &mut ctx), GateDecision::Allow);
    }

    #[test]
    fn concentration_gate_denies_bucket_over_cap() {
        let mut config = TradingConfig::default();
        config.portfolio_risk.max_symbol_weight = dec!(1.0);
        config.portfolio_risk.max_industry_weight = dec!(0.6);
        let mut state = fresh_state();
        let mut ledger = PositionLedger::new();
        // Both in the main-board-sh bucket.
        ledger.apply_buy(&Symbol::new("sh600000"), dec!(3000), dec!(10));
        ledger.apply_buy(&Symbol::new("sh601988"), dec!(3000), dec!(10));
        let balance = Balance::all_cash(dec!(10_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        // Bucket: (60k + 10k) of 70k equity = 100% > 60%
        let buy = OrderRequest::buy(Symbol::new("sh603993"), dec!(10), dec!(10_000));
        assert!(matches!(
            ConcentrationGate.check(&buy, &mut ctx),
            GateDecision::Deny(DenialKind::Concentration, _)
        ));

        // A growth-enterprise buy only carries its own weight.
        let gem = OrderRequest::buy(Symbol::new("sz300750"), dec!(10), dec!(10_000));
        assert_eq!(ConcentrationGate.check(&gem, &mut ctx), GateDecision::Allow);
    }

    #[test]
    fn ai_gate_uses_fresh_scores_only() {
        let mut config = TradingConfig::default();
        config.ai_risk.risk_threshold = 0.7;
        config.ai_risk.cache_expiry_secs = 300;
        let mut state = fresh_state();
        let now = Utc::now();
        state.set_ai_score(&sym(), 0.9, now);
        let ledger = PositionLedger::new();
        let balance = Balance::all_cash(dec!(100_000));
        let mut ctx = context(&config, &mut state, &ledger, &balance);

        let buy = OrderRequest::buy(sym(), dec!(10), dec!(1000));
        assert!(matches!(
            AiRiskGate.check(&buy, &mut ctx),
            GateDecision::Deny(DenialKind::AiRisk, _)
        ));

        // Stale score no longer blocks.
        let mut stale = fresh_state();
        stale.set_ai_score(&sym(), 0.9, now - Duration::hours(1));
        let mut ctx = context(&config, &mut stale, &ledger, &balance);
        assert_eq!(AiRiskGate.check(&buy, &mut ctx), GateDecision::Allow);
    }
}
