//! Session-scoped risk state.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tracing::info;

use tw_types::Symbol;

/// Cached AI risk score for one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiRiskScore {
    /// Risk in [0, 1]; higher is riskier.
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

/// All mutable risk bookkeeping for the current session.
///
/// Start equity is fixed per session; the emergency stop is sticky until the
/// next session boundary. Daily trade counters reset every session, weekly
/// counters when the ISO week rolls over.
#[derive(Debug)]
pub struct RiskState {
    session_date: NaiveDate,
    iso_week: (i32, u32),
    daily_start_equity: Decimal,
    current_equity: Decimal,
    emergency_stop: bool,
    last_symbol_trade: HashMap<Symbol, DateTime<Utc>>,
    last_any_trade: Option<DateTime<Utc>>,
    daily_trades: HashMap<Symbol, u32>,
    weekly_trades: HashMap<Symbol, u32>,
    blacklist_until: HashMap<Symbol, DateTime<Utc>>,
    price_windows: HashMap<Symbol, VecDeque<f64>>,
    window_capacity: usize,
    ai_scores: HashMap<Symbol, AiRiskScore>,
}

impl RiskState {
    pub fn new(session_date: NaiveDate, start_equity: Decimal, window_capacity: usize) -> Self {
        let week = session_date.iso_week();
        Self {
            session_date,
            iso_week: (week.year(), week.week()),
            daily_start_equity: start_equity,
            current_equity: start_equity,
            emergency_stop: false,
            last_symbol_trade: HashMap::new(),
            last_any_trade: None,
            daily_trades: HashMap::new(),
            weekly_trades: HashMap::new(),
            blacklist_until: HashMap::new(),
            price_windows: HashMap::new(),
            window_capacity: window_capacity.max(2),
            ai_scores: HashMap::new(),
        }
    }

    /// Roll over to a new session: fix the start equity, clear the emergency
    /// stop and daily counters, and clear weekly counters when the ISO week
    /// changed.
    pub fn begin_session(&mut self, date: NaiveDate, start_equity: Decimal) {
        let week = date.iso_week();
        let week = (week.year(), week.week());
        if week != self.iso_week {
            self.weekly_trades.clear();
        }
        self.iso_week = week;
        self.session_date = date;
        self.daily_start_equity = start_equity;
        self.current_equity = start_equity;
        self.daily_trades.clear();
        self.emergency_stop = false;
        info!(%date, %start_equity, "risk session started");
    }

    pub fn session_date(&self) -> NaiveDate {
        self.session_date
    }

    pub fn daily_start_equity(&self) -> Decimal {
        self.daily_start_equity
    }

    /// Refresh the current equity mark used for the daily-loss computation.
    pub fn update_equity(&mut self, equity: Decimal) {
        self.current_equity = equity;
    }

    pub fn current_equity(&self) -> Decimal {
        self.current_equity
    }

    pub fn daily_pnl(&self) -> Decimal {
        self.current_equity - self.daily_start_equity
    }

    /// Daily PnL over start equity; zero when start equity is zero.
    pub fn daily_pnl_pct(&self) -> Decimal {
        if self.daily_start_equity > Decimal::ZERO {
            self.daily_pnl() / self.daily_start_equity
        } else {
            Decimal::ZERO
        }
    }

    pub fn trip_emergency(&mut self) {
        self.emergency_stop = true;
    }

    pub fn emergency_stopped(&self) -> bool {
        self.emergency_stop
    }

    // -- cooldown bookkeeping ----------------------------------------------

    /// Record an executed trade for cooldown and count tracking.
    pub fn record_trade(&mut self, symbol: &Symbol, at: DateTime<Utc>) {
        self.last_symbol_trade.insert(symbol.clone(), at);
        self.last_any_trade = Some(at);
        *self.daily_trades.entry(symbol.clone()).or_insert(0) += 1;
        *self.weekly_trades.entry(symbol.clone()).or_insert(0) += 1;
    }

    pub fn last_trade_on(&self, symbol: &Symbol) -> Option<DateTime<Utc>> {
        self.last_symbol_trade.get(symbol).copied()
    }

    pub fn last_trade_any(&self) -> Option<DateTime<Utc>> {
        self.last_any_trade
    }

    pub fn daily_trade_count(&self, symbol: &Symbol) -> u32 {
        self.daily_trades.get(symbol).copied().unwrap_or(0)
    }

    pub fn weekly_trade_count(&self, symbol: &Symbol) -> u32 {
        self.weekly_trades.get(symbol).copied().unwrap_or(0)
    }

    // -- blacklist ----------------------------------------------------------

    pub fn blacklist(&mut self, symbol: &Symbol, until: DateTime<Utc>) {
        self.blacklist_until.insert(symbol.clone(), until);
    }

    pub fn blacklisted_at(&self, symbol: &Symbol, now: DateTime<Utc>) -> bool {
        self.blacklist_until
            .get(symbol)
            .map(|until| *until > now)
            .unwrap_or(false)
    }

    // -- volatility windows -------------------------------------------------

    /// Append a close price to the symbol's rolling window.
    pub fn push_price(&mut self, symbol: &Symbol, price: f64) {
        let window = self
            .price_windows
            .entry(symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.window_capacity));
        if window.len() == self.window_capacity {
            window.pop_front();
        }
        window.push_back(price);
    }

    pub fn price_window(&self, symbol: &Symbol) -> Option<&VecDeque<f64>> {
        self.price_windows.get(symbol)
    }

    // -- AI risk scores -----------------------------------------------------

    pub fn set_ai_score(&mut self, symbol: &Symbol, score: f64, at: DateTime<Utc>) {
        self.ai_scores.insert(
            symbol.clone(),
            AiRiskScore {
                score,
                updated_at: at,
            },
        );
    }

    /// Cached score, unless older than `ttl_secs` (stale scores are absent).
    pub fn ai_score(&self, symbol: &Symbol, ttl_secs: u64, now: DateTime<Utc>) -> Option<f64> {
        self.ai_scores.get(symbol).and_then(|cached| {
            let age = now.signed_duration_since(cached.updated_at);
            if age.num_seconds() >= 0 && (age.num_seconds() as u64) < ttl_secs {
                Some(cached.score)
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::new("sh600000")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn daily_pnl_tracks_equity_updates() {
        let mut state = RiskState::new(date(2024, 1, 2), dec!(100_000), 20);
        state.update_equity(dec!(94_000));
        assert_eq!(state.daily_pnl(), dec!(-6000));
        assert_eq!(state.daily_pnl_pct(), dec!(-0.06));
    }

    #[test]
    fn emergency_stop_is_sticky_until_session_rollover() {
        let mut state = RiskState::new(date(2024, 1, 2), dec!(100_000), 20);
        state.trip_emergency();
        assert!(state.emergency_stopped());

        state.begin_session(date(2024, 1, 3), dec!(89_000));
        assert!(!state.emergency_stopped());
        assert_eq!(state.daily_start_equity(), dec!(89_000));
    }

    #[test]
    fn daily_counters_reset_each_session_weekly_on_week_change() {
        // 2024-01-03 (Wed) and 2024-01-04 (Thu) share ISO week 1;
        // 2024-01-08 (Mon) starts ISO week 2.
        let mut state = RiskState::new(date(2024, 1, 3), dec!(100_000), 20);
        state.record_trade(&sym(), Utc::now());
        state.record_trade(&sym(), Utc::now());
        assert_eq!(state.daily_trade_count(&sym()), 2);
        assert_eq!(state.weekly_trade_count(&sym()), 2);

        state.begin_session(date(2024, 1, 4), dec!(100_000));
        assert_eq!(state.daily_trade_count(&sym()), 0);
        assert_eq!(state.weekly_trade_count(&sym()), 2);

        state.begin_session(date(2024, 1, 8), dec!(100_000));
        assert_eq!(state.weekly_trade_count(&sym()), 0);
    }

    #[test]
    fn blacklist_expires() {
        let mut state = RiskState::new(date(2024, 1, 2), dec!(100_000), 20);
        let now = Utc::now();
        state.blacklist(&sym(), now + Duration::minutes(10));
        assert!(state.blacklisted_at(&sym(), now));
        assert!(!state.blacklisted_at(&sym(), now + Duration::minutes(11)));
    }

    #[test]
    fn price_window_is_bounded() {
        let mut state = RiskState::new(date(2024, 1, 2), dec!(100_000), 3);
        for p in [1.0, 2.0, 3.0, 4.0] {
            state.push_price(&sym(), p);
        }
        let window = state.price_window(&sym()).unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(*window.front().unwrap(), 2.0);
    }

    #[test]
    fn stale_ai_score_is_absent() {
        let mut state = RiskState::new(date(2024, 1, 2), dec!(100_000), 20);
        let now = Utc::now();
        state.set_ai_score(&sym(), 0.9, now - Duration::seconds(120));
        assert_eq!(state.ai_score(&sym(), 300, now), Some(0.9));
        assert_eq!(state.ai_score(&sym(), 60, now), None);
    }
}
