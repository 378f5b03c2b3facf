//! Performance aggregates over the journal's history.
//!
//! All figures tolerate sparse series and never divide by zero. The Sharpe
//! ratio is the simplified `mean / stddev` of daily returns with a biased
//! (population) standard deviation and a fixed √252 annualization; no
//! risk-free rate is subtracted.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use tw_types::{DailyEquity, Side, Symbol, Trade};

/// One completed round trip: a position opened from flat and sold back to
/// flat. PnL excludes commissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub symbol: Symbol,
    pub pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Derived performance summary.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
    /// Return of close equity over the first recorded open equity.
    pub total_return: Decimal,
    pub daily_return_mean: f64,
    /// Max drawdown over the recorded close-equity series, as a fraction.
    pub max_drawdown: Decimal,
    /// Fraction of closed round trips with positive PnL.
    pub win_rate: f64,
    /// Gross profit over gross loss; `None` when no losing trip exists.
    pub profit_factor: Option<f64>,
    /// Annualized `mean/stddev`; `None` with fewer than two daily returns.
    pub sharpe: Option<f64>,
    pub round_trips: usize,
}

/// Rebuild closed round trips from the fill history.
///
/// Fills are grouped per symbol and walked in trade-id order, maintaining an
/// aggregate quantity and weighted-average cost; a trip closes when the
/// quantity returns to zero.
pub fn build_round_trips(trades: &[Trade]) -> Vec<RoundTrip> {
    let mut per_symbol: HashMap<&Symbol, Vec<&Trade>> = HashMap::new();
    for trade in trades {
        per_symbol.entry(&trade.symbol).or_default().push(trade);
    }

    let mut trips = Vec::new();
    for (symbol, mut fills) in per_symbol {
        fills.sort_by(|a, b| a.trade_id.cmp(&b.trade_id));

        let mut quantity = Decimal::ZERO;
        let mut total_cost = Decimal::ZERO;
        let mut trip_pnl = Decimal::ZERO;
        for fill in fills {
            match fill.side {
                Side::Buy => {
                    total_cost += fill.quantity * fill.price;
                    quantity += fill.quantity;
                }
                Side::Sell => {
                    if quantity <= Decimal::ZERO {
                        continue; // sell without a recorded open; skip
                    }
                    let sold = fill.quantity.min(quantity);
                    let avg_cost = total_cost / quantity;
                    trip_pnl += sold * (fill.price - avg_cost);
                    total_cost -= sold * avg_cost;
                    quantity -= sold;
                    if quantity == Decimal::ZERO {
                        trips.push(RoundTrip {
                            symbol: symbol.clone(),
                            pnl: trip_pnl,
                            closed_at: fill.traded_at,
                        });
                        trip_pnl = Decimal::ZERO;
                        total_cost = Decimal::ZERO;
                    }
                }
            }
        }
    }
    trips.sort_by_key(|t| t.closed_at);
    trips
}

/// Compute the full report from the equity series and fill history.
pub fn compute(equity: &[DailyEquity], trades: &[Trade]) -> PerformanceReport {
    let trips = build_round_trips(trades);

    let wins = trips.iter().filter(|t| t.pnl > Decimal::ZERO).count();
    let win_rate = if trips.is_empty() {
        0.0
    } else {
        wins as f64 / trips.len() as f64
    };

    let gross_profit: Decimal = trips
        .iter()
        .filter(|t| t.pnl > Decimal::ZERO)
        .map(|t| t.pnl)
        .sum();
    let gross_loss: Decimal = trips
        .iter()
        .filter(|t| t.pnl < Decimal::ZERO)
        .map(|t| -t.pnl)
        .sum();
    let profit_factor = if gross_loss > Decimal::ZERO {
        Some((gross_profit / gross_loss).to_f64().unwrap_or(0.0))
    } else {
        None
    };

    let total_return = match (equity.first(), equity.last()) {
        (Some(first), Some(last)) if first.open_equity > Decimal::ZERO => {
            (last.close_equity - first.open_equity) / first.open_equity
        }
        _ => Decimal::ZERO,
    };

    let returns: Vec<f64> = equity
        .iter()
        .filter_map(|row| row.daily_pnl_pct.to_f64())
        .collect();
    let daily_return_mean = if returns.is_empty() {
        0.0
    } else {
        returns.iter().sum::<f64>() / returns.len() as f64
    };

    PerformanceReport {
        total_return,
        daily_return_mean,
        max_drawdown: max_drawdown(equity),
        win_rate,
        profit_factor,
        sharpe: sharpe(&returns),
        round_trips: trips.len(),
    }
}

/// Max peak-to-trough drawdown over the close-equity series.
fn max_drawdown(equity: &[DailyEquity]) -> Decimal {
    let mut peak = Decimal::ZERO;
    let mut max_dd = Decimal::ZERO;
    for row in equity {
        if row.close_equity > peak {
            peak = row.close_equity;
        }
        if peak > Decimal::ZERO {
            let dd = (peak - row.close_equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Simplified annualized Sharpe: `mean / population-stddev × √252`.
fn sharpe(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return None;
    }
    Some(mean / stddev * 252.0_f64.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn trade(id: &str, side: Side, qty: Decimal, price: Decimal) -> Trade {
        Trade {
            trade_id: id.into(),
            order_id: format!("O{id}"),
            symbol: Symbol::new("sh600000"),
            side,
            price,
            quantity: qty,
            commission: Decimal::ZERO,
            traded_at: Utc::now(),
        }
    }

    fn equity_row(day: u32, open: Decimal, close: Decimal) -> DailyEquity {
        DailyEquity {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open_equity: open,
            close_equity: close,
            daily_pnl: close - open,
            daily_pnl_pct: if open > Decimal::ZERO {
                (close - open) / open
            } else {
                Decimal::ZERO
            },
            trade_count: 0,
        }
    }

    #[test]
    fn round_trip_pnl_matches_cash_flows() {
        let trades = vec![
            trade("1", Side::Buy, dec!(100), dec!(10)),
            trade("2", Side::Buy, dec!(100), dec!(12)),
            trade("3", Side::Sell, dec!(200), dec!(13)),
        ];
        let trips = build_round_trips(&trades);
        assert_eq!(trips.len(), 1);
        // proceeds 2600 − cost 2200
        assert_eq!(trips[0].pnl, dec!(400));
    }

    #[test]
    fn separate_trips_per_flat_crossing() {
        let trades = vec![
            trade("1", Side::Buy, dec!(100), dec!(10)),
            trade("2", Side::Sell, dec!(100), dec!(11)), // +100
            trade("3", Side::Buy, dec!(100), dec!(12)),
            trade("4", Side::Sell, dec!(100), dec!(11)), // −100
        ];
        let trips = build_round_trips(&trades);
        assert_eq!(trips.len(), 2);
        let pnls: Vec<Decimal> = trips.iter().map(|t| t.pnl).collect();
        assert!(pnls.contains(&dec!(100)));
        assert!(pnls.contains(&dec!(-100)));
    }

    #[test]
    fn win_rate_and_profit_factor() {
        let trades = vec![
            trade("1", Side::Buy, dec!(100), dec!(10)),
            trade("2", Side::Sell, dec!(100), dec!(12)), // +200
            trade("3", Side::Buy, dec!(100), dec!(10)),
            trade("4", Side::Sell, dec!(100), dec!(9)), // −100
        ];
        let report = compute(&[], &trades);
        assert_eq!(report.round_trips, 2);
        assert!((report.win_rate - 0.5).abs() < 1e-9);
        assert!((report.profit_factor.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn no_losses_means_no_profit_factor() {
        let trades = vec![
            trade("1", Side::Buy, dec!(100), dec!(10)),
            trade("2", Side::Sell, dec!(100), dec!(12)),
        ];
        let report = compute(&[], &trades);
        assert_eq!(report.profit_factor, None);
        assert_eq!(report.win_rate, 1.0);
    }

    #[test]
    fn max_drawdown_over_equity_series() {
        let equity = vec![
            equity_row(1, dec!(100_000), dec!(110_000)),
            equity_row(2, dec!(110_000), dec!(99_000)),
            equity_row(3, dec!(99_000), dec!(104_500)),
        ];
        let report = compute(&equity, &[]);
        assert_eq!(report.max_drawdown, dec!(0.1));
        assert_eq!(report.total_return, dec!(0.045));
    }

    #[test]
    fn sharpe_uses_biased_stddev_and_252_annualization() {
        let returns = [0.01, 0.03];
        // mean 0.02, population stddev 0.01
        let expected = 0.02 / 0.01 * 252.0_f64.sqrt();
        let got = sharpe(&returns).unwrap();
        assert!((got - expected).abs() < 1e-9);
    }

    #[test]
    fn sparse_series_do_not_panic() {
        let report = compute(&[], &[]);
        assert_eq!(report.total_return, Decimal::ZERO);
        assert_eq!(report.sharpe, None);
        assert_eq!(report.max_drawdown, Decimal::ZERO);
        assert_eq!(report.win_rate, 0.0);

        let one = vec![equity_row(1, dec!(100_000), dec!(100_000))];
        let report = compute(&one, &[]);
        assert_eq!(report.sharpe, None);
    }
}
