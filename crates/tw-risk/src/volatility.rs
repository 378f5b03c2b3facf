//! Rolling-window volatility estimation.

/// Annualized volatility of log returns over a price window.
///
/// Uses the population (biased) standard deviation and a fixed 252-day
/// annualization. Returns `None` with fewer than three prices or any
/// non-positive price.
pub fn annualized_volatility(prices: &[f64]) -> Option<f64> {
    if prices.len() < 3 || prices.iter().any(|p| *p <= 0.0) {
        return None;
    }

    let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() * 252.0_f64.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_prices_have_zero_volatility() {
        let vol = annualized_volatility(&[10.0, 10.0, 10.0, 10.0]).unwrap();
        assert_eq!(vol, 0.0);
    }

    #[test]
    fn short_windows_yield_none() {
        assert!(annualized_volatility(&[]).is_none());
        assert!(annualized_volatility(&[10.0, 10.1]).is_none());
    }

    #[test]
    fn non_positive_prices_yield_none() {
        assert!(annualized_volatility(&[10.0, 0.0, 10.0]).is_none());
    }

    #[test]
    fn alternating_prices_match_closed_form() {
        // Log returns alternate ±ln(1.1); mean 0 over an even count, so the
        // population stddev is exactly ln(1.1).
        let prices = [100.0, 110.0, 100.0, 110.0, 100.0];
        let vol = annualized_volatility(&prices).unwrap();
        let expected = (1.1_f64).ln() * 252.0_f64.sqrt();
        assert!((vol - expected).abs() < 1e-9);
    }

    #[test]
    fn wilder_swings_mean_higher_volatility() {
        let calm = annualized_volatility(&[100.0, 100.5, 100.2, 100.8, 100.4]).unwrap();
        let wild = annualized_volatility(&[100.0, 112.0, 96.0, 115.0, 92.0]).unwrap();
        assert!(wild > calm);
    }
}
