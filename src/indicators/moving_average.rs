/// Calculate Simple Moving Average (SMA) over the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA), seeded with the SMA of the first `period` values
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied()
}

/// Full EMA series. Element `i` corresponds to `prices[i + period - 1]`.
pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    let mut series = Vec::with_capacity(prices.len() - period + 1);
    series.push(seed);

    let mut ema = seed;
    for price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
        series.push(ema);
    }

    series
}

/// EMA of `prices`, or the last price when there is not enough history.
pub fn ema_or_last(prices: &[f64], period: usize) -> Option<f64> {
    calculate_ema(prices, period).or_else(|| prices.last().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let sma = calculate_sma(&prices, 5);
        assert_eq!(sma, Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        assert!(calculate_sma(&prices, 5).is_none());
    }

    #[test]
    fn test_ema_above_seed_in_uptrend() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0];
        let ema = calculate_ema(&prices, 5).unwrap();
        assert!(ema > 104.0);
        assert!(ema < 110.0);
    }

    #[test]
    fn test_ema_series_alignment() {
        let prices = vec![1.0, 2.0, 3.0, 4.0];
        let series = ema_series(&prices, 3);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0], 2.0);
        // k = 0.5: (4 - 2) * 0.5 + 2
        assert_eq!(series[1], 3.0);
    }

    #[test]
    fn test_ema_or_last_falls_back() {
        assert_eq!(ema_or_last(&[5.0, 6.0], 20), Some(6.0));
        assert_eq!(ema_or_last(&[], 20), None);
    }
}
