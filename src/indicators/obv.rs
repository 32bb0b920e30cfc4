use crate::market_data::Candle;

/// On-Balance Volume. Element `i` is the running total after `candles[i]`; the first bar reads 0.
pub fn obv_series(candles: &[Candle]) -> Vec<f64> {
    let mut series = Vec::with_capacity(candles.len());
    let mut obv = 0.0;

    for (i, candle) in candles.iter().enumerate() {
        if i > 0 {
            let prev_close = candles[i - 1].close;
            if candle.close > prev_close {
                obv += candle.volume;
            } else if candle.close < prev_close {
                obv -= candle.volume;
            }
        }
        series.push(obv);
    }

    series
}

/// OBV change over the last `window` bars. Zero when history is shorter than `window + 2`.
pub fn obv_trend(candles: &[Candle], window: usize) -> f64 {
    if candles.len() < window + 2 {
        return 0.0;
    }

    let series = obv_series(candles);
    let last = series.len() - 1;
    series[last] - series[last - window]
}

/// Whether the last OBV step went up (`true`), down (`false`) or nowhere (`None`).
pub fn obv_rising(candles: &[Candle]) -> Option<bool> {
    let series = obv_series(candles);
    match series.as_slice() {
        [.., prev, last] if last > prev => Some(true),
        [.., prev, last] if last < prev => Some(false),
        _ => None,
    }
}
