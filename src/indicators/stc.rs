//! Schaff-style trend cycle: a Stochastic %K applied to the MACD line.
//!
//! Readings live in 0..=100. A cross up through 25 marks a bullish cycle
//! turn, a cross down through 75 a bearish one.

use serde::{Deserialize, Serialize};

use super::moving_average::ema_series;

const FLAT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StcParams {
    pub fast_period: usize,
    pub slow_period: usize,
    pub cycle_period: usize,
}

impl Default for StcParams {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 20,
            cycle_period: 14,
        }
    }
}

/// MACD line (fast EMA minus slow EMA), aligned to the end of `values`.
pub fn macd_line(values: &[f64], fast_period: usize, slow_period: usize) -> Vec<f64> {
    let fast = ema_series(values, fast_period);
    let slow = ema_series(values, slow_period);
    if fast.is_empty() || slow.is_empty() {
        return Vec::new();
    }

    let start = fast_period.max(slow_period) - 1;
    (start..values.len())
        .map(|i| fast[i + 1 - fast_period] - slow[i + 1 - slow_period])
        .collect()
}

/// Raw Stochastic %K. A flat window (highest == lowest) reads 50.
pub fn stochastic_k(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let len = high.len().min(low.len()).min(close.len());
    if period == 0 || len < period {
        return Vec::new();
    }

    (period - 1..len)
        .map(|i| {
            let window = i + 1 - period..=i;
            let highest = high[window.clone()].iter().copied().fold(f64::MIN, f64::max);
            let lowest = low[window].iter().copied().fold(f64::MAX, f64::min);
            let range = highest - lowest;
            // Rounding noise on a constant input must not read as a full swing
            if range <= FLAT_TOLERANCE * highest.abs().max(lowest.abs()) {
                50.0
            } else {
                (close[i] - lowest) / range * 100.0
            }
        })
        .collect()
}

/// STC series for a close series.
pub fn calculate_stc(closes: &[f64], params: &StcParams) -> Vec<f64> {
    let macd = macd_line(closes, params.fast_period, params.slow_period);
    stochastic_k(&macd, &macd, &macd, params.cycle_period)
}
