#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Band width as a percentage of the middle band.
    pub fn bandwidth_pct(&self) -> f64 {
        if self.middle == 0.0 {
            return 0.0;
        }
        (self.upper - self.lower) / self.middle * 100.0
    }
}

/// Bollinger bands over the last `period` closes (population standard deviation).
pub fn bollinger_bands(closes: &[f64], period: usize, std_dev: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();

    Some(BollingerBands {
        upper: middle + std_dev * sd,
        middle,
        lower: middle - std_dev * sd,
    })
}

pub fn bollinger_bandwidth_pct(closes: &[f64], period: usize, std_dev: f64) -> Option<f64> {
    bollinger_bands(closes, period, std_dev).map(|b| b.bandwidth_pct())
}
