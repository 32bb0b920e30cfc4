use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One OHLCV bar. `time_ms` is the bar open time in unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(time_ms: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time_ms,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Drop the still-forming last bar.
pub fn closed(candles: &[Candle]) -> &[Candle] {
    match candles.len() {
        0 => candles,
        n => &candles[..n - 1],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }

    /// Bybit v5 kline interval code.
    pub fn bybit_code(&self) -> &'static str {
        match self {
            Interval::M1 => "1",
            Interval::M5 => "5",
            Interval::M15 => "15",
            Interval::M30 => "30",
            Interval::H1 => "60",
            Interval::H4 => "240",
            Interval::D1 => "D",
        }
    }

    /// Binance futures kline interval code.
    pub fn binance_code(&self) -> &'static str {
        self.as_str()
    }

    /// Yahoo chart interval. Yahoo has no 4h bars, so 60m stands in for it.
    pub fn yahoo_code(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 | Interval::H4 => "60m",
            Interval::D1 => "1d",
        }
    }

    /// Yahoo range wide enough to hold a few hundred bars of this interval.
    pub fn yahoo_range(&self) -> &'static str {
        match self {
            Interval::M1 => "1d",
            Interval::M5 | Interval::M15 | Interval::M30 => "7d",
            Interval::H1 | Interval::H4 => "1mo",
            Interval::D1 => "1y",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        const MIN: i64 = 60_000;
        match self {
            Interval::M1 => MIN,
            Interval::M5 => 5 * MIN,
            Interval::M15 => 15 * MIN,
            Interval::M30 => 30 * MIN,
            Interval::H1 => 60 * MIN,
            Interval::H4 => 240 * MIN,
            Interval::D1 => 1440 * MIN,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "1" => Ok(Interval::M1),
            "5m" | "5" => Ok(Interval::M5),
            "15m" | "15" => Ok(Interval::M15),
            "30m" | "30" => Ok(Interval::M30),
            "1h" | "60m" | "60" => Ok(Interval::H1),
            "4h" | "240" => Ok(Interval::H4),
            "1d" | "d" => Ok(Interval::D1),
            other => anyhow::bail!("unknown interval: {}", other),
        }
    }
}
