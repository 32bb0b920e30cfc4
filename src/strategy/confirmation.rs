use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::Direction;
use crate::config::ConfirmationFilter;
use crate::indicators::{calculate_ema, obv_rising};
use crate::market_data::{closed, Candle, CandleSource, Interval};

const TREND_EMA_PERIOD: usize = 10;
const VOLUME_AVG_BARS: usize = 20;
const EMA3_BARS: usize = 5;

impl ConfirmationFilter {
    pub fn label(&self) -> &'static str {
        match self {
            ConfirmationFilter::EmaTrend => "EMA trend",
            ConfirmationFilter::Volume => "Volume",
            ConfirmationFilter::Obv => "OBV",
            ConfirmationFilter::Ema3 => "EMA3",
        }
    }

    /// Candles the check needs, including the forming bar.
    fn request(&self) -> (Interval, usize) {
        match self {
            ConfirmationFilter::EmaTrend => (Interval::H1, 200),
            ConfirmationFilter::Volume => (Interval::M15, 50),
            ConfirmationFilter::Obv => (Interval::M15, 60),
            ConfirmationFilter::Ema3 => (Interval::M15, EMA3_BARS + 1),
        }
    }

    pub fn check(&self, direction: Direction, candles: &[Candle]) -> FilterOutcome {
        match self {
            ConfirmationFilter::EmaTrend => check_ema_trend(direction, candles),
            ConfirmationFilter::Volume => check_volume(candles),
            ConfirmationFilter::Obv => check_obv(direction, candles),
            ConfirmationFilter::Ema3 => check_ema3(direction, candles),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub filter: ConfirmationFilter,
    pub passed: bool,
    pub detail: String,
}

impl FilterOutcome {
    fn new(filter: ConfirmationFilter, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            filter,
            passed,
            detail: detail.into(),
        }
    }

    fn unavailable(filter: ConfirmationFilter) -> Self {
        Self::new(filter, false, "not enough data")
    }
}

impl fmt::Display for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "✅" } else { "❌" };
        write!(f, "{} {}: {}", mark, self.filter.label(), self.detail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationReport {
    pub symbol: String,
    pub direction: Direction,
    pub outcomes: Vec<FilterOutcome>,
}

impl ConfirmationReport {
    /// True when every configured filter passed. No filters means no gate.
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &FilterOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }

    pub fn summary(&self) -> String {
        self.outcomes
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 1h close relative to EMA10 of the closed bars.
pub fn check_ema_trend(direction: Direction, candles: &[Candle]) -> FilterOutcome {
    let filter = ConfirmationFilter::EmaTrend;
    let closes: Vec<f64> = closed(candles).iter().map(|c| c.close).collect();
    let (Some(ema), Some(&last)) = (calculate_ema(&closes, TREND_EMA_PERIOD), closes.last()) else {
        return FilterOutcome::unavailable(filter);
    };

    let trend = if last > ema {
        Some(Direction::Bullish)
    } else if last < ema {
        Some(Direction::Bearish)
    } else {
        None
    };
    let label = trend.map_or("neutral", |t| t.label());

    FilterOutcome::new(
        filter,
        trend == Some(direction),
        format!("1h trend {} (close {:.4} vs EMA{} {:.4})", label, last, TREND_EMA_PERIOD, ema),
    )
}

/// Last closed 15m volume against the average of the 20 bars before it.
pub fn check_volume(candles: &[Candle]) -> FilterOutcome {
    let filter = ConfirmationFilter::Volume;
    let bars = closed(candles);
    if bars.len() < VOLUME_AVG_BARS + 1 {
        return FilterOutcome::unavailable(filter);
    }

    let last = bars[bars.len() - 1].volume;
    let window = &bars[bars.len() - 1 - VOLUME_AVG_BARS..bars.len() - 1];
    let avg = window.iter().map(|c| c.volume).sum::<f64>() / VOLUME_AVG_BARS as f64;

    FilterOutcome::new(
        filter,
        last >= avg,
        format!("last {:.2} vs avg {:.2}", last, avg),
    )
}

/// Last closed OBV step must point the signal's way.
pub fn check_obv(direction: Direction, candles: &[Candle]) -> FilterOutcome {
    let filter = ConfirmationFilter::Obv;
    let bars = closed(candles);
    if bars.len() < 3 {
        return FilterOutcome::unavailable(filter);
    }

    let rising = obv_rising(bars);
    let wanted = direction == Direction::Bullish;
    let label = match rising {
        Some(true) => "rising",
        Some(false) => "falling",
        None => "flat",
    };

    FilterOutcome::new(filter, rising == Some(wanted), format!("OBV {}", label))
}

/// Last closed 15m close strictly beyond EMA3 of the recent closed bars.
pub fn check_ema3(direction: Direction, candles: &[Candle]) -> FilterOutcome {
    let filter = ConfirmationFilter::Ema3;
    let bars = closed(candles);
    let recent = &bars[bars.len().saturating_sub(EMA3_BARS)..];
    let closes: Vec<f64> = recent.iter().map(|c| c.close).collect();
    let (Some(ema), Some(&last)) = (calculate_ema(&closes, 3), closes.last()) else {
        return FilterOutcome::unavailable(filter);
    };

    let passed = match direction {
        Direction::Bullish => last > ema,
        Direction::Bearish => last < ema,
    };

    FilterOutcome::new(filter, passed, format!("close {:.4} vs EMA3 {:.4}", last, ema))
}

/// Runs the configured filters for a pending signal against fresh candles.
pub struct SignalConfirmer {
    source: Arc<dyn CandleSource>,
    filters: Vec<ConfirmationFilter>,
}

impl SignalConfirmer {
    pub fn new(source: Arc<dyn CandleSource>, filters: Vec<ConfirmationFilter>) -> Self {
        Self { source, filters }
    }

    pub fn filters(&self) -> &[ConfirmationFilter] {
        &self.filters
    }

    /// A filter whose candles cannot be fetched counts as not passed.
    pub async fn confirm(&self, symbol: &str, direction: Direction) -> ConfirmationReport {
        let checks = self.filters.iter().map(|filter| async move {
            let (interval, limit) = filter.request();
            match self.source.candles(symbol, interval, limit).await {
                Ok(candles) => filter.check(direction, &candles),
                Err(e) => {
                    warn!("⚠️ {} candles for {} {} unavailable: {:#}", interval, symbol, filter.label(), e);
                    FilterOutcome::new(*filter, false, "candles unavailable")
                }
            }
        });

        let outcomes = join_all(checks).await;
        let report = ConfirmationReport {
            symbol: symbol.to_string(),
            direction,
            outcomes,
        };
        debug!("Confirmation for {} {}: passed={}", symbol, direction, report.all_passed());
        report
    }
}
