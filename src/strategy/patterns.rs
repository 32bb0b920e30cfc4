use chrono::{DateTime, Timelike, Utc};
use ordered_float::OrderedFloat;
use std::fmt;

use super::cycle::stc_flips;
use super::Direction;
use crate::indicators::{calculate_atr, calculate_stc, StcParams};
use crate::market_data::Candle;

const ATR_PERIOD: usize = 14;

fn highest_high(candles: &[Candle]) -> Option<f64> {
    candles.iter().map(|c| OrderedFloat(c.high)).max().map(|v| v.0)
}

fn lowest_low(candles: &[Candle]) -> Option<f64> {
    candles.iter().map(|c| OrderedFloat(c.low)).min().map(|v| v.0)
}

/// Volume or momentum spike among the last `lookback` bars.
///
/// A bar spikes when its volume is at least `volume_factor` times the previous
/// 20-bar average, or it moved `momentum_pct` percent from the prior close.
pub fn has_recent_spike(candles: &[Candle], lookback: usize, volume_factor: f64, momentum_pct: f64) -> bool {
    let n = candles.len();
    if n < 25 {
        return false;
    }

    let avg_volume = candles[n - 21..n - 1].iter().map(|c| c.volume).sum::<f64>() / 20.0;
    let start = n.saturating_sub(lookback).max(1);

    (start..n).any(|i| {
        let prev_close = candles[i - 1].close;
        let move_pct = if prev_close != 0.0 {
            ((candles[i].close - prev_close) / prev_close * 100.0).abs()
        } else {
            0.0
        };
        (avg_volume > 0.0 && candles[i].volume >= avg_volume * volume_factor) || move_pct >= momentum_pct
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepSide {
    /// Wick above the prior high, close back below it on a red bar.
    Up,
    /// Wick below the prior low, close back above it on a green bar.
    Down,
}

impl SweepSide {
    pub fn label(&self) -> &'static str {
        match self {
            SweepSide::Up => "Upside",
            SweepSide::Down => "Downside",
        }
    }

    /// The sweep that supports a turn in `direction`.
    pub fn supporting(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => SweepSide::Down,
            Direction::Bearish => SweepSide::Up,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sweep {
    pub side: SweepSide,
    pub time_ms: i64,
}

/// Liquidity sweep on the last bar against the previous `lookback` bars.
pub fn detect_liquidity_sweep(candles: &[Candle], lookback: usize) -> Option<Sweep> {
    let n = candles.len();
    if n < lookback + 2 {
        return None;
    }

    let last = &candles[n - 1];
    let reference = &candles[n - 1 - lookback..n - 1];
    let prior_high = highest_high(reference)?;
    let prior_low = lowest_low(reference)?;

    let side = if last.high > prior_high && last.close < prior_high && last.is_bearish() {
        SweepSide::Up
    } else if last.low < prior_low && last.close > prior_low && last.is_bullish() {
        SweepSide::Down
    } else {
        return None;
    };

    Some(Sweep {
        side,
        time_ms: last.time_ms,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeImbalance {
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub buy_pct: f64,
    pub sell_pct: f64,
}

/// Split a bar's volume into buy and sell sides by candle direction and body size.
pub fn volume_imbalance(candle: &Candle) -> VolumeImbalance {
    let range = candle.high - candle.low;
    let range = if range > 0.0 { range } else { 1.0 };
    let body_share = (candle.close - candle.open).abs() / range * candle.volume;

    let buy_volume = if candle.is_bullish() { candle.volume } else { body_share };
    let sell_volume = if candle.is_bearish() { candle.volume } else { body_share };
    let total = buy_volume + sell_volume;

    let (buy_pct, sell_pct) = if total > 0.0 {
        (buy_volume / total * 100.0, sell_volume / total * 100.0)
    } else {
        (0.0, 0.0)
    };

    VolumeImbalance {
        buy_volume,
        sell_volume,
        buy_pct,
        sell_pct,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    Increasing,
    Decreasing,
    Flat,
}

impl Pressure {
    /// Pressure in favour of `direction` from an OBV change.
    pub fn from_obv(direction: Direction, obv_change: f64) -> Self {
        let signed = match direction {
            Direction::Bullish => obv_change,
            Direction::Bearish => -obv_change,
        };
        if signed > 0.0 {
            Pressure::Increasing
        } else if signed < 0.0 {
            Pressure::Decreasing
        } else {
            Pressure::Flat
        }
    }
}

impl fmt::Display for Pressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pressure::Increasing => "Increasing",
            Pressure::Decreasing => "Decreasing",
            Pressure::Flat => "Flat",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveEstimate {
    pub move_pct: f64,
    pub mins_min: i64,
    pub mins_max: i64,
}

impl Default for MoveEstimate {
    fn default() -> Self {
        Self {
            move_pct: 0.5,
            mins_min: 60,
            mins_max: 180,
        }
    }
}

/// Expected size and duration of the next leg from 30m ATR and current pressure.
pub fn estimate_move(closed_30m: &[Candle], pressure: Pressure) -> MoveEstimate {
    if closed_30m.len() < 20 {
        return MoveEstimate::default();
    }
    let (Some(atr), Some(last)) = (calculate_atr(closed_30m, ATR_PERIOD), closed_30m.last()) else {
        return MoveEstimate::default();
    };
    if last.close <= 0.0 {
        return MoveEstimate::default();
    }

    let atr_pct = atr / last.close * 100.0;
    let factor = if pressure == Pressure::Increasing { 1.6 } else { 0.95 };
    let move_pct = atr_pct * 1.2 * factor;
    let hours = (move_pct.abs() / (atr_pct * 2.0).max(0.0001)).clamp(0.5, 12.0);
    let mins_min = (hours * 60.0 * 0.8).max(15.0).round() as i64;
    let mins_max = ((hours * 60.0 * 1.2).max(mins_min as f64 + 15.0)).round() as i64;

    MoveEstimate {
        move_pct,
        mins_min,
        mins_max,
    }
}

/// Swing levels and ATR zones around the nearest one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityLevels {
    pub price: f64,
    pub swing_high: f64,
    pub swing_low: f64,
    pub atr: f64,
    pub nearest_is_support: bool,
    pub sweep_buffer: f64,
    pub manipulation_range: f64,
    pub suggested_entry: f64,
    pub suggested_stop: f64,
}

impl LiquidityLevels {
    pub fn nearest_level(&self) -> f64 {
        if self.nearest_is_support {
            self.swing_low
        } else {
            self.swing_high
        }
    }

    pub fn nearest_label(&self) -> &'static str {
        if self.nearest_is_support {
            "Support"
        } else {
            "Resistance"
        }
    }

    /// `(min, max)` zone of half an ATR around `level`.
    pub fn zone(&self, level: f64) -> (f64, f64) {
        (level - 0.5 * self.atr, level + 0.5 * self.atr)
    }
}

const LIQUIDITY_LOOKBACK: usize = 30;
const SWEEP_BUFFER_PCT: f64 = 0.5;

pub fn liquidity_levels(candles: &[Candle]) -> Option<LiquidityLevels> {
    if candles.len() < LIQUIDITY_LOOKBACK {
        return None;
    }

    let lookback = &candles[candles.len() - LIQUIDITY_LOOKBACK..];
    let price = lookback.last()?.close;
    let swing_high = highest_high(lookback)?;
    let swing_low = lowest_low(lookback)?;
    let atr = calculate_atr(lookback, ATR_PERIOD)?;

    let nearest_is_support = (price - swing_low).abs() <= (price - swing_high).abs();
    let sweep_buffer = price * SWEEP_BUFFER_PCT / 100.0;

    let (suggested_entry, suggested_stop) = if nearest_is_support {
        (swing_low + sweep_buffer, swing_low - 0.5 * atr)
    } else {
        (swing_high - sweep_buffer, swing_high + 0.5 * atr)
    };

    Some(LiquidityLevels {
        price,
        swing_high,
        swing_low,
        atr,
        nearest_is_support,
        sweep_buffer,
        manipulation_range: 0.5 * atr + sweep_buffer,
        suggested_entry,
        suggested_stop,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Asia,
    London,
    NewYork,
}

impl Session {
    pub fn at(time: DateTime<Utc>) -> Self {
        match time.hour() {
            0..=7 => Session::Asia,
            8..=15 => Session::London,
            _ => Session::NewYork,
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Session::Asia => "Asia",
            Session::London => "London",
            Session::NewYork => "New York",
        })
    }
}

pub const MANIPULATION_WINDOW: usize = 48;
const WHIPSAW_PCT: f64 = 4.0;
const CLUSTER_VOLUME_FACTOR: f64 = 2.0;
const CLUSTER_MIN_SPIKES: usize = 4;
const CLUSTER_BAND_PCT: f64 = 1.0;
const CHOPPY_STC_FLIPS: usize = 5;

/// Characteristics of a manipulated market over a 48-bar window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManipulationTraits {
    /// Range of at least 4% measured both up from the low and down from the high.
    pub whipsaw: bool,
    /// Four or more 2x-volume bars closing within a 1% band.
    pub volume_cluster: bool,
    /// Five or more STC cycle turns.
    pub stc_choppy: bool,
}

impl ManipulationTraits {
    pub fn count(&self) -> usize {
        [self.whipsaw, self.volume_cluster, self.stc_choppy]
            .iter()
            .filter(|t| **t)
            .count()
    }

    pub fn detected(&self) -> bool {
        self.count() >= 2
    }
}

/// Inspect the last [`MANIPULATION_WINDOW`] closed bars. `None` with less history.
pub fn manipulation_traits(closed: &[Candle]) -> Option<ManipulationTraits> {
    if closed.len() < MANIPULATION_WINDOW {
        return None;
    }

    let window = &closed[closed.len() - MANIPULATION_WINDOW..];
    let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = window.iter().map(|c| c.volume).collect();

    let (idx_high, high) = closes
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| OrderedFloat(**c))
        .map(|(i, c)| (i, *c))?;
    let (idx_low, low) = closes
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| OrderedFloat(**c))
        .map(|(i, c)| (i, *c))?;

    let whipsaw = low > 0.0
        && idx_high != idx_low
        && (high / low - 1.0) * 100.0 >= WHIPSAW_PCT
        && (high - low) / high * 100.0 >= WHIPSAW_PCT;

    let avg_volume = volumes[..volumes.len() - 1].iter().sum::<f64>() / (volumes.len() - 1).max(1) as f64;
    let spike_closes: Vec<f64> = volumes
        .iter()
        .zip(&closes)
        .filter(|(v, _)| avg_volume > 0.0 && **v >= avg_volume * CLUSTER_VOLUME_FACTOR)
        .map(|(_, c)| *c)
        .collect();

    let volume_cluster = spike_closes.len() >= CLUSTER_MIN_SPIKES && {
        let max = spike_closes.iter().copied().map(OrderedFloat).max().map_or(0.0, |v| v.0);
        let min = spike_closes.iter().copied().map(OrderedFloat).min().map_or(0.0, |v| v.0);
        min > 0.0 && (max - min) / min * 100.0 <= CLUSTER_BAND_PCT
    };

    let stc = calculate_stc(&closes, &StcParams::default());
    let stc_choppy = stc_flips(&stc) >= CHOPPY_STC_FLIPS;

    Some(ManipulationTraits {
        whipsaw,
        volume_cluster,
        stc_choppy,
    })
}
