use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use tracing::debug;

use super::cycle::{ema_confirms, stc_cycle_shift};
use super::patterns::{
    detect_liquidity_sweep, estimate_move, has_recent_spike, liquidity_levels, manipulation_traits, Pressure,
    Session, SweepSide,
};
use super::Direction;
use crate::config::AlertThresholds;
use crate::indicators::{bollinger_bandwidth_pct, calculate_atr, ema_or_last, obv_series, obv_trend};
use crate::market_data::{closed, Candle, Interval};

const MIN_CYCLE_BARS: usize = 30;
const SPEED_LOOKBACK: usize = 24;
const DAILY_THRESHOLD_PCT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    PotentialCycle,
    ConfirmedCycle,
    StrongConfirmedCycle,
    CyclePersistence,
    LiquidityManipulation,
    ExtendedManipulation,
    PriceActionSpeed,
    DailyDirection,
    ObvPressure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub symbol: String,
    pub text: String,
}

impl Alert {
    fn new(kind: AlertKind, symbol: &str, lines: Vec<Option<String>>) -> Self {
        Self {
            kind,
            symbol: symbol.to_string(),
            text: lines.into_iter().flatten().collect::<Vec<_>>().join("\n"),
        }
    }
}

/// Candles one scan needs for a symbol, oldest first, forming bar included.
#[derive(Debug, Clone, Default)]
pub struct CandleSet {
    pub m15: Vec<Candle>,
    pub m30: Vec<Candle>,
    pub h4: Vec<Candle>,
}

#[derive(Debug, Clone, Copy)]
struct StrongCycle {
    direction: Direction,
}

/// Runs the alert detectors and remembers what was already sent.
///
/// Every detector fires at most once per symbol per bar. Strong confirmed
/// cycles are remembered so persistence updates can follow them.
pub struct AlertScanner {
    thresholds: AlertThresholds,
    last_potential: HashMap<String, i64>,
    last_confirmed: HashMap<String, i64>,
    last_persistence: HashMap<String, i64>,
    last_liquidity: HashMap<String, i64>,
    last_speed: HashMap<String, i64>,
    last_extended: HashMap<String, DateTime<Utc>>,
    last_daily: HashMap<String, NaiveDate>,
    strong_cycles: HashMap<String, StrongCycle>,
}

/// Record `time` for `symbol`; false if it was already recorded.
fn mark(seen: &mut HashMap<String, i64>, symbol: &str, time: i64) -> bool {
    if seen.get(symbol) == Some(&time) {
        return false;
    }
    seen.insert(symbol.to_string(), time);
    true
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

fn format_time(time_ms: i64) -> String {
    Utc.timestamp_millis_opt(time_ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| time_ms.to_string())
}

impl AlertScanner {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            last_potential: HashMap::new(),
            last_confirmed: HashMap::new(),
            last_persistence: HashMap::new(),
            last_liquidity: HashMap::new(),
            last_speed: HashMap::new(),
            last_extended: HashMap::new(),
            last_daily: HashMap::new(),
            strong_cycles: HashMap::new(),
        }
    }

    /// Run every detector for one symbol in alert order.
    pub fn scan(&mut self, symbol: &str, candles: &CandleSet, now: DateTime<Utc>) -> Vec<Alert> {
        [
            self.potential_cycle(symbol, &candles.m15),
            self.confirmed_cycle(symbol, &candles.m30, &candles.m15),
            self.cycle_persistence(symbol, &candles.m15, &candles.m30),
            self.liquidity_manipulation(symbol, &candles.m15),
            self.extended_manipulation(symbol, &candles.m15, now),
            self.price_action_speed(symbol, &candles.m15),
            self.daily_direction(symbol, &candles.h4, now.date_naive()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn has_strong_cycle(&self, symbol: &str) -> Option<Direction> {
        self.strong_cycles.get(symbol).map(|c| c.direction)
    }

    fn spike(&self, candles: &[Candle], lookback: usize) -> bool {
        has_recent_spike(
            candles,
            lookback,
            self.thresholds.volume_spike_factor,
            self.thresholds.momentum_threshold_pct,
        )
    }

    /// 15m STC turn confirmed by EMA20, awaiting the 30m.
    pub fn potential_cycle(&mut self, symbol: &str, m15: &[Candle]) -> Option<Alert> {
        if m15.len() < MIN_CYCLE_BARS {
            return None;
        }
        let closed15 = closed(m15);
        let direction = stc_cycle_shift(&closes(closed15))?;
        if !ema_confirms(direction, closed15) {
            return None;
        }

        let last = closed15.last()?;
        if !mark(&mut self.last_potential, symbol, last.time_ms) {
            return None;
        }

        let supporting = self.spike(closed15, 3);
        Some(Alert::new(
            AlertKind::PotentialCycle,
            symbol,
            vec![
                Some(format!(
                    "🔁 <b>Potential Change in Direction</b> on <b>{}</b> <b>(15m)</b>: Now <b>{}</b> {}",
                    symbol,
                    direction,
                    direction.emoji()
                )),
                supporting.then(|| "⚡ Supporting Signal: Volume/Momentum Spike detected".to_string()),
                Some("⏳ Awaiting 30m confirmation...".to_string()),
            ],
        ))
    }

    /// 30m STC turn confirmed by EMA20. Strong when a counter sweep on 15m or 30m backs it.
    pub fn confirmed_cycle(&mut self, symbol: &str, m30: &[Candle], m15: &[Candle]) -> Option<Alert> {
        if m30.len() < MIN_CYCLE_BARS {
            return None;
        }
        let closed30 = closed(m30);
        let closed15 = closed(m15);
        let direction = stc_cycle_shift(&closes(closed30))?;
        if !ema_confirms(direction, closed30) {
            return None;
        }

        let wanted = SweepSide::supporting(direction);
        let lookback = self.thresholds.sweep_lookback;
        let sweep = [("15m", closed15), ("30m", closed30)]
            .into_iter()
            .find_map(|(tf, candles)| {
                detect_liquidity_sweep(candles, lookback)
                    .filter(|s| s.side == wanted)
                    .map(|s| (tf, s))
            });

        let last = closed30.last()?;
        if !mark(&mut self.last_confirmed, symbol, last.time_ms) {
            return None;
        }

        let supporting = self.spike(closed15, 3) || self.spike(closed30, 2);

        match sweep {
            Some((tf, sweep)) => {
                debug!("{} strong {} cycle, sweep {:?} on {}", symbol, direction, sweep.side, tf);
                self.strong_cycles.insert(symbol.to_string(), StrongCycle { direction });
                Some(Alert::new(
                    AlertKind::StrongConfirmedCycle,
                    symbol,
                    vec![
                        Some(format!(
                            "🔁 <b>Confirmed Change in Direction (Strong)</b> on <b>{}</b> <b>(30m)</b>: Now <b>{}</b> {}",
                            symbol,
                            direction,
                            direction.emoji()
                        )),
                        Some(format!("🫧 Liquidity Sweep: <b>{}</b> ({})", sweep.side.label(), tf)),
                        supporting.then(|| "⚡ Supporting Signal: Volume/Momentum Spike adds strength".to_string()),
                    ],
                ))
            }
            None => Some(Alert::new(
                AlertKind::ConfirmedCycle,
                symbol,
                vec![
                    Some(format!(
                        "🔁 <b>Confirmed Change in Direction</b> on <b>{}</b> <b>(30m)</b>: Now <b>{}</b> {}",
                        symbol,
                        direction,
                        direction.emoji()
                    )),
                    supporting.then(|| "⚡ Supporting Signal: Volume/Momentum Spike detected".to_string()),
                ],
            )),
        }
    }

    /// Status of an active strong cycle on every new 15m bar; ends when the 30m STC flips.
    pub fn cycle_persistence(&mut self, symbol: &str, m15: &[Candle], m30: &[Candle]) -> Option<Alert> {
        let direction = self.strong_cycles.get(symbol)?.direction;
        if m15.len() < 25 || m30.len() < 20 {
            return None;
        }

        let closed30 = closed(m30);
        if let Some(flip) = stc_cycle_shift(&closes(closed30)) {
            if flip != direction {
                debug!("{} strong {} cycle ended by 30m flip", symbol, direction);
                self.strong_cycles.remove(symbol);
                return None;
            }
        }

        let closed15 = closed(m15);
        let last = closed15.last()?;
        if !mark(&mut self.last_persistence, symbol, last.time_ms) {
            return None;
        }

        let pressure = Pressure::from_obv(direction, obv_trend(closed15, self.thresholds.persist_obv_window));
        let reversal_pct = calculate_atr(closed15, 14)
            .filter(|_| last.close > 0.0)
            .map(|atr| atr / last.close * 100.0);
        let estimate = estimate_move(closed30, pressure);
        let supporting = self.spike(closed15, 2);

        let (icon, sign, actor) = match direction {
            Direction::Bullish => ("📈", "+", "Buying"),
            Direction::Bearish => ("📉", "−", "Selling"),
        };

        Some(Alert::new(
            AlertKind::CyclePersistence,
            symbol,
            vec![
                Some(format!(
                    "{} <b>Price Movement Status</b> on <b>{}</b>: <b>Strong {}</b>",
                    icon,
                    symbol,
                    direction.label()
                )),
                Some(format!("• {} Pressure: <b>{}</b>", actor, pressure)),
                reversal_pct.map(|p| format!("• Expected short-term reversal size: ~{:.2}%", p)),
                Some(format!("• Estimated Move: {}{:.2}%", sign, estimate.move_pct.abs())),
                Some(format!(
                    "• Expected within: <b>{}–{} min</b>",
                    estimate.mins_min, estimate.mins_max
                )),
                supporting.then(|| "⚡ Supporting Signal: Recent Volume/Momentum Spike".to_string()),
            ],
        ))
    }

    /// Nearest 15m swing level with ATR zones, once per bar.
    pub fn liquidity_manipulation(&mut self, symbol: &str, m15: &[Candle]) -> Option<Alert> {
        let levels = liquidity_levels(m15)?;
        let last = m15.last()?;
        if !mark(&mut self.last_liquidity, symbol, last.time_ms) {
            return None;
        }

        let (high_min, high_max) = levels.zone(levels.swing_high);
        let (low_min, low_max) = levels.zone(levels.swing_low);

        Some(Alert::new(
            AlertKind::LiquidityManipulation,
            symbol,
            vec![
                Some(format!("💧 Potential Fake Price Movements on <b>{}</b> (15m)", symbol)),
                Some(format!("{}: {:.4}", levels.nearest_label(), levels.nearest_level())),
                Some(format!("ATR(14): {:.4}", levels.atr)),
                Some(format!("Expected Sweep Buffer: {:.4} (0.50%)", levels.sweep_buffer)),
                Some(format!("Estimated Manipulation Range: {:.4}\n", levels.manipulation_range)),
                Some(format!("📍 Suggested Entry: {:.4}", levels.suggested_entry)),
                Some(format!("🛑 Suggested Stop Loss: {:.4}\n", levels.suggested_stop)),
                Some("Potential Entry Zones (±0.5 ATR):".to_string()),
                Some(format!("- Around Swing High: {:.4} - {:.4}", high_min, high_max)),
                Some(format!("- Around Swing Low: {:.4} - {:.4}", low_min, low_max)),
            ],
        ))
    }

    /// Two or more manipulation traits over the last 48 closed bars, with a per-symbol cooldown.
    pub fn extended_manipulation(&mut self, symbol: &str, m15: &[Candle], now: DateTime<Utc>) -> Option<Alert> {
        let cooldown = Duration::minutes(self.thresholds.manipulation_cooldown_mins);
        if let Some(last_sent) = self.last_extended.get(symbol) {
            if now - *last_sent < cooldown {
                return None;
            }
        }

        let closed15 = closed(m15);
        let traits = manipulation_traits(closed15)?;
        if !traits.detected() {
            return None;
        }
        let last = closed15.last()?;
        self.last_extended.insert(symbol.to_string(), now);

        let characteristics: Vec<&str> = [
            (traits.whipsaw, "• Whipsaw swings (>4% up/down)"),
            (traits.volume_cluster, "• High-volume cluster in tight range"),
            (traits.stc_choppy, "• STC flipping multiple times (choppy)"),
        ]
        .into_iter()
        .filter_map(|(hit, line)| hit.then_some(line))
        .collect();

        Some(Alert::new(
            AlertKind::ExtendedManipulation,
            symbol,
            vec![
                Some(format!("🕵️ <b>Manipulation in progress</b> on <b>{}</b> (15m)\n", symbol)),
                Some("Fake Price movements are being made. Be Cautious.".to_string()),
                Some(format!("Session: <b>{}</b>\n", Session::at(now))),
                Some("Detected characteristics:".to_string()),
                Some(format!("{}\n", characteristics.join("\n"))),
                Some(format!("Time: {}", format_time(last.time_ms))),
            ],
        ))
    }

    /// Bollinger bandwidth squeeze or expansion on closed 15m bars.
    pub fn price_action_speed(&mut self, symbol: &str, m15: &[Candle]) -> Option<Alert> {
        let closed15 = closed(m15);
        if closed15.len() < SPEED_LOOKBACK.max(self.thresholds.bb_period) {
            return None;
        }

        let closes15 = closes(closed15);
        let bandwidth = bollinger_bandwidth_pct(&closes15, self.thresholds.bb_period, 2.0)?;
        let oldest = closes15[closes15.len() - SPEED_LOOKBACK];
        let latest = closes15[closes15.len() - 1];
        let change = if oldest != 0.0 { (latest - oldest) / oldest * 100.0 } else { 0.0 };

        let verdict = if bandwidth <= self.thresholds.bb_squeeze_pct {
            "<b>Squeeze</b> (Price movements slowing down)".to_string()
        } else if bandwidth >= self.thresholds.bb_expand_pct {
            let side = if change > 0.0 { "Upside" } else { "Downside" };
            format!("<b>Expansion</b> ({})", side)
        } else {
            return None;
        };

        let last = closed15.last()?;
        if !mark(&mut self.last_speed, symbol, last.time_ms) {
            return None;
        }

        Some(Alert::new(
            AlertKind::PriceActionSpeed,
            symbol,
            vec![
                Some(format!("📊 <b>Price Action Speed</b> on <b>{}</b> (15m)", symbol)),
                Some(format!("• Bandwidth: {:.2}%", bandwidth)),
                Some(format!("• Change: {:.2}%", change)),
                Some(format!("• {}", verdict)),
            ],
        ))
    }

    /// Open-to-close change over the last `daily_bars` 4h bars, once per UTC day.
    pub fn daily_direction(&mut self, symbol: &str, h4: &[Candle], today: NaiveDate) -> Option<Alert> {
        let window = &h4[h4.len().saturating_sub(self.thresholds.daily_bars.max(1))..];
        let (first, last) = (window.first()?, window.last()?);
        if self.last_daily.get(symbol) == Some(&today) || first.open == 0.0 {
            return None;
        }

        let change = (last.close - first.open) / first.open * 100.0;
        let verdict = if change > DAILY_THRESHOLD_PCT {
            "Bullish 🟢"
        } else if change < -DAILY_THRESHOLD_PCT {
            "Bearish 🔴"
        } else {
            "Sideways"
        };

        self.last_daily.insert(symbol.to_string(), today);
        Some(Alert::new(
            AlertKind::DailyDirection,
            symbol,
            vec![Some(format!("🗓️ <b>Daily Direction</b> on <b>{}</b>: {}", symbol, verdict))],
        ))
    }
}

/// OBV against its EMA. `None` while the two are within `flat_pct` of each other.
pub fn obv_pressure_alert(
    symbol: &str,
    candles: &[Candle],
    interval: Interval,
    ema_period: usize,
    flat_pct: f64,
) -> Option<Alert> {
    if candles.len() < ema_period + 2 {
        return None;
    }

    // Skip the leading zero so the EMA tracks real flow
    let series = obv_series(candles);
    let obv = &series[1..];
    let last = *obv.last()?;
    let ema = ema_or_last(obv, ema_period)?;

    let diff_pct = if ema != 0.0 {
        (last - ema).abs() / ema.abs() * 100.0
    } else if last == 0.0 {
        0.0
    } else {
        f64::INFINITY
    };
    if diff_pct <= flat_pct {
        return None;
    }

    let (direction, pressure, side, cross) = if last > ema {
        (Direction::Bullish, Pressure::Increasing, "Buying", "above")
    } else {
        (Direction::Bearish, Pressure::Decreasing, "Selling", "below")
    };

    Some(Alert::new(
        AlertKind::ObvPressure,
        symbol,
        vec![
            Some("📊 <b>OBV Signal Detected</b>".to_string()),
            Some(format!("Pair: {}", symbol)),
            Some(format!("{} Pressure: {}", side, pressure)),
            Some(format!("Direction: {}", direction)),
            Some(format!("Timeframe: {}", interval)),
            Some(format!("(OBV crossed {} EMA{})", cross, ema_period)),
        ],
    ))
}
