use crate::indicators::{calculate_stc, ema_or_last, StcParams};
use crate::market_data::Candle;

use super::Direction;

pub const STC_LOW: f64 = 25.0;
pub const STC_HIGH: f64 = 75.0;
const EMA_CONFIRM_PERIOD: usize = 20;

/// Cycle turn on the last bar: up through 25 is bullish, down through 75 bearish.
pub fn stc_cycle_shift(closes: &[f64]) -> Option<Direction> {
    let stc = calculate_stc(closes, &StcParams::default());
    match stc.as_slice() {
        [.., prev, curr] if *curr > STC_LOW && *prev <= STC_LOW => Some(Direction::Bullish),
        [.., prev, curr] if *curr < STC_HIGH && *prev >= STC_HIGH => Some(Direction::Bearish),
        _ => None,
    }
}

/// Number of cycle turns (either way) across an STC series.
pub fn stc_flips(stc: &[f64]) -> usize {
    stc.windows(2)
        .filter(|w| (w[0] <= STC_LOW && w[1] > STC_LOW) || (w[0] >= STC_HIGH && w[1] < STC_HIGH))
        .count()
}

/// Last closed bar sits on the `direction` side of EMA20 and of the previous close.
pub fn ema_confirms(direction: Direction, closed: &[Candle]) -> bool {
    let [.., prev, last] = closed else {
        return false;
    };

    let closes: Vec<f64> = closed.iter().map(|c| c.close).collect();
    let Some(ema) = ema_or_last(&closes, EMA_CONFIRM_PERIOD) else {
        return false;
    };

    match direction {
        Direction::Bullish => last.close >= ema && last.close >= prev.close,
        Direction::Bearish => last.close <= ema && last.close <= prev.close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle::new(i as i64 * 60_000, *c, c + 0.5, c - 0.5, *c, 10.0))
            .collect()
    }

    #[test]
    fn test_no_shift_without_history() {
        assert_eq!(stc_cycle_shift(&[100.0, 101.0, 102.0]), None);
    }

    #[test]
    fn test_bullish_shift_after_decline_and_turn() {
        // Accelerating decline pins the STC at zero, then a turn lifts it through 25
        let mut closes: Vec<f64> = (0..60).map(|i| 200.0 - 0.02 * (i * i) as f64).collect();
        let mut found = None;
        for _ in 1..15 {
            let last = closes[closes.len() - 1];
            closes.push(last + 3.0);
            if let Some(dir) = stc_cycle_shift(&closes) {
                found = Some(dir);
                break;
            }
        }
        assert_eq!(found, Some(Direction::Bullish));
    }

    #[test]
    fn test_bearish_shift_after_rally_and_turn() {
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + 0.02 * (i * i) as f64).collect();
        let mut found = None;
        for _ in 1..15 {
            let last = closes[closes.len() - 1];
            closes.push(last - 3.0);
            if let Some(dir) = stc_cycle_shift(&closes) {
                found = Some(dir);
                break;
            }
        }
        assert_eq!(found, Some(Direction::Bearish));
    }

    #[test]
    fn test_stc_flips_counts_both_turns() {
        let stc = [10.0, 30.0, 80.0, 70.0, 20.0, 26.0];
        assert_eq!(stc_flips(&stc), 3);
    }

    #[test]
    fn test_ema_confirms() {
        let rising = candles(&(0..30).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        assert!(ema_confirms(Direction::Bullish, &rising));
        assert!(!ema_confirms(Direction::Bearish, &rising));

        let falling = candles(&(0..30).map(|i| 100.0 - i as f64).collect::<Vec<_>>());
        assert!(ema_confirms(Direction::Bearish, &falling));
        assert!(!ema_confirms(Direction::Bullish, &falling));

        assert!(!ema_confirms(Direction::Bullish, &candles(&[100.0])));
    }
}
