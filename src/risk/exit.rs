use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::position::Position;
use crate::config::RiskConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    MomentumFailure,
    Manual,
    /// Exchange reports the position flat although the book still holds it.
    ExternallyClosed,
}

impl ExitReason {
    pub fn emoji(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "🎯",
            ExitReason::StopLoss => "🔻",
            ExitReason::TrailingStop => "🔒",
            ExitReason::MomentumFailure => "⏱️",
            ExitReason::Manual => "🛑",
            ExitReason::ExternallyClosed => "ℹ️",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::TakeProfit => "Take Profit",
            ExitReason::StopLoss => "Stop Loss",
            ExitReason::TrailingStop => "Trailing Stop",
            ExitReason::MomentumFailure => "Momentum Failure",
            ExitReason::Manual => "Manual Close",
            ExitReason::ExternallyClosed => "Closed Externally",
        };
        f.write_str(s)
    }
}

/// Price must move `pct` in favour within `window` or the trade is cut.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumRule {
    pub pct: f64,
    pub window: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitPolicy {
    pub take_profit_pct: f64,
    /// Positive distance; the stop fires at a move of `-stop_loss_pct`.
    pub stop_loss_pct: f64,
    /// Zero disables trailing.
    pub trailing_stop_pct: f64,
    pub momentum: Option<MomentumRule>,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self::from_config(&RiskConfig::default())
    }
}

impl ExitPolicy {
    pub fn from_config(config: &RiskConfig) -> Self {
        let momentum = config.momentum_enabled.then(|| MomentumRule {
            pct: config.momentum_pct,
            window: Duration::minutes(config.momentum_window_mins as i64),
        });

        Self {
            take_profit_pct: config.take_profit_pct,
            stop_loss_pct: config.stop_loss_pct.abs(),
            trailing_stop_pct: config.trailing_stop_pct,
            momentum,
        }
    }

    /// Advance the position's trailing state to `price` and decide whether to exit.
    ///
    /// Rules run in order: momentum window, trailing stop, take profit, stop loss.
    pub fn evaluate(&self, position: &mut Position, price: f64, now: DateTime<Utc>) -> Option<ExitReason> {
        if price <= 0.0 {
            return None;
        }

        let moved = position.favourable_move_pct(price);

        if let Some(rule) = &self.momentum {
            if !position.momentum_confirmed {
                if moved >= rule.pct {
                    position.momentum_confirmed = true;
                } else if now - position.opened_at >= rule.window {
                    return Some(ExitReason::MomentumFailure);
                }
            }
        }

        if self.trailing_stop_pct > 0.0 && self.update_trailing(position, price) {
            return Some(ExitReason::TrailingStop);
        }

        if moved >= self.take_profit_pct {
            return Some(ExitReason::TakeProfit);
        }

        if moved <= -self.stop_loss_pct {
            return Some(ExitReason::StopLoss);
        }

        None
    }

    /// Ratchet the stop; never loosens it. Returns true when `price` crossed it.
    fn update_trailing(&self, position: &mut Position, price: f64) -> bool {
        let t = self.trailing_stop_pct / 100.0;

        if position.is_long() {
            position.highest = position.highest.max(price);
            let candidate = position.highest * (1.0 - t);
            let stop = position.trailing_stop.map_or(candidate, |s| s.max(candidate));
            position.trailing_stop = Some(stop);
            price <= stop
        } else {
            position.lowest = position.lowest.min(price);
            let candidate = position.lowest * (1.0 + t);
            let stop = position.trailing_stop.map_or(candidate, |s| s.min(candidate));
            position.trailing_stop = Some(stop);
            price >= stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::OrderSide;

    fn policy(trailing: f64) -> ExitPolicy {
        ExitPolicy {
            take_profit_pct: 3.0,
            stop_loss_pct: 1.5,
            trailing_stop_pct: trailing,
            momentum: None,
        }
    }

    fn long(entry: f64) -> Position {
        Position::new("BTCUSDT", "1", OrderSide::Buy, entry, 0.01, Utc::now())
    }

    fn short(entry: f64) -> Position {
        Position::new("BTCUSDT", "1", OrderSide::Sell, entry, 0.01, Utc::now())
    }

    #[test]
    fn test_take_profit_and_stop_loss() {
        let p = policy(0.0);
        let now = Utc::now();

        assert_eq!(p.evaluate(&mut long(100.0), 103.0, now), Some(ExitReason::TakeProfit));
        assert_eq!(p.evaluate(&mut long(100.0), 98.5, now), Some(ExitReason::StopLoss));
        assert_eq!(p.evaluate(&mut long(100.0), 101.0, now), None);

        assert_eq!(p.evaluate(&mut short(100.0), 97.0, now), Some(ExitReason::TakeProfit));
        assert_eq!(p.evaluate(&mut short(100.0), 101.5, now), Some(ExitReason::StopLoss));
        // A small adverse move does not stop out
        assert_eq!(p.evaluate(&mut short(100.0), 100.5, now), None);
    }

    #[test]
    fn test_long_trailing_ratchets_up_only() {
        let p = policy(1.5);
        let now = Utc::now();
        let mut pos = long(100.0);

        assert_eq!(p.evaluate(&mut pos, 102.0, now), None);
        let stop = pos.trailing_stop.unwrap();
        assert!((stop - 102.0 * 0.985).abs() < 1e-9);

        // Pullback above the stop keeps it where it was
        assert_eq!(p.evaluate(&mut pos, 101.0, now), None);
        assert_eq!(pos.trailing_stop, Some(stop));
        assert_eq!(pos.highest, 102.0);

        assert_eq!(p.evaluate(&mut pos, 100.4, now), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn test_short_trailing_ratchets_down_only() {
        let p = policy(1.5);
        let now = Utc::now();
        let mut pos = short(100.0);

        assert_eq!(p.evaluate(&mut pos, 98.0, now), None);
        let stop = pos.trailing_stop.unwrap();
        assert!((stop - 98.0 * 1.015).abs() < 1e-9);

        assert_eq!(p.evaluate(&mut pos, 99.0, now), None);
        assert_eq!(pos.trailing_stop, Some(stop));

        assert_eq!(p.evaluate(&mut pos, 99.5, now), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn test_trailing_checked_before_take_profit() {
        let p = policy(1.5);
        let now = Utc::now();
        let mut pos = long(100.0);

        p.evaluate(&mut pos, 106.0, now);
        // 104 is a 4% gain but below the 104.41 trailing stop
        assert_eq!(p.evaluate(&mut pos, 104.0, now), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn test_momentum_failure_after_window() {
        let mut p = policy(0.0);
        p.momentum = Some(MomentumRule {
            pct: 0.5,
            window: Duration::minutes(30),
        });

        let opened = Utc::now();
        let mut pos = Position::new("ETHUSDT", "1", OrderSide::Buy, 100.0, 1.0, opened);

        assert_eq!(p.evaluate(&mut pos, 100.2, opened + Duration::minutes(10)), None);
        assert_eq!(
            p.evaluate(&mut pos, 100.2, opened + Duration::minutes(31)),
            Some(ExitReason::MomentumFailure)
        );

        let mut pos = Position::new("ETHUSDT", "1", OrderSide::Buy, 100.0, 1.0, opened);
        assert_eq!(p.evaluate(&mut pos, 100.6, opened + Duration::minutes(5)), None);
        assert!(pos.momentum_confirmed);
        // Confirmed trades are not cut later
        assert_eq!(p.evaluate(&mut pos, 100.1, opened + Duration::minutes(45)), None);
    }

    #[test]
    fn test_from_config_normalises_stop_sign() {
        let config = RiskConfig {
            stop_loss_pct: -1.5,
            momentum_enabled: true,
            ..RiskConfig::default()
        };
        let p = ExitPolicy::from_config(&config);
        assert_eq!(p.stop_loss_pct, 1.5);
        assert_eq!(p.momentum.unwrap().window, Duration::minutes(30));
    }
}
