use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::OrderSide;

/// An open leveraged position the bot placed for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub user_id: String,
    pub side: OrderSide,
    pub entry_price: f64,
    pub qty: f64,
    pub opened_at: DateTime<Utc>,
    /// Ratcheting stop level, set once the trailing rule has seen a price.
    pub trailing_stop: Option<f64>,
    /// Best prices seen since entry, for the long and short trailing rules.
    pub highest: f64,
    pub lowest: f64,
    pub momentum_confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pnl {
    pub usdt: f64,
    pub pct: f64,
}

impl Position {
    pub fn new(
        symbol: &str,
        user_id: &str,
        side: OrderSide,
        entry_price: f64,
        qty: f64,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            user_id: user_id.to_string(),
            side,
            entry_price,
            qty,
            opened_at,
            trailing_stop: None,
            highest: entry_price,
            lowest: entry_price,
            momentum_confirmed: false,
        }
    }

    pub fn is_long(&self) -> bool {
        self.side == OrderSide::Buy
    }

    /// Signed percent move in the position's favour.
    pub fn favourable_move_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        let raw = (price - self.entry_price) / self.entry_price * 100.0;
        if self.is_long() {
            raw
        } else {
            -raw
        }
    }

    pub fn pnl(&self, exit_price: f64) -> Pnl {
        let diff = (exit_price - self.entry_price) * self.qty;
        Pnl {
            usdt: if self.is_long() { diff } else { -diff },
            pct: self.favourable_move_pct(exit_price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(side: OrderSide) -> Position {
        Position::new("ETHUSDT", "42", side, 2000.0, 0.5, Utc::now())
    }

    #[test]
    fn test_long_pnl() {
        let pnl = position(OrderSide::Buy).pnl(2100.0);
        assert!((pnl.usdt - 50.0).abs() < 1e-9);
        assert!((pnl.pct - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_pnl() {
        let pnl = position(OrderSide::Sell).pnl(2100.0);
        assert!((pnl.usdt + 50.0).abs() < 1e-9);
        assert!((pnl.pct + 5.0).abs() < 1e-9);

        let pnl = position(OrderSide::Sell).pnl(1900.0);
        assert!(pnl.usdt > 0.0);
    }
}
