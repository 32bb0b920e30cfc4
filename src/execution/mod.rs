pub mod executor;
pub mod monitor;
pub mod sizing;

pub use executor::{ExecutionReport, OrderExecutor};
pub use monitor::{CloseOutcome, PositionMonitor};
pub use sizing::{floor_to_step, size_order, SizingError};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::users::User;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Bybit spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }

    /// Binance spelling.
    pub fn as_upper(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            OrderSide::Buy => "🟢",
            OrderSide::Sell => "🔴",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upper())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: f64,
    pub reduce_only: bool,
}

impl MarketOrder {
    pub fn open(symbol: &str, side: OrderSide, qty: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            qty,
            reduce_only: false,
        }
    }

    /// Reduce-only order on the opposite side of `position_side`.
    pub fn close(symbol: &str, position_side: OrderSide, qty: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: position_side.opposite(),
            qty,
            reduce_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: f64,
}

/// Authenticated futures account of one user on one venue.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn venue(&self) -> &'static str;

    async fn mark_price(&self, symbol: &str) -> Result<f64>;

    /// Available USDT margin.
    async fn available_balance(&self) -> Result<f64>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    /// Quantity increment for `symbol`.
    async fn lot_step(&self, symbol: &str) -> Result<f64>;

    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderAck>;

    /// Absolute size of the `side` leg for `symbol`; zero when that leg is flat.
    ///
    /// Close orders carry no position index, so accounts must run in one-way mode.
    async fn position_size(&self, symbol: &str, side: OrderSide) -> Result<f64>;
}

/// Builds a user's [`Exchange`] client from the credentials in the users file.
pub trait ExchangeConnector: Send + Sync {
    fn connect(&self, user: &User) -> Result<Arc<dyn Exchange>>;
}
