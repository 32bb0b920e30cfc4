pub mod types;
pub mod yahoo;

pub use types::{closed, Candle, Interval};
pub use yahoo::YahooClient;

use anyhow::Result;
use async_trait::async_trait;

/// Anything that can serve OHLCV bars for a symbol/interval pair.
///
/// Implementations return candles oldest-first; the last element may still be forming.
#[async_trait]
pub trait CandleSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn candles(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>>;
}
