//! Long-running loops wiring data sources, detectors, execution and Telegram together.

pub mod obv_gauge;
pub mod scanner;
pub mod trader;

pub use obv_gauge::ObvGauge;
pub use scanner::Scanner;
pub use trader::{spawn_update_poller, Trader};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::binance::{BinanceClient, BinanceConnector};
use crate::bybit::{BybitClient, BybitConnector};
use crate::config::{Config, Venue};
use crate::execution::ExchangeConnector;
use crate::market_data::{CandleSource, YahooClient};
use crate::telegram::{LogNotifier, Notify, TelegramNotifier};

pub fn candle_source(config: &Config, venue: Venue) -> Result<Arc<dyn CandleSource>> {
    let source: Arc<dyn CandleSource> = match venue {
        Venue::Bybit => Arc::new(BybitClient::public(config.bybit.rest_url.clone())?),
        Venue::Binance => Arc::new(BinanceClient::public(config.binance.rest_url.clone())?),
        Venue::Yahoo => Arc::new(YahooClient::new(
            config.yahoo.base_url.clone(),
            Duration::from_secs(config.yahoo.timeout_secs),
        )?),
    };
    Ok(source)
}

pub fn exchange_connector(config: &Config, venue: Venue) -> Result<Arc<dyn ExchangeConnector>> {
    let connector: Arc<dyn ExchangeConnector> = match venue {
        Venue::Bybit => Arc::new(BybitConnector::new(
            config.bybit.rest_url.clone(),
            config.bybit.recv_window,
        )?),
        Venue::Binance => Arc::new(BinanceConnector::new(
            config.binance.rest_url.clone(),
            config.binance.recv_window,
        )?),
        Venue::Yahoo => anyhow::bail!("yahoo is a data source only and cannot place orders"),
    };
    Ok(connector)
}

/// Telegram when configured, otherwise messages go to the log.
pub fn notifier(config: &Config) -> (Arc<dyn Notify>, Option<TelegramNotifier>) {
    match TelegramNotifier::from_config(&config.telegram) {
        Some(tg) => {
            info!("📱 Telegram notifications enabled for {} chats", tg.chat_ids().len());
            (Arc::new(tg.clone()), Some(tg))
        }
        None => {
            info!("📱 Telegram notifications disabled, logging messages instead");
            (Arc::new(LogNotifier), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yahoo_cannot_trade() {
        let config = Config::default();
        assert!(exchange_connector(&config, Venue::Yahoo).is_err());
        assert!(exchange_connector(&config, Venue::Binance).is_ok());
        assert_eq!(candle_source(&config, Venue::Yahoo).unwrap().name(), "yahoo");
    }
}
