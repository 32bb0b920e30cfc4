pub mod binance;
pub mod bot;
pub mod bybit;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod market_data;
pub mod risk;
pub mod strategy;
pub mod telegram;
pub mod users;

pub use config::Config;
pub use error::ExchangeError;
pub use telegram::{Notify, TelegramNotifier};
