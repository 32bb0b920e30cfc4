pub mod auth;
pub mod client;
pub mod types;

pub use auth::BinanceAuth;
pub use client::{BinanceClient, BinanceConnector};
