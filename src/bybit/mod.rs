pub mod auth;
pub mod client;
pub mod types;

pub use auth::BybitAuth;
pub use client::{BybitClient, BybitConnector};
