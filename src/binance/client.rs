use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::auth::BinanceAuth;
use super::types::{self, VENUE};
use crate::error::{parse_json_body, ExchangeError};
use crate::execution::{Exchange, ExchangeConnector, MarketOrder, OrderAck, OrderSide};
use crate::market_data::{Candle, CandleSource, Interval};
use crate::users::User;

/// Binance USDT-M futures REST client.
pub struct BinanceClient {
    client: Client,
    auth: Option<BinanceAuth>,
    rest_url: String,
    recv_window: u64,
    lot_steps: Arc<DashMap<String, f64>>,
}

impl BinanceClient {
    pub fn new(rest_url: String, recv_window: u64, auth: Option<BinanceAuth>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            auth,
            rest_url,
            recv_window,
            lot_steps: Arc::new(DashMap::new()),
        })
    }

    pub fn public(rest_url: String) -> Result<Self> {
        Self::new(rest_url, 60000, None)
    }

    async fn public_get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}?{}", self.rest_url, path, encode_query(params));
        debug!("GET {}", url);

        let body = self
            .client
            .get(&url)
            .send()
            .await
            .context("HTTP request failed")?
            .text()
            .await?;

        Ok(types::check_error(parse_json_body(VENUE, &body)?)?)
    }

    /// Signed USER_DATA/TRADE request; parameters travel in the query string for every method.
    async fn signed(&self, method: Method, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let auth = self
            .auth
            .as_ref()
            .ok_or(ExchangeError::Unauthenticated { venue: VENUE })?;

        let timestamp = BinanceAuth::get_timestamp().to_string();
        let recv_window = self.recv_window.to_string();
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("recvWindow", recv_window.as_str()));
        all.push(("timestamp", timestamp.as_str()));

        let query = encode_query(&all);
        let signature = auth.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.rest_url, path, query, signature);

        let body = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", auth.get_api_key())
            .send()
            .await
            .context("HTTP request failed")?
            .text()
            .await?;

        Ok(types::check_error(parse_json_body(VENUE, &body)?)?)
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    async fn candles(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>> {
        let limit = limit.to_string();
        let value = self
            .public_get(
                "/fapi/v1/klines",
                &[("symbol", symbol), ("interval", interval.binance_code()), ("limit", limit.as_str())],
            )
            .await
            .with_context(|| format!("klines {} {}", symbol, interval))?;

        Ok(types::parse_klines(&value)?)
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn mark_price(&self, symbol: &str) -> Result<f64> {
        let value = self.public_get("/fapi/v1/premiumIndex", &[("symbol", symbol)]).await?;
        Ok(types::parse_mark_price(&value)?)
    }

    async fn available_balance(&self) -> Result<f64> {
        let value = self.signed(Method::GET, "/fapi/v2/balance", &[]).await?;
        Ok(types::parse_available_usdt(&value)?)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let leverage = leverage.to_string();
        self.signed(Method::POST, "/fapi/v1/leverage", &[("symbol", symbol), ("leverage", leverage.as_str())])
            .await?;
        Ok(())
    }

    async fn lot_step(&self, symbol: &str) -> Result<f64> {
        if let Some(step) = self.lot_steps.get(symbol) {
            return Ok(*step);
        }

        let info = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;
        let step = types::parse_step_size(&info, symbol)?;
        self.lot_steps.insert(symbol.to_string(), step);
        Ok(step)
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderAck> {
        let qty = order.qty.to_string();
        let mut params = vec![
            ("symbol", order.symbol.as_str()),
            ("side", order.side.as_upper()),
            ("type", "MARKET"),
            ("quantity", qty.as_str()),
        ];
        if order.reduce_only {
            params.push(("reduceOnly", "true"));
        }

        let value = self
            .signed(Method::POST, "/fapi/v1/order", &params)
            .await
            .with_context(|| format!("Order failed | {} {} {}", order.side, order.qty, order.symbol))?;

        let order_id = match &value["orderId"] {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => String::new(),
        };

        Ok(OrderAck {
            order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
        })
    }

    async fn position_size(&self, symbol: &str, side: OrderSide) -> Result<f64> {
        let value = self
            .signed(Method::GET, "/fapi/v2/positionRisk", &[("symbol", symbol)])
            .await?;
        Ok(types::parse_position_size(&value, side)?)
    }
}

/// Per-user Binance clients sharing one connection pool and lot-step cache.
pub struct BinanceConnector {
    client: Client,
    rest_url: String,
    recv_window: u64,
    lot_steps: Arc<DashMap<String, f64>>,
}

impl BinanceConnector {
    pub fn new(rest_url: String, recv_window: u64) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            rest_url,
            recv_window,
            lot_steps: Arc::new(DashMap::new()),
        })
    }
}

impl ExchangeConnector for BinanceConnector {
    fn connect(&self, user: &User) -> Result<Arc<dyn Exchange>> {
        Ok(Arc::new(BinanceClient {
            client: self.client.clone(),
            auth: Some(BinanceAuth::new(user.api_key.clone(), user.api_secret.clone())),
            rest_url: self.rest_url.clone(),
            recv_window: self.recv_window,
            lot_steps: self.lot_steps.clone(),
        }))
    }
}

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("Failed to create HTTP client")
}

fn encode_query(params: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}
