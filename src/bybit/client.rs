use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::auth::BybitAuth;
use super::types::{self, VENUE};
use crate::error::{parse_json_body, ExchangeError};
use crate::execution::{Exchange, ExchangeConnector, MarketOrder, OrderAck, OrderSide};
use crate::market_data::{Candle, CandleSource, Interval};
use crate::users::User;

const CATEGORY: &str = "linear";

/// Bybit v5 REST client for USDT linear perpetuals.
///
/// Without credentials only the public market endpoints work.
pub struct BybitClient {
    client: Client,
    auth: Option<BybitAuth>,
    rest_url: String,
    recv_window: u64,
    lot_steps: Arc<DashMap<String, f64>>,
}

impl BybitClient {
    pub fn new(rest_url: String, recv_window: u64, auth: Option<BybitAuth>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            auth,
            rest_url,
            recv_window,
            lot_steps: Arc::new(DashMap::new()),
        })
    }

    pub fn public(rest_url: String) -> Result<Self> {
        Self::new(rest_url, 5000, None)
    }

    fn with_shared(
        client: Client,
        rest_url: String,
        recv_window: u64,
        auth: BybitAuth,
        lot_steps: Arc<DashMap<String, f64>>,
    ) -> Self {
        Self {
            client,
            auth: Some(auth),
            rest_url,
            recv_window,
            lot_steps,
        }
    }

    fn auth(&self) -> Result<&BybitAuth, ExchangeError> {
        self.auth.as_ref().ok_or(ExchangeError::Unauthenticated { venue: VENUE })
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

        Ok(types::into_result(parse_json_body(VENUE, &body)?)?)
    }

    async fn signed_get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let auth = self.auth()?;
        let query = encode_query(params);
        let timestamp = BybitAuth::get_timestamp();
        let sign = auth.generate_signature(timestamp, self.recv_window, &query);

        let body = self
            .client
            .get(format!("{}{}?{}", self.rest_url, path, query))
            .header("X-BAPI-API-KEY", auth.get_api_key())
            .header("X-BAPI-SIGN", sign)
            .header("X-BAPI-SIGN-TYPE", "2")
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window.to_string())
            .send()
            .await
            .context("HTTP request failed")?
            .text()
            .await?;

        Ok(types::into_result(parse_json_body(VENUE, &body)?)?)
    }

    async fn signed_post(&self, path: &str, body: Value) -> Result<Value> {
        let auth = self.auth()?;
        let body_str = body.to_string();
        let timestamp = BybitAuth::get_timestamp();
        let sign = auth.generate_signature(timestamp, self.recv_window, &body_str);

        let text = self
            .client
            .post(format!("{}{}", self.rest_url, path))
            .header("X-BAPI-API-KEY", auth.get_api_key())
            .header("X-BAPI-SIGN", sign)
            .header("X-BAPI-SIGN-TYPE", "2")
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window.to_string())
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await
            .context("HTTP request failed")?
            .text()
            .await?;

        Ok(types::into_result(parse_json_body(VENUE, &text)?)?)
    }
}

#[async_trait]
impl CandleSource for BybitClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    async fn candles(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>> {
        let limit = limit.to_string();
        let result = self
            .public_get(
                "/v5/market/kline",
                &[
                    ("category", CATEGORY),
                    ("symbol", symbol),
                    ("interval", interval.bybit_code()),
                    ("limit", limit.as_str()),
                ],
            )
            .await
            .with_context(|| format!("kline {} {}", symbol, interval))?;

        Ok(types::parse_klines(&result)?)
    }
}

#[async_trait]
impl Exchange for BybitClient {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn mark_price(&self, symbol: &str) -> Result<f64> {
        let result = self
            .public_get("/v5/market/tickers", &[("category", CATEGORY), ("symbol", symbol)])
            .await?;
        Ok(types::parse_mark_price(&result)?)
    }

    async fn available_balance(&self) -> Result<f64> {
        let result = self
            .signed_get("/v5/account/wallet-balance", &[("accountType", "UNIFIED"), ("coin", "USDT")])
            .await?;
        Ok(types::parse_available_usdt(&result)?)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let leverage = leverage.to_string();
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "buyLeverage": leverage,
            "sellLeverage": leverage,
        });

        match self.signed_post("/v5/position/set-leverage", body).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let not_modified = matches!(
                    e.downcast_ref::<ExchangeError>(),
                    Some(ExchangeError::Api { code, .. }) if *code == types::RET_LEVERAGE_NOT_MODIFIED
                );
                if not_modified {
                    debug!("Leverage for {} already at {}", symbol, leverage);
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn lot_step(&self, symbol: &str) -> Result<f64> {
        if let Some(step) = self.lot_steps.get(symbol) {
            return Ok(*step);
        }

        let result = self
            .public_get("/v5/market/instruments-info", &[("category", CATEGORY), ("symbol", symbol)])
            .await?;
        let step = types::parse_qty_step(&result)?;
        self.lot_steps.insert(symbol.to_string(), step);
        Ok(step)
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderAck> {
        let body = json!({
            "category": CATEGORY,
            "symbol": order.symbol,
            "side": order.side.as_str(),
            "orderType": "Market",
            "qty": order.qty.to_string(),
            "timeInForce": "IOC",
            "reduceOnly": order.reduce_only,
        });

        let result = self
            .signed_post("/v5/order/create", body.clone())
            .await
            .with_context(|| format!("Order failed | Request: {}", body))?;

        let order_id = result["orderId"].as_str().unwrap_or_default().to_string();
        if order_id.is_empty() {
            warn!("Bybit accepted order without orderId: {}", result);
        }

        Ok(OrderAck {
            order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
        })
    }

    async fn position_size(&self, symbol: &str, side: OrderSide) -> Result<f64> {
        let result = self
            .signed_get("/v5/position/list", &[("category", CATEGORY), ("symbol", symbol)])
            .await?;
        Ok(types::parse_position_size(&result, side)?)
    }
}

/// Hands out per-user clients that share one connection pool and lot-step cache.
pub struct BybitConnector {
    client: Client,
    rest_url: String,
    recv_window: u64,
    lot_steps: Arc<DashMap<String, f64>>,
}

impl BybitConnector {
    pub fn new(rest_url: String, recv_window: u64) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            rest_url,
            recv_window,
            lot_steps: Arc::new(DashMap::new()),
        })
    }
}

impl ExchangeConnector for BybitConnector {
    fn connect(&self, user: &User) -> Result<Arc<dyn Exchange>> {
        Ok(Arc::new(BybitClient::with_shared(
            self.client.clone(),
            self.rest_url.clone(),
            self.recv_window,
            BybitAuth::new(user.api_key.clone(), user.api_secret.clone()),
            self.lot_steps.clone(),
        )))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_query_keeps_order() {
        let qs = encode_query(&[("category", "linear"), ("symbol", "BTCUSDT"), ("limit", "200")]);
        assert_eq!(qs, "category=linear&symbol=BTCUSDT&limit=200");
    }

    #[tokio::test]
    async fn test_private_endpoint_requires_auth() {
        let client = BybitClient::public("http://127.0.0.1:9".to_string()).unwrap();
        let err = client.available_balance().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExchangeError>(),
            Some(ExchangeError::Unauthenticated { venue: "bybit" })
        ));
    }
}
