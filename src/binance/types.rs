use serde_json::Value;

use crate::error::ExchangeError;
use crate::execution::OrderSide;
use crate::market_data::Candle;

pub(crate) const VENUE: &str = "binance";

/// Binance signals failures with `{ "code": <negative>, "msg": "..." }`.
pub fn check_error(value: Value) -> Result<Value, ExchangeError> {
    if let Some(code) = value.get("code").and_then(Value::as_i64) {
        if code < 0 {
            let msg = value["msg"].as_str().unwrap_or("Unknown error");
            return Err(ExchangeError::api(VENUE, code, msg));
        }
    }
    Ok(value)
}

pub fn parse_num(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) if !s.is_empty() => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Kline rows `[openTime, open, high, low, close, volume, closeTime, ...]`, oldest first.
pub fn parse_klines(value: &Value) -> Result<Vec<Candle>, ExchangeError> {
    let rows = value.as_array().ok_or(ExchangeError::missing(VENUE, "klines"))?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            Some(Candle {
                time_ms: row.first()?.as_i64()?,
                open: parse_num(row.get(1)?)?,
                high: parse_num(row.get(2)?)?,
                low: parse_num(row.get(3)?)?,
                close: parse_num(row.get(4)?)?,
                volume: parse_num(row.get(5)?)?,
            })
        })
        .collect())
}

pub fn parse_mark_price(value: &Value) -> Result<f64, ExchangeError> {
    parse_num(&value["markPrice"]).ok_or(ExchangeError::missing(VENUE, "markPrice"))
}

/// `/fapi/v2/balance` rows; prefer `availableBalance` of the USDT row.
pub fn parse_available_usdt(value: &Value) -> Result<f64, ExchangeError> {
    value
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r["asset"] == "USDT"))
        .and_then(|usdt| parse_num(&usdt["availableBalance"]).or_else(|| parse_num(&usdt["balance"])))
        .ok_or(ExchangeError::missing(VENUE, "USDT balance"))
}

/// `stepSize` of the LOT_SIZE filter for `symbol` in an exchangeInfo document.
pub fn parse_step_size(value: &Value, symbol: &str) -> Result<f64, ExchangeError> {
    value["symbols"]
        .as_array()
        .and_then(|symbols| symbols.iter().find(|s| s["symbol"] == symbol))
        .and_then(|s| s["filters"].as_array())
        .and_then(|filters| filters.iter().find(|f| f["filterType"] == "LOT_SIZE"))
        .and_then(|f| parse_num(&f["stepSize"]))
        .ok_or(ExchangeError::missing(VENUE, "LOT_SIZE.stepSize"))
}

/// Size of the `side` leg. `BOTH` rows are one-way mode and carry the side in the sign.
pub fn parse_position_size(value: &Value, side: OrderSide) -> Result<f64, ExchangeError> {
    let rows = value.as_array().ok_or(ExchangeError::missing(VENUE, "positionRisk"))?;
    let long = side == OrderSide::Buy;

    Ok(rows
        .iter()
        .filter_map(|r| {
            let amt = parse_num(&r["positionAmt"])?;
            let held = match r["positionSide"].as_str().unwrap_or("BOTH") {
                "LONG" => long,
                "SHORT" => !long,
                _ => (amt > 0.0) == long && amt != 0.0,
            };
            held.then(|| amt.abs())
        })
        .sum())
}
