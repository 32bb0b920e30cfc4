use serde_json::Value;

use crate::error::ExchangeError;
use crate::execution::OrderSide;
use crate::market_data::Candle;

pub(crate) const VENUE: &str = "bybit";

/// `retCode` Bybit uses for "leverage not modified".
pub const RET_LEVERAGE_NOT_MODIFIED: i64 = 110043;

/// Unwrap the v5 `{ retCode, retMsg, result }` envelope.
pub fn into_result(value: Value) -> Result<Value, ExchangeError> {
    let ret_code = value["retCode"].as_i64().unwrap_or(-1);
    if ret_code != 0 {
        let msg = value["retMsg"].as_str().unwrap_or("Unknown error");
        return Err(ExchangeError::api(VENUE, ret_code, msg));
    }

    match value {
        Value::Object(mut map) => Ok(map.remove("result").unwrap_or(Value::Null)),
        _ => Err(ExchangeError::missing(VENUE, "result")),
    }
}

/// Bybit sends numbers as strings; empty strings mean "no value".
pub fn parse_num(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) if !s.is_empty() => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn first_in_list(result: &Value) -> Option<&Value> {
    result["list"].as_array().and_then(|l| l.first())
}

/// Kline rows `[start, open, high, low, close, volume, turnover]`, newest first.
pub fn parse_klines(result: &Value) -> Result<Vec<Candle>, ExchangeError> {
    let rows = result["list"]
        .as_array()
        .ok_or(ExchangeError::missing(VENUE, "result.list"))?;

    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            Some(Candle {
                time_ms: parse_num(row.first()?)? as i64,
                open: parse_num(row.get(1)?)?,
                high: parse_num(row.get(2)?)?,
                low: parse_num(row.get(3)?)?,
                close: parse_num(row.get(4)?)?,
                volume: parse_num(row.get(5)?)?,
            })
        })
        .collect();

    candles.reverse();
    Ok(candles)
}

pub fn parse_mark_price(result: &Value) -> Result<f64, ExchangeError> {
    let ticker = first_in_list(result).ok_or(ExchangeError::missing(VENUE, "result.list[0]"))?;
    parse_num(&ticker["markPrice"])
        .or_else(|| parse_num(&ticker["lastPrice"]))
        .ok_or(ExchangeError::missing(VENUE, "markPrice"))
}

/// Unified account: prefer the account-level available balance, then the USDT coin row.
pub fn parse_available_usdt(result: &Value) -> Result<f64, ExchangeError> {
    let account = first_in_list(result).ok_or(ExchangeError::missing(VENUE, "result.list[0]"))?;

    if let Some(total) = parse_num(&account["totalAvailableBalance"]) {
        return Ok(total);
    }

    account["coin"]
        .as_array()
        .and_then(|coins| coins.iter().find(|c| c["coin"] == "USDT"))
        .and_then(|usdt| {
            parse_num(&usdt["availableToWithdraw"]).or_else(|| parse_num(&usdt["walletBalance"]))
        })
        .ok_or(ExchangeError::missing(VENUE, "USDT balance"))
}

pub fn parse_qty_step(result: &Value) -> Result<f64, ExchangeError> {
    first_in_list(result)
        .and_then(|instrument| parse_num(&instrument["lotSizeFilter"]["qtyStep"]))
        .ok_or(ExchangeError::missing(VENUE, "lotSizeFilter.qtyStep"))
}

/// Size of the rows held on `side`. Flat one-way rows report an empty side.
pub fn parse_position_size(result: &Value, side: OrderSide) -> Result<f64, ExchangeError> {
    let rows = result["list"]
        .as_array()
        .ok_or(ExchangeError::missing(VENUE, "result.list"))?;

    Ok(rows
        .iter()
        .filter(|row| row["side"].as_str() == Some(side.as_str()))
        .filter_map(|row| parse_num(&row["size"]))
        .map(f64::abs)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_result_error() {
        let err = into_result(json!({"retCode": 10001, "retMsg": "params error", "result": {}})).unwrap_err();
        assert!(matches!(err, ExchangeError::Api { code: 10001, .. }));
    }

    #[test]
    fn test_parse_klines_reverses_order() {
        let result = json!({
            "category": "linear",
            "symbol": "BTCUSDT",
            "list": [
                ["1700001800000", "101", "103", "100", "102", "12.5", "1270"],
                ["1700000900000", "100", "102", "99", "101", "10", "1010"]
            ]
        });

        let candles = parse_klines(&result).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time_ms, 1_700_000_900_000);
        assert_eq!(candles[1].close, 102.0);
        assert_eq!(candles[1].volume, 12.5);
    }

    #[test]
    fn test_parse_available_usdt_falls_back_to_coin() {
        let result = json!({
            "list": [{
                "totalAvailableBalance": "",
                "coin": [
                    {"coin": "BTC", "walletBalance": "0.1"},
                    {"coin": "USDT", "walletBalance": "250.5", "availableToWithdraw": ""}
                ]
            }]
        });
        assert_eq!(parse_available_usdt(&result).unwrap(), 250.5);

        let result = json!({"list": [{"totalAvailableBalance": "1000.25", "coin": []}]});
        assert_eq!(parse_available_usdt(&result).unwrap(), 1000.25);
    }

    #[test]
    fn test_hedge_mode_rows_counted_per_leg() {
        let positions = json!({"list": [
            {"symbol": "BTCUSDT", "positionIdx": 1, "side": "Buy", "size": "0.3"},
            {"symbol": "BTCUSDT", "positionIdx": 2, "side": "Sell", "size": "0.1"}
        ]});
        assert_eq!(parse_position_size(&positions, OrderSide::Buy).unwrap(), 0.3);
        assert_eq!(parse_position_size(&positions, OrderSide::Sell).unwrap(), 0.1);
    }

    #[test]
    fn test_parse_position_size_and_step() {
        let positions = json!({"list": [{"symbol": "ETHUSDT", "side": "Buy", "size": "0.5"}, {"symbol": "ETHUSDT", "side": "", "size": "0"}]});
        assert_eq!(parse_position_size(&positions, OrderSide::Buy).unwrap(), 0.5);
        assert_eq!(parse_position_size(&positions, OrderSide::Sell).unwrap(), 0.0);

        let instruments = json!({"list": [{"lotSizeFilter": {"qtyStep": "0.01"}}]});
        assert_eq!(parse_qty_step(&instruments).unwrap(), 0.01);

        let tickers = json!({"list": [{"markPrice": "", "lastPrice": "2500.1"}]});
        assert_eq!(parse_mark_price(&tickers).unwrap(), 2500.1);
    }
}
