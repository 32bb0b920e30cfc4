//! Yahoo Finance chart client for FX pairs, futures and equities.
//!
//! Uses the unofficial `v8/finance/chart` endpoint. Points with a null
//! open/high/low/close (market closed, bar incomplete) are skipped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{Candle, CandleSource, Interval};
use crate::error::ExchangeError;

const VENUE: &str = "yahoo";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    fn chart_url(&self, symbol: &str, interval: Interval) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("yahoo base url cannot be a base"))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        url.query_pairs_mut()
            .append_pair("interval", interval.yahoo_code())
            .append_pair("range", interval.yahoo_range())
            .append_pair("includePrePost", "false")
            .append_pair("events", "div,split,earn");
        Ok(url)
    }
}

#[async_trait]
impl CandleSource for YahooClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    async fn candles(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>> {
        let url = self.chart_url(symbol, interval)?;
        debug!("Fetching Yahoo chart: {}", url);

        let body = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP request failed")?
            .text()
            .await?;

        let value = crate::error::parse_json_body(VENUE, &body)?;
        let mut candles = parse_chart(value).with_context(|| format!("Yahoo chart for {}", symbol))?;

        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }
}

fn parse_chart(value: serde_json::Value) -> Result<Vec<Candle>> {
    let response: ChartResponse = serde_json::from_value(value)?;

    if let Some(error) = response.chart.error {
        return Err(ExchangeError::api(VENUE, 0, format!("{} - {}", error.code, error.description)).into());
    }

    let result = response
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
        .ok_or(ExchangeError::missing(VENUE, "chart.result"))?;

    let timestamps = result.timestamp.unwrap_or_default();
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or(ExchangeError::missing(VENUE, "indicators.quote"))?;

    if timestamps.is_empty() {
        return Err(ExchangeError::missing(VENUE, "timestamp").into());
    }

    let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();

    let candles = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            Some(Candle {
                time_ms: ts * 1000,
                open: at(&quote.open, i)?,
                high: at(&quote.high, i)?,
                low: at(&quote.low, i)?,
                close: at(&quote.close, i)?,
                volume: at(&quote.volume, i).unwrap_or(0.0),
            })
        })
        .collect();

    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_chart_skips_null_points() {
        let body = json!({
            "chart": {
                "result": [{
                    "timestamp": [1700000000, 1700000900, 1700001800],
                    "indicators": { "quote": [{
                        "open":   [1.08, null, 1.09],
                        "high":   [1.09, 1.10, 1.10],
                        "low":    [1.07, 1.08, 1.08],
                        "close":  [1.085, 1.09, 1.095],
                        "volume": [0, null, null]
                    }]}
                }],
                "error": null
            }
        });

        let candles = parse_chart(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time_ms, 1_700_000_000_000);
        assert_eq!(candles[1].close, 1.095);
        assert_eq!(candles[1].volume, 0.0);
    }

    #[test]
    fn test_parse_chart_reports_api_error() {
        let body = json!({
            "chart": {
                "result": null,
                "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" }
            }
        });

        let err = parse_chart(body).unwrap_err();
        assert!(err.to_string().contains("Not Found"));
    }

    #[test]
    fn test_chart_url_encodes_symbol() {
        let client = YahooClient::new("https://query1.finance.yahoo.com".to_string(), Duration::from_secs(5)).unwrap();
        let url = client.chart_url("EURUSD=X", Interval::M15).unwrap();
        assert!(url.as_str().starts_with("https://query1.finance.yahoo.com/v8/finance/chart/EURUSD=X?"));
        assert!(url.as_str().contains("interval=15m"));
        assert!(url.as_str().contains("range=7d"));
    }
}
