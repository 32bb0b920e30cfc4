use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::market_data::{CandleSource, Interval};
use crate::strategy::{Alert, AlertScanner, CandleSet};
use crate::telegram::Notify;

/// Polls every symbol on a fixed cadence and pushes whatever the detectors raise.
pub struct Scanner {
    source: Arc<dyn CandleSource>,
    notifier: Arc<dyn Notify>,
    detectors: AlertScanner,
    symbols: Vec<String>,
    candle_limit: usize,
}

impl Scanner {
    pub fn new(
        source: Arc<dyn CandleSource>,
        notifier: Arc<dyn Notify>,
        detectors: AlertScanner,
        symbols: Vec<String>,
        candle_limit: usize,
    ) -> Self {
        Self {
            source,
            notifier,
            detectors,
            symbols,
            candle_limit,
        }
    }

    async fn fetch(&self, symbol: &str) -> Result<CandleSet> {
        let (m15, m30, h4) = tokio::try_join!(
            self.source.candles(symbol, Interval::M15, self.candle_limit),
            self.source.candles(symbol, Interval::M30, self.candle_limit),
            self.source.candles(symbol, Interval::H4, self.candle_limit),
        )?;
        Ok(CandleSet { m15, m30, h4 })
    }

    pub async fn scan_symbol(&mut self, symbol: &str, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let candles = self
            .fetch(symbol)
            .await
            .with_context(|| format!("{} candles for {}", self.source.name(), symbol))?;
        Ok(self.detectors.scan(symbol, &candles, now))
    }

    /// Scan all symbols once. Returns the number of alerts sent.
    pub async fn run_once(&mut self) -> usize {
        let now = Utc::now();
        let mut sent = 0;

        for symbol in self.symbols.clone() {
            match self.scan_symbol(&symbol, now).await {
                Ok(alerts) => {
                    for alert in alerts {
                        info!("🔔 {:?} on {}", alert.kind, alert.symbol);
                        self.notifier.notify(&alert.text).await;
                        sent += 1;
                    }
                }
                Err(e) => warn!("❌ Scan {} failed: {:#}", symbol, e),
            }
        }

        debug!("Scan pass done, {} alerts", sent);
        sent
    }

    pub async fn run(mut self, every: Duration) {
        info!("🔍 Scanning {} symbols on {} every {:?}", self.symbols.len(), self.source.name(), every);
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.run_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertThresholds;
    use crate::market_data::Candle;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Rising candles for every symbol except `broken`, which errors.
    struct StubSource {
        broken: &'static str,
        requests: Mutex<Vec<(String, Interval, usize)>>,
    }

    #[async_trait]
    impl CandleSource for StubSource {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn candles(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>> {
            self.requests.lock().push((symbol.to_string(), interval, limit));
            if symbol == self.broken {
                anyhow::bail!("HTTP 500");
            }
            Ok((0..limit)
                .map(|i| {
                    let close = 100.0 + i as f64 * 0.3;
                    Candle::new(i as i64 * interval.duration_ms(), close, close + 0.2, close - 0.2, close, 10.0)
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct Sink(Mutex<Vec<String>>);

    #[async_trait]
    impl Notify for Sink {
        async fn notify(&self, text: &str) {
            self.0.lock().push(text.to_string());
        }
    }

    #[tokio::test]
    async fn test_failing_symbol_does_not_stop_the_pass() {
        let source = Arc::new(StubSource {
            broken: "BADUSDT",
            requests: Mutex::new(Vec::new()),
        });
        let sink = Arc::new(Sink::default());
        let symbols = vec!["BADUSDT".to_string(), "ETHUSDT".to_string()];
        let mut scanner = Scanner::new(
            source.clone(),
            sink.clone(),
            AlertScanner::new(AlertThresholds::default()),
            symbols,
            120,
        );

        let sent = scanner.run_once().await;

        let sent_texts = sink.0.lock().clone();
        assert_eq!(sent, sent_texts.len());
        assert!(sent_texts
            .iter()
            .any(|t| t.contains("<b>Daily Direction</b> on <b>ETHUSDT</b>")));
        assert!(sent_texts.iter().all(|t| !t.contains("BADUSDT")));

        let mut eth: Vec<(Interval, usize)> = source
            .requests
            .lock()
            .iter()
            .filter(|(s, _, _)| s == "ETHUSDT")
            .map(|(_, i, l)| (*i, *l))
            .collect();
        eth.sort_by_key(|(i, _)| i.duration_ms());
        assert_eq!(eth, vec![(Interval::M15, 120), (Interval::M30, 120), (Interval::H4, 120)]);
    }

    #[tokio::test]
    async fn test_scan_symbol_surfaces_fetch_error() {
        let source = Arc::new(StubSource {
            broken: "BADUSDT",
            requests: Mutex::new(Vec::new()),
        });
        let mut scanner = Scanner::new(
            source,
            Arc::new(Sink::default()),
            AlertScanner::new(AlertThresholds::default()),
            Vec::new(),
            120,
        );

        let err = scanner.scan_symbol("BADUSDT", Utc::now()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("stub candles for BADUSDT"));
    }
}
