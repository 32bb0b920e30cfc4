use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::ScannerConfig;
use crate::market_data::{CandleSource, Interval};
use crate::strategy::{obv_pressure_alert, Alert};
use crate::telegram::Notify;

/// Periodic OBV-vs-EMA pressure readout across the watchlist.
pub struct ObvGauge {
    source: Arc<dyn CandleSource>,
    notifier: Arc<dyn Notify>,
    symbols: Vec<String>,
    interval: Interval,
    candle_limit: usize,
    ema_period: usize,
    flat_pct: f64,
}

impl ObvGauge {
    pub fn new(source: Arc<dyn CandleSource>, notifier: Arc<dyn Notify>, config: &ScannerConfig) -> Self {
        Self {
            source,
            notifier,
            symbols: config.symbols.clone(),
            interval: config.obv_interval,
            candle_limit: config.candle_limit,
            ema_period: config.thresholds.obv_ema_period,
            flat_pct: config.thresholds.obv_flat_threshold_pct,
        }
    }

    async fn gauge(&self, symbol: &str) -> Result<Option<Alert>> {
        let candles = self.source.candles(symbol, self.interval, self.candle_limit).await?;
        Ok(obv_pressure_alert(symbol, &candles, self.interval, self.ema_period, self.flat_pct))
    }

    /// Gauge every symbol concurrently and send the non-flat readings.
    pub async fn run_once(&self) -> Vec<Alert> {
        let readings = join_all(self.symbols.iter().map(|symbol| async move {
            match self.gauge(symbol).await {
                Ok(alert) => alert,
                Err(e) => {
                    warn!("❌ OBV gauge {} failed: {:#}", symbol, e);
                    None
                }
            }
        }))
        .await;

        let alerts: Vec<Alert> = readings.into_iter().flatten().collect();
        for alert in &alerts {
            self.notifier.notify(&alert.text).await;
        }
        info!("📊 OBV gauge: {}/{} symbols with pressure", alerts.len(), self.symbols.len());
        alerts
    }

    pub async fn run(self, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.run_once().await;
        }
    }
}
