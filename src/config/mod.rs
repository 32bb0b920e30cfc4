use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::market_data::Interval;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bybit: BybitConfig,
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub yahoo: YahooConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub users: UsersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where candles come from and, for the crypto venues, where orders go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Bybit,
    Binance,
    Yahoo,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Bybit => "bybit",
            Venue::Binance => "binance",
            Venue::Yahoo => "yahoo",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BybitConfig {
    #[serde(default = "default_bybit_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_bybit_recv_window")]
    pub recv_window: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            rest_url: default_bybit_rest_url(),
            recv_window: default_bybit_recv_window(),
        }
    }
}

fn default_bybit_rest_url() -> String { "https://api.bybit.com".to_string() }
fn default_bybit_recv_window() -> u64 { 5000 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BinanceConfig {
    #[serde(default = "default_binance_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_binance_recv_window")]
    pub recv_window: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            rest_url: default_binance_rest_url(),
            recv_window: default_binance_recv_window(),
        }
    }
}

fn default_binance_rest_url() -> String { "https://fapi.binance.com".to_string() }
fn default_binance_recv_window() -> u64 { 60000 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct YahooConfig {
    #[serde(default = "default_yahoo_base_url")]
    pub base_url: String,
    #[serde(default = "default_yahoo_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            base_url: default_yahoo_base_url(),
            timeout_secs: default_yahoo_timeout_secs(),
        }
    }
}

fn default_yahoo_base_url() -> String { "https://query1.finance.yahoo.com".to_string() }
fn default_yahoo_timeout_secs() -> u64 { 20 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    pub bot_token: Option<String>,
    /// Every chat that receives notifications (group first, then personal chats).
    #[serde(default)]
    pub chat_ids: Vec<String>,
    /// Sender allowed to issue /close and /closeall.
    pub admin_id: Option<String>,
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            chat_ids: Vec::new(),
            admin_id: None,
            parse_mode: default_parse_mode(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_parse_mode() -> String { "HTML".to_string() }
fn default_poll_timeout_secs() -> u64 { 30 }

/// Checks a pending CID signal must pass before orders go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationFilter {
    /// Last 1h close on the signal side of EMA10.
    EmaTrend,
    /// Last closed 15m volume at or above the previous 20-bar average.
    Volume,
    /// 15m OBV stepping in the signal direction.
    Obv,
    /// Last 15m close on the signal side of EMA3.
    Ema3,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    #[serde(default = "default_trading_venue")]
    pub venue: Venue,
    /// Fraction of the available USDT balance committed as margin per trade.
    #[serde(default = "default_trade_pct")]
    pub trade_pct: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_lot_step")]
    pub default_lot_step: f64,
    #[serde(default = "default_signal_expiry_mins")]
    pub signal_expiry_mins: u64,
    #[serde(default = "default_signal_check_interval_secs")]
    pub signal_check_interval_secs: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_confirmations")]
    pub confirmations: Vec<ConfirmationFilter>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            venue: default_trading_venue(),
            trade_pct: default_trade_pct(),
            leverage: default_leverage(),
            default_lot_step: default_lot_step(),
            signal_expiry_mins: default_signal_expiry_mins(),
            signal_check_interval_secs: default_signal_check_interval_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            confirmations: default_confirmations(),
        }
    }
}

impl TradingConfig {
    pub fn signal_expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.signal_expiry_mins as i64)
    }

    pub fn signal_check_interval(&self) -> Duration {
        Duration::from_secs(self.signal_check_interval_secs.max(1))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }
}

fn default_trading_venue() -> Venue { Venue::Bybit }
fn default_trade_pct() -> f64 { 0.10 }
fn default_leverage() -> u32 { 20 }
fn default_lot_step() -> f64 { 0.001 }
fn default_signal_expiry_mins() -> u64 { 60 }
fn default_signal_check_interval_secs() -> u64 { 60 }
fn default_monitor_interval_secs() -> u64 { 5 }
fn default_confirmations() -> Vec<ConfirmationFilter> {
    vec![ConfirmationFilter::EmaTrend, ConfirmationFilter::Volume, ConfirmationFilter::Obv]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    /// Zero disables the trailing stop.
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,
    #[serde(default)]
    pub momentum_enabled: bool,
    #[serde(default = "default_momentum_pct")]
    pub momentum_pct: f64,
    #[serde(default = "default_momentum_window_mins")]
    pub momentum_window_mins: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: default_take_profit_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            trailing_stop_pct: default_trailing_stop_pct(),
            momentum_enabled: false,
            momentum_pct: default_momentum_pct(),
            momentum_window_mins: default_momentum_window_mins(),
        }
    }
}

fn default_take_profit_pct() -> f64 { 3.0 }
fn default_stop_loss_pct() -> f64 { 1.5 }
fn default_trailing_stop_pct() -> f64 { 1.5 }
fn default_momentum_pct() -> f64 { 0.5 }
fn default_momentum_window_mins() -> u64 { 30 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    #[serde(default = "default_scanner_source")]
    pub source: Venue,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_run_interval_secs")]
    pub run_interval_secs: u64,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    #[serde(default)]
    pub thresholds: AlertThresholds,
    #[serde(default = "default_obv_interval")]
    pub obv_interval: Interval,
    #[serde(default = "default_obv_run_interval_secs")]
    pub obv_run_interval_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            source: default_scanner_source(),
            symbols: default_symbols(),
            run_interval_secs: default_run_interval_secs(),
            candle_limit: default_candle_limit(),
            thresholds: AlertThresholds::default(),
            obv_interval: default_obv_interval(),
            obv_run_interval_secs: default_obv_run_interval_secs(),
        }
    }
}

impl ScannerConfig {
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs.max(1))
    }

    pub fn obv_run_interval(&self) -> Duration {
        Duration::from_secs(self.obv_run_interval_secs.max(1))
    }
}

fn default_scanner_source() -> Venue { Venue::Bybit }
fn default_run_interval_secs() -> u64 { 300 }
fn default_candle_limit() -> usize { 120 }
fn default_obv_interval() -> Interval { Interval::M30 }
fn default_obv_run_interval_secs() -> u64 { 1800 }
fn default_symbols() -> Vec<String> {
    [
        "BTCUSDT", "ETHUSDT", "LTCUSDT", "XRPUSDT", "APTUSDT", "BNBUSDT", "SOLUSDT",
        "UNIUSDT", "TRUMPUSDT", "BCHUSDT", "AAVEUSDT", "ADAUSDT", "TONUSDT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Tunables shared by the alert detectors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertThresholds {
    #[serde(default = "default_momentum_threshold_pct")]
    pub momentum_threshold_pct: f64,
    #[serde(default = "default_volume_spike_factor")]
    pub volume_spike_factor: f64,
    #[serde(default = "default_sweep_lookback")]
    pub sweep_lookback: usize,
    #[serde(default = "default_persist_obv_window")]
    pub persist_obv_window: usize,
    #[serde(default = "default_bb_period")]
    pub bb_period: usize,
    #[serde(default = "default_bb_squeeze_pct")]
    pub bb_squeeze_pct: f64,
    #[serde(default = "default_bb_expand_pct")]
    pub bb_expand_pct: f64,
    #[serde(default = "default_obv_ema_period")]
    pub obv_ema_period: usize,
    #[serde(default = "default_obv_flat_threshold_pct")]
    pub obv_flat_threshold_pct: f64,
    #[serde(default = "default_manipulation_cooldown_mins")]
    pub manipulation_cooldown_mins: i64,
    /// 4h bars in the daily direction window.
    #[serde(default = "default_daily_bars")]
    pub daily_bars: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            momentum_threshold_pct: default_momentum_threshold_pct(),
            volume_spike_factor: default_volume_spike_factor(),
            sweep_lookback: default_sweep_lookback(),
            persist_obv_window: default_persist_obv_window(),
            bb_period: default_bb_period(),
            bb_squeeze_pct: default_bb_squeeze_pct(),
            bb_expand_pct: default_bb_expand_pct(),
            obv_ema_period: default_obv_ema_period(),
            obv_flat_threshold_pct: default_obv_flat_threshold_pct(),
            manipulation_cooldown_mins: default_manipulation_cooldown_mins(),
            daily_bars: default_daily_bars(),
        }
    }
}

fn default_momentum_threshold_pct() -> f64 { 0.5 }
fn default_volume_spike_factor() -> f64 { 1.5 }
fn default_sweep_lookback() -> usize { 10 }
fn default_persist_obv_window() -> usize { 8 }
fn default_bb_period() -> usize { 20 }
fn default_bb_squeeze_pct() -> f64 { 1.5 }
fn default_bb_expand_pct() -> f64 { 3.5 }
fn default_obv_ema_period() -> usize { 10 }
fn default_obv_flat_threshold_pct() -> f64 { 0.1 }
fn default_manipulation_cooldown_mins() -> i64 { 120 }
fn default_daily_bars() -> usize { 6 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UsersConfig {
    #[serde(default = "default_users_path")]
    pub path: String,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self { path: default_users_path() }
    }
}

fn default_users_path() -> String { "users.json".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }

impl Config {
    pub fn load() -> Result<Arc<Self>> {
        Self::load_from("config/default")
    }

    /// Layer `<name>.{toml,yaml,json}` (optional), `BOT__*` env vars and secret overrides.
    pub fn load_from(name: &str) -> Result<Arc<Self>> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(
                config::Environment::with_prefix("BOT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scanner.symbols")
                    .with_list_parse_key("telegram.chat_ids"),
            );

        // Load the bot token from environment
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            builder = builder.set_override("telegram.bot_token", token)?;
        }

        let config = builder.build()?;
        Ok(Arc::new(config.try_deserialize()?))
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.trading.leverage, 20);
        assert_eq!(config.trading.trade_pct, 0.10);
        assert_eq!(config.risk.take_profit_pct, 3.0);
        assert_eq!(config.risk.stop_loss_pct, 1.5);
        assert_eq!(config.trading.confirmations.len(), 3);
        assert_eq!(config.scanner.symbols.len(), 13);
        assert_eq!(config.bybit.rest_url, "https://api.bybit.com");
    }

    #[test]
    fn test_sections_override() {
        let config = Config::from_toml(
            r#"
            [trading]
            venue = "binance"
            leverage = 10
            confirmations = ["ema3"]

            [scanner]
            source = "yahoo"
            symbols = ["EURUSD=X", "GC=F"]
            obv_interval = "15m"

            [scanner.thresholds]
            bb_squeeze_pct = 1.0
            "#,
        )
        .unwrap();

        assert_eq!(config.trading.venue, Venue::Binance);
        assert_eq!(config.trading.leverage, 10);
        assert_eq!(config.trading.confirmations, vec![ConfirmationFilter::Ema3]);
        assert_eq!(config.scanner.source, Venue::Yahoo);
        assert_eq!(config.scanner.symbols, vec!["EURUSD=X", "GC=F"]);
        assert_eq!(config.scanner.obv_interval, Interval::M15);
        assert_eq!(config.scanner.thresholds.bb_squeeze_pct, 1.0);
        assert_eq!(config.scanner.thresholds.bb_expand_pct, 3.5);
    }
}
