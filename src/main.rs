use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cid_trading_bot::bot::{self, ObvGauge, Scanner, Trader};
use cid_trading_bot::config::{Config, LoggingConfig, Venue};
use cid_trading_bot::strategy::AlertScanner;
use cid_trading_bot::telegram::UpdatePoller;
use cid_trading_bot::TelegramNotifier;

#[derive(Parser)]
#[command(name = "cid-trading-bot")]
#[command(about = "STC/OBV alert scanner and multi-user CID futures trader")]
#[command(version)]
struct Cli {
    /// Config file without extension (toml, yaml or json)
    #[arg(short, long, default_value = "config/default", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the watchlist and push cycle, liquidity and speed alerts
    Scan {
        /// Candle source; defaults to scanner.source
        #[arg(short, long, value_enum)]
        venue: Option<Venue>,
    },
    /// Periodic OBV pressure gauge over the watchlist
    Obv {
        #[arg(short, long, value_enum)]
        venue: Option<Venue>,
    },
    /// Trade confirmed CID signals for every registered user
    Trade {
        /// Exchange to trade on; defaults to trading.venue
        #[arg(short, long, value_enum)]
        venue: Option<Venue>,
    },
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if config.json {
        builder.json().try_init().map_err(|e| anyhow::anyhow!(e))?;
    } else {
        builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;
    init_logging(&config.logging)?;

    info!("🚀 CID Trading Bot - Starting...");

    match cli.command {
        Commands::Scan { venue } => {
            let venue = venue.unwrap_or(config.scanner.source);
            run_scanner(config, venue).await
        }
        Commands::Obv { venue } => {
            let venue = venue.unwrap_or(config.scanner.source);
            run_obv_gauge(config, venue).await
        }
        Commands::Trade { venue } => {
            let venue = venue.unwrap_or(config.trading.venue);
            run_trader(config, venue).await
        }
    }
}

async fn announce_startup(tg: &Option<TelegramNotifier>, mode: &str, venue: Venue, symbols: usize) {
    if let Some(tg) = tg {
        if tg.notify_startup(mode, venue.as_str(), symbols).await {
            info!("📱 Startup notification sent");
        } else {
            info!("📱 Startup notification blocked (cooldown) or undelivered");
        }
    }
}

async fn announce_shutdown(tg: &Option<TelegramNotifier>, mode: &str) {
    if let Some(tg) = tg {
        tg.notify_shutdown(mode).await;
    }
    info!("👋 Bot stopped");
}

async fn run_scanner(config: Arc<Config>, venue: Venue) -> Result<()> {
    let source = bot::candle_source(&config, venue)?;
    let (notifier, tg) = bot::notifier(&config);
    info!("✅ Scanner configured: {} symbols from {}", config.scanner.symbols.len(), venue.as_str());

    let scanner = Scanner::new(
        source,
        notifier,
        AlertScanner::new(config.scanner.thresholds.clone()),
        config.scanner.symbols.clone(),
        config.scanner.candle_limit,
    );
    announce_startup(&tg, "scan", venue, config.scanner.symbols.len()).await;

    tokio::select! {
        _ = scanner.run(config.scanner.run_interval()) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    announce_shutdown(&tg, "scan").await;
    Ok(())
}

async fn run_obv_gauge(config: Arc<Config>, venue: Venue) -> Result<()> {
    let source = bot::candle_source(&config, venue)?;
    let (notifier, tg) = bot::notifier(&config);
    let gauge = ObvGauge::new(source, notifier, &config.scanner);
    announce_startup(&tg, "obv", venue, config.scanner.symbols.len()).await;

    tokio::select! {
        _ = gauge.run(config.scanner.obv_run_interval()) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    announce_shutdown(&tg, "obv").await;
    Ok(())
}

async fn run_trader(config: Arc<Config>, venue: Venue) -> Result<()> {
    let source = bot::candle_source(&config, venue)?;
    let connector = bot::exchange_connector(&config, venue)?;
    let (notifier, tg) = bot::notifier(&config);

    let trader = Trader::new(&config, source, connector, notifier);
    info!("✅ Trader configured on {} (users file: {})", venue.as_str(), config.users.path);

    let (tx, rx) = mpsc::channel(64);
    let poller = match &config.telegram.bot_token {
        Some(token) if config.telegram.enabled && !token.is_empty() => {
            let poller = UpdatePoller::new(token.clone(), config.telegram.poll_timeout_secs)?;
            Some(bot::spawn_update_poller(poller, tx))
        }
        _ => {
            warn!("Telegram polling disabled: no CID signals or admin commands will arrive");
            None
        }
    };

    announce_startup(&tg, "trade", venue, 0).await;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
    };
    trader.run(rx, shutdown).await;

    if let Some(handle) = poller {
        handle.abort();
    }
    let open = trader.book().len();
    if open > 0 {
        warn!("Stopping with {} open positions still on the exchange", open);
    }

    announce_shutdown(&tg, "trade").await;
    Ok(())
}
