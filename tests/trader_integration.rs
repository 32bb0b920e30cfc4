use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use cid_trading_bot::bot::Trader;
use cid_trading_bot::config::Config;
use cid_trading_bot::execution::{CloseOutcome, Exchange, ExchangeConnector, MarketOrder, OrderAck, OrderSide};
use cid_trading_bot::market_data::{Candle, CandleSource, Interval};
use cid_trading_bot::risk::ExitReason;
use cid_trading_bot::telegram::{IncomingMessage, Notify};
use cid_trading_bot::users::User;

const GROUP: &str = "-100";
const ADMIN: &str = "1";

fn cid_text(symbol: &str, direction: &str) -> String {
    format!(
        "🔁 <b>Confirmed Change in Direction</b> on <b>{}</b> <b>(30m)</b>: Now <b>{}</b> 🟢",
        symbol, direction
    )
}

fn message(chat: &str, sender: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id: chat.to_string(),
        sender_id: Some(sender.to_string()),
        text: text.to_string(),
    }
}

/// One simulated venue shared by every user's account.
#[derive(Default)]
struct Market {
    prices: Mutex<HashMap<String, f64>>,
    sizes: Mutex<HashMap<(String, String), f64>>,
    orders: Mutex<Vec<(String, MarketOrder)>>,
    reject_orders: AtomicBool,
}

impl Market {
    fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().insert(symbol.to_string(), price);
    }

    fn set_size(&self, user: &str, symbol: &str, size: f64) {
        self.sizes.lock().insert((user.to_string(), symbol.to_string()), size);
    }

    fn orders(&self) -> Vec<(String, MarketOrder)> {
        self.orders.lock().clone()
    }
}

struct Account {
    user_id: String,
    market: Arc<Market>,
}

#[async_trait]
impl Exchange for Account {
    fn venue(&self) -> &'static str {
        "sim"
    }

    async fn mark_price(&self, symbol: &str) -> Result<f64> {
        Ok(*self.market.prices.lock().get(symbol).unwrap_or(&100.0))
    }

    async fn available_balance(&self) -> Result<f64> {
        Ok(1000.0)
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<()> {
        anyhow::bail!("leverage not modified")
    }

    async fn lot_step(&self, _symbol: &str) -> Result<f64> {
        Ok(0.001)
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderAck> {
        if self.market.reject_orders.load(Ordering::SeqCst) {
            anyhow::bail!("sim API error 10001: rejected");
        }

        let key = (self.user_id.clone(), order.symbol.clone());
        let mut sizes = self.market.sizes.lock();
        let size = sizes.entry(key).or_insert(0.0);
        if order.reduce_only {
            *size = (*size - order.qty).max(0.0);
        } else {
            *size += order.qty;
        }
        self.market.orders.lock().push((self.user_id.clone(), order.clone()));

        Ok(OrderAck {
            order_id: format!("sim-{}", self.market.orders.lock().len()),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
        })
    }

    async fn position_size(&self, symbol: &str, _side: OrderSide) -> Result<f64> {
        let key = (self.user_id.clone(), symbol.to_string());
        Ok(*self.market.sizes.lock().get(&key).unwrap_or(&0.0))
    }
}

struct SimConnector(Arc<Market>);

impl ExchangeConnector for SimConnector {
    fn connect(&self, user: &User) -> Result<Arc<dyn Exchange>> {
        Ok(Arc::new(Account {
            user_id: user.id.clone(),
            market: self.0.clone(),
        }))
    }
}

/// Steadily rising or falling candles with flat volume.
struct TrendCandles {
    rising: AtomicBool,
}

#[async_trait]
impl CandleSource for TrendCandles {
    fn name(&self) -> &'static str {
        "trend"
    }

    async fn candles(&self, _symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>> {
        let rising = self.rising.load(Ordering::SeqCst);
        Ok((0..limit)
            .map(|i| {
                let step = i as f64 * 0.5;
                let close = if rising { 100.0 + step } else { 200.0 - step };
                Candle::new(i as i64 * interval.duration_ms(), close, close + 0.2, close - 0.2, close, 10.0)
            })
            .collect())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn any(&self, needle: &str) -> bool {
        self.sent.lock().iter().any(|m| m.contains(needle))
    }

    fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Notify for RecordingNotifier {
    async fn notify(&self, text: &str) {
        self.sent.lock().push(text.to_string());
    }
}

struct Harness {
    trader: Trader,
    market: Arc<Market>,
    candles: Arc<TrendCandles>,
    notes: Arc<RecordingNotifier>,
    users_path: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_file(&self.users_path).ok();
    }
}

fn write_users(path: &Path, ids: &[&str]) {
    let entries: Vec<String> = ids
        .iter()
        .map(|id| format!(r#""{id}": {{ "active": true, "apiKey": "key-{id}", "apiSecret": "secret-{id}" }}"#))
        .collect();
    std::fs::write(path, format!("{{ {} }}", entries.join(", "))).unwrap();
}

fn harness(name: &str) -> Harness {
    let users_path = std::env::temp_dir().join(format!("cid-trader-{}-{}.json", name, std::process::id()));
    write_users(&users_path, &["1", "2"]);

    let mut config = Config::default();
    config.telegram.chat_ids = vec![GROUP.to_string()];
    config.telegram.admin_id = Some(ADMIN.to_string());
    config.users.path = users_path.to_string_lossy().into_owned();

    let market = Arc::new(Market::default());
    let candles = Arc::new(TrendCandles {
        rising: AtomicBool::new(true),
    });
    let notes = Arc::new(RecordingNotifier::default());

    let trader = Trader::new(
        &config,
        candles.clone(),
        Arc::new(SimConnector(market.clone())),
        notes.clone(),
    );

    Harness {
        trader,
        market,
        candles,
        notes,
        users_path,
    }
}

#[tokio::test]
async fn test_confirmed_signal_opens_for_every_user() {
    let h = harness("open");

    h.trader
        .handle_message(&message(GROUP, "55", &cid_text("BTCUSDT", "BULLISH")))
        .await;

    assert!(h.notes.any("CID signal received for <b>BTCUSDT</b>"));
    assert!(h.notes.any("All checks passed"));
    assert!(h.trader.pending().is_empty());
    assert_eq!(h.trader.book().len(), 2);

    // 1000 USDT * 10% * 20x / 100
    let orders = h.market.orders();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|(_, o)| o.qty == 20.0 && !o.reduce_only));

    let position = h.trader.book().get("BTCUSDT", "2").unwrap();
    assert_eq!(position.entry_price, 100.0);
}

#[tokio::test]
async fn test_open_position_is_not_doubled() {
    let h = harness("double");
    let text = cid_text("ETHUSDT", "BULLISH");

    h.trader.handle_message(&message(GROUP, "55", &text)).await;
    h.trader.handle_message(&message(GROUP, "55", &text)).await;

    assert_eq!(h.market.orders().len(), 2);
    assert_eq!(h.trader.book().len(), 2);
    assert!(h.notes.any("position already open"));
}

#[tokio::test]
async fn test_unknown_chat_is_ignored() {
    let h = harness("chat");

    h.trader
        .handle_message(&message("12345", ADMIN, &cid_text("BTCUSDT", "BULLISH")))
        .await;
    h.trader.handle_message(&message("12345", ADMIN, "/closeall")).await;

    assert_eq!(h.notes.count(), 0);
    assert!(h.trader.pending().is_empty());
}

#[tokio::test]
async fn test_unconfirmed_signal_expires() {
    let h = harness("expire");
    h.candles.rising.store(false, Ordering::SeqCst);
    let now = Utc::now();

    h.trader
        .handle_message_at(&message(GROUP, "55", &cid_text("SOLUSDT", "BULLISH")), now)
        .await;
    assert!(h.notes.any("check not passed yet"));
    assert!(h.trader.pending().contains("SOLUSDT"));

    let reports = h.trader.check_pending_at(now + ChronoDuration::minutes(30)).await;
    assert!(reports.is_empty());
    assert!(h.trader.pending().contains("SOLUSDT"));

    h.trader.check_pending_at(now + ChronoDuration::minutes(61)).await;
    assert!(h.notes.any("CID signal expired for <b>SOLUSDT</b>"));
    assert!(h.trader.pending().is_empty());
    assert!(h.market.orders().is_empty());
}

#[tokio::test]
async fn test_pending_signal_executes_once_filters_pass() {
    let h = harness("later");
    h.candles.rising.store(false, Ordering::SeqCst);
    let now = Utc::now();

    h.trader
        .handle_message_at(&message(GROUP, "55", &cid_text("XRPUSDT", "BULLISH")), now)
        .await;
    assert!(h.market.orders().is_empty());

    h.candles.rising.store(true, Ordering::SeqCst);
    let reports = h.trader.check_pending_at(now + ChronoDuration::minutes(5)).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].opened_count(), 2);

    assert!(h.trader.check_pending_at(now + ChronoDuration::minutes(6)).await.is_empty());
    assert_eq!(h.market.orders().len(), 2);
}

#[tokio::test]
async fn test_take_profit_closes_exactly_once() {
    let h = harness("tp");
    h.trader
        .handle_message(&message(GROUP, "55", &cid_text("BTCUSDT", "BULLISH")))
        .await;

    h.market.set_price("BTCUSDT", 103.5);
    let outcomes = h.trader.monitor_tick().await;
    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        match outcome {
            CloseOutcome::Closed { reason, pnl, .. } => {
                assert_eq!(*reason, ExitReason::TakeProfit);
                assert!((pnl.usdt - 70.0).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    let closes: Vec<_> = h.market.orders().into_iter().filter(|(_, o)| o.reduce_only).collect();
    assert_eq!(closes.len(), 2);
    assert!(h.trader.book().is_empty());
    assert!(h.trader.monitor_tick().await.is_empty());
}

#[tokio::test]
async fn test_bearish_signal_shorts_and_stops_out() {
    let h = harness("short");
    h.candles.rising.store(false, Ordering::SeqCst);
    h.trader
        .handle_message(&message(GROUP, "55", &cid_text("BNBUSDT", "BEARISH")))
        .await;
    assert_eq!(h.trader.book().len(), 2);

    // Adverse move through both the trailing stop and the stop loss
    h.market.set_price("BNBUSDT", 102.0);
    let outcomes = h.trader.monitor_tick().await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        CloseOutcome::Closed { reason: ExitReason::TrailingStop, .. }
    )));
}

#[tokio::test]
async fn test_external_close_drops_record() {
    let h = harness("external");
    h.trader
        .handle_message(&message(GROUP, "55", &cid_text("BTCUSDT", "BULLISH")))
        .await;

    h.market.set_size("1", "BTCUSDT", 0.0);
    let outcomes = h.trader.monitor_tick().await;

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(&outcomes[0], CloseOutcome::ExternallyClosed { position } if position.user_id == "1"));
    assert!(h.trader.book().contains("BTCUSDT", "2"));
    assert!(h.notes.any("closed outside the bot"));
}

#[tokio::test]
async fn test_rejected_close_keeps_position() {
    let h = harness("reject");
    h.trader
        .handle_message(&message(GROUP, "55", &cid_text("BTCUSDT", "BULLISH")))
        .await;

    h.market.reject_orders.store(true, Ordering::SeqCst);
    h.market.set_price("BTCUSDT", 104.0);
    assert!(h.trader.monitor_tick().await.is_empty());
    assert_eq!(h.trader.book().len(), 2);

    h.market.reject_orders.store(false, Ordering::SeqCst);
    assert_eq!(h.trader.monitor_tick().await.len(), 2);
    assert!(h.trader.book().is_empty());
}

#[tokio::test]
async fn test_user_missing_from_file_is_left_alone() {
    let h = harness("missing");
    h.trader
        .handle_message(&message(GROUP, "55", &cid_text("BTCUSDT", "BULLISH")))
        .await;

    write_users(&h.users_path, &["1"]);
    h.market.set_price("BTCUSDT", 104.0);
    let outcomes = h.trader.monitor_tick().await;

    assert_eq!(outcomes.len(), 1);
    assert!(h.trader.book().contains("BTCUSDT", "2"));
    assert!(!h.trader.book().contains("BTCUSDT", "1"));
}

#[tokio::test]
async fn test_admin_commands() {
    let h = harness("admin");
    h.trader
        .handle_message(&message(GROUP, "55", &cid_text("BTCUSDT", "BULLISH")))
        .await;
    h.trader
        .handle_message(&message(GROUP, "55", &cid_text("ETHUSDT", "BULLISH")))
        .await;
    assert_eq!(h.trader.book().len(), 4);

    h.trader.handle_message(&message(GROUP, "55", "/closeall")).await;
    assert!(h.notes.any("Only the admin"));
    assert_eq!(h.trader.book().len(), 4);

    h.trader.handle_message(&message(GROUP, ADMIN, "/positions")).await;
    assert!(h.notes.any("Open positions (4)"));

    h.trader.handle_message(&message(GROUP, ADMIN, "/close ethusdt")).await;
    assert_eq!(h.trader.book().len(), 2);
    assert!(h.notes.any("Manual Close"));
    assert!(h.notes.any("Manual close for ETHUSDT: 2/2"));

    h.trader.handle_message(&message(GROUP, ADMIN, "/closeall")).await;
    assert!(h.trader.book().is_empty());

    h.trader.handle_message(&message(GROUP, ADMIN, "/closeall")).await;
    assert!(h.notes.any("No open positions for all symbols"));
}

#[tokio::test]
async fn test_no_users_sends_one_notice() {
    let h = harness("nobody");
    write_users(&h.users_path, &[]);

    h.trader
        .handle_message(&message(GROUP, "55", &cid_text("ADAUSDT", "BULLISH")))
        .await;

    assert!(h.notes.any("No active users to trade <b>ADAUSDT</b>"));
    assert!(h.market.orders().is_empty());
}

#[tokio::test]
async fn test_run_loop_until_shutdown() {
    let h = harness("run");
    let (tx, rx) = mpsc::channel(8);
    tx.send(message(GROUP, "55", &cid_text("LTCUSDT", "BULLISH"))).await.unwrap();

    h.trader.run(rx, tokio::time::sleep(Duration::from_millis(300))).await;

    assert_eq!(h.trader.book().len(), 2);
}
