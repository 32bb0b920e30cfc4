use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfirmationFilter};
use crate::execution::{CloseOutcome, ExchangeConnector, ExecutionReport, OrderExecutor, PositionMonitor};
use crate::market_data::CandleSource;
use crate::risk::{ExitPolicy, ExitReason, PositionBook};
use crate::strategy::{parse_cid, CidSignal, PendingSignal, PendingSignals, SignalConfirmer};
use crate::telegram::{Command, IncomingMessage, Notify, UpdatePoller};
use crate::users::UserStore;

const POLL_RETRY: Duration = Duration::from_secs(5);

/// Turns CID messages into confirmed multi-user trades and manages them until exit.
pub struct Trader {
    pending: PendingSignals,
    confirmer: SignalConfirmer,
    executor: OrderExecutor,
    monitor: PositionMonitor,
    notifier: Arc<dyn Notify>,
    allowed_chats: Vec<String>,
    admin_id: Option<String>,
    signal_expiry: chrono::Duration,
    check_interval: Duration,
    monitor_interval: Duration,
}

impl Trader {
    pub fn new(
        config: &Config,
        source: Arc<dyn CandleSource>,
        connector: Arc<dyn ExchangeConnector>,
        notifier: Arc<dyn Notify>,
    ) -> Self {
        let book = Arc::new(PositionBook::new());
        let users = UserStore::new(&config.users.path);

        Self {
            pending: PendingSignals::new(),
            confirmer: SignalConfirmer::new(source, config.trading.confirmations.clone()),
            executor: OrderExecutor::new(
                users.clone(),
                connector.clone(),
                book.clone(),
                notifier.clone(),
                config.trading.clone(),
            ),
            monitor: PositionMonitor::new(
                users,
                connector,
                book,
                notifier.clone(),
                ExitPolicy::from_config(&config.risk),
            ),
            notifier,
            allowed_chats: config.telegram.chat_ids.clone(),
            admin_id: config.telegram.admin_id.clone(),
            signal_expiry: config.trading.signal_expiry(),
            check_interval: config.trading.signal_check_interval(),
            monitor_interval: config.trading.monitor_interval(),
        }
    }

    pub fn book(&self) -> &Arc<PositionBook> {
        self.monitor.book()
    }

    pub fn pending(&self) -> &PendingSignals {
        &self.pending
    }

    /// Route one incoming message: admin command, CID signal, or nothing.
    pub async fn handle_message(&self, message: &IncomingMessage) {
        self.handle_message_at(message, Utc::now()).await
    }

    pub async fn handle_message_at(&self, message: &IncomingMessage, now: DateTime<Utc>) {
        if !self.allowed_chats.iter().any(|c| *c == message.chat_id) {
            debug!("Ignoring message from chat {}", message.chat_id);
            return;
        }

        if let Some(command) = Command::parse(&message.text) {
            self.handle_command(command, message.sender_id.as_deref()).await;
            return;
        }

        if let Some(signal) = parse_cid(&message.text) {
            self.on_signal(signal, now).await;
        }
    }

    async fn on_signal(&self, signal: CidSignal, now: DateTime<Utc>) {
        let CidSignal { symbol, direction } = signal;

        if !self.pending.try_register(&symbol, direction, now, self.signal_expiry) {
            info!("CID {} {} ignored, a signal is already pending", symbol, direction);
            return;
        }

        info!("📢 CID signal {} {} pending", symbol, direction);
        let checks: Vec<&str> = self.confirmer.filters().iter().map(ConfirmationFilter::label).collect();
        self.notifier
            .notify(&format!(
                "📢 CID signal received for <b>{}</b> ({} {})\n⏱ Expires in {} minutes\n🔎 Checking: {}",
                symbol,
                direction,
                direction.emoji(),
                self.signal_expiry.num_minutes(),
                if checks.is_empty() { "none".to_string() } else { checks.join(", ") }
            ))
            .await;

        // First check right away; the periodic tick handles the rest
        if let Some(pending) = self.pending.get(&symbol) {
            self.try_confirm(&symbol, pending).await;
        }
    }

    /// Expire stale signals and re-check the live ones.
    pub async fn check_pending(&self) -> Vec<ExecutionReport> {
        self.check_pending_at(Utc::now()).await
    }

    pub async fn check_pending_at(&self, now: DateTime<Utc>) -> Vec<ExecutionReport> {
        for (symbol, signal) in self.pending.take_expired(now) {
            info!("⌛ CID {} {} expired", symbol, signal.direction);
            self.notifier
                .notify(&format!(
                    "⌛ CID signal expired for <b>{}</b> ({}) without confirmation",
                    symbol, signal.direction
                ))
                .await;
        }

        let mut reports = Vec::new();
        for (symbol, signal) in self.pending.live(now) {
            if let Some(report) = self.try_confirm(&symbol, signal).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Execute once every filter passes. The signal is claimed before orders go out.
    async fn try_confirm(&self, symbol: &str, signal: PendingSignal) -> Option<ExecutionReport> {
        let report = self.confirmer.confirm(symbol, signal.direction).await;

        if !report.all_passed() {
            self.notifier
                .notify(&format!(
                    "⏳ {} {}: check not passed yet\n{}",
                    symbol,
                    signal.direction,
                    report.summary()
                ))
                .await;
            return None;
        }

        self.pending.remove(symbol)?;

        self.notifier
            .notify(&format!(
                "✅ All checks passed for <b>{}</b> ({})\n{}\n🚀 Executing market orders...",
                symbol,
                signal.direction,
                report.summary()
            ))
            .await;

        Some(self.executor.execute_for_all_users(symbol, signal.direction).await)
    }

    pub async fn monitor_tick(&self) -> Vec<CloseOutcome> {
        self.monitor.tick().await
    }

    async fn handle_command(&self, command: Command, sender_id: Option<&str>) {
        let is_admin = matches!((&self.admin_id, sender_id), (Some(admin), Some(sender)) if admin == sender);
        if command.is_admin_only() && !is_admin {
            warn!("Rejected {:?} from {:?}", command, sender_id);
            self.notifier.notify("⛔ Only the admin can close positions").await;
            return;
        }

        match command {
            Command::Positions => self.report_positions().await,
            Command::Close(symbol) => self.close_manually(Some(&symbol)).await,
            Command::CloseAll(symbol) => self.close_manually(symbol.as_deref()).await,
        }
    }

    async fn close_manually(&self, symbol: Option<&str>) {
        let scope = symbol.unwrap_or("all symbols");
        info!("🛑 Admin close requested for {}", scope);

        let outcomes = self.monitor.close_positions(symbol, ExitReason::Manual).await;
        if outcomes.is_empty() {
            self.notifier
                .notify(&format!("📭 No open positions for {}", scope))
                .await;
            return;
        }

        let closed = outcomes.iter().filter(|o| o.is_closed()).count();
        self.notifier
            .notify(&format!(
                "🛑 Manual close for {}: {}/{} positions closed",
                scope,
                closed,
                outcomes.len()
            ))
            .await;
    }

    async fn report_positions(&self) {
        let positions = self.book().snapshot();
        if positions.is_empty() {
            self.notifier.notify("📭 No open positions").await;
            return;
        }

        let lines: Vec<String> = positions
            .iter()
            .map(|p| {
                format!(
                    "{} <b>{}</b> {} | user {} | qty {} @ {:.4}",
                    p.side.emoji(),
                    p.symbol,
                    p.side,
                    p.user_id,
                    p.qty,
                    p.entry_price
                )
            })
            .collect();
        self.notifier
            .notify(&format!("📋 <b>Open positions ({})</b>\n{}", positions.len(), lines.join("\n")))
            .await;
    }

    /// Drive messages, confirmation checks and the monitor until `shutdown` resolves.
    pub async fn run(&self, mut messages: mpsc::Receiver<IncomingMessage>, shutdown: impl Future<Output = ()>) {
        let mut checks = tokio::time::interval(self.check_interval);
        checks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut monitor = tokio::time::interval(self.monitor_interval);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "🤖 Trader running (checks every {:?}, monitor every {:?})",
            self.check_interval, self.monitor_interval
        );

        loop {
            tokio::select! {
                Some(message) = messages.recv() => {
                    self.handle_message(&message).await;
                }
                _ = checks.tick() => {
                    if !self.pending.is_empty() {
                        self.check_pending().await;
                    }
                }
                _ = monitor.tick() => {
                    self.monitor_tick().await;
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
    }
}

/// Forward Telegram updates into `tx` until the receiver is dropped.
pub fn spawn_update_poller(mut poller: UpdatePoller, tx: mpsc::Sender<IncomingMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match poller.poll().await {
                Ok(messages) => {
                    for message in messages {
                        if tx.send(message).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("❌ Telegram polling failed: {:#}", e);
                    tokio::time::sleep(POLL_RETRY).await;
                }
            }
        }
    })
}
