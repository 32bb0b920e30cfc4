use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{size_order, ExchangeConnector, MarketOrder};
use crate::config::TradingConfig;
use crate::risk::{Position, PositionBook};
use crate::strategy::Direction;
use crate::telegram::{escape_html, Notify};
use crate::users::{User, UserStore};

/// What happened for one user when a signal was executed.
#[derive(Debug, Clone, PartialEq)]
pub enum UserOutcome {
    Opened(Position),
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub symbol: String,
    pub direction: Direction,
    /// `(user_id, outcome)` in users-file order.
    pub outcomes: Vec<(String, UserOutcome)>,
}

impl ExecutionReport {
    pub fn opened(&self) -> impl Iterator<Item = &Position> {
        self.outcomes.iter().filter_map(|(_, o)| match o {
            UserOutcome::Opened(p) => Some(p),
            _ => None,
        })
    }

    pub fn opened_count(&self) -> usize {
        self.opened().count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, UserOutcome::Failed(_)))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, UserOutcome::Skipped(_)))
            .count()
    }
}

/// Places the entry order for a confirmed signal on every active user's account.
pub struct OrderExecutor {
    users: UserStore,
    connector: Arc<dyn ExchangeConnector>,
    book: Arc<PositionBook>,
    notifier: Arc<dyn Notify>,
    trading: TradingConfig,
}

impl OrderExecutor {
    pub fn new(
        users: UserStore,
        connector: Arc<dyn ExchangeConnector>,
        book: Arc<PositionBook>,
        notifier: Arc<dyn Notify>,
        trading: TradingConfig,
    ) -> Self {
        Self {
            users,
            connector,
            book,
            notifier,
            trading,
        }
    }

    /// Users are handled concurrently; one user's failure never stops the others.
    pub async fn execute_for_all_users(&self, symbol: &str, direction: Direction) -> ExecutionReport {
        let users = self.users.load_or_empty();
        let mut report = ExecutionReport {
            symbol: symbol.to_string(),
            direction,
            outcomes: Vec::with_capacity(users.len()),
        };

        if users.is_empty() {
            warn!("No active users to trade {}", symbol);
            self.notifier
                .notify(&format!("⚠️ No active users to trade <b>{}</b>", symbol))
                .await;
            return report;
        }

        info!("📤 Executing {} {} for {} users", direction, symbol, users.len());

        let runs = users.iter().map(|user| async move {
            let outcome = match self.execute_for_user(user, symbol, direction).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("❌ {} order for user {} failed: {:#}", symbol, user.id, e);
                    UserOutcome::Failed(format!("{:#}", e))
                }
            };
            self.announce(user, symbol, direction, &outcome).await;
            (user.id.clone(), outcome)
        });
        report.outcomes = join_all(runs).await;

        info!(
            "Execution {} {}: {} opened, {} skipped, {} failed",
            direction,
            symbol,
            report.opened_count(),
            report.skipped_count(),
            report.failed_count()
        );
        report
    }

    async fn execute_for_user(&self, user: &User, symbol: &str, direction: Direction) -> Result<UserOutcome> {
        if self.book.contains(symbol, &user.id) {
            return Ok(UserOutcome::Skipped("position already open".to_string()));
        }

        let exchange = self.connector.connect(user)?;
        let side = direction.side();

        let price = exchange.mark_price(symbol).await.context("mark price")?;
        let balance = exchange.available_balance().await.context("balance")?;

        if let Err(e) = exchange.set_leverage(symbol, self.trading.leverage).await {
            warn!("⚠️ Set leverage {}x on {} for user {} failed: {:#}", self.trading.leverage, symbol, user.id, e);
        }

        let step = match exchange.lot_step(symbol).await {
            Ok(step) => step,
            Err(e) => {
                warn!("Lot step for {} unavailable, using {}: {:#}", symbol, self.trading.default_lot_step, e);
                self.trading.default_lot_step
            }
        };

        let qty = match size_order(balance, self.trading.trade_pct, self.trading.leverage, price, step) {
            Ok(qty) => qty,
            Err(e) => return Ok(UserOutcome::Skipped(e.to_string())),
        };

        let ack = exchange
            .place_market_order(&MarketOrder::open(symbol, side, qty))
            .await
            .context("market order")?;
        info!("✅ {} {} {} for user {} (order {})", side, ack.qty, symbol, user.id, ack.order_id);

        let position = Position::new(symbol, &user.id, side, price, ack.qty, Utc::now());
        if let Err(e) = self.book.open(position.clone()) {
            // Order is live on the exchange; the existing record keeps being monitored
            error!("Position record for {} user {} not stored: {}", symbol, user.id, e);
        }
        Ok(UserOutcome::Opened(position))
    }

    async fn announce(&self, user: &User, symbol: &str, direction: Direction, outcome: &UserOutcome) {
        let message = match outcome {
            UserOutcome::Opened(p) => format!(
                "{} <b>{}</b> {} opened for user {}\n💵 Entry: {:.4}\n🔢 Qty: {}\n⚙️ Leverage: {}x",
                p.side.emoji(),
                p.side,
                symbol,
                user.id,
                p.entry_price,
                p.qty,
                self.trading.leverage
            ),
            UserOutcome::Skipped(reason) => {
                format!("⏭️ {} {} skipped for user {}: {}", direction, symbol, user.id, escape_html(reason))
            }
            UserOutcome::Failed(error) => {
                format!("❌ Order failed for user {} on <b>{}</b>: {}", user.id, symbol, escape_html(error))
            }
        };
        self.notifier.notify(&message).await;
    }
}
