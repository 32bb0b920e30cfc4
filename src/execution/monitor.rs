use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{Exchange, ExchangeConnector, MarketOrder};
use crate::risk::{ExitPolicy, ExitReason, Pnl, Position, PositionBook, PositionKey};
use crate::telegram::{escape_html, Notify};
use crate::users::{User, UserStore};

#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed {
        position: Position,
        exit_price: f64,
        pnl: Pnl,
        reason: ExitReason,
    },
    /// The exchange already reported the position flat; only the record was dropped.
    ExternallyClosed { position: Position },
    Failed {
        symbol: String,
        user_id: String,
        error: String,
    },
}

impl CloseOutcome {
    pub fn is_closed(&self) -> bool {
        !matches!(self, CloseOutcome::Failed { .. })
    }
}

/// Watches the book, applies the exit policy and closes positions exactly once.
pub struct PositionMonitor {
    users: UserStore,
    connector: Arc<dyn ExchangeConnector>,
    book: Arc<PositionBook>,
    notifier: Arc<dyn Notify>,
    policy: ExitPolicy,
}

impl PositionMonitor {
    pub fn new(
        users: UserStore,
        connector: Arc<dyn ExchangeConnector>,
        book: Arc<PositionBook>,
        notifier: Arc<dyn Notify>,
        policy: ExitPolicy,
    ) -> Self {
        Self {
            users,
            connector,
            book,
            notifier,
            policy,
        }
    }

    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    /// One pass over every open position.
    ///
    /// Positions of users missing from the users file are left untouched.
    pub async fn tick(&self) -> Vec<CloseOutcome> {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<CloseOutcome> {
        if self.book.is_empty() {
            return Vec::new();
        }

        let users = self.users_by_id();
        let mut outcomes = Vec::new();

        for (symbol, user_id) in self.book.keys() {
            let Some(user) = users.get(&user_id) else {
                debug!("User {} not loaded, skipping {}", user_id, symbol);
                continue;
            };

            match self.check(user, &symbol, None, now).await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => warn!("⚠️ Monitor {} user {}: {:#}", symbol, user_id, e),
            }
        }

        outcomes
    }

    /// Admin override: close every open position, or only those on `symbol`.
    pub async fn close_positions(&self, symbol: Option<&str>, reason: ExitReason) -> Vec<CloseOutcome> {
        let users = self.users_by_id();
        let keys: Vec<PositionKey> = self
            .book
            .keys()
            .into_iter()
            .filter(|(s, _)| symbol.map_or(true, |wanted| s == wanted))
            .collect();

        let mut outcomes = Vec::with_capacity(keys.len());
        for (symbol, user_id) in keys {
            let result = match users.get(&user_id) {
                Some(user) => self.check(user, &symbol, Some(reason), Utc::now()).await,
                None => Err(anyhow::anyhow!("user {} is not in the users file", user_id)),
            };

            let outcome = match result {
                Ok(Some(outcome)) => outcome,
                // Claimed by the monitor between listing and closing
                Ok(None) => continue,
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!("❌ Close {} user {} failed: {}", symbol, user_id, error);
                    self.notifier
                        .notify(&format!(
                            "❌ Close failed for user {} on <b>{}</b>: {}",
                            user_id,
                            symbol,
                            escape_html(&error)
                        ))
                        .await;
                    CloseOutcome::Failed { symbol, user_id, error }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    fn users_by_id(&self) -> HashMap<String, User> {
        self.users
            .load_or_empty()
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect()
    }

    /// Reconcile one record with the exchange and close it when `forced` is set
    /// or the exit policy fires. `Ok(None)` means nothing to do.
    async fn check(
        &self,
        user: &User,
        symbol: &str,
        forced: Option<ExitReason>,
        now: DateTime<Utc>,
    ) -> Result<Option<CloseOutcome>> {
        let Some(side) = self.book.get(symbol, &user.id).map(|p| p.side) else {
            return Ok(None);
        };
        let exchange = self.connector.connect(user)?;

        let size = exchange.position_size(symbol, side).await.context("position size")?;
        if size <= 0.0 {
            let Some(position) = self.book.take(symbol, &user.id) else {
                return Ok(None);
            };
            info!("ℹ️ {} for user {} is flat on the exchange, dropping record", symbol, user.id);
            self.notifier
                .notify(&format!(
                    "{} {} for user {} was closed outside the bot",
                    ExitReason::ExternallyClosed.emoji(),
                    symbol,
                    user.id
                ))
                .await;
            return Ok(Some(CloseOutcome::ExternallyClosed { position }));
        }

        let price = exchange.mark_price(symbol).await.context("mark price")?;

        let reason = match forced {
            Some(reason) => reason,
            None => {
                let decision = self
                    .book
                    .update(symbol, &user.id, |p| self.policy.evaluate(p, price, now));
                match decision.flatten() {
                    Some(reason) => reason,
                    None => return Ok(None),
                }
            }
        };

        let Some(position) = self.book.take(symbol, &user.id) else {
            return Ok(None);
        };

        self.close_claimed(exchange.as_ref(), position, size, price, reason)
            .await
            .map(Some)
    }

    /// Submit the reduce-only close for a claimed record; restore it if rejected.
    async fn close_claimed(
        &self,
        exchange: &dyn Exchange,
        position: Position,
        exchange_size: f64,
        price: f64,
        reason: ExitReason,
    ) -> Result<CloseOutcome> {
        let order = MarketOrder::close(&position.symbol, position.side, exchange_size);

        if let Err(e) = exchange.place_market_order(&order).await {
            let (symbol, user_id) = (position.symbol.clone(), position.user_id.clone());
            if let Err(restore_err) = self.book.restore(position) {
                error!("Could not restore {} user {}: {}", symbol, user_id, restore_err);
            }
            return Err(e.context(format!("{} close order", reason)));
        }

        let pnl = position.pnl(price);
        info!(
            "{} {} {} user {} closed at {:.4}, PnL {:+.2} USDT ({:+.2}%)",
            reason.emoji(),
            reason,
            position.symbol,
            position.user_id,
            price,
            pnl.usdt,
            pnl.pct
        );

        let pnl_emoji = if pnl.usdt >= 0.0 { "🟢" } else { "🔴" };
        self.notifier
            .notify(&format!(
                "{} <b>{}</b> | {} {}\n👤 User: {}\n🚪 Entry: {:.4}\n🚪 Exit: {:.4}\n🔢 Qty: {}\n{} PnL: {:+.2} USDT ({:+.2}%)",
                reason.emoji(),
                reason,
                position.symbol,
                position.side,
                position.user_id,
                position.entry_price,
                price,
                exchange_size,
                pnl_emoji,
                pnl.usdt,
                pnl.pct
            ))
            .await;

        Ok(CloseOutcome::Closed {
            position,
            exit_price: price,
            pnl,
            reason,
        })
    }
}
