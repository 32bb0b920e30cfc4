pub mod updates;

pub use updates::{parse_updates, Command, IncomingMessage, UpdatePoller};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;

pub(crate) const API_BASE: &str = "https://api.telegram.org";
const STARTUP_COOLDOWN_SECS: u64 = 600; // 10 minutes

fn startup_marker(mode: &str) -> PathBuf {
    std::env::temp_dir()
        .join("cid-trading-bot")
        .join(format!("last_startup_{}.txt", mode))
}

fn get_last_startup_time(mode: &str) -> u64 {
    fs::read_to_string(startup_marker(mode))
        .ok()
        .and_then(|content| content.trim().parse().ok())
        .unwrap_or(0)
}

fn set_last_startup_time(mode: &str, time: u64) {
    let path = startup_marker(mode);
    if let Some(dir) = path.parent() {
        let _ = fs::create_dir_all(dir);
    }
    let _ = fs::write(path, time.to_string());
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Escape dynamic text (error messages, API replies) for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Outbound notification channel. Delivery failures are logged, never returned.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Stand-in when no bot token is configured: messages only reach the log.
pub struct LogNotifier;

#[async_trait]
impl Notify for LogNotifier {
    async fn notify(&self, text: &str) {
        info!("📣 {}", text.replace('\n', " | "));
    }
}

/// Sends every message to all configured chats (group first, then personal chats).
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_ids: Vec<String>,
    parse_mode: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_ids: Vec<String>, parse_mode: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            bot_token,
            chat_ids,
            parse_mode,
        }
    }

    /// `None` when Telegram is disabled or has no token or chats.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let token = config.bot_token.clone().filter(|t| !t.is_empty())?;
        if config.chat_ids.is_empty() {
            warn!("Telegram enabled but no chat_ids configured");
            return None;
        }
        Some(Self::new(token, config.chat_ids.clone(), config.parse_mode.clone()))
    }

    pub fn chat_ids(&self) -> &[String] {
        &self.chat_ids
    }

    pub async fn send_to(&self, chat_id: &str, message: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", API_BASE, self.bot_token);

        let response: Value = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": message,
                "parse_mode": self.parse_mode,
                "disable_web_page_preview": true
            }))
            .send()
            .await
            .context("sendMessage request failed")?
            .json()
            .await
            .context("sendMessage returned a non-JSON body")?;

        if response["ok"].as_bool() != Some(true) {
            anyhow::bail!(
                "sendMessage rejected: {}",
                response["description"].as_str().unwrap_or("unknown error")
            );
        }
        Ok(())
    }

    /// Fan out to every chat. Returns how many chats accepted the message.
    pub async fn send_message(&self, message: &str) -> usize {
        let sends = self.chat_ids.iter().map(|chat_id| async move {
            match self.send_to(chat_id, message).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("❌ Telegram send to {} failed: {:#}", chat_id, e);
                    false
                }
            }
        });

        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();
        debug!("[TG] Delivered to {}/{} chats", delivered, self.chat_ids.len());
        delivered
    }

    /// Announce a start unless the same mode announced one in the last ten minutes.
    pub async fn notify_startup(&self, mode: &str, venue: &str, symbols: usize) -> bool {
        let now = unix_now();
        let last = get_last_startup_time(mode);

        if now.saturating_sub(last) < STARTUP_COOLDOWN_SECS {
            debug!("[TG] Startup notification blocked, cooldown active. Last: {}, Now: {}", last, now);
            return false;
        }
        set_last_startup_time(mode, now);

        let message = format!(
            "🤖 <b>Bot Started</b>\n\n\
             ⚙️ Mode: {}\n\
             🌐 Venue: {}\n\
             📊 Symbols: {}\n\
             ✅ Status: Running",
            mode, venue, symbols
        );
        self.send_message(&message).await > 0
    }

    pub async fn notify_shutdown(&self, mode: &str) {
        let message = format!("🛑 <b>Bot Stopped</b>\n\n⚙️ Mode: {}", mode);
        self.send_message(&message).await;
    }
}

#[async_trait]
impl Notify for TelegramNotifier {
    async fn notify(&self, text: &str) {
        self.send_message(text).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_token_and_chats() {
        let mut config = TelegramConfig {
            enabled: true,
            bot_token: Some("123:abc".to_string()),
            chat_ids: vec!["-100".to_string(), "42".to_string()],
            ..TelegramConfig::default()
        };
        let notifier = TelegramNotifier::from_config(&config).unwrap();
        assert_eq!(notifier.chat_ids(), ["-100", "42"]);

        config.chat_ids.clear();
        assert!(TelegramNotifier::from_config(&config).is_none());

        config.chat_ids.push("42".to_string());
        config.bot_token = None;
        assert!(TelegramNotifier::from_config(&config).is_none());

        config.bot_token = Some("123:abc".to_string());
        config.enabled = false;
        assert!(TelegramNotifier::from_config(&config).is_none());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<html> & co"), "&lt;html&gt; &amp; co");
    }

    #[test]
    fn test_startup_marker_roundtrip() {
        let mode = format!("test-{}", std::process::id());
        assert_eq!(get_last_startup_time(&mode), 0);
        set_last_startup_time(&mode, 1_700_000_000);
        assert_eq!(get_last_startup_time(&mode), 1_700_000_000);
        fs::remove_file(startup_marker(&mode)).ok();
    }
}
