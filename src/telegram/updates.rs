use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::API_BASE;

/// A text message the bot received, from a group, channel or private chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: String,
    /// Absent for channel posts.
    pub sender_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
    channel_post: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    from: Option<Sender>,
    text: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Sender {
    id: i64,
}

/// Decode a `getUpdates` body into text messages and the next offset to ask for.
pub fn parse_updates(body: &Value) -> Result<(Vec<IncomingMessage>, Option<i64>)> {
    if body["ok"].as_bool() != Some(true) {
        anyhow::bail!(
            "getUpdates rejected: {}",
            body["description"].as_str().unwrap_or("unknown error")
        );
    }

    let updates: Vec<Update> =
        serde_json::from_value(body["result"].clone()).context("getUpdates result is not a list of updates")?;

    let next_offset = updates.iter().map(|u| u.update_id + 1).max();
    let messages = updates
        .into_iter()
        .filter_map(|u| u.message.or(u.channel_post))
        .filter_map(|m| {
            let text = m.text.or(m.caption)?;
            Some(IncomingMessage {
                chat_id: m.chat.id.to_string(),
                sender_id: m.from.map(|s| s.id.to_string()),
                text,
            })
        })
        .collect();

    Ok((messages, next_offset))
}

/// Long-polls `getUpdates`, acknowledging everything it has returned.
pub struct UpdatePoller {
    client: Client,
    bot_token: String,
    offset: Option<i64>,
    timeout_secs: u64,
}

impl UpdatePoller {
    pub fn new(bot_token: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs + 10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            bot_token,
            offset: None,
            timeout_secs,
        })
    }

    pub async fn poll(&mut self) -> Result<Vec<IncomingMessage>> {
        let url = format!("{}/bot{}/getUpdates", API_BASE, self.bot_token);
        let timeout = self.timeout_secs.to_string();
        let offset = self.offset.map(|o| o.to_string());

        let mut query = vec![
            ("timeout", timeout.as_str()),
            ("allowed_updates", r#"["message","channel_post"]"#),
        ];
        if let Some(offset) = offset.as_deref() {
            query.push(("offset", offset));
        }

        let body: Value = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .context("getUpdates request failed")?
            .json()
            .await
            .context("getUpdates returned a non-JSON body")?;

        let (messages, next_offset) = parse_updates(&body)?;
        if next_offset.is_some() {
            self.offset = next_offset;
        }
        debug!("[TG] {} new messages", messages.len());
        Ok(messages)
    }
}

/// Admin commands the trader accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/close SYMBOL`
    Close(String),
    /// `/closeall` or `/closeall SYMBOL`
    CloseAll(Option<String>),
    /// `/positions`
    Positions,
}

impl Command {
    /// `None` for plain text and malformed commands. A `@botname` suffix is accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?;
        let name = head.split('@').next()?.to_ascii_lowercase();
        let symbol = parts.next().map(|s| s.to_ascii_uppercase());

        match name.as_str() {
            "/close" => symbol.map(Command::Close),
            "/closeall" => Some(Command::CloseAll(symbol)),
            "/positions" => Some(Command::Positions),
            _ => None,
        }
    }

    pub fn is_admin_only(&self) -> bool {
        !matches!(self, Command::Positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/close btcusdt"), Some(Command::Close("BTCUSDT".into())));
        assert_eq!(Command::parse("/close"), None);
        assert_eq!(Command::parse("/closeall"), Some(Command::CloseAll(None)));
        assert_eq!(
            Command::parse("/closeall@cid_bot ETHUSDT"),
            Some(Command::CloseAll(Some("ETHUSDT".into())))
        );
        assert_eq!(Command::parse("/positions"), Some(Command::Positions));
        assert_eq!(Command::parse("close everything"), None);
        assert_eq!(Command::parse(""), None);
        assert!(!Command::Positions.is_admin_only());
        assert!(Command::CloseAll(None).is_admin_only());
    }

    #[test]
    fn test_parse_updates() {
        let body = json!({
            "ok": true,
            "result": [
                { "update_id": 10, "message": { "chat": { "id": -1001 }, "from": { "id": 77 }, "text": "/closeall" } },
                { "update_id": 11, "channel_post": { "chat": { "id": -1002 }, "text": "Confirmed Change in Direction" } },
                { "update_id": 12, "message": { "chat": { "id": 5 }, "from": { "id": 5 } } },
                { "update_id": 13, "edited_message": { "chat": { "id": 5 }, "text": "ignored" } }
            ]
        });

        let (messages, next) = parse_updates(&body).unwrap();
        assert_eq!(next, Some(14));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].chat_id, "-1001");
        assert_eq!(messages[0].sender_id.as_deref(), Some("77"));
        assert_eq!(messages[1].sender_id, None);
    }

    #[test]
    fn test_parse_updates_error() {
        let body = json!({ "ok": false, "description": "Unauthorized" });
        let err = parse_updates(&body).unwrap_err();
        assert!(err.to_string().contains("Unauthorized"));

        let (messages, next) = parse_updates(&json!({ "ok": true, "result": [] })).unwrap();
        assert!(messages.is_empty());
        assert_eq!(next, None);
    }
}
