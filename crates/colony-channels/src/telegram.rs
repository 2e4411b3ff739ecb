//! Telegram gateway adapter.
//!
//! Bot API long-polling (`getUpdates` with `timeout=25`) for receive,
//! `sendMessage` for replies. Replies are split into 4096-character chunks
//! to respect Telegram's limit; poll errors back off and continue.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{Channel, ChannelMessage, SendMessage};

const MAX_MESSAGE_LEN: usize = 4096;
const TELEGRAM_API: &str = "https://api.telegram.org/bot";
const POLL_BACKOFF: Duration = Duration::from_secs(2);

/// Split a long reply into ≤4096-character chunks, preferring newline
/// boundaries. Counts characters, not bytes, so multibyte replies never
/// split mid-character.
pub fn split_message(text: &str) -> Vec<String> {
    if text.chars().count() <= MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        // Byte offset of the first character past the window.
        let window_end = rest
            .char_indices()
            .nth(MAX_MESSAGE_LEN)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        if window_end == rest.len() {
            chunks.push(rest.to_string());
            break;
        }
        let window = &rest[..window_end];
        let split_at = window.rfind('\n').map(|p| p + 1).unwrap_or(window_end);
        chunks.push(rest[..split_at].to_string());
        rest = &rest[split_at..];
    }
    chunks
}

pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: Client::builder()
                .timeout(Duration::from_secs(35))
                .build()
                .unwrap_or_default(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}{}/{}", TELEGRAM_API, self.bot_token, method)
    }

    // Deny-by-default when the list is empty; only an explicit "*" opens
    // the gateway to everyone.
    fn is_allowed(&self, candidates: &[Option<&str>]) -> bool {
        if self.allowed_users.iter().any(|a| a == "*") {
            return true;
        }
        candidates
            .iter()
            .flatten()
            .any(|c| self.allowed_users.iter().any(|a| a == c))
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &SendMessage) -> anyhow::Result<()> {
        for chunk in split_message(&message.content) {
            let body = serde_json::json!({
                "chat_id": message.recipient,
                "text": chunk,
            });
            let resp = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&body)
                .send()
                .await?;
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                warn!("telegram sendMessage failed: {text}");
            }
        }
        Ok(())
    }

    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;
        loop {
            let resp = self
                .client
                .get(self.api_url("getUpdates"))
                .query(&[
                    ("timeout", "25"),
                    ("offset", &offset.to_string()),
                    ("allowed_updates", r#"["message"]"#),
                ])
                .send()
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(e) => {
                    warn!("telegram poll error: {e:?}");
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                }
            };

            if !resp.status().is_success() {
                let status = resp.status();
                warn!("telegram getUpdates failed ({status})");
                tokio::time::sleep(POLL_BACKOFF).await;
                continue;
            }

            let json: Value = match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    warn!("telegram json parse error: {e}");
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                }
            };

            let Some(updates) = json.get("result").and_then(|r| r.as_array()) else {
                debug!("telegram: no result array");
                continue;
            };

            for update in updates {
                let update_id = update["update_id"].as_i64().unwrap_or(0);
                offset = offset.max(update_id + 1);

                let Some(msg) = update.get("message") else {
                    continue;
                };
                let Some(text) = msg.get("text").and_then(|t| t.as_str()) else {
                    continue;
                };

                let chat_id = msg["chat"]["id"].as_i64().unwrap_or(0).to_string();
                let username = msg["from"]["username"].as_str().map(|u| format!("@{u}"));
                let numeric_id = msg["from"]["id"].as_i64().map(|id| id.to_string());
                let sender = username
                    .clone()
                    .or_else(|| numeric_id.clone())
                    .unwrap_or_else(|| "unknown".to_string());

                if !self.is_allowed(&[username.as_deref(), numeric_id.as_deref()]) {
                    debug!("telegram: ignoring message from {sender} (not in allowed users)");
                    continue;
                }

                let channel_msg = ChannelMessage {
                    id: update_id.to_string(),
                    sender,
                    reply_target: chat_id,
                    content: text.to_string(),
                    channel: "telegram".to_string(),
                    timestamp: chrono::Utc::now(),
                };
                if tx.send(channel_msg).await.is_err() {
                    return Ok(()); // receiver dropped — shutdown
                }
            }
        }
    }
}
