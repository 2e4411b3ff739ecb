//! Messaging channel adapters. A channel only moves text in and out; the
//! orchestrator never sees transport types.

pub mod history;
pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub use history::HistoryStore;
pub use telegram::TelegramChannel;

/// One message received from a channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: String,
    pub sender: String,
    /// Where replies go (chat id for Telegram).
    pub reply_target: String,
    pub content: String,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
}

/// One outbound reply.
#[derive(Debug, Clone)]
pub struct SendMessage {
    pub recipient: String,
    pub content: String,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, message: &SendMessage) -> anyhow::Result<()>;
    /// Long-running receive loop; returns when the receiver side is
    /// dropped.
    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> anyhow::Result<()>;
}
