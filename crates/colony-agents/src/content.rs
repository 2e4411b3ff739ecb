use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use colony_core::{seed_messages, sleep_until_cancelled, Agent, ToolLoop};
use colony_state::StateStore;
use colony_types::{AlertSeverity, ColonyError, ContentPiece};

use crate::ERROR_PAUSE;

const SYSTEM_PROMPT: &str = "You draft short social posts from market intelligence. Use the \
tools for the latest prices, whale moves and arbitrage, pick the single most interesting \
development, and write one post under 280 characters. No hashtags, no financial advice.";

/// Turns whatever the colony has learned recently into a draft post each
/// cycle.
pub struct ContentAgent {
    state: StateStore,
    tool_loop: ToolLoop,
    interval: Duration,
}

impl ContentAgent {
    pub fn new(state: StateStore, tool_loop: ToolLoop, interval: Duration) -> Self {
        Self {
            state,
            tool_loop,
            interval,
        }
    }

    async fn draft_once(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let body = match self
            .tool_loop
            .run_loop(
                seed_messages(
                    SYSTEM_PROMPT,
                    "Draft today's post from the freshest data you can find.",
                ),
                5,
                Duration::from_secs(120),
                cancel,
            )
            .await
        {
            Ok(body) => body,
            Err(ColonyError::Cancelled) => return Ok(()),
            Err(err) => return Err(anyhow::anyhow!(err)),
        };

        self.state
            .add_content(ContentPiece {
                id: Uuid::new_v4().to_string(),
                topic: "market pulse".to_string(),
                body,
                format: "post".to_string(),
                created_at: Utc::now(),
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl Agent for ContentAgent {
    fn name(&self) -> &str {
        "content"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            if let Err(err) = self.draft_once(&cancel).await {
                self.state
                    .add_alert(
                        "content_agent_error",
                        json!({ "error": format!("{err:#}") }),
                        AlertSeverity::Error,
                    )
                    .await;
                if sleep_until_cancelled(&cancel, ERROR_PAUSE).await.is_err() {
                    return Ok(());
                }
                continue;
            }
            if sleep_until_cancelled(&cancel, self.interval).await.is_err() {
                return Ok(());
            }
        }
    }
}
