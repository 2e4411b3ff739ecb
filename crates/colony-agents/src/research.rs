use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use colony_core::{seed_messages, sleep_until_cancelled, Agent, ToolLoop};
use colony_state::StateStore;
use colony_types::{AlertSeverity, ColonyError, ResearchReport};

use crate::ERROR_PAUSE;

const SYSTEM_PROMPT: &str = "You are a crypto research analyst producing periodic briefings. \
Use the tools for current data and summarise the topic in a few paragraphs with concrete \
numbers.";

/// Periodic researcher: rotates through configured topics and archives one
/// briefing per cycle.
pub struct ResearchAgent {
    state: StateStore,
    tool_loop: ToolLoop,
    topics: Vec<String>,
    interval: Duration,
    cursor: AtomicUsize,
}

impl ResearchAgent {
    pub fn new(
        state: StateStore,
        tool_loop: ToolLoop,
        topics: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            tool_loop,
            topics,
            interval,
            cursor: AtomicUsize::new(0),
        }
    }

    async fn brief_next_topic(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        if self.topics.is_empty() {
            return Ok(());
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.topics.len();
        let topic = &self.topics[idx];

        let summary = match self
            .tool_loop
            .run_loop(
                seed_messages(SYSTEM_PROMPT, topic),
                5,
                Duration::from_secs(120),
                cancel,
            )
            .await
        {
            Ok(summary) => summary,
            Err(ColonyError::Cancelled) => return Ok(()),
            Err(err) => return Err(anyhow::anyhow!(err)),
        };

        self.state
            .add_research(ResearchReport {
                id: Uuid::new_v4().to_string(),
                topic: topic.clone(),
                summary,
                sources: Vec::new(),
                created_at: Utc::now(),
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn name(&self) -> &str {
        "research"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            if let Err(err) = self.brief_next_topic(&cancel).await {
                self.state
                    .add_alert(
                        "research_agent_error",
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
