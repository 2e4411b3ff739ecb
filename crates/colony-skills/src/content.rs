use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use colony_core::{seed_messages, Skill, SkillContext};
use colony_types::{
    ColonyResult, ContentPiece, ParamExtractor, RoutingDecision, SkillProfile,
};

const SYSTEM_PROMPT: &str = "You draft social posts about crypto markets. Use the tools for \
current numbers when the topic needs them. Keep tweets under 280 characters, no hashtags \
unless asked, no financial advice.";

/// Drafts posts/tweets/threads via the tool loop and archives them as
/// ContentPieces for the content report.
pub struct ContentSkill;

#[async_trait]
impl Skill for ContentSkill {
    fn name(&self) -> &str {
        "content"
    }

    fn profile(&self) -> SkillProfile {
        SkillProfile::new("content")
            .keywords(&[
                "post", "пост", "tweet", "твит", "write", "напиши", "thread", "тред", "content",
                "draft",
            ])
            .patterns(&[r"\b(post|tweet|thread)\b", r"\b(write|generate|draft)\b"])
            .priority(8)
            .extractor(ParamExtractor::Topic)
    }

    async fn handle(
        &self,
        decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> ColonyResult<String> {
        let topic = decision
            .params
            .get("topic")
            .or_else(|| decision.params.get("raw_message"))
            .and_then(|v| v.as_str())
            .unwrap_or("crypto markets")
            .to_string();
        let format = decision
            .params
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("post")
            .to_string();

        let prompt = format!("Draft one {format} about: {topic}");
        let body = ctx
            .tool_loop
            .run_loop(
                seed_messages(SYSTEM_PROMPT, &prompt),
                3,
                Duration::from_secs(60),
                &ctx.cancel,
            )
            .await?;

        ctx.state
            .add_content(ContentPiece {
                id: Uuid::new_v4().to_string(),
                topic,
                body: body.clone(),
                format,
                created_at: Utc::now(),
            })
            .await;

        Ok(body)
    }
}
