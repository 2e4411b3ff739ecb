use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use colony_core::{seed_messages, Skill, SkillContext};
use colony_types::{
    ColonyError, ColonyResult, ParamExtractor, ResearchReport, RoutingDecision, SkillProfile,
};

const SYSTEM_PROMPT: &str = "You are a crypto research analyst. Answer the question using the \
available tools for live market, whale and arbitrage data, then give a concise summary with \
the key numbers. Do not speculate beyond the data.";

/// Model-backed research over a free-form query. The answer is archived as a
/// ResearchReport so the daily report writer can pick it up.
pub struct ResearchSkill;

#[async_trait]
impl Skill for ResearchSkill {
    fn name(&self) -> &str {
        "research"
    }

    fn profile(&self) -> SkillProfile {
        SkillProfile::new("research")
            .keywords(&[
                "research", "исследуй", "find", "search", "news", "analysis", "what is",
                "что такое",
            ])
            .patterns(&[r"\b(what is|что такое)\b"])
            .priority(8)
            .extractor(ParamExtractor::TrailingQuery)
    }

    async fn handle(
        &self,
        decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> ColonyResult<String> {
        let query = decision
            .params
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .or_else(|| {
                decision
                    .params
                    .get("raw_message")
                    .and_then(|v| v.as_str())
            })
            .ok_or_else(|| ColonyError::Usage("empty research query".to_string()))?
            .to_string();

        let summary = ctx
            .tool_loop
            .run_loop(
                seed_messages(SYSTEM_PROMPT, &query),
                5,
                Duration::from_secs(90),
                &ctx.cancel,
            )
            .await?;

        ctx.state
            .add_research(ResearchReport {
                id: Uuid::new_v4().to_string(),
                topic: query,
                summary: summary.clone(),
                sources: Vec::new(),
                created_at: Utc::now(),
            })
            .await;

        Ok(summary)
    }
}
