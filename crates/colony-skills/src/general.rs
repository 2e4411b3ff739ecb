use std::time::Duration;

use async_trait::async_trait;

use colony_core::{seed_messages, Skill, SkillContext, DEFAULT_MAX_ITERS};
use colony_types::{ColonyResult, RoutingDecision, SkillProfile, GENERAL_SKILL};

const SYSTEM_PROMPT: &str = "You are Colony, a crypto intelligence assistant on a chat \
gateway. You have tools for live prices, whale movements, arbitrage and alerts; use them \
instead of guessing numbers. Be brief and direct.";

/// The reserved fallback: plain model chat with the full tool catalog.
/// Every message the router cannot place lands here, so this skill never
/// refuses an input.
pub struct GeneralSkill;

#[async_trait]
impl Skill for GeneralSkill {
    fn name(&self) -> &str {
        GENERAL_SKILL
    }

    fn profile(&self) -> SkillProfile {
        // Never scored: the router falls back to it by name.
        SkillProfile::new(GENERAL_SKILL)
    }

    async fn handle(
        &self,
        decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> ColonyResult<String> {
        let text = decision
            .params
            .get("raw_message")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Ok("Send me a question about prices, whales, arbitrage or research."
                .to_string());
        }
        ctx.tool_loop
            .run_loop(
                seed_messages(SYSTEM_PROMPT, text),
                DEFAULT_MAX_ITERS,
                Duration::from_secs(90),
                &ctx.cancel,
            )
            .await
    }
}
