use async_trait::async_trait;

use colony_core::{Skill, SkillContext};
use colony_types::{AlertSeverity, ColonyResult, RoutingDecision, SkillProfile};

/// System health from the shared store: collection activity, recent alerts,
/// endpoint standings.
pub struct StatusSkill;

#[async_trait]
impl Skill for StatusSkill {
    fn name(&self) -> &str {
        "status"
    }

    fn profile(&self) -> SkillProfile {
        SkillProfile::new("status")
            .keywords(&["status", "health", "uptime", "system", "running", "alive"])
            .patterns(&[r"\b(status|health)\b"])
            .priority(7)
    }

    async fn handle(
        &self,
        _decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> ColonyResult<String> {
        let revisions = ctx.state.revisions().await;
        let mut collections: Vec<(&str, u64)> = revisions.into_iter().collect();
        collections.sort();

        let mut lines = vec!["Colony status".to_string(), String::new()];
        lines.push("Collection revisions:".to_string());
        for (name, revision) in collections {
            lines.push(format!("  {name}: {revision}"));
        }

        let tracked = ctx.state.market_all().await.len();
        lines.push(format!("Tracked tokens: {tracked}"));

        let ranked = ctx.dispatcher.ranked_endpoints();
        if !ranked.is_empty() {
            lines.push("Endpoints (fastest first):".to_string());
            for (name, latency) in ranked {
                match latency {
                    Some(latency) => {
                        lines.push(format!("  {name}: {}ms", latency.as_millis()))
                    }
                    None => lines.push(format!("  {name}: no wins yet")),
                }
            }
        }
        let cooling = ctx.dispatcher.cooling_down();
        if !cooling.is_empty() {
            lines.push(format!("Cooling down: {}", cooling.join(", ")));
        }

        let recent_errors = ctx
            .state
            .alerts(Some(AlertSeverity::Error), Some(5))
            .await;
        if recent_errors.is_empty() {
            lines.push("No recent error alerts.".to_string());
        } else {
            lines.push("Recent error alerts:".to_string());
            for alert in recent_errors {
                lines.push(format!(
                    "  [{}] {} at {}",
                    alert.severity,
                    alert.kind,
                    alert.timestamp.format("%H:%M:%S")
                ));
            }
        }

        Ok(lines.join("\n"))
    }
}
