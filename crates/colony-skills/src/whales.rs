use async_trait::async_trait;

use colony_core::{Skill, SkillContext};
use colony_types::{ColonyResult, MovementDirection, RoutingDecision, SkillProfile, WhaleMovement};

/// Recent large movements from the shared whale collection.
pub struct WhalesSkill;

#[async_trait]
impl Skill for WhalesSkill {
    fn name(&self) -> &str {
        "whales"
    }

    fn profile(&self) -> SkillProfile {
        SkillProfile::new("whales")
            .keywords(&["whale", "whales", "movement", "transfer", "large", "wallet"])
            .patterns(&[r"\bwhale(s)?\b"])
            .priority(7)
    }

    async fn handle(
        &self,
        _decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> ColonyResult<String> {
        let movements = ctx.state.whales(Some(10)).await;
        if movements.is_empty() {
            return Ok("No whale movements observed yet.".to_string());
        }
        let mut lines = vec![format!("Last {} whale movements:", movements.len())];
        for movement in &movements {
            lines.push(format_movement(movement));
        }
        Ok(lines.join("\n"))
    }
}

fn format_movement(m: &WhaleMovement) -> String {
    let arrow = match m.direction {
        MovementDirection::Inflow => "→ exchange",
        MovementDirection::Outflow => "← exchange",
        MovementDirection::Transfer => "wallet→wallet",
    };
    format!(
        "{} {:.2} {} (${:.0}k) {} [{}]",
        m.observed_at.format("%H:%M"),
        m.amount,
        m.token,
        m.amount_usd / 1_000.0,
        arrow,
        &m.tx_hash
    )
}
