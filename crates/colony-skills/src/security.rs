use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use colony_core::{Skill, SkillContext};
use colony_types::{ColonyError, ColonyResult, RoutingDecision, SkillProfile};

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"0x[0-9a-fA-F]{6,64}").expect("static pattern"))
}

/// Static checks over an address mentioned in the message: shape sanity
/// plus cross-references against observed whale activity and alerts.
pub struct SecuritySkill;

#[async_trait]
impl Skill for SecuritySkill {
    fn name(&self) -> &str {
        "security"
    }

    fn profile(&self) -> SkillProfile {
        SkillProfile::new("security")
            .keywords(&["security", "scan", "audit", "contract", "rug", "scam", "safe"])
            .patterns(&[r"0x[0-9a-fA-F]{6,}"])
            .priority(9)
    }

    async fn handle(
        &self,
        decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> ColonyResult<String> {
        let raw = decision
            .params
            .get("raw_message")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let address = address_re()
            .find(raw)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                ColonyError::Usage("no 0x address found in the message".to_string())
            })?;

        let mut findings = Vec::new();
        if address.len() < 10 {
            findings.push("address is suspiciously short".to_string());
        }

        let movements = ctx.state.whales(None).await;
        let touches = movements
            .iter()
            .filter(|m| m.address.eq_ignore_ascii_case(&address))
            .count();
        if touches > 0 {
            findings.push(format!("seen in {touches} tracked whale movement(s)"));
        }

        let related_alerts = ctx
            .state
            .alerts(None, None)
            .await
            .into_iter()
            .filter(|a| a.payload.to_string().contains(&address))
            .count();
        if related_alerts > 0 {
            findings.push(format!("referenced by {related_alerts} alert(s)"));
        }

        if findings.is_empty() {
            Ok(format!(
                "{address}: no flags in tracked activity. This is a heuristic check, not an audit."
            ))
        } else {
            Ok(format!("{address}:\n- {}", findings.join("\n- ")))
        }
    }
}
