use async_trait::async_trait;

use colony_core::{Skill, SkillContext};
use colony_types::{ArbitrageOpportunity, ColonyResult, RoutingDecision, SkillProfile};

/// Opportunities computed from live DEX quotes. Deliberately a separate
/// skill from [`SpreadArbitrageSkill`] so callers always know which data
/// path produced an answer.
pub struct DexArbitrageSkill;

#[async_trait]
impl Skill for DexArbitrageSkill {
    fn name(&self) -> &str {
        "dex-arbitrage"
    }

    fn profile(&self) -> SkillProfile {
        SkillProfile::new("dex-arbitrage")
            .keywords(&["arbitrage", "arb", "dex", "spread", "ekubo", "swap"])
            .patterns(&[r"\barb(itrage)?\b"])
            .priority(9)
    }

    async fn handle(
        &self,
        _decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> ColonyResult<String> {
        let live: Vec<ArbitrageOpportunity> = ctx
            .state
            .arbitrage(None)
            .await
            .into_iter()
            .filter(|o| !o.simulated)
            .take(5)
            .collect();
        Ok(render("live DEX quotes", &live))
    }
}

/// Opportunities simulated from feed price spreads. Cheaper and wider
/// coverage, but indicative only.
pub struct SpreadArbitrageSkill;

#[async_trait]
impl Skill for SpreadArbitrageSkill {
    fn name(&self) -> &str {
        "spread-arbitrage"
    }

    fn profile(&self) -> SkillProfile {
        SkillProfile::new("spread-arbitrage")
            .keywords(&["simulated", "spread", "estimate", "feed", "indicative"])
            .patterns(&[r"\bspread(s)?\b"])
            .priority(6)
    }

    async fn handle(
        &self,
        _decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> ColonyResult<String> {
        let simulated: Vec<ArbitrageOpportunity> = ctx
            .state
            .arbitrage(None)
            .await
            .into_iter()
            .filter(|o| o.simulated)
            .take(5)
            .collect();
        Ok(render("feed spreads (indicative)", &simulated))
    }
}

fn render(source: &str, opportunities: &[ArbitrageOpportunity]) -> String {
    if opportunities.is_empty() {
        return format!("No opportunities from {source} right now.");
    }
    let mut lines = vec![format!("Top opportunities from {source}:")];
    for o in opportunities {
        lines.push(format!(
            "{}: buy {} @ {:.4}, sell {} @ {:.4} — {:+.2}%",
            o.pair, o.buy_venue, o.buy_price, o.sell_venue, o.sell_price, o.profit_pct
        ));
    }
    lines.join("\n")
}
