use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use colony_core::{Skill, SkillContext};
use colony_dispatch::DispatchTask;
use colony_types::{
    ColonyError, ColonyResult, MarketSnapshot, ParamExtractor, RoutingDecision, SkillProfile,
};

/// Snapshots older than this are refreshed through the dispatcher.
const FRESHNESS_SECS: i64 = 120;

/// Token price lookups. Serves from the shared market collection when fresh,
/// otherwise races the price endpoints and writes the result back.
pub struct PricesSkill;

#[async_trait]
impl Skill for PricesSkill {
    fn name(&self) -> &str {
        "prices"
    }

    fn profile(&self) -> SkillProfile {
        SkillProfile::new("prices")
            .keywords(&[
                "price", "цена", "курс", "btc", "eth", "sol", "token", "coin", "market", "pump",
                "dump",
            ])
            .patterns(&[r"\$[A-Za-z]+", r"\b(btc|eth|sol|strk|avax|matic)\b"])
            .priority(10)
            .extractor(ParamExtractor::TokenSymbols)
    }

    async fn handle(
        &self,
        decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> ColonyResult<String> {
        let tokens: Vec<String> = decision
            .params
            .get("tokens")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_str().map(|s| s.to_uppercase()))
                    .collect()
            })
            .unwrap_or_default();
        if tokens.is_empty() {
            return Err(ColonyError::Usage(
                "no token symbols found in the message".to_string(),
            ));
        }

        let mut lines = Vec::with_capacity(tokens.len());
        for token in &tokens {
            let snapshot = match self.fresh_snapshot(token, ctx).await {
                Some(snapshot) => snapshot,
                None => self.fetch_snapshot(token, ctx).await?,
            };
            lines.push(format_snapshot(&snapshot));
        }
        Ok(lines.join("\n"))
    }
}

impl PricesSkill {
    async fn fresh_snapshot(&self, token: &str, ctx: &SkillContext) -> Option<MarketSnapshot> {
        let snapshot = ctx.state.market(token).await?;
        if Utc::now().signed_duration_since(snapshot.timestamp)
            < chrono::Duration::seconds(FRESHNESS_SECS)
        {
            debug!(token, "price served from shared state");
            Some(snapshot)
        } else {
            None
        }
    }

    async fn fetch_snapshot(
        &self,
        token: &str,
        ctx: &SkillContext,
    ) -> ColonyResult<MarketSnapshot> {
        let task = DispatchTask::new("colony_getTokenPrice", json!([token]))
            .attempt_timeout(Duration::from_secs(10))
            .deadline(Duration::from_secs(30));
        let success = ctx
            .dispatcher
            .dispatch(task, &ctx.cancel)
            .await
            .map_err(|err| match err {
                colony_dispatch::DispatchError::Cancelled => ColonyError::Cancelled,
                colony_dispatch::DispatchError::DeadlineExceeded => {
                    ColonyError::Timeout(format!("price lookup for {token}"))
                }
                other => ColonyError::Transient(other.to_string()),
            })?;

        let price = success.result["price_usd"]
            .as_f64()
            .or_else(|| success.result.as_f64())
            .ok_or_else(|| {
                ColonyError::Transient(format!("endpoint returned no price for {token}"))
            })?;
        let snapshot = MarketSnapshot {
            token: token.to_string(),
            price_usd: price,
            change_24h: success.result["change_24h"].as_f64(),
            volume_24h: success.result["volume_24h"].as_f64(),
            source: success.endpoint.clone(),
            timestamp: Utc::now(),
        };
        // Write back so the next query and the report writers see it.
        ctx.state.put_market(snapshot.clone()).await?;
        Ok(snapshot)
    }
}

fn format_snapshot(snapshot: &MarketSnapshot) -> String {
    let change = snapshot
        .change_24h
        .map(|c| format!(" ({c:+.1}% 24h)"))
        .unwrap_or_default();
    format!(
        "{}: ${:.4}{} — {}",
        snapshot.token, snapshot.price_usd, change, snapshot.source
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_formatting_includes_change_when_present() {
        let snapshot = MarketSnapshot {
            token: "ETH".to_string(),
            price_usd: 3123.4567,
            change_24h: Some(2.15),
            volume_24h: None,
            source: "coingecko".to_string(),
            timestamp: Utc::now(),
        };
        let line = format_snapshot(&snapshot);
        assert!(line.starts_with("ETH: $3123.4567"));
        assert!(line.contains("+2.1% 24h"));
        assert!(line.ends_with("coingecko"));
    }

    #[test]
    fn profile_extracts_token_symbols() {
        assert_eq!(PricesSkill.profile().extractor, ParamExtractor::TokenSymbols);
        assert_eq!(PricesSkill.profile().name, "prices");
    }
}
