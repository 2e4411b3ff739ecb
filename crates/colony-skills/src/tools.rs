//! Concrete catalog tools — the bridge from model tool calls to runtime
//! data. Read-only over the shared store and dispatcher; a tool call can
//! never mutate system state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use colony_state::StateStore;
use colony_tools::{Tool, ToolCatalog};
use colony_types::{AlertSeverity, ColonyResult, ToolSchema};

/// Build the default catalog over the shared store.
pub fn default_catalog(state: StateStore) -> ColonyResult<ToolCatalog> {
    ToolCatalog::build(vec![
        Arc::new(GetPricesTool {
            state: state.clone(),
        }),
        Arc::new(RecentWhalesTool {
            state: state.clone(),
        }),
        Arc::new(FindArbitrageTool {
            state: state.clone(),
        }),
        Arc::new(RecentAlertsTool { state }),
    ])
}

struct GetPricesTool {
    state: StateStore,
}

#[async_trait]
impl Tool for GetPricesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_prices".to_string(),
            description: "Latest tracked prices for one or more token symbols".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "tokens": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["tokens"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let tokens = args["tokens"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::new();
        for token in tokens.iter().filter_map(|t| t.as_str()) {
            match self.state.market(&token.to_uppercase()).await {
                Some(snapshot) => out.push(json!({
                    "token": snapshot.token,
                    "price_usd": snapshot.price_usd,
                    "change_24h": snapshot.change_24h,
                    "source": snapshot.source,
                    "timestamp": snapshot.timestamp,
                })),
                None => out.push(json!({ "token": token, "error": "not tracked" })),
            }
        }
        Ok(json!({ "count": out.len(), "prices": out }))
    }
}

struct RecentWhalesTool {
    state: StateStore,
}

#[async_trait]
impl Tool for RecentWhalesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "recent_whales".to_string(),
            description: "Most recent observed whale movements".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "limit": {"type": "integer"} }
            }),
        }
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let limit = args["limit"].as_u64().map(|v| v.clamp(1, 50) as usize);
        let movements = self.state.whales(limit.or(Some(10))).await;
        Ok(json!({
            "count": movements.len(),
            "movements": movements,
        }))
    }
}

struct FindArbitrageTool {
    state: StateStore,
}

#[async_trait]
impl Tool for FindArbitrageTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "find_arbitrage".to_string(),
            description: "Current arbitrage opportunities above a minimum profit".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "min_profit_pct": {"type": "number"},
                    "include_simulated": {"type": "boolean"}
                }
            }),
        }
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let min_profit = args["min_profit_pct"].as_f64().unwrap_or(0.0);
        let include_simulated = args["include_simulated"].as_bool().unwrap_or(false);
        let opportunities: Vec<Value> = self
            .state
            .arbitrage(None)
            .await
            .into_iter()
            .filter(|o| o.profit_pct >= min_profit)
            .filter(|o| include_simulated || !o.simulated)
            .map(|o| serde_json::to_value(o).unwrap_or(Value::Null))
            .collect();
        Ok(json!({
            "count": opportunities.len(),
            "opportunities": opportunities,
        }))
    }
}

struct RecentAlertsTool {
    state: StateStore,
}

#[async_trait]
impl Tool for RecentAlertsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "recent_alerts".to_string(),
            description: "Recent runtime alerts, optionally errors only".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer"},
                    "errors_only": {"type": "boolean"}
                }
            }),
        }
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let limit = args["limit"].as_u64().map(|v| v.clamp(1, 50) as usize);
        let min = if args["errors_only"].as_bool().unwrap_or(false) {
            Some(AlertSeverity::Error)
        } else {
            None
        };
        let alerts = self.state.alerts(min, limit.or(Some(10))).await;
        Ok(json!({ "count": alerts.len(), "alerts": alerts }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use colony_types::{FunctionCall, InvocationStatus, MarketSnapshot, ToolCallRequest};
    use tokio_util::sync::CancellationToken;

    fn request(name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn get_prices_reads_tracked_tokens() {
        let state = StateStore::default();
        state
            .put_market(MarketSnapshot {
                token: "ETH".to_string(),
                price_usd: 3000.0,
                change_24h: Some(1.0),
                volume_24h: None,
                source: "test".to_string(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        let catalog = default_catalog(state).unwrap();

        let inv = catalog
            .invoke(
                &request("get_prices", r#"{"tokens":["eth","xyz"]}"#),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(inv.status, InvocationStatus::Succeeded);
        let result = inv.result.unwrap();
        assert_eq!(result["count"], 2);
        assert_eq!(result["prices"][0]["price_usd"], 3000.0);
        assert_eq!(result["prices"][1]["error"], "not tracked");
    }

    #[tokio::test]
    async fn catalog_builds_with_unique_valid_schemas() {
        let catalog = default_catalog(StateStore::default()).unwrap();
        assert_eq!(catalog.len(), 4);
        let wire = catalog.wire_schemas();
        assert!(wire.iter().all(|t| t["type"] == "function"));
    }

    #[tokio::test]
    async fn find_arbitrage_excludes_simulated_by_default() {
        let state = StateStore::default();
        for (pair, simulated) in [("ETH/USDC", false), ("STRK/USDC", true)] {
            state
                .add_arbitrage(colony_types::ArbitrageOpportunity {
                    pair: pair.to_string(),
                    buy_venue: "a".to_string(),
                    sell_venue: "b".to_string(),
                    buy_price: 1.0,
                    sell_price: 1.01,
                    profit_pct: 1.0,
                    simulated,
                    detected_at: Utc::now(),
                })
                .await;
        }
        let catalog = default_catalog(state).unwrap();
        let inv = catalog
            .invoke(&request("find_arbitrage", "{}"), &CancellationToken::new())
            .await
            .unwrap();
        let result = inv.result.unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["opportunities"][0]["pair"], "ETH/USDC");
    }
}
