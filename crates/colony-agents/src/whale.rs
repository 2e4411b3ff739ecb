use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use colony_core::{sleep_until_cancelled, Agent};
use colony_dispatch::{DispatchError, DispatchTask, Dispatcher};
use colony_state::StateStore;
use colony_types::{AlertSeverity, MovementDirection, WhaleMovement};

use crate::ERROR_PAUSE;

/// Transfers above this raise a `whale_alert`.
const ALERT_USD: f64 = 1_000_000.0;
/// How many transaction hashes to remember for dedup.
const SEEN_CAP: usize = 512;

/// Whale watcher: polls for large transfers and feeds the movement
/// collection, deduplicating by transaction hash across polls.
pub struct WhaleAgent {
    state: StateStore,
    dispatcher: Dispatcher,
    min_usd: f64,
    poll_interval: Duration,
    seen: Mutex<VecDeque<String>>,
}

impl WhaleAgent {
    pub fn new(
        state: StateStore,
        dispatcher: Dispatcher,
        min_usd: f64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state,
            dispatcher,
            min_usd,
            poll_interval,
            seen: Mutex::new(VecDeque::new()),
        }
    }

    async fn poll_once(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let task = DispatchTask::new("whale_getRecentTransfers", json!([self.min_usd]))
            .attempt_timeout(Duration::from_secs(15));
        let success = match self.dispatcher.dispatch(task, cancel).await {
            Ok(success) => success,
            Err(DispatchError::Cancelled) => return Ok(()),
            Err(err) => {
                warn!(%err, "whale transfer poll failed");
                return Ok(());
            }
        };

        let Some(transfers) = success.result.as_array() else {
            return Ok(());
        };
        for transfer in transfers {
            let Some(movement) = parse_movement(transfer) else {
                continue;
            };
            {
                let mut seen = self.seen.lock().await;
                if seen.contains(&movement.tx_hash) {
                    continue;
                }
                seen.push_back(movement.tx_hash.clone());
                if seen.len() > SEEN_CAP {
                    seen.pop_front();
                }
            }
            if movement.amount_usd >= ALERT_USD {
                self.state
                    .add_alert(
                        "whale_alert",
                        json!({
                            "token": movement.token,
                            "amount_usd": movement.amount_usd,
                            "tx_hash": movement.tx_hash,
                        }),
                        AlertSeverity::Warning,
                    )
                    .await;
            }
            self.state.add_whale(movement).await;
        }
        Ok(())
    }
}

fn parse_movement(value: &serde_json::Value) -> Option<WhaleMovement> {
    let tx_hash = value["tx_hash"].as_str()?.to_string();
    let direction = match value["direction"].as_str().unwrap_or("transfer") {
        "in" | "inflow" => MovementDirection::Inflow,
        "out" | "outflow" => MovementDirection::Outflow,
        _ => MovementDirection::Transfer,
    };
    Some(WhaleMovement {
        tx_hash,
        token: value["token"].as_str().unwrap_or("?").to_string(),
        amount: value["amount"].as_f64().unwrap_or(0.0),
        amount_usd: value["amount_usd"].as_f64().unwrap_or(0.0),
        direction,
        address: value["address"].as_str().unwrap_or("").to_string(),
        observed_at: Utc::now(),
    })
}

#[async_trait]
impl Agent for WhaleAgent {
    fn name(&self) -> &str {
        "whale"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            if let Err(err) = self.poll_once(&cancel).await {
                self.state
                    .add_alert(
                        "whale_agent_error",
                        json!({ "error": format!("{err:#}") }),
                        AlertSeverity::Error,
                    )
                    .await;
                if sleep_until_cancelled(&cancel, ERROR_PAUSE).await.is_err() {
                    return Ok(());
                }
                continue;
            }
            if sleep_until_cancelled(&cancel, self.poll_interval)
                .await
                .is_err()
            {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_transfer_shape() {
        let movement = parse_movement(&json!({
            "tx_hash": "0xdead",
            "token": "ETH",
            "amount": 500.0,
            "amount_usd": 1_500_000.0,
            "direction": "in",
            "address": "0xwhale",
        }))
        .unwrap();
        assert_eq!(movement.direction, MovementDirection::Inflow);
        assert_eq!(movement.amount_usd, 1_500_000.0);
    }

    #[test]
    fn transfer_without_hash_is_dropped() {
        assert!(parse_movement(&json!({"token": "ETH"})).is_none());
    }
}
