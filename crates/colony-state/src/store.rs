use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use colony_types::{
    Alert, AlertSeverity, ArbitrageOpportunity, ColonyError, ColonyResult, ContentPiece,
    MarketSnapshot, ResearchReport, WhaleMovement,
};

use crate::collections::{Bounded, LatestWins, StateLimits};
use crate::persist::{self, StateSnapshot};
use crate::subscribe::Subscription;

struct Inner {
    market: RwLock<LatestWins<MarketSnapshot>>,
    arbitrage: RwLock<Bounded<ArbitrageOpportunity>>,
    whales: RwLock<Bounded<WhaleMovement>>,
    research: RwLock<Bounded<ResearchReport>>,
    content: RwLock<Bounded<ContentPiece>>,
    alerts: RwLock<Bounded<Alert>>,
}

/// Handle to the shared store. Cheap to clone; skills and agents receive it
/// as a capability, never through a global.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl StateStore {
    pub fn new(limits: StateLimits) -> Self {
        Self {
            inner: Arc::new(Inner {
                market: RwLock::new(LatestWins::new()),
                arbitrage: RwLock::new(Bounded::new(limits.arbitrage)),
                whales: RwLock::new(Bounded::new(limits.whales)),
                research: RwLock::new(Bounded::new(limits.research)),
                content: RwLock::new(Bounded::new(limits.content)),
                alerts: RwLock::new(Bounded::new(limits.alerts)),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Market snapshots (latest-wins per token)
    // -----------------------------------------------------------------------

    /// Insert or replace the snapshot for one token. The only failing write
    /// in the store: entries that fail the schema check are rejected with
    /// `StateOverflow`.
    pub async fn put_market(&self, snapshot: MarketSnapshot) -> ColonyResult<u64> {
        if snapshot.token.trim().is_empty() {
            return Err(ColonyError::StateOverflow(
                "market snapshot with empty token".to_string(),
            ));
        }
        if !snapshot.price_usd.is_finite() || snapshot.price_usd <= 0.0 {
            return Err(ColonyError::StateOverflow(format!(
                "market snapshot for {} with non-positive price",
                snapshot.token
            )));
        }
        let key = snapshot.token.clone();
        Ok(self.inner.market.write().await.put(key, snapshot))
    }

    pub async fn market(&self, token: &str) -> Option<MarketSnapshot> {
        self.inner.market.read().await.get(token)
    }

    pub async fn market_all(&self) -> HashMap<String, MarketSnapshot> {
        self.inner.market.read().await.all()
    }

    pub async fn subscribe_market(&self) -> Subscription<MarketSnapshot> {
        Subscription::new(self.inner.market.read().await.subscribe(), None)
    }

    // -----------------------------------------------------------------------
    // Arbitrage opportunities (bounded, evict lowest profit)
    // -----------------------------------------------------------------------

    pub async fn add_arbitrage(&self, op: ArbitrageOpportunity) -> u64 {
        self.inner
            .arbitrage
            .write()
            .await
            .push_evicting(op, |items| {
                items
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| {
                        a.profit_pct
                            .partial_cmp(&b.profit_pct)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(idx, _)| idx)
            })
    }

    /// Current opportunities, most profitable first.
    pub async fn arbitrage(&self, limit: Option<usize>) -> Vec<ArbitrageOpportunity> {
        let guard = self.inner.arbitrage.read().await;
        let mut items: Vec<ArbitrageOpportunity> = guard.iter().cloned().collect();
        items.sort_by(|a, b| {
            b.profit_pct
                .partial_cmp(&a.profit_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        items
    }

    pub async fn subscribe_arbitrage(&self) -> Subscription<ArbitrageOpportunity> {
        Subscription::new(self.inner.arbitrage.read().await.subscribe(), None)
    }

    // -----------------------------------------------------------------------
    // Whale movements (bounded, by time)
    // -----------------------------------------------------------------------

    pub async fn add_whale(&self, movement: WhaleMovement) -> u64 {
        self.inner.whales.write().await.push(movement)
    }

    pub async fn whales(&self, limit: Option<usize>) -> Vec<WhaleMovement> {
        self.inner.whales.read().await.list(limit)
    }

    pub async fn subscribe_whales(&self) -> Subscription<WhaleMovement> {
        Subscription::new(self.inner.whales.read().await.subscribe(), None)
    }

    // -----------------------------------------------------------------------
    // Research reports
    // -----------------------------------------------------------------------

    pub async fn add_research(&self, report: ResearchReport) -> u64 {
        self.inner.research.write().await.push(report)
    }

    pub async fn research(&self, limit: Option<usize>) -> Vec<ResearchReport> {
        self.inner.research.read().await.list(limit)
    }

    pub async fn subscribe_research(&self) -> Subscription<ResearchReport> {
        Subscription::new(self.inner.research.read().await.subscribe(), None)
    }

    // -----------------------------------------------------------------------
    // Content pieces
    // -----------------------------------------------------------------------

    pub async fn add_content(&self, piece: ContentPiece) -> u64 {
        self.inner.content.write().await.push(piece)
    }

    pub async fn content(&self, limit: Option<usize>) -> Vec<ContentPiece> {
        self.inner.content.read().await.list(limit)
    }

    pub async fn subscribe_content(&self) -> Subscription<ContentPiece> {
        Subscription::new(self.inner.content.read().await.subscribe(), None)
    }

    // -----------------------------------------------------------------------
    // Alerts (ring buffer + broadcast)
    // -----------------------------------------------------------------------

    /// Publish an alert. Never blocks the caller; slow subscribers lose
    /// oldest revisions.
    pub async fn add_alert(&self, kind: &str, payload: Value, severity: AlertSeverity) -> Alert {
        let alert = Alert::new(kind, payload, severity);
        self.inner.alerts.write().await.push(alert.clone());
        if severity >= AlertSeverity::Error {
            warn!(kind, %severity, "alert published");
        }
        alert
    }

    pub async fn alerts(
        &self,
        min_severity: Option<AlertSeverity>,
        limit: Option<usize>,
    ) -> Vec<Alert> {
        let guard = self.inner.alerts.read().await;
        let mut items: Vec<Alert> = guard
            .iter()
            .filter(|a| min_severity.map(|min| a.severity >= min).unwrap_or(true))
            .cloned()
            .collect();
        items.reverse();
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        items
    }

    pub async fn subscribe_alerts(
        &self,
        predicate: Option<Box<dyn Fn(&Alert) -> bool + Send>>,
    ) -> Subscription<Alert> {
        Subscription::new(self.inner.alerts.read().await.subscribe(), predicate)
    }

    // -----------------------------------------------------------------------
    // Snapshot & persistence
    // -----------------------------------------------------------------------

    /// Best-effort point-in-time view. Takes each collection's write lock in
    /// a fixed order so writers are briefly frozen during the copy.
    pub async fn snapshot(&self) -> StateSnapshot {
        let market = self.inner.market.write().await;
        let arbitrage = self.inner.arbitrage.write().await;
        let whales = self.inner.whales.write().await;
        let research = self.inner.research.write().await;
        let content = self.inner.content.write().await;
        let alerts = self.inner.alerts.write().await;
        StateSnapshot::capture(
            market.all(),
            arbitrage.iter().cloned().collect(),
            whales.iter().cloned().collect(),
            research.iter().cloned().collect(),
            content.iter().cloned().collect(),
            alerts.iter().cloned().collect(),
        )
    }

    /// Per-collection revision counters, for status reporting.
    pub async fn revisions(&self) -> HashMap<&'static str, u64> {
        let mut map = HashMap::new();
        map.insert("market", self.inner.market.read().await.revision());
        map.insert("arbitrage", self.inner.arbitrage.read().await.revision());
        map.insert("whales", self.inner.whales.read().await.revision());
        map.insert("research", self.inner.research.read().await.revision());
        map.insert("content", self.inner.content.read().await.revision());
        map.insert("alerts", self.inner.alerts.read().await.revision());
        map
    }

    /// Write the whole store to `path` as one JSON document, atomically via
    /// rename.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let snapshot = self.snapshot().await;
        persist::write_snapshot(path, &snapshot).await?;
        info!(path = %path.display(), "state saved");
        Ok(())
    }

    /// Populate the store from `path`. A missing file is an empty start; a
    /// malformed or version-mismatched file is an empty start plus an alert.
    pub async fn load(&self, path: &Path) -> anyhow::Result<()> {
        match persist::read_snapshot(path).await {
            persist::LoadOutcome::Loaded(snapshot) => {
                self.apply(snapshot).await;
                info!(path = %path.display(), "state loaded");
            }
            persist::LoadOutcome::Missing => {
                info!(path = %path.display(), "no state file, starting empty");
            }
            persist::LoadOutcome::Malformed(detail) => {
                self.add_alert(
                    "state_load_error",
                    serde_json::json!({ "path": path.display().to_string(), "detail": detail }),
                    AlertSeverity::Error,
                )
                .await;
            }
            persist::LoadOutcome::UnsupportedVersion(version) => {
                self.add_alert(
                    "unsupported_state_version",
                    serde_json::json!({ "found": version, "expected": persist::STATE_SCHEMA_VERSION }),
                    AlertSeverity::Error,
                )
                .await;
            }
        }
        Ok(())
    }

    async fn apply(&self, snapshot: StateSnapshot) {
        self.inner.market.write().await.replace(snapshot.market);
        self.inner
            .arbitrage
            .write()
            .await
            .replace(snapshot.arbitrage);
        self.inner.whales.write().await.replace(snapshot.whales);
        self.inner.research.write().await.replace(snapshot.research);
        self.inner.content.write().await.replace(snapshot.content);
        self.inner.alerts.write().await.replace(snapshot.alerts);
    }

    pub async fn clear(&self) {
        self.inner.market.write().await.clear();
        self.inner.arbitrage.write().await.clear();
        self.inner.whales.write().await.clear();
        self.inner.research.write().await.clear();
        self.inner.content.write().await.clear();
        self.inner.alerts.write().await.clear();
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(StateLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use colony_types::MovementDirection;

    fn snapshot(token: &str, price: f64) -> MarketSnapshot {
        MarketSnapshot {
            token: token.to_string(),
            price_usd: price,
            change_24h: None,
            volume_24h: None,
            source: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn opportunity(pair: &str, profit: f64) -> ArbitrageOpportunity {
        ArbitrageOpportunity {
            pair: pair.to_string(),
            buy_venue: "dex-a".to_string(),
            sell_venue: "dex-b".to_string(),
            buy_price: 100.0,
            sell_price: 100.0 * (1.0 + profit / 100.0),
            profit_pct: profit,
            simulated: false,
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn market_is_latest_wins() {
        let store = StateStore::default();
        store.put_market(snapshot("ETH", 3000.0)).await.unwrap();
        store.put_market(snapshot("ETH", 3100.0)).await.unwrap();
        let current = store.market("ETH").await.unwrap();
        assert_eq!(current.price_usd, 3100.0);
        assert_eq!(store.market_all().await.len(), 1);
    }

    #[tokio::test]
    async fn market_rejects_bad_schema() {
        let store = StateStore::default();
        let err = store.put_market(snapshot("", 1.0)).await.unwrap_err();
        assert_eq!(err.kind(), "state_overflow");
        let err = store.put_market(snapshot("ETH", -5.0)).await.unwrap_err();
        assert_eq!(err.kind(), "state_overflow");
    }

    #[tokio::test]
    async fn arbitrage_evicts_lowest_profit() {
        let store = StateStore::new(StateLimits {
            arbitrage: 3,
            ..StateLimits::default()
        });
        store.add_arbitrage(opportunity("ETH/USDC", 2.0)).await;
        store.add_arbitrage(opportunity("STRK/USDC", 0.5)).await;
        store.add_arbitrage(opportunity("BTC/USDC", 4.0)).await;
        store.add_arbitrage(opportunity("SOL/USDC", 1.0)).await;
        let items = store.arbitrage(None).await;
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|o| o.pair != "STRK/USDC"));
        // Sorted most profitable first.
        assert_eq!(items[0].pair, "BTC/USDC");
    }

    #[tokio::test]
    async fn bounded_insert_caps_cardinality() {
        let store = StateStore::new(StateLimits {
            whales: 5,
            ..StateLimits::default()
        });
        for i in 0..20 {
            store
                .add_whale(WhaleMovement {
                    tx_hash: format!("0x{i:02x}"),
                    token: "ETH".to_string(),
                    amount: 100.0,
                    amount_usd: 300_000.0,
                    direction: MovementDirection::Inflow,
                    address: "0xabc".to_string(),
                    observed_at: Utc::now(),
                })
                .await;
        }
        assert_eq!(store.whales(None).await.len(), 5);
        // Newest survive.
        assert_eq!(store.whales(Some(1)).await[0].tx_hash, "0x13");
    }

    #[tokio::test]
    async fn subscriber_sees_insert_not_eviction() {
        let store = StateStore::new(StateLimits {
            whales: 1,
            ..StateLimits::default()
        });
        let mut sub = store.subscribe_whales().await;
        for i in 0..2 {
            store
                .add_whale(WhaleMovement {
                    tx_hash: format!("0x{i}"),
                    token: "ETH".to_string(),
                    amount: 1.0,
                    amount_usd: 1.0,
                    direction: MovementDirection::Transfer,
                    address: "0x0".to_string(),
                    observed_at: Utc::now(),
                })
                .await;
        }
        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        // Two inserts, two notifications, strictly increasing revisions.
        assert_eq!(first.entry.tx_hash, "0x0");
        assert_eq!(second.entry.tx_hash, "0x1");
        assert!(first.revision < second.revision);
    }

    #[tokio::test]
    async fn alert_predicate_filters_subscription() {
        let store = StateStore::default();
        let mut sub = store
            .subscribe_alerts(Some(Box::new(|a: &Alert| {
                a.severity >= AlertSeverity::Error
            })))
            .await;
        store
            .add_alert("noise", serde_json::json!({}), AlertSeverity::Info)
            .await;
        store
            .add_alert("agent_error", serde_json::json!({}), AlertSeverity::Error)
            .await;
        let seen = sub.next().await.unwrap();
        assert_eq!(seen.entry.kind, "agent_error");
    }
}
