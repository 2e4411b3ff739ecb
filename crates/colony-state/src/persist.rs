use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use colony_types::{
    Alert, ArbitrageOpportunity, ContentPiece, MarketSnapshot, ResearchReport, WhaleMovement,
};

pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Serialised form of the whole store: one JSON document, one key per
/// collection. Schema changes require a wipe, not a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub market: HashMap<String, MarketSnapshot>,
    #[serde(default)]
    pub arbitrage: Vec<ArbitrageOpportunity>,
    #[serde(default)]
    pub whales: Vec<WhaleMovement>,
    #[serde(default)]
    pub research: Vec<ResearchReport>,
    #[serde(default)]
    pub content: Vec<ContentPiece>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

impl StateSnapshot {
    pub(crate) fn capture(
        market: HashMap<String, MarketSnapshot>,
        arbitrage: Vec<ArbitrageOpportunity>,
        whales: Vec<WhaleMovement>,
        research: Vec<ResearchReport>,
        content: Vec<ContentPiece>,
        alerts: Vec<Alert>,
    ) -> Self {
        Self {
            version: STATE_SCHEMA_VERSION,
            saved_at: Utc::now(),
            market,
            arbitrage,
            whales,
            research,
            content,
            alerts,
        }
    }
}

pub(crate) enum LoadOutcome {
    Loaded(StateSnapshot),
    Missing,
    Malformed(String),
    UnsupportedVersion(u32),
}

/// Write atomically: serialise to `<path>.tmp`, then rename over the target.
pub(crate) async fn write_snapshot(path: &Path, snapshot: &StateSnapshot) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

pub(crate) async fn read_snapshot(path: &Path) -> LoadOutcome {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(err) => return LoadOutcome::Malformed(err.to_string()),
    };
    match serde_json::from_slice::<StateSnapshot>(&bytes) {
        Ok(snapshot) if snapshot.version == STATE_SCHEMA_VERSION => LoadOutcome::Loaded(snapshot),
        Ok(snapshot) => LoadOutcome::UnsupportedVersion(snapshot.version),
        Err(err) => LoadOutcome::Malformed(err.to_string()),
    }
}
