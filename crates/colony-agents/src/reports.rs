//! Report writers. The scheduler invokes these on fixed intervals; each
//! tick assembles one JSON document from shared-state reads and writes it
//! under the reports directory.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;
use tracing::info;

use colony_core::ScheduleTask;
use colony_state::StateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Market,
    Whale,
    Content,
    Research,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::Market => "market",
            ReportKind::Whale => "whale",
            ReportKind::Content => "content",
            ReportKind::Research => "research",
        }
    }
}

/// Build a schedule task that writes one `{kind}_{timestamp}.json` per
/// invocation.
pub fn report_task(kind: ReportKind, state: StateStore, dir: PathBuf) -> ScheduleTask {
    std::sync::Arc::new(move |_cancel| {
        let state = state.clone();
        let dir = dir.clone();
        Box::pin(async move { write_report(kind, &state, &dir).await })
    })
}

async fn write_report(kind: ReportKind, state: &StateStore, dir: &PathBuf) -> anyhow::Result<()> {
    let data = match kind {
        ReportKind::Market => {
            let prices = state.market_all().await;
            let arbitrage = state.arbitrage(Some(10)).await;
            json!({ "prices": prices, "arbitrage": arbitrage })
        }
        ReportKind::Whale => {
            let movements = state.whales(Some(20)).await;
            json!({ "movements": movements })
        }
        ReportKind::Content => {
            let pieces = state.content(Some(10)).await;
            json!({ "content": pieces })
        }
        ReportKind::Research => {
            let reports = state.research(Some(5)).await;
            json!({ "reports": reports })
        }
    };

    let now = Utc::now();
    let document = json!({
        "type": kind.as_str(),
        "timestamp": now.to_rfc3339(),
        "data": data,
    });

    tokio::fs::create_dir_all(dir).await?;
    let filename = format!("{}_{}.json", kind.as_str(), now.format("%Y%m%d_%H%M%S"));
    let path = dir.join(filename);
    tokio::fs::write(&path, serde_json::to_vec_pretty(&document)?).await?;
    info!(report = kind.as_str(), path = %path.display(), "report written");
    Ok(())
}
