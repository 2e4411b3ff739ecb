use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Future;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use colony_state::StateStore;
use colony_types::{AlertSeverity, ColonyError, ColonyResult};

/// A recurring task body. Receives the tick's cancellation scope; honoring
/// it promptly is what keeps the schedule on time.
pub type ScheduleTask = Arc<
    dyn Fn(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub name: String,
    pub interval_secs: u64,
    pub enabled: bool,
    pub runs: u64,
    pub lag_count: u64,
    pub miss_count: u64,
    pub last_run: Option<DateTime<Utc>>,
}

struct ScheduleEntry {
    interval: Duration,
    enabled: bool,
    runs: u64,
    lag_count: u64,
    miss_count: u64,
    last_run: Option<DateTime<Utc>>,
    scope: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    schedules: RwLock<HashMap<String, ScheduleEntry>>,
    store: StateStore,
    root: CancellationToken,
    grace: Duration,
}

/// Drives declarative recurring tasks. Invocations of one schedule never
/// overlap: a tick that arrives while the previous invocation is still
/// running is skipped and counted as lag.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(store: StateStore, root: CancellationToken, grace: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                schedules: RwLock::new(HashMap::new()),
                store,
                root,
                grace,
            }),
        }
    }

    /// Register and start a recurring task. The first invocation happens
    /// immediately; each subsequent one `interval` after the previous tick.
    pub async fn schedule(
        &self,
        name: &str,
        interval: Duration,
        task: ScheduleTask,
    ) -> ColonyResult<()> {
        if interval.is_zero() {
            return Err(ColonyError::Fatal(format!(
                "schedule `{name}` has zero interval"
            )));
        }
        let mut schedules = self.inner.schedules.write().await;
        if schedules.contains_key(name) {
            return Err(ColonyError::Fatal(format!(
                "duplicate schedule registration: {name}"
            )));
        }

        let scope = self.inner.root.child_token();
        let handle = tokio::spawn(run_schedule(
            self.inner.clone(),
            name.to_string(),
            interval,
            task,
            scope.clone(),
        ));
        schedules.insert(
            name.to_string(),
            ScheduleEntry {
                interval,
                enabled: true,
                runs: 0,
                lag_count: 0,
                miss_count: 0,
                last_run: None,
                scope,
                handle: Some(handle),
            },
        );
        info!(schedule = name, interval_secs = interval.as_secs(), "schedule registered");
        Ok(())
    }

    pub async fn list(&self) -> Vec<ScheduleStatus> {
        let schedules = self.inner.schedules.read().await;
        let mut statuses: Vec<ScheduleStatus> = schedules
            .iter()
            .map(|(name, e)| ScheduleStatus {
                name: name.clone(),
                interval_secs: e.interval.as_secs(),
                enabled: e.enabled,
                runs: e.runs,
                lag_count: e.lag_count,
                miss_count: e.miss_count,
                last_run: e.last_run,
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Cancel every schedule scope, then give in-flight invocations the
    /// grace period before abandoning them.
    pub async fn stop_all(&self) {
        let entries: Vec<(String, CancellationToken, Option<JoinHandle<()>>)> = {
            let mut schedules = self.inner.schedules.write().await;
            schedules
                .iter_mut()
                .map(|(name, e)| {
                    e.enabled = false;
                    (name.clone(), e.scope.clone(), e.handle.take())
                })
                .collect()
        };
        for (_, scope, _) in &entries {
            scope.cancel();
        }
        for (name, _, handle) in entries {
            let Some(handle) = handle else { continue };
            if tokio::time::timeout(self.inner.grace, handle).await.is_err() {
                warn!(schedule = %name, "grace expired, schedule loop abandoned");
            }
        }
    }
}

async fn run_schedule(
    inner: Arc<SchedulerInner>,
    name: String,
    interval: Duration,
    task: ScheduleTask,
    scope: CancellationToken,
) {
    // A tick always ends before the next one would start.
    let epsilon = (interval / 20).max(Duration::from_millis(50)).min(interval / 2);
    let deadline = interval - epsilon;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut in_flight: Option<JoinHandle<()>> = None;
    loop {
        tokio::select! {
            _ = scope.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Some(handle) = &in_flight {
            if !handle.is_finished() {
                // Previous invocation still running: skip this tick.
                {
                    let mut schedules = inner.schedules.write().await;
                    if let Some(entry) = schedules.get_mut(&name) {
                        entry.lag_count += 1;
                    }
                }
                inner
                    .store
                    .add_alert(
                        "schedule_lag",
                        json!({ "schedule": name }),
                        AlertSeverity::Warning,
                    )
                    .await;
                warn!(schedule = %name, "tick skipped, previous invocation still running");
                continue;
            }
        }

        {
            let mut schedules = inner.schedules.write().await;
            if let Some(entry) = schedules.get_mut(&name) {
                entry.runs += 1;
                entry.last_run = Some(Utc::now());
            }
        }

        let tick_scope = scope.child_token();
        let mut fut = task(tick_scope.clone());
        let tick_inner = inner.clone();
        let tick_name = name.clone();
        in_flight = Some(tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = &mut fut => Some(outcome),
                _ = tokio::time::sleep(deadline) => None,
            };
            let outcome = match outcome {
                Some(outcome) => outcome,
                None => {
                    // Deadline hit: cancel the scope so a cooperative task
                    // unwinds, record the miss, then wait the task out. The
                    // busy slot stays occupied until it actually returns.
                    tick_scope.cancel();
                    {
                        let mut schedules = tick_inner.schedules.write().await;
                        if let Some(entry) = schedules.get_mut(&tick_name) {
                            entry.miss_count += 1;
                        }
                    }
                    warn!(schedule = %tick_name, "invocation exceeded its deadline");
                    fut.await
                }
            };
            if let Err(err) = outcome {
                tick_inner
                    .store
                    .add_alert(
                        "report_error",
                        json!({ "schedule": tick_name, "error": format!("{err:#}") }),
                        AlertSeverity::Error,
                    )
                    .await;
            }
        }));
    }

    // Scope cancelled: wait briefly for the in-flight invocation.
    if let Some(handle) = in_flight {
        let _ = tokio::time::timeout(inner.grace, handle).await;
    }
}
