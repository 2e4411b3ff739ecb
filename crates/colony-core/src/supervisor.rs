use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use colony_state::StateStore;
use colony_types::{AgentState, AgentStatus, AlertSeverity, ColonyError, ColonyResult};

use crate::scope::sleep_until_cancelled;

/// A long-lived worker. `run` should loop until the token fires and release
/// its resources on every exit path; returning early is a normal stop,
/// returning an error puts the agent in quarantine-eligible Error state.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long `stop` waits for an agent to unwind before abandoning it.
    pub grace: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Failures within `breaker_window` that disable auto-restart.
    pub breaker_threshold: usize,
    pub breaker_window: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            breaker_threshold: 5,
            breaker_window: Duration::from_secs(60),
        }
    }
}

struct AgentEntry {
    agent: Arc<dyn Agent>,
    autorestart: bool,
    state: AgentState,
    run_count: u64,
    last_error: Option<String>,
    last_run: Option<chrono::DateTime<Utc>>,
    note: Option<String>,
    scope: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
    failures: VecDeque<Instant>,
    breaker_open: bool,
}

impl AgentEntry {
    fn status(&self, name: &str) -> AgentStatus {
        AgentStatus {
            name: name.to_string(),
            state: self.state,
            run_count: self.run_count,
            last_error: self.last_error.clone(),
            last_run: self.last_run,
            autorestart: self.autorestart,
            note: self.note.clone(),
        }
    }
}

struct SupervisorInner {
    entries: RwLock<HashMap<String, AgentEntry>>,
    store: StateStore,
    config: SupervisorConfig,
    root: CancellationToken,
}

/// Owns every agent handle from registration until the agent observably
/// reaches Stopped or Error. Crashes are isolated: a panicking agent is
/// quarantined, never its peers or the supervisor itself.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    pub fn new(store: StateStore, root: CancellationToken, config: SupervisorConfig) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                entries: RwLock::new(HashMap::new()),
                store,
                config,
                root,
            }),
        }
    }

    pub async fn register(
        &self,
        agent: Arc<dyn Agent>,
        autorestart: bool,
    ) -> ColonyResult<()> {
        let name = agent.name().to_string();
        let mut entries = self.inner.entries.write().await;
        if entries.contains_key(&name) {
            return Err(ColonyError::Fatal(format!(
                "duplicate agent registration: {name}"
            )));
        }
        entries.insert(
            name.clone(),
            AgentEntry {
                agent,
                autorestart,
                state: AgentState::Stopped,
                run_count: 0,
                last_error: None,
                last_run: None,
                note: None,
                scope: None,
                handle: None,
                failures: VecDeque::new(),
                breaker_open: false,
            },
        );
        info!(agent = %name, autorestart, "agent registered");
        Ok(())
    }

    /// Stopped → Starting → Running. Starting an already-active agent is a
    /// warned no-op. An operator start also resets an open restart breaker.
    pub async fn start(&self, name: &str) -> ColonyResult<()> {
        let mut entries = self.inner.entries.write().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| ColonyError::NotFound(format!("agent `{name}`")))?;
        if entry.state.is_active() {
            warn!(agent = name, state = %entry.state, "start ignored, agent already active");
            return Ok(());
        }
        entry.breaker_open = false;
        entry.failures.clear();
        spawn_run(&self.inner, name, entry);
        Ok(())
    }

    pub async fn start_all(&self) -> ColonyResult<()> {
        let names: Vec<String> = self.inner.entries.read().await.keys().cloned().collect();
        for name in names {
            self.start(&name).await?;
        }
        Ok(())
    }

    /// Cancel the agent's scope and wait up to the grace period; a task that
    /// will not unwind is abandoned and the agent marked Stopped with a
    /// `force_killed` note.
    pub async fn stop(&self, name: &str) -> ColonyResult<()> {
        self.halt(name, AgentState::Stopped).await
    }

    /// `stop` without clearing the intent to resume.
    pub async fn pause(&self, name: &str) -> ColonyResult<()> {
        self.halt(name, AgentState::Paused).await
    }

    /// Start a fresh scope for a paused agent.
    pub async fn resume(&self, name: &str) -> ColonyResult<()> {
        let mut entries = self.inner.entries.write().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| ColonyError::NotFound(format!("agent `{name}`")))?;
        if entry.state != AgentState::Paused {
            warn!(agent = name, state = %entry.state, "resume ignored, agent not paused");
            return Ok(());
        }
        spawn_run(&self.inner, name, entry);
        Ok(())
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.inner.entries.read().await.keys().cloned().collect();
        for name in names {
            if let Err(err) = self.stop(&name).await {
                warn!(agent = %name, %err, "stop_all: failed to stop agent");
            }
        }
    }

    pub async fn status(&self, name: &str) -> Option<AgentStatus> {
        self.inner
            .entries
            .read()
            .await
            .get(name)
            .map(|e| e.status(name))
    }

    pub async fn status_all(&self) -> Vec<AgentStatus> {
        let entries = self.inner.entries.read().await;
        let mut statuses: Vec<AgentStatus> =
            entries.iter().map(|(n, e)| e.status(n)).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Block until no agent holds a live task, or the deadline elapses.
    /// Returns true when everything is idle.
    pub async fn await_all(&self, deadline: Duration) -> bool {
        let started = Instant::now();
        loop {
            if !self.any_active().await {
                return true;
            }
            if started.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn any_active(&self) -> bool {
        self.inner
            .entries
            .read()
            .await
            .values()
            .any(|e| e.state.is_active() || e.state == AgentState::Stopping)
    }

    async fn halt(&self, name: &str, terminal: AgentState) -> ColonyResult<()> {
        let (handle, scope) = {
            let mut entries = self.inner.entries.write().await;
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| ColonyError::NotFound(format!("agent `{name}`")))?;
            let Some(handle) = entry.handle.take() else {
                if terminal == AgentState::Paused && entry.state == AgentState::Stopped {
                    entry.state = AgentState::Paused;
                }
                return Ok(());
            };
            entry.state = AgentState::Stopping;
            (handle, entry.scope.take())
        };

        if let Some(scope) = scope {
            scope.cancel();
        }

        let force_killed = match tokio::time::timeout(self.inner.config.grace, handle).await {
            Ok(_) => false,
            Err(_) => true,
        };

        let mut entries = self.inner.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.state = terminal;
            if force_killed {
                entry.note = Some("force_killed".to_string());
                warn!(agent = name, "grace expired, task abandoned");
            }
        }
        Ok(())
    }
}

/// Transition to Starting and spawn the run wrapper. Caller holds the
/// entries write lock.
fn spawn_run(inner: &Arc<SupervisorInner>, name: &str, entry: &mut AgentEntry) {
    entry.state = AgentState::Starting;
    entry.note = None;
    let scope = inner.root.child_token();
    entry.scope = Some(scope.clone());
    let handle = tokio::spawn(run_agent(
        inner.clone(),
        name.to_string(),
        entry.agent.clone(),
        scope,
    ));
    entry.handle = Some(handle);
    info!(agent = name, "agent starting");
}

async fn run_agent(
    inner: Arc<SupervisorInner>,
    name: String,
    agent: Arc<dyn Agent>,
    scope: CancellationToken,
) {
    {
        let mut entries = inner.entries.write().await;
        if let Some(entry) = entries.get_mut(&name) {
            entry.state = AgentState::Running;
            entry.run_count += 1;
            entry.last_run = Some(Utc::now());
        }
    }

    let outcome = std::panic::AssertUnwindSafe(agent.run(scope.clone()))
        .catch_unwind()
        .await;

    let failure: Option<String> = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) if scope.is_cancelled() => {
            // Cooperative unwind during stop; not a failure.
            info!(agent = %name, %err, "agent exited during cancellation");
            None
        }
        Ok(Err(err)) => Some(format!("{err:#}")),
        Err(panic) => Some(format!("panic: {}", panic_message(&panic))),
    };

    let mut restart_after: Option<Duration> = None;
    {
        let mut entries = inner.entries.write().await;
        if let Some(entry) = entries.get_mut(&name) {
            match &failure {
                None => {
                    // Leave Stopping/Paused transitions to the halt path.
                    if entry.state == AgentState::Running {
                        entry.state = AgentState::Stopped;
                    }
                    info!(agent = %name, "agent stopped");
                }
                Some(message) => {
                    entry.state = AgentState::Error;
                    entry.last_error = Some(message.clone());
                    error!(agent = %name, error = %message, "agent failed");

                    let now = Instant::now();
                    entry.failures.push_back(now);
                    while let Some(first) = entry.failures.front() {
                        if now.duration_since(*first) > inner.config.breaker_window {
                            entry.failures.pop_front();
                        } else {
                            break;
                        }
                    }

                    if entry.autorestart && !entry.breaker_open {
                        if entry.failures.len() >= inner.config.breaker_threshold {
                            entry.breaker_open = true;
                            warn!(agent = %name, "failure burst, auto-restart disabled");
                        } else {
                            let exponent = entry.failures.len().saturating_sub(1).min(16) as u32;
                            let backoff = inner
                                .config
                                .backoff_base
                                .saturating_mul(2u32.saturating_pow(exponent))
                                .min(inner.config.backoff_cap);
                            restart_after = Some(backoff);
                        }
                    }
                }
            }
        }
    }

    if let Some(message) = &failure {
        inner
            .store
            .add_alert(
                "agent_error",
                json!({ "agent": name, "error": message }),
                AlertSeverity::Error,
            )
            .await;
        if restart_after.is_none() {
            let quarantined = {
                let entries = inner.entries.read().await;
                entries.get(&name).map(|e| e.breaker_open).unwrap_or(false)
            };
            if quarantined {
                inner
                    .store
                    .add_alert(
                        "agent_quarantined",
                        json!({ "agent": name }),
                        AlertSeverity::Critical,
                    )
                    .await;
            }
        }
    }


    if let Some(backoff) = restart_after {
        let restart_inner = inner.clone();
        tokio::spawn(async move {
            if sleep_until_cancelled(&restart_inner.root, backoff)
                .await
                .is_err()
            {
                return;
            }
            let mut entries = restart_inner.entries.write().await;
            if let Some(entry) = entries.get_mut(&name) {
                // Only restart if no operator command intervened.
                if entry.state == AgentState::Error && !entry.breaker_open {
                    info!(agent = %name, backoff_ms = backoff.as_millis() as u64, "auto-restarting agent");
                    spawn_run(&restart_inner, &name, entry);
                }
            }
        });
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn supervisor(config: SupervisorConfig) -> Supervisor {
        Supervisor::new(StateStore::default(), CancellationToken::new(), config)
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            grace: Duration::from_millis(100),
            backoff_base: Duration::from_millis(30),
            backoff_cap: Duration::from_millis(200),
            breaker_threshold: 3,
            breaker_window: Duration::from_secs(60),
        }
    }

    /// Runs until cancelled, ticking a counter.
    struct TickAgent {
        name: String,
        ticks: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Agent for TickAgent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
            loop {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                self.ticks.fetch_add(1, Ordering::SeqCst);
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                }
            }
        }
    }

    /// Fails the first `failures` runs, then runs until cancelled.
    struct FlakyAgent {
        name: String,
        failures: u32,
        runs: Arc<AtomicU32>,
        run_started: Arc<parking_lot::Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            self.run_started.lock().push(Instant::now());
            if run < self.failures {
                anyhow::bail!("tick {} exploded", run + 1);
            }
            cancel.cancelled().await;
            Ok(())
        }
    }

    struct PanicAgent;

    #[async_trait]
    impl Agent for PanicAgent {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn run(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    /// Ignores cancellation entirely.
    struct StubbornAgent;

    #[async_trait]
    impl Agent for StubbornAgent {
        fn name(&self) -> &str {
            "stubborn"
        }

        async fn run(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(())
        }
    }

    async fn wait_for_state(sup: &Supervisor, name: &str, state: AgentState) -> AgentStatus {
        for _ in 0..200 {
            if let Some(status) = sup.status(name).await {
                if status.state == state {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "agent `{name}` never reached {state}, currently {:?}",
            sup.status(name).await
        );
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let sup = supervisor(fast_config());
        let ticks = Arc::new(AtomicU32::new(0));
        sup.register(
            Arc::new(TickAgent {
                name: "ticker".to_string(),
                ticks: ticks.clone(),
            }),
            false,
        )
        .await
        .unwrap();

        sup.start("ticker").await.unwrap();
        wait_for_state(&sup, "ticker", AgentState::Running).await;

        // Second start is a no-op: same run.
        sup.start("ticker").await.unwrap();
        assert_eq!(sup.status("ticker").await.unwrap().run_count, 1);

        sup.stop("ticker").await.unwrap();
        let status = wait_for_state(&sup, "ticker", AgentState::Stopped).await;
        assert!(status.note.is_none());
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn duplicate_registration_is_fatal() {
        let sup = supervisor(fast_config());
        let agent = Arc::new(TickAgent {
            name: "dup".to_string(),
            ticks: Arc::new(AtomicU32::new(0)),
        });
        sup.register(agent.clone(), false).await.unwrap();
        let err = sup.register(agent, false).await.unwrap_err();
        assert_eq!(err.kind(), "fatal");
    }

    #[tokio::test]
    async fn error_restarts_with_backoff_and_alert() {
        let config = fast_config();
        let backoff = config.backoff_base;
        let store = StateStore::default();
        let sup = Supervisor::new(store.clone(), CancellationToken::new(), config);
        let runs = Arc::new(AtomicU32::new(0));
        let run_started = Arc::new(parking_lot::Mutex::new(Vec::new()));
        sup.register(
            Arc::new(FlakyAgent {
                name: "flaky".to_string(),
                failures: 1,
                runs: runs.clone(),
                run_started: run_started.clone(),
            }),
            true,
        )
        .await
        .unwrap();

        sup.start("flaky").await.unwrap();
        let status = wait_for_state(&sup, "flaky", AgentState::Running).await;
        assert_eq!(status.run_count, 2);
        assert!(status.last_error.unwrap().contains("exploded"));

        let starts = run_started.lock().clone();
        assert!(starts[1].duration_since(starts[0]) >= backoff);

        let alerts = store.alerts(None, None).await;
        assert!(alerts.iter().any(|a| a.kind == "agent_error"));
    }

    #[tokio::test]
    async fn failure_burst_opens_breaker_until_operator_start() {
        let sup = supervisor(fast_config());
        let runs = Arc::new(AtomicU32::new(0));
        sup.register(
            Arc::new(FlakyAgent {
                name: "crashy".to_string(),
                failures: u32::MAX,
                runs: runs.clone(),
                run_started: Arc::new(parking_lot::Mutex::new(Vec::new())),
            }),
            true,
        )
        .await
        .unwrap();

        sup.start("crashy").await.unwrap();
        wait_for_state(&sup, "crashy", AgentState::Error).await;
        // Give the breaker time to trip (threshold 3, tiny backoffs).
        tokio::time::sleep(Duration::from_millis(500)).await;
        let count_after_trip = runs.load(Ordering::SeqCst);
        assert!(count_after_trip >= 3);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            runs.load(Ordering::SeqCst),
            count_after_trip,
            "quarantined agent must not restart on its own"
        );
        assert_eq!(
            sup.status("crashy").await.unwrap().state,
            AgentState::Error
        );

        // Operator start resets the breaker and runs it again.
        sup.start("crashy").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(runs.load(Ordering::SeqCst) > count_after_trip);
    }

    #[tokio::test]
    async fn panic_is_quarantined_without_harming_peers() {
        let sup = supervisor(fast_config());
        let ticks = Arc::new(AtomicU32::new(0));
        sup.register(Arc::new(PanicAgent), false).await.unwrap();
        sup.register(
            Arc::new(TickAgent {
                name: "peer".to_string(),
                ticks: ticks.clone(),
            }),
            false,
        )
        .await
        .unwrap();

        sup.start_all().await.unwrap();
        let status = wait_for_state(&sup, "panicky", AgentState::Error).await;
        assert!(status.last_error.unwrap().contains("boom"));

        // Peer keeps running.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sup.status("peer").await.unwrap().state, AgentState::Running);
        sup.stop_all().await;
    }

    #[tokio::test]
    async fn stop_abandons_stubborn_agent_after_grace() {
        let sup = supervisor(fast_config());
        sup.register(Arc::new(StubbornAgent), false).await.unwrap();
        sup.start("stubborn").await.unwrap();
        wait_for_state(&sup, "stubborn", AgentState::Running).await;

        sup.stop("stubborn").await.unwrap();
        let status = sup.status("stubborn").await.unwrap();
        assert_eq!(status.state, AgentState::Stopped);
        assert_eq!(status.note.as_deref(), Some("force_killed"));
    }

    #[tokio::test]
    async fn pause_then_resume_starts_fresh_scope() {
        let sup = supervisor(fast_config());
        let ticks = Arc::new(AtomicU32::new(0));
        sup.register(
            Arc::new(TickAgent {
                name: "pausable".to_string(),
                ticks,
            }),
            false,
        )
        .await
        .unwrap();

        sup.start("pausable").await.unwrap();
        wait_for_state(&sup, "pausable", AgentState::Running).await;
        sup.pause("pausable").await.unwrap();
        assert_eq!(
            sup.status("pausable").await.unwrap().state,
            AgentState::Paused
        );

        sup.resume("pausable").await.unwrap();
        let status = wait_for_state(&sup, "pausable", AgentState::Running).await;
        assert_eq!(status.run_count, 2);
        sup.stop_all().await;
    }

    #[tokio::test]
    async fn await_all_returns_once_agents_exit() {
        let sup = supervisor(fast_config());
        let ticks = Arc::new(AtomicU32::new(0));
        sup.register(
            Arc::new(TickAgent {
                name: "worker".to_string(),
                ticks,
            }),
            false,
        )
        .await
        .unwrap();
        sup.start("worker").await.unwrap();
        wait_for_state(&sup, "worker", AgentState::Running).await;

        let sup2 = sup.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            sup2.stop_all().await;
        });
        assert!(sup.await_all(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn never_both_running_and_paused() {
        let sup = supervisor(fast_config());
        let ticks = Arc::new(AtomicU32::new(0));
        sup.register(
            Arc::new(TickAgent {
                name: "single".to_string(),
                ticks,
            }),
            false,
        )
        .await
        .unwrap();
        sup.start("single").await.unwrap();
        for _ in 0..20 {
            let statuses = sup.status_all().await;
            let active = statuses
                .iter()
                .filter(|s| s.state.is_active() || s.state == AgentState::Paused)
                .count();
            assert!(active <= 1);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sup.stop_all().await;
    }
}
