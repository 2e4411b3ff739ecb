use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use colony_dispatch::Dispatcher;
use colony_router::Router;
use colony_state::StateStore;
use colony_types::{
    ColonyError, ColonyResult, Diagnostics, GatewayResponse, InboundMessage, RoutingDecision,
    GENERAL_SKILL,
};

use crate::config::Config;
use crate::ratelimit::RateLimiter;
use crate::scheduler::Scheduler;
use crate::skill::{SkillContext, SkillHandle};
use crate::supervisor::Supervisor;
use crate::tool_loop::ToolLoop;

/// Wires router, skills, supervisor, scheduler, state and dispatcher into
/// the single outward surface: `handle`, `run_forever`, `shutdown`.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

struct OrchestratorInner {
    router: Router,
    skills: HashMap<String, SkillHandle>,
    supervisor: Supervisor,
    scheduler: Scheduler,
    state: StateStore,
    dispatcher: Dispatcher,
    tool_loop: ToolLoop,
    rate_limiter: RateLimiter,
    config: Config,
    root: CancellationToken,
    shutdown_started: AtomicBool,
}

impl Orchestrator {
    /// Build from registered skills. The router only ever emits names drawn
    /// from this set, so an unknown skill at dispatch time is impossible by
    /// construction; that requires a registered `general` skill.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        skills: Vec<SkillHandle>,
        supervisor: Supervisor,
        scheduler: Scheduler,
        state: StateStore,
        dispatcher: Dispatcher,
        tool_loop: ToolLoop,
        config: Config,
        root: CancellationToken,
    ) -> ColonyResult<Self> {
        let mut by_name = HashMap::new();
        let mut profiles = Vec::new();
        for skill in skills {
            let name = skill.name().to_string();
            if by_name.insert(name.clone(), skill.clone()).is_some() {
                return Err(ColonyError::Fatal(format!(
                    "duplicate skill registration: {name}"
                )));
            }
            // The general skill is the routing default, not a scored
            // candidate.
            if name != GENERAL_SKILL {
                profiles.push(skill.profile());
            }
        }
        if !by_name.contains_key(GENERAL_SKILL) {
            return Err(ColonyError::Fatal(
                "no `general` skill registered".to_string(),
            ));
        }

        let router = Router::new(profiles)?;
        let rate_limiter = RateLimiter::per_minute(config.rate_limit_per_minute);
        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                router,
                skills: by_name,
                supervisor,
                scheduler,
                state,
                dispatcher,
                tool_loop,
                rate_limiter,
                config,
                root,
                shutdown_started: AtomicBool::new(false),
            }),
        })
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn state(&self) -> &StateStore {
        &self.inner.state
    }

    pub fn root_token(&self) -> &CancellationToken {
        &self.inner.root
    }

    /// Route without dispatching; the CLI's `route --test` surface.
    pub fn route(&self, message: &InboundMessage) -> RoutingDecision {
        self.inner.router.route(message)
    }

    /// The synchronous public entry: rate-check, route, dispatch to the
    /// winning skill, translate failures into the envelope. Over-cap
    /// messages are refused before the router ever sees them.
    pub async fn handle(&self, message: InboundMessage) -> GatewayResponse {
        let started = Instant::now();

        if let Some(user) = &message.user_id {
            if let Err(err) = self.inner.rate_limiter.check(user) {
                return GatewayResponse::from_error(&err, "facade");
            }
        }

        let decision = self.inner.router.route(&message);
        let ctx = SkillContext {
            state: self.inner.state.clone(),
            dispatcher: self.inner.dispatcher.clone(),
            tool_loop: self.inner.tool_loop.clone(),
            cancel: self.inner.root.child_token(),
        };

        match self.dispatch_to_skill(&decision, &ctx).await {
            Ok((body, skill)) => GatewayResponse::ok(
                body,
                Diagnostics {
                    skill: Some(skill),
                    confidence: Some(decision.confidence),
                    reasoning: Some(decision.reasoning.clone()),
                    latency_ms: Some(started.elapsed().as_millis() as u64),
                    ..Diagnostics::default()
                },
            ),
            Err((err, component)) => {
                let mut resp = GatewayResponse::from_error(&err, &component);
                resp.diagnostics.skill = Some(decision.skill.clone());
                resp.diagnostics.latency_ms = Some(started.elapsed().as_millis() as u64);
                resp
            }
        }
    }

    /// Try the routed skill; on a recoverable failure fall back once to the
    /// router's runner-up.
    async fn dispatch_to_skill(
        &self,
        decision: &RoutingDecision,
        ctx: &SkillContext,
    ) -> Result<(String, String), (ColonyError, String)> {
        let skill = self
            .inner
            .skills
            .get(&decision.skill)
            .ok_or_else(|| {
                (
                    ColonyError::NotFound(format!("skill `{}`", decision.skill)),
                    "facade".to_string(),
                )
            })?;

        match skill.handle(decision, ctx).await {
            Ok(body) => Ok((body, decision.skill.clone())),
            Err(ColonyError::Cancelled) => {
                Err((ColonyError::Cancelled, decision.skill.clone()))
            }
            Err(err @ ColonyError::RateLimited { .. }) => Err((err, decision.skill.clone())),
            Err(primary_err) => {
                // Runner-up first, then the reserved general skill; the
                // original error is what surfaces if neither helps.
                let mut candidates: Vec<&str> =
                    decision.fallback.as_deref().into_iter().collect();
                if decision.skill != GENERAL_SKILL {
                    candidates.push(GENERAL_SKILL);
                }
                for name in candidates {
                    let Some(fallback) = self.inner.skills.get(name) else {
                        continue;
                    };
                    warn!(
                        skill = %decision.skill,
                        fallback = name,
                        error = %primary_err,
                        "primary skill failed, trying fallback"
                    );
                    if let Ok(body) = fallback.handle(decision, ctx).await {
                        return Ok((body, name.to_string()));
                    }
                }
                Err((primary_err, decision.skill.clone()))
            }
        }
    }

    /// Start agents, leave schedules running, block until the root scope is
    /// cancelled, then shut down in order.
    pub async fn run_forever(&self) -> ColonyResult<()> {
        self.inner.state.load(&self.inner.config.state_file).await.map_err(|e| {
            ColonyError::Transient(format!("state load failed: {e:#}"))
        })?;
        self.inner.supervisor.start_all().await?;
        info!("orchestrator running");
        self.inner.root.cancelled().await;
        self.shutdown().await;
        Ok(())
    }

    /// Ordered, idempotent shutdown: schedules → agents → state flush. A
    /// second call is a no-op.
    pub async fn shutdown(&self) {
        if self.inner.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutdown: stopping schedules");
        self.inner.scheduler.stop_all().await;
        info!("shutdown: stopping agents");
        self.inner.supervisor.stop_all().await;
        self.inner
            .supervisor
            .await_all(self.inner.config.shutdown_grace)
            .await;
        info!("shutdown: flushing state");
        if let Err(err) = self.inner.state.save(&self.inner.config.state_file).await {
            warn!(%err, "state flush failed during shutdown");
        }
        self.inner.root.cancel();
        info!("shutdown complete");
    }
}
