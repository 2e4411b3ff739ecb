use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use colony_dispatch::Dispatcher;
use colony_state::StateStore;
use colony_types::{ColonyResult, RoutingDecision, SkillProfile};

use crate::tool_loop::ToolLoop;

/// Capability handles a skill receives per call. No globals: everything a
/// skill may touch arrives here.
#[derive(Clone)]
pub struct SkillContext {
    pub state: StateStore,
    pub dispatcher: Dispatcher,
    pub tool_loop: ToolLoop,
    pub cancel: CancellationToken,
}

/// The contract every request-handling skill implements. `handle` must be
/// reentrant; the runtime may call it concurrently for different messages
/// unless the skill serialises internally.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn profile(&self) -> SkillProfile;
    async fn handle(&self, decision: &RoutingDecision, ctx: &SkillContext)
        -> ColonyResult<String>;
}

/// Convenience alias used by registries and the facade.
pub type SkillHandle = Arc<dyn Skill>;
