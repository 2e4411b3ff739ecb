use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent lifecycle states. `Stopped` is re-entrant; there is no terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Stopped,
    Starting,
    Running,
    Paused,
    Error,
    Stopping,
}

impl AgentState {
    /// True while the agent holds a live task (one active lifecycle phase).
    pub fn is_active(self) -> bool {
        matches!(self, AgentState::Starting | AgentState::Running)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Stopped => "stopped",
            AgentState::Starting => "starting",
            AgentState::Running => "running",
            AgentState::Paused => "paused",
            AgentState::Error => "error",
            AgentState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Point-in-time status snapshot the supervisor reports for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub state: AgentState,
    pub run_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub autorestart: bool,
    /// Set when a stop had to abandon the task after the grace period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}
