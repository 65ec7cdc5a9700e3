//! Core swarm run type definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a swarm run.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output. Checkpoints are keyed by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new unique session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Phases of a swarm run.
///
/// 1. Decomposing - turn the goal into a task list
/// 2. Scheduling - build the task graph and assign waves
/// 3. Planning - optional plan pass before execution
/// 4. Executing - dispatch waves of ready tasks
/// 5. Reviewing - optional review after each wave
/// 6. Verifying - optional verification of the finished graph
/// 7. Synthesizing - assemble the outcome
/// 8. Completed / Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmPhase {
    Decomposing,
    Scheduling,
    Planning,
    Executing,
    Reviewing,
    Verifying,
    Synthesizing,
    Completed,
    Failed,
}

impl SwarmPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwarmPhase::Completed | SwarmPhase::Failed)
    }
}

impl std::fmt::Display for SwarmPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwarmPhase::Decomposing => write!(f, "decomposing"),
            SwarmPhase::Scheduling => write!(f, "scheduling"),
            SwarmPhase::Planning => write!(f, "planning"),
            SwarmPhase::Executing => write!(f, "executing"),
            SwarmPhase::Reviewing => write!(f, "reviewing"),
            SwarmPhase::Verifying => write!(f, "verifying"),
            SwarmPhase::Synthesizing => write!(f, "synthesizing"),
            SwarmPhase::Completed => write!(f, "completed"),
            SwarmPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Final status of a swarm run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    /// Run still in progress
    #[default]
    Running,
    /// Every task completed
    Completed,
    /// Some tasks finished but not all of them
    Partial,
    /// Run aborted or nothing completed
    Failed,
}

impl std::fmt::Display for SwarmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwarmStatus::Running => write!(f, "running"),
            SwarmStatus::Completed => write!(f, "completed"),
            SwarmStatus::Partial => write!(f, "partial"),
            SwarmStatus::Failed => write!(f, "failed"),
        }
    }
}
