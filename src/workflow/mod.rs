//! Swarm run lifecycle types.
//!
//! This module provides the session identifier, the run phases and the
//! phase machine that validates transitions between them.

mod state;
mod types;

pub use state::{PhaseHistoryEntry, PhaseMachine};
pub use types::{SessionId, SwarmPhase, SwarmStatus};
