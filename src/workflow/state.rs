//! Swarm phase state with transition validation.
//!
//! `PhaseMachine` tracks the current phase of a swarm run and enforces the
//! legal transitions between phases, keeping a timestamped history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::SwarmPhase;

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    /// The phase that was entered.
    pub phase: SwarmPhase,
    /// When this phase was entered.
    pub entered_at: DateTime<Utc>,
}

/// Tracks the phase of a swarm run and enforces valid transitions.
///
/// Decomposing -> Scheduling -> [Planning] -> Executing <-> Reviewing ->
/// [Verifying] -> Synthesizing -> Completed | Failed
///
/// Any non-terminal phase may move to Failed. Verifying may go back to
/// Executing when it adds fix-up tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMachine {
    current: SwarmPhase,
    history: Vec<PhaseHistoryEntry>,
}

impl PhaseMachine {
    /// Start a machine in the decomposing phase.
    pub fn new() -> Self {
        Self::starting_at(SwarmPhase::Decomposing)
    }

    /// Start a machine at an arbitrary phase, e.g. when resuming a checkpoint.
    pub fn starting_at(phase: SwarmPhase) -> Self {
        Self {
            current: phase,
            history: vec![PhaseHistoryEntry {
                phase,
                entered_at: Utc::now(),
            }],
        }
    }

    /// Check if a transition to the target phase is valid from the current phase.
    pub fn can_transition(&self, target: SwarmPhase) -> bool {
        use SwarmPhase::*;
        if self.current.is_terminal() {
            return false;
        }
        if target == Failed {
            return true;
        }
        matches!(
            (self.current, target),
            (Decomposing, Scheduling)
                | (Scheduling, Planning)
                | (Scheduling, Executing)
                | (Planning, Executing)
                | (Executing, Reviewing)
                | (Executing, Verifying)
                | (Executing, Synthesizing)
                | (Reviewing, Executing)
                | (Reviewing, Verifying)
                | (Reviewing, Synthesizing)
                | (Verifying, Executing)
                | (Verifying, Synthesizing)
                | (Synthesizing, Completed)
        )
    }

    /// Move to a new phase.
    ///
    /// Returns an error if the transition is not allowed from the current phase.
    pub fn transition(&mut self, target: SwarmPhase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }

        self.current = target;
        self.history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });

        Ok(())
    }

    pub fn current(&self) -> SwarmPhase {
        self.current
    }

    /// Get the history of all phases visited, in order.
    pub fn history(&self) -> &[PhaseHistoryEntry] {
        &self.history
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
