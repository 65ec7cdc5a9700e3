//! Lifecycle events emitted during a swarm run.
//!
//! Events go out over an unbounded channel so emission never blocks the
//! control loop. Nothing in the orchestrator depends on a subscriber being
//! attached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::task::{FailureMode, TaskId};
use crate::workflow::{SessionId, SwarmPhase};

/// One entry in the orchestrator's decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub at: DateTime<Utc>,
    pub wave: u32,
    pub phase: SwarmPhase,
    pub decision: String,
    pub reasoning: String,
}

impl DecisionRecord {
    pub fn new(wave: u32, phase: SwarmPhase, decision: &str, reasoning: &str) -> Self {
        Self {
            at: Utc::now(),
            wave,
            phase,
            decision: decision.to_string(),
            reasoning: reasoning.to_string(),
        }
    }
}

/// Events emitted by the orchestrator, the worker pool and the health tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    SwarmStarted {
        session_id: SessionId,
        goal: String,
        tasks: usize,
    },
    PhaseChanged {
        from: SwarmPhase,
        to: SwarmPhase,
    },
    WaveStarted {
        wave: u32,
        tasks: Vec<TaskId>,
    },
    WaveCompleted {
        wave: u32,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
    TaskDispatched {
        task_id: TaskId,
        model: String,
        attempt: u32,
        wave: u32,
    },
    TaskCompleted {
        task_id: TaskId,
        model: String,
        degraded: bool,
        quality_score: Option<u8>,
        tokens_used: u64,
    },
    TaskFailed {
        task_id: TaskId,
        mode: FailureMode,
        attempt: u32,
        will_retry: bool,
    },
    TaskSkipped {
        task_id: TaskId,
        reason: String,
    },
    ModelHealthChanged {
        model: String,
        healthy: bool,
    },
    ModelFailover {
        task_id: TaskId,
        from: String,
        to: String,
    },
    BudgetUpdated {
        tokens_used: u64,
        tokens_reserved: u64,
        tokens_remaining: u64,
        cost_usd: f64,
    },
    OrchestratorDecision(DecisionRecord),
    QualityCircuitBreakerTripped {
        wave: u32,
        rejections: u32,
    },
    CheckpointSaved {
        session_id: SessionId,
        wave: u32,
    },
    SwarmCompleted {
        session_id: SessionId,
        success: bool,
        summary: String,
    },
}

/// Fire-and-forget sender for [`SwarmEvent`]s.
///
/// A disabled sink, or one whose receiver has been dropped, discards events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SwarmEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SwarmEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SwarmEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
