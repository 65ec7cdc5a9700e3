//! Orchestration layer for the swarm.
//!
//! This module holds everything between the task graph and the worker
//! models: the shared budget pool, model health tracking and failover, the
//! worker pool that dispatches tasks under a concurrency cap, the quality
//! circuit breaker, checkpoints, and the `SwarmOrchestrator` that drives a
//! run wave by wave.

mod budget;
mod checkpoint;
mod command;
mod contracts;
mod events;
mod health;
mod orchestrator;
mod pool;
mod quality;
mod task_config;

pub use budget::{BudgetPool, BudgetReservation, BudgetSnapshot};
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use command::{CommandWorker, TaskFileDecomposer, RATE_LIMIT_EXIT_CODE};
pub use contracts::{
    CapabilityProbe, Decomposer, Planner, QualityGate, QualityVerdict, Verification, Verifier,
    WaveReview, WaveReviewer, WorkerMetrics, WorkerOutput, WorkerRequest, WorkerSpawner,
};
pub use events::{DecisionRecord, EventSink, SwarmEvent};
pub use health::{
    run_capability_probes, select_alternative_model, ConsecutiveTimeoutTracker,
    ModelHealthRecord, ModelHealthTracker, ProbeReport, FAILURE_RATE_THRESHOLD, HEALTH_WINDOW,
    MIN_SAMPLES,
};
pub use orchestrator::{SwarmOrchestrator, SwarmOutcome, SwarmStats};
pub use pool::{DispatchOutcome, DispatchRejection, PreparedDispatch, WorkerPool};
pub use quality::QualityCircuitBreaker;
pub use task_config::{
    builtin_type_config, resolve_task_config, EffectiveTaskConfig, TokenBudgetRange,
};
