//! Contracts for the collaborators the orchestrator drives but does not
//! implement: worker agents, the goal decomposer, quality judges, reviewers,
//! verifiers, planners and capability probes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::WorkerCapability;
use crate::core::task::{ClosureReport, PartialContext, Task, TaskResult};
use crate::orchestration::task_config::EffectiveTaskConfig;
use crate::Result;

/// Everything a worker needs for one dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task: Task,
    pub config: EffectiveTaskConfig,
    pub model: String,
    /// Tokens reserved for this attempt.
    pub token_budget: u64,
    pub dependency_context: Option<String>,
    pub partial_context: Option<PartialContext>,
    /// Feedback from a rejected previous attempt.
    pub feedback: Option<String>,
}

/// Usage reported by a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerMetrics {
    pub tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub tool_calls: u32,
}

/// What a worker returns for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub metrics: WorkerMetrics,
    #[serde(default)]
    pub closure: Option<ClosureReport>,
    #[serde(default)]
    pub files_modified: Vec<String>,
}

impl WorkerOutput {
    /// Convert into a task result. `elapsed_ms` is used when the worker did
    /// not report its own duration.
    pub fn into_result(self, model: &str, elapsed_ms: u64) -> TaskResult {
        let duration_ms = if self.metrics.duration_ms > 0 {
            self.metrics.duration_ms
        } else {
            elapsed_ms
        };
        TaskResult {
            success: self.success,
            output: self.output,
            tokens_used: self.metrics.tokens,
            cost_usd: self.metrics.cost_usd,
            duration_ms,
            quality_score: None,
            quality_feedback: None,
            closure: self.closure,
            files_modified: self.files_modified,
            tool_calls: self.metrics.tool_calls,
            model: model.to_string(),
        }
    }
}

/// Runs one task attempt on a model.
///
/// Throttling is reported as [`crate::Error::RateLimited`].
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, request: WorkerRequest) -> Result<WorkerOutput>;
}

/// Turns a goal into an initial task list.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, goal: &str) -> Result<Vec<Task>>;
}

/// Score given by a quality judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityVerdict {
    /// 1 (worst) to 5 (best).
    pub score: u8,
    pub feedback: String,
}

#[async_trait]
pub trait QualityGate: Send + Sync {
    async fn evaluate(&self, task: &Task, result: &TaskResult) -> Result<QualityVerdict>;
}

/// Outcome of reviewing a finished wave.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaveReview {
    pub summary: String,
    /// Corrective tasks to add to the graph.
    pub fixups: Vec<Task>,
}

#[async_trait]
pub trait WaveReviewer: Send + Sync {
    async fn review(&self, wave: u32, tasks: &[Task]) -> Result<WaveReview>;
}

/// Outcome of verifying the whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    pub summary: String,
    pub fixups: Vec<Task>,
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, goal: &str, tasks: &[Task]) -> Result<Verification>;
}

/// Produces a plan note before execution starts.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str, tasks: &[Task]) -> Result<String>;
}

/// Checks that a model can actually do what it is configured for.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn probe(&self, model: &str, capabilities: &[WorkerCapability]) -> Result<bool>;
}
