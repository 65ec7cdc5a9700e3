//! Task data model for the swarm task graph.
//!
//! Tasks are the atomic units of work dispatched to worker models. Each task
//! tracks its status, dependencies, dispatch attempts and the result of its
//! latest attempt.

use crate::config::{TaskTypeConfig, WorkerCapability};
use serde::{Deserialize, Serialize};

/// Identifier for a task within a swarm run.
///
/// Ids come from the decomposer (e.g. `"A"`, `"task-3"`), so unlike a
/// generated UUID they are plain strings chosen by the producer of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a task identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The kind of work a task represents.
///
/// The fixed set drives built-in per-type defaults (timeouts, tools, token
/// ranges). Anything else decomposes to [`TaskType::Custom`] and falls back to
/// the `implement` defaults.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Research,
    Analysis,
    Design,
    #[default]
    Implement,
    Test,
    Refactor,
    Review,
    Document,
    Integrate,
    Deploy,
    Merge,
    Custom(String),
}

impl TaskType {
    /// Canonical lowercase name, also used as the key in user task-type config.
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::Research => "research",
            TaskType::Analysis => "analysis",
            TaskType::Design => "design",
            TaskType::Implement => "implement",
            TaskType::Test => "test",
            TaskType::Refactor => "refactor",
            TaskType::Review => "review",
            TaskType::Document => "document",
            TaskType::Integrate => "integrate",
            TaskType::Deploy => "deploy",
            TaskType::Merge => "merge",
            TaskType::Custom(name) => name,
        }
    }

    /// The worker capability this kind of task needs by default.
    pub fn capability(&self) -> WorkerCapability {
        match self {
            TaskType::Research | TaskType::Analysis | TaskType::Design => {
                WorkerCapability::Research
            }
            TaskType::Review => WorkerCapability::Review,
            TaskType::Test => WorkerCapability::Test,
            TaskType::Document => WorkerCapability::Document,
            _ => WorkerCapability::Code,
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "research" => TaskType::Research,
            "analysis" => TaskType::Analysis,
            "design" => TaskType::Design,
            "implement" => TaskType::Implement,
            "test" => TaskType::Test,
            "refactor" => TaskType::Refactor,
            "review" => TaskType::Review,
            "document" => TaskType::Document,
            "integrate" => TaskType::Integrate,
            "deploy" => TaskType::Deploy,
            "merge" => TaskType::Merge,
            _ => TaskType::Custom(s),
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        TaskType::from(s.to_string())
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task status in its lifecycle.
///
/// Legal moves: `pending/blocked -> ready -> dispatched -> {completed, failed,
/// skipped}`, with `dispatched -> ready` for a retry and `pending/blocked/ready
/// -> skipped` when a dependency failure cascades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on dependencies.
    #[default]
    Pending,
    /// A dependency failed; the task's fate waits on its other dependencies.
    Blocked,
    /// Dependencies satisfied (fully or partially), waiting for dispatch.
    Ready,
    /// A worker attempt is in flight.
    Dispatched,
    Completed,
    Failed,
    /// Skipped because a dependency failed.
    Skipped,
}

impl TaskStatus {
    /// Completed, failed and skipped tasks never change again within a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Dispatched => write!(f, "dispatched"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a dispatch attempt (or a task) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// The dispatch exceeded its deadline.
    Timeout,
    /// Provider throttling.
    RateLimit,
    /// Application or tool failure reported by the worker.
    Error,
    /// Rejected by the quality gate.
    Quality,
    /// Claimed success without substantive work.
    Hollow,
    /// Skipped because a dependency failed.
    Cascade,
}

impl std::fmt::Display for FailureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureMode::Timeout => write!(f, "timeout"),
            FailureMode::RateLimit => write!(f, "rate_limit"),
            FailureMode::Error => write!(f, "error"),
            FailureMode::Quality => write!(f, "quality"),
            FailureMode::Hollow => write!(f, "hollow"),
            FailureMode::Cascade => write!(f, "cascade"),
        }
    }
}

/// Which dependencies succeeded and which failed for a task that was allowed
/// to proceed without all of them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartialContext {
    pub succeeded: Vec<TaskId>,
    pub failed: Vec<TaskId>,
}

/// Structured summary a worker may attach to its output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClosureReport {
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub actions_taken: Vec<String>,
    #[serde(default)]
    pub failures: Vec<String>,
    #[serde(default)]
    pub remaining_work: Vec<String>,
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    /// Quality score (1-5) assigned by the quality gate.
    pub quality_score: Option<u8>,
    pub quality_feedback: Option<String>,
    pub closure: Option<ClosureReport>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub tool_calls: u32,
    pub model: String,
}

impl TaskResult {
    /// A result for an attempt that produced nothing (timeout, transport error).
    pub fn empty(model: &str, duration_ms: u64) -> Self {
        Self {
            model: model.to_string(),
            duration_ms,
            ..Default::default()
        }
    }

    /// True when the closure report carries at least one finding.
    pub fn has_findings(&self) -> bool {
        self.closure
            .as_ref()
            .map(|c| !c.findings.is_empty())
            .unwrap_or(false)
    }
}

/// A single task in the swarm task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Complexity rating, 1-10.
    #[serde(default = "default_complexity")]
    pub complexity: u8,
    #[serde(default)]
    pub wave: u32,
    #[serde(default)]
    pub target_files: Vec<String>,
    #[serde(default)]
    pub read_files: Vec<String>,
    #[serde(default)]
    pub assigned_model: Option<String>,
    #[serde(default)]
    pub required_capability: Option<WorkerCapability>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub failure_mode: Option<FailureMode>,
    /// Sole dependency of three or more downstream tasks.
    #[serde(default)]
    pub is_foundation: bool,
    /// Accepted without passing the quality gate.
    #[serde(default)]
    pub degraded: bool,
    /// A dependency failed while this task was in flight.
    #[serde(default)]
    pub pending_cascade_skip: bool,
    #[serde(default)]
    pub partial_context: Option<PartialContext>,
    #[serde(default)]
    pub dependency_context: Option<String>,
    /// Feedback injected into the next attempt's prompt.
    #[serde(default)]
    pub retry_feedback: Option<String>,
    /// Per-task configuration overrides (highest priority tier).
    #[serde(default)]
    pub overrides: TaskTypeConfig,
}

fn default_complexity() -> u8 {
    5
}

impl Task {
    /// Create a pending `implement` task with no dependencies.
    pub fn new(id: impl Into<TaskId>, description: &str) -> Self {
        Self {
            id: id.into(),
            description: description.to_string(),
            task_type: TaskType::default(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            complexity: default_complexity(),
            wave: 0,
            target_files: Vec::new(),
            read_files: Vec::new(),
            assigned_model: None,
            required_capability: None,
            attempts: 0,
            result: None,
            failure_mode: None,
            is_foundation: false,
            degraded: false,
            pending_cascade_skip: false,
            partial_context: None,
            dependency_context: None,
            retry_feedback: None,
            overrides: TaskTypeConfig::default(),
        }
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the complexity rating, clamped to 1-10.
    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity.clamp(1, 10);
        self
    }

    pub fn with_target_files(mut self, files: Vec<String>) -> Self {
        self.target_files = files;
        self
    }

    pub fn with_read_files(mut self, files: Vec<String>) -> Self {
        self.read_files = files;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.assigned_model = Some(model.to_string());
        self
    }

    pub fn with_capability(mut self, capability: WorkerCapability) -> Self {
        self.required_capability = Some(capability);
        self
    }

    pub fn with_overrides(mut self, overrides: TaskTypeConfig) -> Self {
        self.overrides = overrides;
        self
    }

    /// Capability a worker must have to take this task.
    pub fn capability(&self) -> WorkerCapability {
        self.required_capability
            .unwrap_or_else(|| self.task_type.capability())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task can be dispatched right now.
    pub fn can_dispatch(&self) -> bool {
        self.status == TaskStatus::Ready
    }
}
