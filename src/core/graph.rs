//! Task graph for dependency management.
//!
//! The graph owns every task of a swarm run. Edges point from a dependency to
//! its dependent, so a node's outgoing neighbours are the tasks waiting on it.
//! All status changes go through the methods here; the orchestrator never
//! edits a task directly.

use crate::config::SwarmConfig;
use crate::core::hollow::HollowDetector;
use crate::core::task::{FailureMode, PartialContext, Task, TaskId, TaskResult, TaskStatus};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Number of single-dependency dependents that makes a task a foundation.
const FOUNDATION_FANOUT: usize = 3;

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub blocked: usize,
    pub ready: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending
            + self.blocked
            + self.ready
            + self.dispatched
            + self.completed
            + self.failed
            + self.skipped
    }
}

/// How a task's dependencies currently stand.
struct DependencyState {
    total: usize,
    completed: Vec<TaskId>,
    failed: Vec<TaskId>,
    outstanding: usize,
    unknown: usize,
}

/// The task dependency graph.
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
    partial_threshold: f64,
    context_chars: usize,
    hollow: HollowDetector,
}

impl TaskGraph {
    pub fn new(partial_threshold: f64, context_chars: usize, hollow: HollowDetector) -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            partial_threshold,
            context_chars,
            hollow,
        }
    }

    pub fn from_config(config: &SwarmConfig) -> Result<Self> {
        Ok(Self::new(
            config.partial_dependency_threshold,
            config.dependency_context_chars,
            HollowDetector::from_config(config)?,
        ))
    }

    /// Replace the graph with the given tasks.
    ///
    /// Tasks that were in flight when a previous run stopped go back to
    /// `ready`. Waves, foundation flags and readiness are recomputed.
    pub fn load(&mut self, tasks: Vec<Task>) {
        self.graph = DiGraph::new();
        self.task_index.clear();
        self.insert_all(tasks);
    }

    /// Append tasks to a live graph (review and verification fix-ups).
    ///
    /// Returns the ids that were actually added; duplicates are ignored.
    pub fn add_tasks(&mut self, tasks: Vec<Task>) -> Vec<TaskId> {
        self.insert_all(tasks)
    }

    fn insert_all(&mut self, tasks: Vec<Task>) -> Vec<TaskId> {
        let mut added = Vec::new();
        for mut task in tasks {
            if self.task_index.contains_key(&task.id) {
                warn!(task_id = %task.id, "duplicate task id ignored");
                continue;
            }
            if task.status == TaskStatus::Dispatched {
                debug!(task_id = %task.id, "interrupted dispatch reverted to ready");
                task.status = TaskStatus::Ready;
            }
            let id = task.id.clone();
            let index = self.graph.add_node(task);
            self.task_index.insert(id.clone(), index);
            added.push(id);
        }

        self.link_edges();
        self.compute_waves();
        self.compute_foundations();
        self.recompute();
        added
    }

    /// Add any dependency edges that are not in the graph yet. Dependencies on
    /// unknown ids are reported and left unsatisfied.
    fn link_edges(&mut self) {
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        for index in indices {
            let deps = self.graph[index].dependencies.clone();
            for dep in deps {
                match self.task_index.get(&dep) {
                    Some(&dep_index) => {
                        self.graph.update_edge(dep_index, index, ());
                    }
                    None => {
                        warn!(
                            task_id = %self.graph[index].id,
                            dependency = %dep,
                            "dependency refers to an unknown task and will never be satisfied"
                        );
                    }
                }
            }
        }
    }

    /// Assign each task `1 + max(dependency wave)`, never lowering an existing
    /// wave. Nodes on a cycle are never reached and keep their wave.
    fn compute_waves(&mut self) {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|i| (i, self.graph.neighbors_directed(i, Direction::Incoming).count()))
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|i| in_degree.get(i).copied() == Some(0))
            .collect();

        while let Some(index) = queue.pop_front() {
            let wave = self.graph[index].wave;
            let dependents: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(index, Direction::Outgoing)
                .collect();
            for dependent in dependents {
                let task = &mut self.graph[dependent];
                task.wave = task.wave.max(wave + 1);
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
    }

    fn compute_foundations(&mut self) {
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        for index in indices {
            let sole_dependents = self
                .graph
                .neighbors_directed(index, Direction::Outgoing)
                .filter(|&d| self.graph[d].dependencies.len() == 1)
                .count();
            self.graph[index].is_foundation = sole_dependents >= FOUNDATION_FANOUT;
        }
    }

    // ========== Readiness ==========

    fn dependency_state(&self, task: &Task) -> DependencyState {
        let mut state = DependencyState {
            total: task.dependencies.len(),
            completed: Vec::new(),
            failed: Vec::new(),
            outstanding: 0,
            unknown: 0,
        };
        for dep in &task.dependencies {
            match self.get_task(dep) {
                None => state.unknown += 1,
                Some(d) => match d.status {
                    TaskStatus::Completed => state.completed.push(dep.clone()),
                    TaskStatus::Failed | TaskStatus::Skipped => state.failed.push(dep.clone()),
                    _ => state.outstanding += 1,
                },
            }
        }
        state
    }

    /// Full readiness pass over every `pending` and `blocked` task, repeated
    /// until nothing changes.
    ///
    /// Returns the ids skipped during this pass.
    pub fn recompute(&mut self) -> Vec<TaskId> {
        let mut skipped = Vec::new();
        loop {
            let mut changed = false;
            let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
            for index in indices {
                let status = self.graph[index].status;
                if status != TaskStatus::Pending && status != TaskStatus::Blocked {
                    continue;
                }
                let state = self.dependency_state(&self.graph[index]);
                let next = self.resolve_readiness(index, &state);
                if next != status {
                    changed = true;
                    if next == TaskStatus::Skipped {
                        skipped.push(self.graph[index].id.clone());
                    }
                }
            }
            if !changed {
                break;
            }
        }
        skipped
    }

    fn resolve_readiness(&mut self, index: NodeIndex, state: &DependencyState) -> TaskStatus {
        if state.unknown > 0 {
            self.graph[index].status = TaskStatus::Pending;
            return TaskStatus::Pending;
        }

        if state.completed.len() == state.total {
            self.make_ready(index, None);
            return TaskStatus::Ready;
        }

        if state.outstanding > 0 {
            let status = if state.failed.is_empty() {
                TaskStatus::Pending
            } else {
                TaskStatus::Blocked
            };
            self.graph[index].status = status;
            return status;
        }

        let partial = PartialContext {
            succeeded: state.completed.clone(),
            failed: state.failed.clone(),
        };

        if state.total == 1 {
            let timed_out = state
                .failed
                .first()
                .and_then(|dep| self.get_task(dep))
                .map(|d| d.failure_mode == Some(FailureMode::Timeout))
                .unwrap_or(false);
            if timed_out {
                self.make_ready(index, Some(partial));
                return TaskStatus::Ready;
            }
            self.skip(index);
            return TaskStatus::Skipped;
        }

        let ratio = state.completed.len() as f64 / state.total as f64;
        if ratio >= self.partial_threshold {
            self.make_ready(index, Some(partial));
            TaskStatus::Ready
        } else {
            self.skip(index);
            TaskStatus::Skipped
        }
    }

    fn make_ready(&mut self, index: NodeIndex, partial: Option<PartialContext>) {
        let context = self.build_dependency_context(&self.graph[index], partial.as_ref());
        let task = &mut self.graph[index];
        task.status = TaskStatus::Ready;
        task.partial_context = partial;
        task.dependency_context = context;
        debug!(task_id = %task.id, wave = task.wave, "task ready");
    }

    fn skip(&mut self, index: NodeIndex) {
        let task = &mut self.graph[index];
        task.status = TaskStatus::Skipped;
        task.failure_mode = Some(FailureMode::Cascade);
        task.pending_cascade_skip = false;
        debug!(task_id = %task.id, "task skipped, dependency failed");
    }

    /// Ready tasks ordered by wave, then insertion order.
    pub fn get_ready(&mut self) -> Vec<Task> {
        self.recompute();
        self.ready_tasks()
    }

    /// Ready tasks without recomputing readiness first.
    pub fn ready_tasks(&self) -> Vec<Task> {
        let mut ready: Vec<(u32, NodeIndex)> = self
            .graph
            .node_indices()
            .filter(|&i| self.graph[i].status == TaskStatus::Ready)
            .map(|i| (self.graph[i].wave, i))
            .collect();
        ready.sort();
        ready
            .into_iter()
            .map(|(_, i)| self.graph[i].clone())
            .collect()
    }

    // ========== Dependency context ==========

    fn build_dependency_context(
        &self,
        task: &Task,
        partial: Option<&PartialContext>,
    ) -> Option<String> {
        if task.dependencies.is_empty() {
            return None;
        }

        let mut sections = Vec::new();
        for dep_id in &task.dependencies {
            let Some(dep) = self.get_task(dep_id) else {
                continue;
            };
            if dep.status != TaskStatus::Completed {
                continue;
            }
            let mut section = format!("## Dependency {}: {}\n", dep.id, dep.description);
            if dep.degraded {
                section.push_str("Warning: accepted without passing quality review.\n");
            }
            if let Some(result) = &dep.result {
                if self.hollow.is_hollow(result) {
                    section.push_str(
                        "Warning: reported success but produced little substantive output.\n",
                    );
                }
                let excerpt = self.excerpt(result);
                if !excerpt.is_empty() {
                    section.push_str(&excerpt);
                    section.push('\n');
                }
                if !result.files_modified.is_empty() {
                    section.push_str(&format!(
                        "Files modified: {}\n",
                        result.files_modified.join(", ")
                    ));
                }
            }
            sections.push(section);
        }

        if let Some(partial) = partial {
            if !partial.failed.is_empty() {
                let failed: Vec<&str> = partial.failed.iter().map(|id| id.as_str()).collect();
                sections.push(format!(
                    "Failed dependencies (results unavailable): {}\n",
                    failed.join(", ")
                ));
            }
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n"))
        }
    }

    fn excerpt(&self, result: &TaskResult) -> String {
        let text = match &result.closure {
            Some(closure) if !closure.findings.is_empty() => closure
                .findings
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => result.output.trim().to_string(),
        };
        truncate_chars(&text, self.context_chars)
    }

    // ========== Status transitions ==========

    fn index_of(&self, id: &TaskId) -> Result<NodeIndex> {
        self.task_index
            .get(id)
            .copied()
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    fn expect_status(&self, index: NodeIndex, expected: TaskStatus, to: TaskStatus) -> Result<()> {
        let task = &self.graph[index];
        if task.status != expected {
            return Err(Error::InvalidTaskTransition {
                id: task.id.to_string(),
                from: task.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// `ready -> dispatched`. Counts the attempt and records the model.
    pub fn mark_dispatched(&mut self, id: &TaskId, model: &str) -> Result<()> {
        let index = self.index_of(id)?;
        self.expect_status(index, TaskStatus::Ready, TaskStatus::Dispatched)?;
        let task = &mut self.graph[index];
        task.status = TaskStatus::Dispatched;
        task.attempts += 1;
        task.assigned_model = Some(model.to_string());
        Ok(())
    }

    /// `dispatched -> completed`.
    ///
    /// If a dependency failed while this task was in flight and the result is
    /// hollow, the deferred skip wins and cascades. Returns every task skipped
    /// as a consequence, this one first if it was skipped.
    pub fn mark_completed(&mut self, id: &TaskId, result: TaskResult) -> Result<Vec<TaskId>> {
        let index = self.index_of(id)?;
        self.expect_status(index, TaskStatus::Dispatched, TaskStatus::Completed)?;

        let honour_skip = self.graph[index].pending_cascade_skip && self.hollow.is_hollow(&result);
        let task = &mut self.graph[index];
        task.result = Some(result);
        task.pending_cascade_skip = false;

        if honour_skip {
            self.skip(index);
            let mut skipped = vec![id.clone()];
            skipped.extend(self.cascade_skip(id, FailureMode::Cascade));
            return Ok(skipped);
        }

        task.status = TaskStatus::Completed;
        task.failure_mode = None;
        task.retry_feedback = None;
        Ok(Vec::new())
    }

    /// `dispatched -> completed` for a result accepted without passing the
    /// quality gate.
    pub fn mark_degraded(&mut self, id: &TaskId, result: TaskResult) -> Result<()> {
        let index = self.index_of(id)?;
        self.expect_status(index, TaskStatus::Dispatched, TaskStatus::Completed)?;
        let task = &mut self.graph[index];
        task.status = TaskStatus::Completed;
        task.degraded = true;
        task.pending_cascade_skip = false;
        task.result = Some(result);
        Ok(())
    }

    /// `dispatched -> ready` for another attempt.
    ///
    /// A task flagged for a deferred cascade skip is skipped instead; the
    /// returned ids are the tasks skipped that way.
    pub fn requeue(
        &mut self,
        id: &TaskId,
        mode: FailureMode,
        result: Option<TaskResult>,
        feedback: Option<String>,
        next_wave: u32,
    ) -> Result<Vec<TaskId>> {
        let index = self.index_of(id)?;
        self.expect_status(index, TaskStatus::Dispatched, TaskStatus::Ready)?;

        let task = &mut self.graph[index];
        if result.is_some() {
            task.result = result;
        }
        if task.pending_cascade_skip {
            self.skip(index);
            let mut skipped = vec![id.clone()];
            skipped.extend(self.cascade_skip(id, FailureMode::Cascade));
            return Ok(skipped);
        }

        task.status = TaskStatus::Ready;
        task.failure_mode = Some(mode);
        task.retry_feedback = feedback;
        task.wave = task.wave.max(next_wave);
        Ok(Vec::new())
    }

    /// Point a task at another model for its next attempt.
    pub fn assign_model(&mut self, id: &TaskId, model: &str) -> Result<()> {
        let index = self.index_of(id)?;
        self.graph[index].assigned_model = Some(model.to_string());
        Ok(())
    }

    /// Fail a task for good and cascade to its dependents.
    ///
    /// Returns the ids skipped by the cascade.
    pub fn mark_failed(
        &mut self,
        id: &TaskId,
        mode: FailureMode,
        result: Option<TaskResult>,
    ) -> Result<Vec<TaskId>> {
        let index = self.index_of(id)?;
        let task = &mut self.graph[index];
        if task.status.is_terminal() {
            return Err(Error::InvalidTaskTransition {
                id: id.to_string(),
                from: task.status.to_string(),
                to: TaskStatus::Failed.to_string(),
            });
        }
        task.status = TaskStatus::Failed;
        task.failure_mode = Some(mode);
        task.pending_cascade_skip = false;
        if result.is_some() {
            task.result = result;
        }
        debug!(task_id = %id, mode = %mode, "task failed");
        Ok(self.cascade_skip(id, mode))
    }

    /// Propagate a failure through everything downstream of `failed`.
    ///
    /// Each task is visited at most once; terminal tasks are never touched,
    /// so repeating the call changes nothing.
    pub fn cascade_skip(&mut self, failed: &TaskId, mode: FailureMode) -> Vec<TaskId> {
        let mut skipped = Vec::new();
        let Some(&start) = self.task_index.get(failed) else {
            return skipped;
        };

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<(NodeIndex, FailureMode)> = VecDeque::new();
        queue.push_back((start, mode));

        while let Some((source, source_mode)) = queue.pop_front() {
            let source_id = self.graph[source].id.clone();
            let dependents: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(source, Direction::Outgoing)
                .collect();

            for dependent in dependents {
                if !visited.insert(dependent) {
                    continue;
                }
                let status = self.graph[dependent].status;
                if status.is_terminal() {
                    continue;
                }
                if status == TaskStatus::Dispatched {
                    self.graph[dependent].pending_cascade_skip = true;
                    debug!(task_id = %self.graph[dependent].id, "in-flight task flagged for cascade skip");
                    continue;
                }

                let dep_count = self.graph[dependent].dependencies.len();
                if dep_count <= 1 {
                    if source_mode == FailureMode::Timeout {
                        let partial = PartialContext {
                            succeeded: Vec::new(),
                            failed: vec![source_id.clone()],
                        };
                        self.make_ready(dependent, Some(partial));
                    } else {
                        self.skip(dependent);
                        skipped.push(self.graph[dependent].id.clone());
                        queue.push_back((dependent, FailureMode::Cascade));
                    }
                    continue;
                }

                let state = self.dependency_state(&self.graph[dependent]);
                let best_case =
                    (state.completed.len() + state.outstanding) as f64 / state.total as f64;
                if best_case < self.partial_threshold {
                    self.skip(dependent);
                    skipped.push(self.graph[dependent].id.clone());
                    queue.push_back((dependent, FailureMode::Cascade));
                } else {
                    self.graph[dependent].status = TaskStatus::Blocked;
                }
            }
        }
        skipped
    }

    // ========== Queries ==========

    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    /// Owned copy of every task in insertion order, for checkpoints.
    pub fn snapshot(&self) -> Vec<Task> {
        self.graph.node_weights().cloned().collect()
    }

    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        match self.task_index.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, Direction::Outgoing)
                .map(|d| self.graph[d].id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn dependent_count(&self, id: &TaskId) -> usize {
        self.task_index
            .get(id)
            .map(|&i| self.graph.neighbors_directed(i, Direction::Outgoing).count())
            .unwrap_or(0)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.graph.node_weights() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Blocked => counts.blocked += 1,
                TaskStatus::Ready => counts.ready += 1,
                TaskStatus::Dispatched => counts.dispatched += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Every task has reached a terminal status.
    pub fn is_settled(&self) -> bool {
        self.graph.node_weights().all(|t| t.is_terminal())
    }

    pub fn has_unfinished(&self) -> bool {
        !self.is_settled()
    }

    /// Tasks that can never become ready: waiting on unknown ids or on a
    /// dependency cycle.
    pub fn stuck_tasks(&self) -> Vec<TaskId> {
        let any_progress = self
            .graph
            .node_weights()
            .any(|t| matches!(t.status, TaskStatus::Ready | TaskStatus::Dispatched));
        if any_progress {
            return Vec::new();
        }
        self.graph
            .node_weights()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Blocked))
            .map(|t| t.id.clone())
            .collect()
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        let config = SwarmConfig::default();
        Self::new(
            config.partial_dependency_threshold,
            config.dependency_context_chars,
            HollowDetector::default(),
        )
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
