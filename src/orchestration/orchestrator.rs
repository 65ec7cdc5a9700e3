//! Swarm orchestrator.
//!
//! The `SwarmOrchestrator` drives a run from goal to outcome. It owns the task
//! graph and the phase machine, and shares the budget pool and model health
//! tracker with the worker pool. Execution proceeds in waves: every ready
//! task is prepared and dispatched, the wave's outcomes are judged in
//! completion order, and the resulting graph mutations are applied in graph
//! order once the whole wave is known.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SwarmConfig;
use crate::core::graph::TaskGraph;
use crate::core::hollow::HollowDetector;
use crate::core::task::{FailureMode, Task, TaskId, TaskResult};
use crate::error::{Error, Result};
use crate::orchestration::budget::BudgetPool;
use crate::orchestration::checkpoint::{Checkpoint, CheckpointStore};
use crate::orchestration::contracts::{
    CapabilityProbe, Decomposer, Planner, QualityGate, Verifier, WaveReviewer, WorkerSpawner,
};
use crate::orchestration::events::{DecisionRecord, EventSink, SwarmEvent};
use crate::orchestration::health::{
    run_capability_probes, select_alternative_model, ConsecutiveTimeoutTracker,
    ModelHealthTracker,
};
use crate::orchestration::pool::{DispatchOutcome, DispatchRejection, WorkerPool};
use crate::orchestration::quality::QualityCircuitBreaker;
use crate::orchestration::task_config::resolve_task_config;
use crate::workflow::{PhaseMachine, SessionId, SwarmPhase, SwarmStatus};

/// Feedback attached to a retry after a hollow completion.
const HOLLOW_FEEDBACK: &str = "Your previous attempt reported success but produced no substantive \
work. Use your tools to make concrete progress and report what you actually did.";

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmStats {
    pub waves: u32,
    pub dispatches: u32,
    pub retries: u32,
    pub failovers: u32,
    pub timeouts: u32,
    pub rate_limits: u32,
    pub hollow_completions: u32,
    pub quality_rejections: u32,
    pub degraded: u32,
    pub verification_rounds: u32,
    pub fixups_added: u32,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// What a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmOutcome {
    pub session_id: SessionId,
    pub status: SwarmStatus,
    /// Every task completed.
    pub success: bool,
    pub summary: String,
    pub stats: SwarmStats,
    pub tasks: Vec<Task>,
    /// Set when the run was aborted or cancelled.
    pub abort_reason: Option<String>,
    pub budget_exhausted: bool,
    pub decisions: Vec<DecisionRecord>,
}

/// How one dispatch outcome is applied to the graph.
#[derive(Debug)]
enum Resolution {
    Complete {
        result: TaskResult,
        degraded: bool,
    },
    Retry {
        mode: FailureMode,
        result: TaskResult,
        feedback: Option<String>,
        reassign: Option<String>,
    },
    Fail {
        mode: FailureMode,
        result: TaskResult,
    },
}

/// Wave-based swarm orchestrator.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use swarm::config::SwarmConfig;
/// use swarm::orchestration::{CommandWorker, EventSink, SwarmOrchestrator, TaskFileDecomposer};
///
/// let (events, mut rx) = EventSink::channel();
/// let mut orchestrator = SwarmOrchestrator::new(
///     SwarmConfig::load()?,
///     Arc::new(CommandWorker::new("my-agent")),
///     events,
/// )?
/// .with_decomposer(Arc::new(TaskFileDecomposer::new("tasks.json")));
///
/// let outcome = orchestrator.run("add a config loader").await?;
/// println!("{}", outcome.summary);
/// ```
pub struct SwarmOrchestrator {
    config: SwarmConfig,
    session_id: SessionId,
    goal: String,
    graph: TaskGraph,
    pool: WorkerPool,
    budget: Arc<BudgetPool>,
    health: Arc<ModelHealthTracker>,
    phase: PhaseMachine,
    events: EventSink,
    decomposer: Option<Arc<dyn Decomposer>>,
    quality_gate: Option<Arc<dyn QualityGate>>,
    reviewer: Option<Arc<dyn WaveReviewer>>,
    verifier: Option<Arc<dyn Verifier>>,
    planner: Option<Arc<dyn Planner>>,
    probe: Option<Arc<dyn CapabilityProbe>>,
    store: Option<Arc<dyn CheckpointStore>>,
    breaker: QualityCircuitBreaker,
    timeouts: ConsecutiveTimeoutTracker,
    stats: SwarmStats,
    decisions: Vec<DecisionRecord>,
    /// Number of the current (or last finished) wave; 0 before the first.
    wave: u32,
    /// Tasks dispatched in that wave, in dispatch order.
    wave_dispatched: Vec<TaskId>,
    budget_exhausted: bool,
    cancel: CancellationToken,
}

impl SwarmOrchestrator {
    /// Create an orchestrator for one run.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated swarm configuration
    /// * `spawner` - Runs individual dispatch attempts
    /// * `events` - Sink for lifecycle events, shared with the pool and health tracker
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a hollow-output
    /// phrase cannot be compiled.
    pub fn new(
        config: SwarmConfig,
        spawner: Arc<dyn WorkerSpawner>,
        events: EventSink,
    ) -> Result<Self> {
        config.validate()?;
        let hollow = HollowDetector::from_config(&config)?;
        let graph = TaskGraph::from_config(&config)?;
        let budget = Arc::new(BudgetPool::from_config(&config));
        let health = Arc::new(ModelHealthTracker::new(events.clone()));
        let pool = WorkerPool::new(
            &config,
            spawner,
            Arc::clone(&budget),
            Arc::clone(&health),
            hollow,
            events.clone(),
        );

        Ok(Self {
            breaker: QualityCircuitBreaker::new(config.quality_breaker_threshold),
            config,
            session_id: SessionId::new(),
            goal: String::new(),
            graph,
            pool,
            budget,
            health,
            phase: PhaseMachine::new(),
            events,
            decomposer: None,
            quality_gate: None,
            reviewer: None,
            verifier: None,
            planner: None,
            probe: None,
            store: None,
            timeouts: ConsecutiveTimeoutTracker::new(),
            stats: SwarmStats::default(),
            decisions: Vec::new(),
            wave: 0,
            wave_dispatched: Vec::new(),
            budget_exhausted: false,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn Decomposer>) -> Self {
        self.decomposer = Some(decomposer);
        self
    }

    pub fn with_quality_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.quality_gate = Some(gate);
        self
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn WaveReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an external token to stop the run at the next wave boundary.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn phase(&self) -> SwarmPhase {
        self.phase.current()
    }

    pub fn phase_machine(&self) -> &PhaseMachine {
        &self.phase
    }

    pub fn stats(&self) -> &SwarmStats {
        &self.stats
    }

    pub fn health(&self) -> &ModelHealthTracker {
        &self.health
    }

    pub fn budget(&self) -> &BudgetPool {
        &self.budget
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    /// Decompose `goal` into tasks and execute them.
    ///
    /// Per-task failures are reported in the outcome, never as errors.
    pub async fn run(&mut self, goal: &str) -> Result<SwarmOutcome> {
        self.goal = goal.to_string();
        info!(session_id = %self.session_id.short(), goal, "swarm run starting");

        let tasks = match &self.decomposer {
            Some(decomposer) => decomposer.decompose(goal).await,
            None => Err(Error::Config("no decomposer configured".to_string())),
        };
        let tasks = match tasks {
            Ok(tasks) => tasks,
            Err(e) => return self.abort(&format!("decomposition failed: {}", e)).await,
        };
        if tasks.is_empty() {
            return self.abort("decomposition produced no tasks").await;
        }

        self.graph.load(tasks);
        self.events.emit(SwarmEvent::SwarmStarted {
            session_id: self.session_id,
            goal: self.goal.clone(),
            tasks: self.graph.len(),
        });
        self.transition(SwarmPhase::Scheduling)?;

        let skipped = self.graph.recompute();
        self.announce_skips(&skipped);
        if self.graph.ready_tasks().is_empty() {
            return self
                .abort("no task is ready to start; check for unknown or cyclic dependencies")
                .await;
        }

        if self.config.capability_probe {
            if let Some(probe) = self.probe.clone() {
                let report = run_capability_probes(
                    probe.as_ref(),
                    &self.config.workers,
                    &self.health,
                    self.config.probe_failure_strategy,
                )
                .await;
                if report.abort {
                    return self
                        .abort("every worker model failed its capability probe")
                        .await;
                }
                if !report.failed.is_empty() {
                    let reasoning = format!("probe failed for {}", report.failed.join(", "));
                    self.decide("route around models", &reasoning);
                }
            }
        }

        if self.config.planning {
            if let Some(planner) = self.planner.clone() {
                self.transition(SwarmPhase::Planning)?;
                match planner.plan(&self.goal, &self.graph.snapshot()).await {
                    Ok(plan) => self.decide("plan", &plan),
                    Err(e) => {
                        warn!(error = %e, "planning failed, executing without a plan");
                        self.decide("skip planning", &e.to_string());
                    }
                }
            }
        }

        self.execute().await
    }

    /// Continue a checkpointed run.
    ///
    /// Completed tasks keep their results; tasks that were in flight when the
    /// checkpoint was taken are dispatched again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] when the store has no checkpoint
    /// for `session_id`, or a configuration error when no store is set.
    pub async fn resume(&mut self, session_id: SessionId) -> Result<SwarmOutcome> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| Error::Config("no checkpoint store configured".to_string()))?;
        let checkpoint = store
            .load(&session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        self.session_id = checkpoint.session_id;
        self.goal = checkpoint.goal;
        self.graph.load(checkpoint.tasks);
        self.health.restore(checkpoint.health);
        self.budget.restore(&checkpoint.budget);
        self.stats = checkpoint.stats;
        self.decisions = checkpoint.decisions;
        self.wave = checkpoint.wave;
        self.phase = PhaseMachine::starting_at(SwarmPhase::Scheduling);

        info!(
            session_id = %self.session_id.short(),
            wave = self.wave,
            tasks = self.graph.len(),
            "resuming swarm run"
        );
        let reasoning = format!(
            "checkpoint from wave {} in phase {}",
            checkpoint.wave, checkpoint.phase
        );
        self.decide("resume", &reasoning);

        let skipped = self.graph.recompute();
        self.announce_skips(&skipped);
        self.execute().await
    }

    async fn execute(&mut self) -> Result<SwarmOutcome> {
        self.transition(SwarmPhase::Executing)?;

        loop {
            self.run_waves().await?;
            if self.cancel.is_cancelled() || self.budget_exhausted {
                break;
            }
            if !self.verify().await? {
                break;
            }
        }

        self.synthesize().await
    }

    /// Run waves until nothing is ready.
    async fn run_waves(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                self.decide("stop", "run cancelled");
                return Ok(());
            }

            let skipped = self.graph.recompute();
            self.announce_skips(&skipped);
            let ready = self.graph.ready_tasks();
            if ready.is_empty() {
                return Ok(());
            }

            self.wave += 1;
            self.stats.waves += 1;
            self.breaker.reset();
            let dispatched = self.run_wave(ready).await?;

            if self.config.checkpoint_every_wave {
                self.save_checkpoint().await;
            }
            if dispatched == 0 && self.budget_exhausted {
                self.decide(
                    "stop dispatching",
                    "the budget cannot cover the minimum allocation of any ready task",
                );
                return Ok(());
            }
            self.review().await?;
        }
    }

    /// Dispatch one wave. Returns how many tasks were dispatched.
    async fn run_wave(&mut self, ready: Vec<Task>) -> Result<usize> {
        let wave = self.wave;
        let order: Vec<TaskId> = ready.iter().map(|t| t.id.clone()).collect();
        info!(wave, tasks = order.len(), "wave starting");
        self.events.emit(SwarmEvent::WaveStarted {
            wave,
            tasks: order.clone(),
        });

        let mut prepared = Vec::with_capacity(ready.len());
        let mut budget_blocked = Vec::new();
        let mut failed = 0;
        let mut skipped = 0;

        for task in &ready {
            let dependents = self.graph.dependent_count(&task.id);
            match self.pool.prepare(task, dependents) {
                Ok(dispatch) => {
                    if let Some(from) = &dispatch.failover_from {
                        self.record_failover(&task.id, from, &dispatch.model);
                    }
                    if let Err(e) = self.graph.mark_dispatched(&task.id, &dispatch.model) {
                        self.pool.cancel(dispatch);
                        return Err(e);
                    }
                    self.stats.dispatches += 1;
                    self.events.emit(SwarmEvent::TaskDispatched {
                        task_id: task.id.clone(),
                        model: dispatch.model.clone(),
                        attempt: task.attempts + 1,
                        wave,
                    });
                    debug!(task_id = %task.id, model = %dispatch.model, wave, "task dispatched");
                    prepared.push(dispatch);
                }
                Err(DispatchRejection::BudgetExhausted { min_tokens }) => {
                    debug!(task_id = %task.id, min_tokens, "not enough budget to dispatch");
                    budget_blocked.push((task.id.to_string(), min_tokens));
                }
                Err(rejection) => {
                    warn!(task_id = %task.id, %rejection, "task cannot be dispatched");
                    let mode = task.failure_mode.unwrap_or(FailureMode::Error);
                    let cascade = self.graph.mark_failed(&task.id, mode, None)?;
                    self.events.emit(SwarmEvent::TaskFailed {
                        task_id: task.id.clone(),
                        mode,
                        attempt: task.attempts,
                        will_retry: false,
                    });
                    self.decide(&format!("fail {}", task.id), &rejection.to_string());
                    failed += 1;
                    skipped += cascade.len();
                    self.announce_skips(&cascade);
                }
            }
        }

        if !budget_blocked.is_empty() {
            let ids: Vec<&str> = budget_blocked.iter().map(|(id, _)| id.as_str()).collect();
            let reasoning = format!("not enough budget left; deferred: {}", ids.join(", "));
            self.decide("defer dispatch", &reasoning);
        }

        self.wave_dispatched = prepared.iter().map(|d| d.task.id.clone()).collect();
        let dispatched = prepared.len();
        let mut completed = 0;
        if dispatched > 0 {
            let outcomes = self.pool.execute_wave(prepared).await;
            let mut resolutions = HashMap::with_capacity(outcomes.len());
            for outcome in outcomes {
                let task_id = outcome.task_id.clone();
                let resolution = self.evaluate(outcome).await?;
                resolutions.insert(task_id, resolution);
            }

            for id in &order {
                let Some(resolution) = resolutions.remove(id) else {
                    continue;
                };
                match self.apply(id, resolution)? {
                    Applied::Completed => completed += 1,
                    Applied::Failed(cascade) => {
                        failed += 1;
                        skipped += cascade;
                    }
                    Applied::Skipped(count) => skipped += count,
                    Applied::Requeued => {}
                }
            }
        }

        // Every reservation from this wave is released by now, so a deferred
        // task that still does not fit never will.
        self.budget_exhausted = !budget_blocked.is_empty()
            && budget_blocked
                .iter()
                .all(|(_, min_tokens)| !self.budget.has_capacity(*min_tokens));

        let budget = self.budget.snapshot();
        self.stats.tokens_used = budget.tokens_used;
        self.stats.cost_usd = budget.cost_usd;

        info!(wave, completed, failed, skipped, "wave complete");
        self.events.emit(SwarmEvent::WaveCompleted {
            wave,
            completed,
            failed,
            skipped,
        });
        Ok(dispatched)
    }

    /// Judge one dispatch outcome. Nothing is written to the graph here.
    async fn evaluate(&mut self, outcome: DispatchOutcome) -> Result<Resolution> {
        let task = self
            .graph
            .get_task(&outcome.task_id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(outcome.task_id.to_string()))?;
        let dependents = self.graph.dependent_count(&task.id);
        let retries = resolve_task_config(
            &task,
            &self.config.task_types,
            self.config.worker_timeout(),
            dependents,
        )
        .retries;
        let below_ceiling = task.attempts < self.config.max_dispatch_attempts;
        let can_retry = below_ceiling && task.attempts <= retries;

        let DispatchOutcome {
            model,
            mut result,
            failure,
            error,
            ..
        } = outcome;

        let Some(mode) = failure else {
            self.timeouts.reset(&task.id);
            return Ok(self.gate(&task, &model, result, can_retry).await);
        };

        debug!(task_id = %task.id, model = %model, mode = %mode, attempt = task.attempts, "dispatch failed");
        if mode != FailureMode::Timeout {
            self.timeouts.reset(&task.id);
        }
        let resolution = match mode {
            FailureMode::Timeout => {
                self.stats.timeouts += 1;
                let count = self.timeouts.increment(&task.id);
                if count >= self.config.consecutive_timeout_limit {
                    self.timeouts.reset(&task.id);
                    let alternative = select_alternative_model(
                        &self.config.workers,
                        &model,
                        task.capability(),
                        &self.health,
                    );
                    match alternative {
                        Some(alternative) if below_ceiling => {
                            self.record_failover(&task.id, &model, &alternative);
                            let reasoning = format!("{} consecutive timeouts on {}", count, model);
                            self.decide(&format!("fail over {}", task.id), &reasoning);
                            Resolution::Retry {
                                mode,
                                result,
                                feedback: None,
                                reassign: Some(alternative),
                            }
                        }
                        _ => {
                            let reasoning =
                                format!("{} consecutive timeouts and no model to fail over to", count);
                            self.decide(&format!("fail {}", task.id), &reasoning);
                            Resolution::Fail { mode, result }
                        }
                    }
                } else if below_ceiling {
                    Resolution::Retry {
                        mode,
                        result,
                        feedback: None,
                        reassign: None,
                    }
                } else {
                    Resolution::Fail { mode, result }
                }
            }
            FailureMode::RateLimit => {
                self.stats.rate_limits += 1;
                // An unhealthy model is swapped out by the next prepare.
                if below_ceiling {
                    Resolution::Retry {
                        mode,
                        result,
                        feedback: None,
                        reassign: None,
                    }
                } else {
                    Resolution::Fail { mode, result }
                }
            }
            FailureMode::Hollow => {
                self.stats.hollow_completions += 1;
                if can_retry {
                    Resolution::Retry {
                        mode,
                        result,
                        feedback: Some(HOLLOW_FEEDBACK.to_string()),
                        reassign: None,
                    }
                } else {
                    Resolution::Fail { mode, result }
                }
            }
            _ => {
                if let Some(error) = &error {
                    if result.output.is_empty() {
                        result.output = error.clone();
                    }
                }
                if can_retry {
                    Resolution::Retry {
                        mode,
                        feedback: error
                            .map(|e| format!("The previous attempt failed: {}", e)),
                        result,
                        reassign: None,
                    }
                } else {
                    Resolution::Fail { mode, result }
                }
            }
        };
        Ok(resolution)
    }

    /// Run the quality gate over a successful result.
    async fn gate(
        &mut self,
        task: &Task,
        model: &str,
        mut result: TaskResult,
        can_retry: bool,
    ) -> Resolution {
        let gate = match &self.quality_gate {
            Some(gate) if self.config.quality_gate && !self.breaker.is_disabled() => {
                Arc::clone(gate)
            }
            _ => {
                return Resolution::Complete {
                    result,
                    degraded: false,
                }
            }
        };

        let verdict = match gate.evaluate(task, &result).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "quality gate errored, accepting result");
                return Resolution::Complete {
                    result,
                    degraded: false,
                };
            }
        };

        result.quality_score = Some(verdict.score);
        result.quality_feedback = Some(verdict.feedback.clone());
        let threshold = if task.is_foundation {
            self.config.quality_threshold.saturating_sub(1).max(1)
        } else {
            self.config.quality_threshold
        };

        if verdict.score >= threshold {
            self.breaker.record_pass();
            return Resolution::Complete {
                result,
                degraded: false,
            };
        }

        self.stats.quality_rejections += 1;
        self.health.record_quality_rejection(model);
        if self.breaker.record_rejection() {
            let rejections = self.breaker.consecutive_rejections();
            warn!(wave = self.wave, rejections, "quality gate disabled for the rest of the wave");
            self.events.emit(SwarmEvent::QualityCircuitBreakerTripped {
                wave: self.wave,
                rejections,
            });
            let reasoning = format!("{} consecutive rejections", rejections);
            self.decide("disable quality gate for wave", &reasoning);
        }

        if can_retry {
            Resolution::Retry {
                mode: FailureMode::Quality,
                feedback: Some(format!(
                    "Quality review scored {}/5 (needs {}): {}",
                    verdict.score, threshold, verdict.feedback
                )),
                result,
                reassign: None,
            }
        } else {
            Resolution::Complete {
                result,
                degraded: true,
            }
        }
    }

    fn apply(&mut self, id: &TaskId, resolution: Resolution) -> Result<Applied> {
        match resolution {
            Resolution::Complete { result, degraded } => {
                let model = result.model.clone();
                let quality_score = result.quality_score;
                let tokens_used = result.tokens_used;
                if degraded {
                    self.graph.mark_degraded(id, result)?;
                    self.stats.degraded += 1;
                    self.decide(
                        &format!("accept {} degraded", id),
                        "quality retries exhausted",
                    );
                } else {
                    let cascade = self.graph.mark_completed(id, result)?;
                    if cascade.first() == Some(id) {
                        self.announce_skips(&cascade);
                        return Ok(Applied::Skipped(cascade.len()));
                    }
                }
                self.events.emit(SwarmEvent::TaskCompleted {
                    task_id: id.clone(),
                    model,
                    degraded,
                    quality_score,
                    tokens_used,
                });
                Ok(Applied::Completed)
            }
            Resolution::Retry {
                mode,
                result,
                feedback,
                reassign,
            } => {
                if let Some(model) = &reassign {
                    self.graph.assign_model(id, model)?;
                }
                let attempt = self.graph.get_task(id).map(|t| t.attempts).unwrap_or(0);
                let cascade = self
                    .graph
                    .requeue(id, mode, Some(result), feedback, self.wave + 1)?;
                let will_retry = cascade.is_empty();
                if will_retry {
                    self.stats.retries += 1;
                }
                self.events.emit(SwarmEvent::TaskFailed {
                    task_id: id.clone(),
                    mode,
                    attempt,
                    will_retry,
                });
                self.announce_skips(&cascade);
                if will_retry {
                    Ok(Applied::Requeued)
                } else {
                    Ok(Applied::Skipped(cascade.len()))
                }
            }
            Resolution::Fail { mode, result } => {
                let attempt = self.graph.get_task(id).map(|t| t.attempts).unwrap_or(0);
                let cascade = self.graph.mark_failed(id, mode, Some(result))?;
                self.events.emit(SwarmEvent::TaskFailed {
                    task_id: id.clone(),
                    mode,
                    attempt,
                    will_retry: false,
                });
                self.announce_skips(&cascade);
                Ok(Applied::Failed(cascade.len()))
            }
        }
    }

    async fn review(&mut self) -> Result<()> {
        if !self.config.wave_review {
            return Ok(());
        }
        let Some(reviewer) = self.reviewer.clone() else {
            return Ok(());
        };

        self.transition(SwarmPhase::Reviewing)?;
        let wave_tasks: Vec<Task> = self
            .wave_dispatched
            .iter()
            .filter_map(|id| self.graph.get_task(id))
            .filter(|t| t.result.is_some())
            .cloned()
            .collect();
        match reviewer.review(self.wave, &wave_tasks).await {
            Ok(review) => {
                let added = self.add_fixups(review.fixups);
                let reasoning = if added > 0 {
                    format!("{} ({} fix-up tasks)", review.summary, added)
                } else {
                    review.summary
                };
                self.decide("review wave", &reasoning);
            }
            Err(e) => warn!(wave = self.wave, error = %e, "wave review failed"),
        }
        self.transition(SwarmPhase::Executing)
    }

    /// Run a verification round. Returns `true` when fix-ups were added and
    /// execution should continue.
    async fn verify(&mut self) -> Result<bool> {
        if !self.config.verification
            || self.stats.verification_rounds >= self.config.max_verification_rounds
        {
            return Ok(false);
        }
        let Some(verifier) = self.verifier.clone() else {
            return Ok(false);
        };

        self.transition(SwarmPhase::Verifying)?;
        self.stats.verification_rounds += 1;
        let verification = match verifier.verify(&self.goal, &self.graph.snapshot()).await {
            Ok(verification) => verification,
            Err(e) => {
                warn!(error = %e, "verification failed to run");
                self.decide("skip verification", &e.to_string());
                return Ok(false);
            }
        };

        if verification.passed {
            self.decide("verification passed", &verification.summary);
            return Ok(false);
        }

        let added = self.add_fixups(verification.fixups);
        if added == 0 {
            self.decide("verification failed", &verification.summary);
            return Ok(false);
        }
        let reasoning = format!("{} ({} fix-up tasks)", verification.summary, added);
        self.decide("verification requested fixes", &reasoning);
        self.transition(SwarmPhase::Executing)?;
        Ok(true)
    }

    fn add_fixups(&mut self, fixups: Vec<Task>) -> usize {
        if fixups.is_empty() {
            return 0;
        }
        let added = self.graph.add_tasks(fixups);
        self.stats.fixups_added += added.len() as u32;
        added.len()
    }

    async fn synthesize(&mut self) -> Result<SwarmOutcome> {
        self.transition(SwarmPhase::Synthesizing)?;

        let stuck = self.graph.stuck_tasks();
        if !stuck.is_empty() && !self.cancel.is_cancelled() && !self.budget_exhausted {
            let ids: Vec<String> = stuck.iter().map(|id| id.to_string()).collect();
            warn!(tasks = %ids.join(", "), "tasks can never become ready");
            self.decide("leave unreachable tasks", &ids.join(", "));
        }

        let counts = self.graph.counts();
        let total = self.graph.len();
        let success = total > 0 && counts.completed == total;
        let status = if success {
            SwarmStatus::Completed
        } else if counts.completed > 0 {
            SwarmStatus::Partial
        } else {
            SwarmStatus::Failed
        };

        let budget = self.budget.snapshot();
        self.stats.tokens_used = budget.tokens_used;
        self.stats.cost_usd = budget.cost_usd;

        let mut summary = format!(
            "{}/{} tasks completed ({} failed, {} skipped) in {} waves; {} tokens, ${:.2}",
            counts.completed,
            total,
            counts.failed,
            counts.skipped,
            self.stats.waves,
            budget.tokens_used,
            budget.cost_usd
        );
        if self.budget_exhausted {
            summary.push_str("; budget exhausted");
        }
        let abort_reason = if self.cancel.is_cancelled() {
            summary.push_str("; cancelled");
            Some("run cancelled".to_string())
        } else {
            None
        };

        let terminal = if status == SwarmStatus::Failed {
            SwarmPhase::Failed
        } else {
            SwarmPhase::Completed
        };
        self.transition(terminal)?;
        self.save_checkpoint().await;

        info!(session_id = %self.session_id.short(), %status, "{}", summary);
        Ok(self.finish(status, summary, abort_reason))
    }

    /// Stop before execution.
    async fn abort(&mut self, reason: &str) -> Result<SwarmOutcome> {
        warn!(session_id = %self.session_id.short(), reason, "swarm run aborted");
        self.decide("abort", reason);
        if !self.phase.current().is_terminal() {
            self.transition(SwarmPhase::Failed)?;
        }
        self.save_checkpoint().await;
        let summary = format!("aborted: {}", reason);
        Ok(self.finish(SwarmStatus::Failed, summary, Some(reason.to_string())))
    }

    fn finish(
        &mut self,
        status: SwarmStatus,
        summary: String,
        abort_reason: Option<String>,
    ) -> SwarmOutcome {
        let success = status == SwarmStatus::Completed;
        self.events.emit(SwarmEvent::SwarmCompleted {
            session_id: self.session_id,
            success,
            summary: summary.clone(),
        });
        SwarmOutcome {
            session_id: self.session_id,
            status,
            success,
            summary,
            stats: self.stats.clone(),
            tasks: self.graph.snapshot(),
            abort_reason,
            budget_exhausted: self.budget_exhausted,
            decisions: self.decisions.clone(),
        }
    }

    /// Capture the run as it stands.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            session_id: self.session_id,
            goal: self.goal.clone(),
            phase: self.phase.current(),
            wave: self.wave,
            tasks: self.graph.snapshot(),
            stats: self.stats.clone(),
            health: self.health.snapshot(),
            decisions: self.decisions.clone(),
            budget: self.budget.snapshot(),
            saved_at: Utc::now(),
        }
    }

    async fn save_checkpoint(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let checkpoint = self.checkpoint();
        match store.save(&checkpoint).await {
            Ok(()) => self.events.emit(SwarmEvent::CheckpointSaved {
                session_id: self.session_id,
                wave: self.wave,
            }),
            Err(e) => warn!(session_id = %self.session_id.short(), error = %e, "checkpoint save failed"),
        }
    }

    fn transition(&mut self, to: SwarmPhase) -> Result<()> {
        let from = self.phase.current();
        if from == to {
            return Ok(());
        }
        self.phase.transition(to)?;
        debug!(%from, %to, "phase changed");
        self.events.emit(SwarmEvent::PhaseChanged { from, to });
        Ok(())
    }

    fn decide(&mut self, decision: &str, reasoning: &str) {
        let record = DecisionRecord::new(self.wave, self.phase.current(), decision, reasoning);
        info!(wave = self.wave, decision, reasoning, "orchestrator decision");
        self.events
            .emit(SwarmEvent::OrchestratorDecision(record.clone()));
        self.decisions.push(record);
    }

    fn record_failover(&mut self, task_id: &TaskId, from: &str, to: &str) {
        self.stats.failovers += 1;
        info!(task_id = %task_id, from, to, "model failover");
        self.events.emit(SwarmEvent::ModelFailover {
            task_id: task_id.clone(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    fn announce_skips(&self, skipped: &[TaskId]) {
        for id in skipped {
            debug!(task_id = %id, "task skipped");
            self.events.emit(SwarmEvent::TaskSkipped {
                task_id: id.clone(),
                reason: "dependency failed".to_string(),
            });
        }
    }
}

/// Effect of applying a resolution, for the wave summary.
enum Applied {
    Completed,
    /// Number of dependents skipped by the cascade.
    Failed(usize),
    /// The task itself was skipped, with this many tasks in total.
    Skipped(usize),
    Requeued,
}
