//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted worker spawners with per-task behavior
//! - Fixed decomposers, quality gates, reviewers, verifiers and probes
//! - Configs with one or more worker models

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use swarm::config::{SwarmConfig, WorkerCapability, WorkerDefinition};
use swarm::core::task::{Task, TaskResult};
use swarm::orchestration::{
    CapabilityProbe, Decomposer, QualityGate, QualityVerdict, SwarmEvent, Verification, Verifier,
    WaveReview, WaveReviewer, WorkerMetrics, WorkerOutput, WorkerRequest, WorkerSpawner,
};
use swarm::{Error, Result};

/// How the scripted spawner answers for a given task.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Substantive output with token usage.
    Succeed,
    /// Worker error on every attempt.
    Fail,
    /// Claims success but does nothing.
    Hollow,
    /// Never returns on the named model, succeeds elsewhere.
    HangOn(&'static str),
    /// Never returns on any model.
    Hang,
    /// Cancel the given token, then succeed.
    CancelAfter(CancellationToken),
}

/// Spawner whose answers are scripted per task id.
///
/// Tasks without a script succeed. Every request is recorded, and the
/// highest number of simultaneous dispatches is tracked.
pub struct ScriptedSpawner {
    scripts: HashMap<String, Behavior>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<WorkerRequest>>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn script(mut self, task_id: &str, behavior: Behavior) -> Self {
        self.scripts.insert(task_id.to_string(), behavior);
        self
    }

    /// Hold every dispatch open for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<WorkerRequest> {
        self.requests.lock().clone()
    }

    /// Task ids in dispatch order, one entry per attempt.
    pub fn dispatched_ids(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.task.id.to_string())
            .collect()
    }

    pub fn attempts_for(&self, task_id: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.task.id.as_str() == task_id)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerSpawner for ScriptedSpawner {
    async fn spawn(&self, request: WorkerRequest) -> Result<WorkerOutput> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let id = request.task.id.to_string();
        let model = request.model.clone();
        self.requests.lock().push(request);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = self.scripts.get(&id).cloned().unwrap_or(Behavior::Succeed);
        let answer = match behavior {
            Behavior::Succeed => Ok(substantive_output(&id)),
            Behavior::Fail => Err(Error::Worker(format!("{} crashed", id))),
            Behavior::Hollow => Ok(WorkerOutput {
                success: true,
                output: "done".to_string(),
                ..Default::default()
            }),
            Behavior::HangOn(hang_model) if hang_model == model => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::HangOn(_) => Ok(substantive_output(&id)),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::CancelAfter(token) => {
                token.cancel();
                Ok(substantive_output(&id))
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

pub fn substantive_output(task_id: &str) -> WorkerOutput {
    WorkerOutput {
        success: true,
        output: format!(
            "{} implemented: added the module, wired it into the build and ran the test suite",
            task_id
        ),
        metrics: WorkerMetrics {
            tokens: 1_000,
            cost_usd: 0.02,
            duration_ms: 10,
            tool_calls: 3,
        },
        ..Default::default()
    }
}

/// A successful result for driving the task graph directly.
pub fn completed_result(model: &str) -> TaskResult {
    TaskResult {
        success: true,
        output: "wrote the parser and its tests, all passing".to_string(),
        tool_calls: 4,
        tokens_used: 800,
        ..TaskResult::empty(model, 25)
    }
}

/// Always returns the same task list.
pub struct FixedDecomposer(pub Vec<Task>);

#[async_trait]
impl Decomposer for FixedDecomposer {
    async fn decompose(&self, _goal: &str) -> Result<Vec<Task>> {
        Ok(self.0.clone())
    }
}

/// Scores every result the same.
pub struct ConstantGate(pub u8);

#[async_trait]
impl QualityGate for ConstantGate {
    async fn evaluate(&self, _task: &Task, _result: &TaskResult) -> Result<QualityVerdict> {
        Ok(QualityVerdict {
            score: self.0,
            feedback: "missing error handling".to_string(),
        })
    }
}

/// Records which tasks each wave review was shown.
///
/// Optionally asks for one fix-up task after a chosen wave.
pub struct RecordingReviewer {
    fixup_after: Option<(u32, &'static str)>,
    calls: Mutex<Vec<(u32, Vec<String>)>>,
}

impl RecordingReviewer {
    pub fn new() -> Self {
        Self {
            fixup_after: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fixup(mut self, wave: u32, task_id: &'static str) -> Self {
        self.fixup_after = Some((wave, task_id));
        self
    }

    /// `(wave, task ids)` for every review, in order.
    pub fn calls(&self) -> Vec<(u32, Vec<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WaveReviewer for RecordingReviewer {
    async fn review(&self, wave: u32, tasks: &[Task]) -> Result<WaveReview> {
        let ids = tasks.iter().map(|t| t.id.to_string()).collect();
        self.calls.lock().push((wave, ids));

        let fixups = match self.fixup_after {
            Some((fix_wave, id)) if fix_wave == wave => {
                vec![Task::new(id, "add the missing error handling")]
            }
            _ => Vec::new(),
        };
        Ok(WaveReview {
            summary: format!("wave {} reviewed", wave),
            fixups,
        })
    }
}

/// Passes every verification round and counts them.
#[derive(Default)]
pub struct CountingVerifier {
    rounds: AtomicUsize,
}

impl CountingVerifier {
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for CountingVerifier {
    async fn verify(&self, _goal: &str, _tasks: &[Task]) -> Result<Verification> {
        self.rounds.fetch_add(1, Ordering::SeqCst);
        Ok(Verification {
            passed: true,
            summary: "goal met".to_string(),
            fixups: Vec::new(),
        })
    }
}

/// Reports every model as unable to do its job.
pub struct RejectingProbe;

#[async_trait]
impl CapabilityProbe for RejectingProbe {
    async fn probe(&self, _model: &str, _capabilities: &[WorkerCapability]) -> Result<bool> {
        Ok(false)
    }
}

fn coder(name: &str, model: &str) -> WorkerDefinition {
    WorkerDefinition::new(
        name,
        model,
        vec![
            WorkerCapability::Code,
            WorkerCapability::Research,
            WorkerCapability::Test,
        ],
    )
}

/// Config with one coding worker per model, in the given order.
pub fn config_with_models(models: &[&str]) -> SwarmConfig {
    SwarmConfig {
        max_concurrency: 3,
        workers: models
            .iter()
            .enumerate()
            .map(|(i, model)| coder(&format!("worker-{}", i), model))
            .collect(),
        ..Default::default()
    }
}

/// A, B -> C -> D
pub fn diamond_tail() -> Vec<Task> {
    vec![
        Task::new("A", "scan the existing modules"),
        Task::new("B", "collect the failing cases"),
        Task::new("C", "implement the fix").with_dependencies(["A", "B"]),
        Task::new("D", "document the change").with_dependencies(["C"]),
    ]
}

/// Independent tasks T0..Tn.
pub fn independent_tasks(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| Task::new(format!("T{}", i), "independent chunk of work"))
        .collect()
}

/// Everything currently buffered on an event receiver.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<SwarmEvent>) -> Vec<SwarmEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
