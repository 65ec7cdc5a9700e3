//! End-to-end swarm runs through `SwarmOrchestrator` with scripted workers.
//!
//! Covers the concurrency cap, budget accounting, timeout failover, the
//! timeout-lenient cascade, deferred skips, the quality circuit breaker,
//! wave review, capability probes and the event stream.

use std::sync::Arc;
use std::time::Duration;

use swarm::config::{ProbeFailureStrategy, SwarmConfig, TaskTypeConfig};
use swarm::core::task::{FailureMode, Task, TaskId, TaskStatus};
use swarm::orchestration::{EventSink, MemoryCheckpointStore, SwarmEvent, SwarmOrchestrator};
use swarm::workflow::{SwarmPhase, SwarmStatus};

use crate::fixtures::{
    config_with_models, drain, independent_tasks, Behavior, ConstantGate, CountingVerifier,
    FixedDecomposer, RecordingReviewer, RejectingProbe, ScriptedSpawner,
};

fn orchestrator(
    config: SwarmConfig,
    spawner: Arc<ScriptedSpawner>,
    tasks: Vec<Task>,
    events: EventSink,
) -> SwarmOrchestrator {
    SwarmOrchestrator::new(config, spawner, events)
        .unwrap()
        .with_decomposer(Arc::new(FixedDecomposer(tasks)))
}

// ========== Dispatch Tests ==========

/// Given six independent tasks and a concurrency cap of 2
/// When the swarm runs
/// Then never more than two workers run at once and all tasks complete in one wave
#[tokio::test(start_paused = true)]
async fn test_concurrency_cap_is_respected() {
    let mut config = config_with_models(&["model-a"]);
    config.max_concurrency = 2;
    let spawner = Arc::new(ScriptedSpawner::new().with_delay(Duration::from_millis(50)));
    let mut orch = orchestrator(
        config,
        spawner.clone(),
        independent_tasks(6),
        EventSink::disabled(),
    );

    let outcome = orch.run("split the work").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.stats.waves, 1);
    assert_eq!(spawner.max_in_flight(), 2);
    assert_eq!(spawner.dispatched_ids().len(), 6);
}

/// Given a mix of succeeding, erroring and hollow tasks
/// When the run finishes
/// Then every reservation has been released and only real usage is charged
#[tokio::test]
async fn test_budget_reservations_never_leak() {
    let spawner = Arc::new(
        ScriptedSpawner::new()
            .script("T0", Behavior::Fail)
            .script("T1", Behavior::Hollow),
    );
    let mut orch = orchestrator(
        config_with_models(&["model-a"]),
        spawner.clone(),
        independent_tasks(3),
        EventSink::disabled(),
    );

    let outcome = orch.run("mixed results").await.unwrap();

    assert_eq!(outcome.status, SwarmStatus::Partial);
    let budget = orch.budget().snapshot();
    assert_eq!(budget.tokens_reserved, 0);
    assert_eq!(budget.active_reservations, 0);
    assert_eq!(budget.tokens_used, 1_000);
    assert_eq!(spawner.attempts_for("T2"), 1);
    for id in ["T0", "T1"] {
        let task = orch.graph().get_task(&TaskId::from(id)).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }
}

/// Given a budget that covers two of three tasks at a time and verification on
/// When the third task is deferred in wave 1
/// Then it runs in wave 2, verification still happens and the budget is not
/// reported as exhausted
#[tokio::test]
async fn test_deferred_task_runs_once_budget_frees_up() {
    let mut config = config_with_models(&["model-a"]);
    config.total_token_budget = 100_000;
    config.verification = true;
    let verifier = Arc::new(CountingVerifier::default());
    let spawner = Arc::new(ScriptedSpawner::new());
    let mut orch = orchestrator(
        config,
        spawner.clone(),
        independent_tasks(3),
        EventSink::disabled(),
    )
    .with_verifier(verifier.clone());

    let outcome = orch.run("tight budget").await.unwrap();

    assert!(outcome.success);
    assert!(!outcome.budget_exhausted);
    assert!(!outcome.summary.contains("budget exhausted"));
    assert_eq!(outcome.stats.waves, 2);
    assert_eq!(outcome.stats.verification_rounds, 1);
    assert_eq!(verifier.rounds(), 1);
    let mut dispatched = spawner.dispatched_ids();
    assert_eq!(dispatched.pop().as_deref(), Some("T2"));
    dispatched.sort();
    assert_eq!(dispatched, vec!["T0", "T1"]);
    assert!(outcome
        .decisions
        .iter()
        .any(|d| d.decision == "defer dispatch" && d.reasoning.contains("T2")));
}

// ========== Failover Tests ==========

/// Given a task that hangs on model-a and works on model-b
/// When it times out repeatedly on model-a
/// Then it is moved to model-b and completes there
#[tokio::test(start_paused = true)]
async fn test_consecutive_timeouts_fail_over_to_another_model() {
    let (events, mut rx) = EventSink::channel();
    let spawner = Arc::new(ScriptedSpawner::new().script("X", Behavior::HangOn("model-a")));
    let mut orch = orchestrator(
        config_with_models(&["model-a", "model-b"]),
        spawner.clone(),
        vec![Task::new("X", "slow on the first model")],
        events,
    );

    let outcome = orch.run("fail over").await.unwrap();

    assert!(outcome.success);
    let task = orch.graph().get_task(&TaskId::from("X")).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_ref().unwrap().model, "model-b");
    assert!(outcome.stats.timeouts >= 1);
    assert!(outcome.stats.failovers >= 1);
    assert!(!orch.health().is_healthy("model-a"));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        SwarmEvent::ModelFailover { from, to, .. } if from == "model-a" && to == "model-b"
    )));
    assert!(orch
        .decisions()
        .iter()
        .any(|d| d.decision.starts_with("fail over")));
}

/// Given A -> B where A hangs on every model
/// When A runs out of attempts by timing out
/// Then B still runs, told that A failed, and the run is partial
#[tokio::test(start_paused = true)]
async fn test_timed_out_dependency_does_not_cascade() {
    let spawner = Arc::new(ScriptedSpawner::new().script("A", Behavior::Hang));
    let tasks = vec![
        Task::new("A", "probe the slow service"),
        Task::new("B", "write the report").with_dependencies(["A"]),
    ];
    let mut orch = orchestrator(
        config_with_models(&["model-a", "model-b"]),
        spawner.clone(),
        tasks,
        EventSink::disabled(),
    );

    let outcome = orch.run("report anyway").await.unwrap();

    assert_eq!(outcome.status, SwarmStatus::Partial);
    let a = orch.graph().get_task(&TaskId::from("A")).unwrap();
    assert_eq!(a.status, TaskStatus::Failed);
    assert_eq!(a.failure_mode, Some(FailureMode::Timeout));
    assert_eq!(
        orch.graph().get_task(&TaskId::from("B")).unwrap().status,
        TaskStatus::Completed
    );

    let requests = spawner.requests();
    let b = requests
        .iter()
        .find(|r| r.task.id.as_str() == "B")
        .unwrap();
    let partial = b.partial_context.as_ref().unwrap();
    assert_eq!(partial.failed, vec![TaskId::from("A")]);
}

/// Given A -> B where A keeps erroring
/// When A fails for good
/// Then B is skipped without ever being dispatched
#[tokio::test]
async fn test_failed_dependency_cascades() {
    let spawner = Arc::new(ScriptedSpawner::new().script("A", Behavior::Fail));
    let tasks = vec![
        Task::new("A", "build the base"),
        Task::new("B", "extend the base").with_dependencies(["A"]),
    ];
    let mut orch = orchestrator(
        config_with_models(&["model-a"]),
        spawner.clone(),
        tasks,
        EventSink::disabled(),
    );

    let outcome = orch.run("extend").await.unwrap();

    assert_eq!(outcome.status, SwarmStatus::Failed);
    assert_eq!(spawner.attempts_for("B"), 0);
    let b = orch.graph().get_task(&TaskId::from("B")).unwrap();
    assert_eq!(b.status, TaskStatus::Skipped);
    assert_eq!(orch.phase(), SwarmPhase::Failed);
}

/// Given A -> B where B was handed over already ready and A fails for good
/// When both run in the same wave and B comes back hollow
/// Then B's retry is replaced by the deferred cascade skip
#[tokio::test]
async fn test_in_flight_dependent_is_skipped_after_hollow_result() {
    let spawner = Arc::new(
        ScriptedSpawner::new()
            .script("A", Behavior::Fail)
            .script("B", Behavior::Hollow),
    );
    let tasks = vec![
        Task::new("A", "migrate the schema").with_overrides(TaskTypeConfig {
            retries: Some(0),
            ..Default::default()
        }),
        Task {
            status: TaskStatus::Ready,
            ..Task::new("B", "backfill the new column").with_dependencies(["A"])
        },
    ];
    let mut orch = orchestrator(
        config_with_models(&["model-a"]),
        spawner.clone(),
        tasks,
        EventSink::disabled(),
    );

    let outcome = orch.run("migrate").await.unwrap();

    assert_eq!(outcome.status, SwarmStatus::Failed);
    assert_eq!(outcome.stats.waves, 1);
    assert_eq!(spawner.attempts_for("A"), 1);
    assert_eq!(spawner.attempts_for("B"), 1);
    assert_eq!(
        orch.graph().get_task(&TaskId::from("A")).unwrap().status,
        TaskStatus::Failed
    );
    let b = orch.graph().get_task(&TaskId::from("B")).unwrap();
    assert_eq!(b.status, TaskStatus::Skipped);
    assert!(b.result.is_some());
}

// ========== Quality Gate Tests ==========

/// Given a gate that rejects everything and a breaker threshold of 2
/// When a wave of three tasks is judged
/// Then the breaker trips and the remaining results are accepted
#[tokio::test]
async fn test_quality_circuit_breaker_trips() {
    let mut config = config_with_models(&["model-a"]);
    config.quality_breaker_threshold = 2;
    let (events, mut rx) = EventSink::channel();
    let spawner = Arc::new(ScriptedSpawner::new());
    let mut orch = orchestrator(config, spawner, independent_tasks(3), events)
        .with_quality_gate(Arc::new(ConstantGate(1)));

    let outcome = orch.run("judge harshly").await.unwrap();

    assert!(outcome.success);
    assert_eq!(orch.graph().counts().completed, 3);
    assert!(outcome.stats.quality_rejections >= 2);
    assert!(outcome.stats.degraded >= 1);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        SwarmEvent::QualityCircuitBreakerTripped { wave: 1, rejections: 2 }
    )));
}

// ========== Review Tests ==========

/// Given A -> B and an independent C with wave review on
/// When the swarm runs two waves
/// Then each review sees only the tasks dispatched in its own wave
#[tokio::test]
async fn test_review_sees_only_its_own_wave() {
    let mut config = config_with_models(&["model-a"]);
    config.wave_review = true;
    let reviewer = Arc::new(RecordingReviewer::new());
    let tasks = vec![
        Task::new("A", "parse the input"),
        Task::new("B", "validate the parsed input").with_dependencies(["A"]),
        Task::new("C", "write the changelog"),
    ];
    let mut orch = orchestrator(
        config,
        Arc::new(ScriptedSpawner::new()),
        tasks,
        EventSink::disabled(),
    )
    .with_reviewer(reviewer.clone());

    let outcome = orch.run("parse").await.unwrap();

    assert!(outcome.success);
    assert_eq!(
        reviewer.calls(),
        vec![
            (1, vec!["A".to_string(), "C".to_string()]),
            (2, vec!["B".to_string()]),
        ]
    );
}

/// Given a reviewer that asks for a fix-up after wave 1
/// When the swarm runs
/// Then the fix-up is added to the graph and completed in wave 2
#[tokio::test]
async fn test_wave_review_fixups_are_executed() {
    let mut config = config_with_models(&["model-a"]);
    config.wave_review = true;
    let reviewer = Arc::new(RecordingReviewer::new().with_fixup(1, "FIX"));
    let spawner = Arc::new(ScriptedSpawner::new());
    let mut orch = orchestrator(
        config,
        spawner.clone(),
        independent_tasks(2),
        EventSink::disabled(),
    )
    .with_reviewer(reviewer.clone());

    let outcome = orch.run("review as we go").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.stats.fixups_added, 1);
    assert_eq!(outcome.stats.waves, 2);
    assert_eq!(outcome.tasks.len(), 3);
    assert_eq!(spawner.attempts_for("FIX"), 1);
    assert_eq!(
        orch.graph().get_task(&TaskId::from("FIX")).unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(reviewer.calls()[1], (2, vec!["FIX".to_string()]));
    assert!(orch
        .decisions()
        .iter()
        .any(|d| d.decision == "review wave" && d.reasoning.contains("1 fix-up tasks")));
}

// ========== Capability Probe Tests ==========

/// Given probes enabled with the abort strategy and a probe that fails every model
/// When the swarm runs
/// Then it aborts before dispatching anything and the models are unhealthy
#[tokio::test]
async fn test_failed_capability_probe_aborts_run() {
    let mut config = config_with_models(&["model-a", "model-b"]);
    config.capability_probe = true;
    config.probe_failure_strategy = ProbeFailureStrategy::Abort;
    let spawner = Arc::new(ScriptedSpawner::new());
    let mut orch = orchestrator(
        config,
        spawner.clone(),
        independent_tasks(2),
        EventSink::disabled(),
    )
    .with_probe(Arc::new(RejectingProbe));

    let outcome = orch.run("probe first").await.unwrap();

    assert_eq!(outcome.status, SwarmStatus::Failed);
    assert!(outcome
        .abort_reason
        .as_deref()
        .is_some_and(|r| r.contains("capability probe")));
    assert!(spawner.dispatched_ids().is_empty());
    assert_eq!(outcome.stats.dispatches, 0);
    assert!(!orch.health().is_healthy("model-a"));
    assert!(!orch.health().is_healthy("model-b"));
    assert_eq!(orch.phase(), SwarmPhase::Failed);
}

// ========== Event Tests ==========

/// Given a two-task chain with a checkpoint store
/// When the swarm runs
/// Then the event stream starts with SwarmStarted, ends with SwarmCompleted
/// and reports both waves and their checkpoints
#[tokio::test]
async fn test_event_stream_brackets_the_run() {
    let (events, mut rx) = EventSink::channel();
    let store = Arc::new(MemoryCheckpointStore::new());
    let tasks = vec![
        Task::new("A", "first"),
        Task::new("B", "second").with_dependencies(["A"]),
    ];
    let mut orch = orchestrator(
        config_with_models(&["model-a"]),
        Arc::new(ScriptedSpawner::new()),
        tasks,
        events,
    )
    .with_checkpoint_store(store.clone());

    let outcome = orch.run("chain").await.unwrap();
    let events = drain(&mut rx);

    assert!(matches!(events.first(), Some(SwarmEvent::SwarmStarted { tasks: 2, .. })));
    assert!(matches!(
        events.last(),
        Some(SwarmEvent::SwarmCompleted { success: true, .. })
    ));
    let waves: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            SwarmEvent::WaveStarted { wave, .. } => Some(*wave),
            _ => None,
        })
        .collect();
    assert_eq!(waves, vec![1, 2]);
    assert!(events
        .iter()
        .any(|e| matches!(e, SwarmEvent::CheckpointSaved { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        SwarmEvent::PhaseChanged {
            to: SwarmPhase::Completed,
            ..
        }
    )));
    assert_eq!(store.len(), 1);
    assert_eq!(outcome.stats.dispatches, 2);
}
