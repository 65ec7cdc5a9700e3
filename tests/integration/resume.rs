//! Checkpoint and resume integration tests.
//!
//! A run is stopped at a wave boundary through its cancellation token, then
//! a fresh orchestrator picks the session up from the same store.

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use swarm::core::task::{Task, TaskId, TaskStatus};
use swarm::orchestration::{
    CheckpointStore, EventSink, FileCheckpointStore, MemoryCheckpointStore, SwarmOrchestrator,
};
use swarm::workflow::{SessionId, SwarmStatus};
use swarm::Error;

use crate::fixtures::{config_with_models, Behavior, FixedDecomposer, ScriptedSpawner};

fn pipeline() -> Vec<Task> {
    vec![
        Task::new("A", "gather requirements"),
        Task::new("B", "implement").with_dependencies(["A"]),
        Task::new("C", "test").with_dependencies(["B"]),
    ]
}

/// Run the pipeline until A finishes, then stop. Returns the session id.
async fn interrupted_run(store: Arc<dyn CheckpointStore>) -> SessionId {
    let token = CancellationToken::new();
    let spawner = Arc::new(ScriptedSpawner::new().script("A", Behavior::CancelAfter(token.clone())));
    let mut orch = SwarmOrchestrator::new(
        config_with_models(&["model-a"]),
        spawner.clone(),
        EventSink::disabled(),
    )
    .unwrap()
    .with_decomposer(Arc::new(FixedDecomposer(pipeline())))
    .with_checkpoint_store(store)
    .with_cancellation(token);

    let outcome = orch.run("ship the feature").await.unwrap();

    assert_eq!(outcome.status, SwarmStatus::Partial);
    assert_eq!(outcome.abort_reason.as_deref(), Some("run cancelled"));
    assert!(outcome.summary.ends_with("; cancelled"));
    assert_eq!(spawner.dispatched_ids(), vec!["A".to_string()]);
    outcome.session_id
}

/// Given a run stopped after its first wave
/// When a new orchestrator resumes it from a memory store
/// Then only the unfinished tasks are dispatched
#[tokio::test]
async fn test_resume_skips_completed_tasks() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let session_id = interrupted_run(store.clone()).await;

    let checkpoint = store.load(&session_id).await.unwrap().unwrap();
    let a = checkpoint
        .tasks
        .iter()
        .find(|t| t.id.as_str() == "A")
        .unwrap();
    assert_eq!(a.status, TaskStatus::Completed);

    let spawner = Arc::new(ScriptedSpawner::new());
    let mut orch = SwarmOrchestrator::new(
        config_with_models(&["model-a"]),
        spawner.clone(),
        EventSink::disabled(),
    )
    .unwrap()
    .with_checkpoint_store(store.clone());

    let outcome = orch.resume(session_id).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.session_id, session_id);
    assert_eq!(spawner.dispatched_ids(), vec!["B".to_string(), "C".to_string()]);
    assert_eq!(outcome.stats.waves, 3);
    assert_eq!(outcome.stats.tokens_used, 3_000);
    assert!(orch.decisions().iter().any(|d| d.decision == "resume"));
}

/// Given a run checkpointed to disk
/// When it is resumed through a new file store on the same directory
/// Then the results from before the interruption are kept
#[tokio::test]
async fn test_resume_from_file_store() {
    let dir = TempDir::new().unwrap();
    let session_id = interrupted_run(Arc::new(FileCheckpointStore::new(dir.path()))).await;

    let store = FileCheckpointStore::new(dir.path());
    assert_eq!(store.list_sessions().await.unwrap(), vec![session_id]);

    let spawner = Arc::new(ScriptedSpawner::new());
    let mut orch = SwarmOrchestrator::new(
        config_with_models(&["model-a"]),
        spawner.clone(),
        EventSink::disabled(),
    )
    .unwrap()
    .with_checkpoint_store(Arc::new(store));

    let outcome = orch.resume(session_id).await.unwrap();

    assert_eq!(outcome.status, SwarmStatus::Completed);
    assert_eq!(spawner.attempts_for("A"), 0);
    let a = orch.graph().get_task(&TaskId::from("A")).unwrap();
    assert!(a.result.as_ref().unwrap().output.starts_with("A implemented"));
}

/// Given an empty store
/// When an unknown session is resumed
/// Then SessionNotFound is returned
#[tokio::test]
async fn test_resume_unknown_session() {
    let mut orch = SwarmOrchestrator::new(
        config_with_models(&["model-a"]),
        Arc::new(ScriptedSpawner::new()),
        EventSink::disabled(),
    )
    .unwrap()
    .with_checkpoint_store(Arc::new(MemoryCheckpointStore::new()));

    let result = orch.resume(SessionId::new()).await;
    assert!(matches!(result, Err(Error::SessionNotFound(_))));
}
