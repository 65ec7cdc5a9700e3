//! Task graph scenarios: partial-dependency thresholds, timeout-lenient
//! cascades and cascade idempotence, driven directly against `TaskGraph`.

use swarm::core::task::{FailureMode, Task, TaskId, TaskStatus};
use swarm::core::{HollowDetector, TaskGraph};

use crate::fixtures::{completed_result, diamond_tail};

fn graph(threshold: f64, tasks: Vec<Task>) -> TaskGraph {
    let mut graph = TaskGraph::new(threshold, 2_000, HollowDetector::default());
    graph.load(tasks);
    graph.recompute();
    graph
}

fn complete(graph: &mut TaskGraph, id: &str) {
    let id = TaskId::from(id);
    graph.mark_dispatched(&id, "model-a").unwrap();
    graph.mark_completed(&id, completed_result("model-a")).unwrap();
}

fn status(graph: &TaskGraph, id: &str) -> TaskStatus {
    graph.get_task(&TaskId::from(id)).unwrap().status
}

/// Given A, B -> C -> D with threshold 1.0
/// When C fails with an error
/// Then D is skipped with a cascade failure mode
#[test]
fn test_error_failure_skips_single_dependency_dependent() {
    let mut graph = graph(1.0, diamond_tail());
    complete(&mut graph, "A");
    complete(&mut graph, "B");
    graph.recompute();
    assert_eq!(status(&graph, "C"), TaskStatus::Ready);

    let c = TaskId::from("C");
    graph.mark_dispatched(&c, "model-a").unwrap();
    let skipped = graph.mark_failed(&c, FailureMode::Error, None).unwrap();

    assert_eq!(skipped, vec![TaskId::from("D")]);
    let d = graph.get_task(&TaskId::from("D")).unwrap();
    assert_eq!(d.status, TaskStatus::Skipped);
    assert_eq!(d.failure_mode, Some(FailureMode::Cascade));
}

/// Given A, B -> C -> D with threshold 1.0
/// When C fails by timing out
/// Then D becomes ready with C listed as a failed dependency
#[test]
fn test_timeout_failure_keeps_dependent_alive() {
    let mut graph = graph(1.0, diamond_tail());
    complete(&mut graph, "A");
    complete(&mut graph, "B");
    graph.recompute();

    let c = TaskId::from("C");
    graph.mark_dispatched(&c, "model-a").unwrap();
    let skipped = graph.mark_failed(&c, FailureMode::Timeout, None).unwrap();

    assert!(skipped.is_empty());
    let d = graph.get_task(&TaskId::from("D")).unwrap();
    assert_eq!(d.status, TaskStatus::Ready);
    let partial = d.partial_context.as_ref().unwrap();
    assert_eq!(partial.failed, vec![TaskId::from("C")]);
    assert!(partial.succeeded.is_empty());
}

/// Given C depending on A and B with threshold 0.5
/// When A completes and B fails
/// Then C proceeds with partial context naming both sides
#[test]
fn test_partial_threshold_allows_half_the_dependencies() {
    let mut graph = graph(0.5, diamond_tail());
    complete(&mut graph, "A");

    let b = TaskId::from("B");
    graph.mark_dispatched(&b, "model-a").unwrap();
    let skipped = graph.mark_failed(&b, FailureMode::Error, None).unwrap();
    assert!(skipped.is_empty());

    graph.recompute();
    let c = graph.get_task(&TaskId::from("C")).unwrap();
    assert_eq!(c.status, TaskStatus::Ready);
    let partial = c.partial_context.as_ref().unwrap();
    assert_eq!(partial.succeeded, vec![TaskId::from("A")]);
    assert_eq!(partial.failed, vec![TaskId::from("B")]);
    assert!(c.dependency_context.is_some());
}

/// Given C depending on A and B with threshold 1.0
/// When B fails before A finishes
/// Then C and its dependent D are skipped without waiting for A
#[test]
fn test_unreachable_threshold_skips_early() {
    let mut graph = graph(1.0, diamond_tail());
    let b = TaskId::from("B");
    graph.mark_dispatched(&b, "model-a").unwrap();
    let skipped = graph.mark_failed(&b, FailureMode::Error, None).unwrap();

    assert_eq!(skipped, vec![TaskId::from("C"), TaskId::from("D")]);
    assert_eq!(status(&graph, "A"), TaskStatus::Ready);
}

/// Given a chain that has already cascaded
/// When the same failure is cascaded again
/// Then nothing changes
#[test]
fn test_cascade_is_idempotent() {
    let tasks = vec![
        Task::new("A", "root"),
        Task::new("B", "middle").with_dependencies(["A"]),
        Task::new("C", "leaf").with_dependencies(["B"]),
    ];
    let mut graph = graph(0.5, tasks);
    let a = TaskId::from("A");
    graph.mark_dispatched(&a, "model-a").unwrap();
    let first = graph.mark_failed(&a, FailureMode::Error, None).unwrap();
    assert_eq!(first.len(), 2);

    let before = graph.counts();
    let second = graph.cascade_skip(&a, FailureMode::Error);
    assert!(second.is_empty());
    assert_eq!(graph.counts(), before);
    assert_eq!(before.skipped, 2);
    assert_eq!(before.failed, 1);
}

/// Given a task that depends on an id the graph does not know
/// When readiness is computed
/// Then the task stays pending and is reported as stuck once the rest settles
#[test]
fn test_unknown_dependency_never_becomes_ready() {
    let tasks = vec![
        Task::new("A", "root"),
        Task::new("B", "orphan").with_dependencies(["MISSING"]),
    ];
    let mut graph = graph(0.5, tasks);
    assert_eq!(status(&graph, "B"), TaskStatus::Pending);
    assert_eq!(graph.ready_tasks().len(), 1);
    assert!(graph.stuck_tasks().is_empty());

    complete(&mut graph, "A");
    graph.recompute();
    assert_eq!(status(&graph, "B"), TaskStatus::Pending);
    assert_eq!(graph.stuck_tasks(), vec![TaskId::from("B")]);
}
