//! Core domain models for swarm orchestration.
//!
//! This module contains the task model, the task graph that tracks
//! dependencies and readiness, and hollow-completion detection.

pub mod graph;
pub mod hollow;
pub mod task;

pub use graph::{StatusCounts, TaskGraph};
pub use hollow::HollowDetector;
pub use task::{
    ClosureReport, FailureMode, PartialContext, Task, TaskId, TaskResult, TaskStatus, TaskType,
};
