//! Integration test suite for the swarm orchestrator.
//!
//! These tests drive the task graph and full swarm runs with scripted
//! workers, checking that scheduling, failure handling, failover and
//! checkpointing work together.
//!
//! # Test Categories
//!
//! - `graph_scenarios`: Readiness, partial dependencies and cascades
//! - `swarm_run`: Concurrency, budget, failover, quality gate and events
//! - `resume`: Checkpoint and resume
//!
//! # CI Compatibility
//!
//! Workers are scripted in-process; no model or network is involved.

mod fixtures;

mod graph_scenarios;
mod resume;
mod swarm_run;
