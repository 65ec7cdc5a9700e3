//! Health tracking for worker models.
//!
//! The `ModelHealthTracker` keeps per-model outcome counters and a rolling
//! window of recent results. A model is marked unhealthy once enough recent
//! dispatches have failed, or immediately when a capability probe fails.
//! Unhealthy models are routed around by `select_alternative_model`.
//!
//! ## Failover
//!
//! - `select_alternative_model` ranks capable, healthy models by success rate,
//!   then average latency, then rate-limit count.
//! - `ConsecutiveTimeoutTracker` counts back-to-back timeouts per task so the
//!   orchestrator can move a task to another model.
//! - `run_capability_probes` checks each configured model before the first
//!   dispatch.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ProbeFailureStrategy, WorkerCapability, WorkerDefinition};
use crate::core::task::{FailureMode, TaskId};
use crate::orchestration::contracts::CapabilityProbe;
use crate::orchestration::events::{EventSink, SwarmEvent};

/// Number of recent outcomes considered when judging health.
pub const HEALTH_WINDOW: usize = 10;

/// Outcomes required in the window before organic failures can flip health.
pub const MIN_SAMPLES: usize = 3;

/// Failure rate at or above which a model is considered unhealthy.
pub const FAILURE_RATE_THRESHOLD: f64 = 0.5;

/// Weight of the newest sample in the latency moving average.
const LATENCY_ALPHA: f64 = 0.3;

/// Health record for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealthRecord {
    pub model: String,
    pub successes: u32,
    pub failures: u32,
    pub rate_limits: u32,
    pub last_rate_limit: Option<DateTime<Utc>>,
    /// Exponential moving average, 0 until the first success.
    pub average_latency_ms: f64,
    pub healthy: bool,
    pub quality_rejections: u32,
    /// Most recent outcomes, `true` for success.
    pub recent: VecDeque<bool>,
    pub probe_failed: bool,
}

impl ModelHealthRecord {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            successes: 0,
            failures: 0,
            rate_limits: 0,
            last_rate_limit: None,
            average_latency_ms: 0.0,
            healthy: true,
            quality_rejections: 0,
            recent: VecDeque::with_capacity(HEALTH_WINDOW),
            probe_failed: false,
        }
    }

    /// Lifetime success rate; an untried model counts as fully successful.
    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            self.successes as f64 / total as f64
        }
    }

    /// Failure rate over the rolling window.
    pub fn recent_failure_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failures = self.recent.iter().filter(|ok| !**ok).count();
        failures as f64 / self.recent.len() as f64
    }

    fn push(&mut self, ok: bool) {
        if self.recent.len() == HEALTH_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(ok);
    }
}

/// Per-run model health table, shared between the pool and the orchestrator.
#[derive(Debug, Default)]
pub struct ModelHealthTracker {
    records: Mutex<HashMap<String, ModelHealthRecord>>,
    events: EventSink,
}

impl ModelHealthTracker {
    pub fn new(events: EventSink) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn announce(&self, model: &str, healthy: bool) {
        if healthy {
            info!(model, "model healthy again");
        } else {
            warn!(model, "model marked unhealthy");
        }
        self.events.emit(SwarmEvent::ModelHealthChanged {
            model: model.to_string(),
            healthy,
        });
    }

    pub fn record_success(&self, model: &str, latency: Duration) {
        let restored = {
            let mut records = self.records.lock();
            let record = records
                .entry(model.to_string())
                .or_insert_with(|| ModelHealthRecord::new(model));
            record.successes += 1;
            record.push(true);

            let sample = latency.as_millis() as f64;
            record.average_latency_ms = if record.successes == 1 {
                sample
            } else {
                LATENCY_ALPHA * sample + (1.0 - LATENCY_ALPHA) * record.average_latency_ms
            };

            let recovered = !record.healthy
                && !record.probe_failed
                && record.recent_failure_rate() < FAILURE_RATE_THRESHOLD;
            if recovered {
                record.healthy = true;
            }
            recovered
        };
        if restored {
            self.announce(model, true);
        }
    }

    /// Record a failed dispatch. Quality rejections go through
    /// [`record_quality_rejection`](Self::record_quality_rejection) instead.
    pub fn record_failure(&self, model: &str, mode: FailureMode) {
        let flipped = {
            let mut records = self.records.lock();
            let record = records
                .entry(model.to_string())
                .or_insert_with(|| ModelHealthRecord::new(model));
            record.failures += 1;
            if mode == FailureMode::RateLimit {
                record.rate_limits += 1;
                record.last_rate_limit = Some(Utc::now());
            }
            record.push(false);

            let flip = record.healthy
                && record.recent.len() >= MIN_SAMPLES
                && record.recent_failure_rate() >= FAILURE_RATE_THRESHOLD;
            if flip {
                record.healthy = false;
            }
            debug!(model, mode = %mode, failures = record.failures, "model failure recorded");
            flip
        };
        if flipped {
            self.announce(model, false);
        }
    }

    pub fn record_quality_rejection(&self, model: &str) {
        let mut records = self.records.lock();
        records
            .entry(model.to_string())
            .or_insert_with(|| ModelHealthRecord::new(model))
            .quality_rejections += 1;
    }

    /// Mark a model unhealthy right away, without waiting for samples.
    pub fn mark_unhealthy(&self, model: &str, probe_failed: bool) {
        let flipped = {
            let mut records = self.records.lock();
            let record = records
                .entry(model.to_string())
                .or_insert_with(|| ModelHealthRecord::new(model));
            record.probe_failed |= probe_failed;
            let was_healthy = record.healthy;
            record.healthy = false;
            was_healthy
        };
        if flipped {
            self.announce(model, false);
        }
    }

    /// Forget everything known about a model.
    pub fn reset(&self, model: &str) {
        let flipped = {
            let mut records = self.records.lock();
            match records.insert(model.to_string(), ModelHealthRecord::new(model)) {
                Some(old) => !old.healthy,
                None => false,
            }
        };
        if flipped {
            self.announce(model, true);
        }
    }

    pub fn reset_all(&self) {
        let models: Vec<String> = self.records.lock().keys().cloned().collect();
        for model in models {
            self.reset(&model);
        }
    }

    /// Unknown models are healthy.
    pub fn is_healthy(&self, model: &str) -> bool {
        self.records
            .lock()
            .get(model)
            .map(|r| r.healthy)
            .unwrap_or(true)
    }

    pub fn get(&self, model: &str) -> Option<ModelHealthRecord> {
        self.records.lock().get(model).cloned()
    }

    /// All records, sorted by model name.
    pub fn snapshot(&self) -> Vec<ModelHealthRecord> {
        let mut records: Vec<ModelHealthRecord> = self.records.lock().values().cloned().collect();
        records.sort_by(|a, b| a.model.cmp(&b.model));
        records
    }

    pub fn restore(&self, records: Vec<ModelHealthRecord>) {
        let mut table = self.records.lock();
        table.clear();
        for record in records {
            table.insert(record.model.clone(), record);
        }
    }
}

/// Pick the healthiest worker model able to take over from `failing_model`.
pub fn select_alternative_model(
    workers: &[WorkerDefinition],
    failing_model: &str,
    capability: WorkerCapability,
    tracker: &ModelHealthTracker,
) -> Option<String> {
    let mut candidates: Vec<(f64, f64, u32, &str)> = workers
        .iter()
        .filter(|w| w.model != failing_model)
        .filter(|w| w.supports(capability))
        .filter(|w| tracker.is_healthy(&w.model))
        .map(|w| {
            let record = tracker
                .get(&w.model)
                .unwrap_or_else(|| ModelHealthRecord::new(&w.model));
            (
                record.success_rate(),
                record.average_latency_ms,
                record.rate_limits,
                w.model.as_str(),
            )
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.2.cmp(&b.2))
    });
    candidates.first().map(|c| c.3.to_string())
}

/// Tracks consecutive timeouts per task.
///
/// # Example
///
/// ```
/// use swarm::core::TaskId;
/// use swarm::orchestration::ConsecutiveTimeoutTracker;
///
/// let mut tracker = ConsecutiveTimeoutTracker::new();
/// let task = TaskId::from("A");
/// assert_eq!(tracker.increment(&task), 1);
/// tracker.reset(&task);
/// assert_eq!(tracker.get(&task), 0);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsecutiveTimeoutTracker {
    counts: HashMap<TaskId, u32>,
}

impl ConsecutiveTimeoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns 0 for a task that has not timed out.
    pub fn get(&self, task_id: &TaskId) -> u32 {
        self.counts.get(task_id).copied().unwrap_or(0)
    }

    /// Returns the new count.
    pub fn increment(&mut self, task_id: &TaskId) -> u32 {
        let count = self.counts.entry(task_id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&mut self, task_id: &TaskId) {
        self.counts.remove(task_id);
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Result of probing every configured worker model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    /// Every model failed and the strategy says to stop.
    pub abort: bool,
}

/// Probe each distinct worker model once.
///
/// Failing models are marked unhealthy. When every model fails, `Abort`
/// stops the run and `WarnAndTry` resets health so real tasks decide.
pub async fn run_capability_probes(
    probe: &dyn CapabilityProbe,
    workers: &[WorkerDefinition],
    tracker: &ModelHealthTracker,
    strategy: ProbeFailureStrategy,
) -> ProbeReport {
    let mut report = ProbeReport::default();
    let mut seen = HashSet::new();

    for worker in workers {
        if !seen.insert(worker.model.clone()) {
            continue;
        }
        match probe.probe(&worker.model, &worker.capabilities).await {
            Ok(true) => report.passed.push(worker.model.clone()),
            Ok(false) => {
                warn!(model = %worker.model, "capability probe failed");
                report.failed.push(worker.model.clone());
            }
            Err(e) => {
                warn!(model = %worker.model, error = %e, "capability probe errored");
                report.failed.push(worker.model.clone());
            }
        }
    }

    for model in &report.failed {
        tracker.mark_unhealthy(model, true);
    }

    if report.passed.is_empty() && !report.failed.is_empty() {
        match strategy {
            ProbeFailureStrategy::Abort => report.abort = true,
            ProbeFailureStrategy::WarnAndTry => {
                warn!("every model failed its capability probe, continuing optimistically");
                tracker.reset_all();
            }
        }
    }
    report
}
