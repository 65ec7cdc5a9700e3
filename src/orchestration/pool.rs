//! Worker pool for concurrent task dispatch.
//!
//! The `WorkerPool` turns ready tasks into worker attempts. Preparation runs
//! on the control loop and reserves budget and a model; execution waits for a
//! concurrency permit, runs the worker under the task type's timeout and
//! classifies the outcome. Every reservation is released on every path.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::{SwarmConfig, TaskTypeConfig, WorkerDefinition};
use crate::core::hollow::HollowDetector;
use crate::core::task::{FailureMode, Task, TaskId, TaskResult};
use crate::error::Error;
use crate::orchestration::budget::{BudgetPool, BudgetReservation};
use crate::orchestration::contracts::{WorkerRequest, WorkerSpawner};
use crate::orchestration::events::{EventSink, SwarmEvent};
use crate::orchestration::health::{select_alternative_model, ModelHealthTracker};
use crate::orchestration::task_config::{resolve_task_config, EffectiveTaskConfig};

/// Why a ready task could not be prepared for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchRejection {
    #[error("budget cannot cover the minimum of {min_tokens} tokens")]
    BudgetExhausted { min_tokens: u64 },
    #[error("no healthy model offers {capability}")]
    NoHealthyModel { capability: String },
    #[error("dispatch attempts exhausted after {attempts}")]
    AttemptsExhausted { attempts: u32 },
}

/// A task with its model, settings and budget reservation, ready to run.
#[derive(Debug)]
pub struct PreparedDispatch {
    pub task: Task,
    pub model: String,
    pub config: EffectiveTaskConfig,
    /// Model the task was moved off because it was unhealthy.
    pub failover_from: Option<String>,
    /// Wait before acquiring a permit, after a rate-limited attempt.
    pub backoff: Duration,
    reservation: BudgetReservation,
}

impl PreparedDispatch {
    pub fn reserved_tokens(&self) -> u64 {
        self.reservation.tokens
    }
}

/// Classified result of one dispatch attempt.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub task_id: TaskId,
    pub model: String,
    pub result: TaskResult,
    /// `None` when the attempt succeeded with substantive output.
    pub failure: Option<FailureMode>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Dispatches tasks to workers with a global concurrency cap.
pub struct WorkerPool {
    spawner: Arc<dyn WorkerSpawner>,
    semaphore: Arc<Semaphore>,
    budget: Arc<BudgetPool>,
    health: Arc<ModelHealthTracker>,
    hollow: HollowDetector,
    workers: Vec<WorkerDefinition>,
    task_types: HashMap<String, TaskTypeConfig>,
    worker_timeout: Duration,
    max_dispatch_attempts: u32,
    rate_limit_backoff: Duration,
    max_rate_limit_backoff: Duration,
    events: EventSink,
}

impl WorkerPool {
    pub fn new(
        config: &SwarmConfig,
        spawner: Arc<dyn WorkerSpawner>,
        budget: Arc<BudgetPool>,
        health: Arc<ModelHealthTracker>,
        hollow: HollowDetector,
        events: EventSink,
    ) -> Self {
        Self {
            spawner,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            budget,
            health,
            hollow,
            workers: config.workers.clone(),
            task_types: config.task_types.clone(),
            worker_timeout: config.worker_timeout(),
            max_dispatch_attempts: config.max_dispatch_attempts,
            rate_limit_backoff: Duration::from_millis(config.rate_limit_backoff_ms),
            max_rate_limit_backoff: Duration::from_millis(config.max_rate_limit_backoff_ms),
            events,
        }
    }

    pub fn workers(&self) -> &[WorkerDefinition] {
        &self.workers
    }

    /// Number of permits currently free.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Resolve settings, reserve budget and pick a model for a ready task.
    ///
    /// Nothing is dispatched here; a rejection leaves the pool untouched.
    pub fn prepare(
        &self,
        task: &Task,
        dependents: usize,
    ) -> std::result::Result<PreparedDispatch, DispatchRejection> {
        if task.attempts >= self.max_dispatch_attempts {
            return Err(DispatchRejection::AttemptsExhausted {
                attempts: task.attempts,
            });
        }

        let config = resolve_task_config(task, &self.task_types, self.worker_timeout, dependents);
        let min_tokens = config.token_budget.min;
        if !self.budget.has_capacity(min_tokens) {
            return Err(DispatchRejection::BudgetExhausted { min_tokens });
        }

        let (model, failover_from) = self.select_model(task)?;

        let reservation = self
            .budget
            .reserve(min_tokens, config.token_budget.allocated)
            .ok_or(DispatchRejection::BudgetExhausted { min_tokens })?;

        let backoff = if task.failure_mode == Some(FailureMode::RateLimit) {
            self.backoff_for(task.attempts)
        } else {
            Duration::ZERO
        };

        debug!(
            task_id = %task.id,
            model = %model,
            tokens = reservation.tokens,
            timeout_secs = config.timeout_secs,
            "dispatch prepared"
        );

        Ok(PreparedDispatch {
            task: task.clone(),
            model,
            config,
            failover_from,
            backoff,
            reservation,
        })
    }

    /// Exponential backoff after `attempts` tries, capped.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let backoff = self.rate_limit_backoff.saturating_mul(1u32 << exponent);
        backoff.min(self.max_rate_limit_backoff)
    }

    fn select_model(
        &self,
        task: &Task,
    ) -> std::result::Result<(String, Option<String>), DispatchRejection> {
        let capability = task.capability();
        let preferred = task.assigned_model.clone().or_else(|| {
            self.workers
                .iter()
                .find(|w| w.supports(capability))
                .map(|w| w.model.clone())
        });

        let rejection = || DispatchRejection::NoHealthyModel {
            capability: format!("{:?}", capability).to_lowercase(),
        };

        match preferred {
            Some(model) if self.health.is_healthy(&model) => Ok((model, None)),
            Some(model) => {
                let alternative =
                    select_alternative_model(&self.workers, &model, capability, &self.health)
                        .ok_or_else(rejection)?;
                Ok((alternative, Some(model)))
            }
            None => Err(rejection()),
        }
    }

    /// Give back a prepared dispatch that will not run.
    pub fn cancel(&self, prepared: PreparedDispatch) {
        self.budget.release(prepared.reservation, 0, 0.0);
        self.emit_budget();
    }

    fn emit_budget(&self) {
        let snapshot = self.budget.snapshot();
        self.events.emit(SwarmEvent::BudgetUpdated {
            tokens_used: snapshot.tokens_used,
            tokens_reserved: snapshot.tokens_reserved,
            tokens_remaining: snapshot.tokens_remaining(),
            cost_usd: snapshot.cost_usd,
        });
    }

    /// Run one prepared dispatch to completion or timeout.
    pub async fn execute(&self, prepared: PreparedDispatch) -> DispatchOutcome {
        let PreparedDispatch {
            task,
            model,
            config,
            backoff,
            reservation,
            ..
        } = prepared;

        if !backoff.is_zero() {
            debug!(task_id = %task.id, backoff_ms = backoff.as_millis() as u64, "rate limit backoff");
            tokio::time::sleep(backoff).await;
        }

        let _permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                self.budget.release(reservation, 0, 0.0);
                self.emit_budget();
                return DispatchOutcome {
                    task_id: task.id,
                    result: TaskResult::empty(&model, 0),
                    model,
                    failure: Some(FailureMode::Error),
                    error: Some(e.to_string()),
                    elapsed: Duration::ZERO,
                };
            }
        };

        let task_id = task.id.clone();
        let timeout = config.timeout();
        let request = WorkerRequest {
            dependency_context: task.dependency_context.clone(),
            partial_context: task.partial_context.clone(),
            feedback: task.retry_feedback.clone(),
            token_budget: reservation.tokens,
            model: model.clone(),
            config,
            task,
        };

        let spawner = Arc::clone(&self.spawner);
        let started = Instant::now();
        let handle = tokio::spawn(async move { spawner.spawn(request).await });
        let joined = tokio::time::timeout(timeout, handle).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        let (result, failure, error) = match joined {
            Err(_) => {
                // The JoinHandle is dropped here; the worker is abandoned, not cancelled.
                warn!(task_id = %task_id, model = %model, ?timeout, "dispatch timed out");
                (
                    TaskResult::empty(&model, elapsed_ms),
                    Some(FailureMode::Timeout),
                    Some(Error::Timeout(timeout).to_string()),
                )
            }
            Ok(Err(join_error)) => (
                TaskResult::empty(&model, elapsed_ms),
                Some(FailureMode::Error),
                Some(Error::TaskJoin(join_error.to_string()).to_string()),
            ),
            Ok(Ok(Err(e @ Error::RateLimited { .. }))) => (
                TaskResult::empty(&model, elapsed_ms),
                Some(FailureMode::RateLimit),
                Some(e.to_string()),
            ),
            Ok(Ok(Err(e))) => (
                TaskResult::empty(&model, elapsed_ms),
                Some(FailureMode::Error),
                Some(e.to_string()),
            ),
            Ok(Ok(Ok(output))) => {
                let result = output.into_result(&model, elapsed_ms);
                if !result.success {
                    (result, Some(FailureMode::Error), None)
                } else if self.hollow.is_hollow(&result) {
                    (result, Some(FailureMode::Hollow), None)
                } else {
                    (result, None, None)
                }
            }
        };

        match failure {
            None => self.health.record_success(&model, elapsed),
            Some(mode) => self.health.record_failure(&model, mode),
        }

        self.budget
            .release(reservation, result.tokens_used, result.cost_usd);
        self.emit_budget();

        debug!(
            task_id = %task_id,
            model = %model,
            elapsed_ms,
            failure = ?failure,
            "dispatch finished"
        );

        DispatchOutcome {
            task_id,
            model,
            result,
            failure,
            error,
            elapsed,
        }
    }

    /// Run a batch of dispatches concurrently, yielding outcomes in
    /// completion order.
    pub async fn execute_wave(&self, prepared: Vec<PreparedDispatch>) -> Vec<DispatchOutcome> {
        let mut in_flight: FuturesUnordered<_> =
            prepared.into_iter().map(|p| self.execute(p)).collect();
        let mut outcomes = Vec::with_capacity(in_flight.len());
        while let Some(outcome) = in_flight.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}
