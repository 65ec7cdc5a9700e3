use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// What a worker model is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerCapability {
    Code,
    Research,
    Review,
    Test,
    Document,
}

/// A worker model the swarm may dispatch tasks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDefinition {
    pub name: String,
    pub model: String,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<WorkerCapability>,
}

fn default_capabilities() -> Vec<WorkerCapability> {
    vec![WorkerCapability::Code]
}

impl WorkerDefinition {
    pub fn new(name: &str, model: &str, capabilities: Vec<WorkerCapability>) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            capabilities,
        }
    }

    pub fn supports(&self, capability: WorkerCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// What to do when every worker model fails the capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailureStrategy {
    /// Stop before dispatching any task.
    Abort,
    /// Reset health and let real tasks prove capability.
    #[default]
    WarnAndTry,
}

/// One tier of task-type configuration. Every field is optional; tiers are
/// layered by `orchestration::task_config::resolve_task_config`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskTypeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

/// Swarm configuration, loaded from `~/.swarm/swarm.toml`.
///
/// Every field has a default so a partial (or missing) file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Maximum dispatches in flight at once.
    pub max_concurrency: usize,
    /// Shared token pool for the whole run.
    pub total_token_budget: u64,
    /// Shared cost ceiling for the whole run.
    pub max_cost_usd: f64,
    /// Dispatch timeout when the task type sets none.
    pub worker_timeout_secs: u64,
    /// Fraction of dependencies that must complete for a task to proceed
    /// with partial context.
    pub partial_dependency_threshold: f64,
    /// Hard ceiling on dispatch attempts per task, retries included.
    pub max_dispatch_attempts: u32,
    /// Consecutive timeouts on one task before failing over to another model.
    pub consecutive_timeout_limit: u32,
    /// Outputs shorter than this with no tool calls are hollow.
    pub hollow_output_threshold: usize,
    /// Phrases that admit failure despite a success flag.
    pub hollow_failure_phrases: Vec<String>,
    pub quality_gate: bool,
    /// Minimum passing quality score (1-5).
    pub quality_threshold: u8,
    /// Consecutive rejections in one wave that disable the gate for that wave.
    pub quality_breaker_threshold: u32,
    pub wave_review: bool,
    pub verification: bool,
    pub max_verification_rounds: u32,
    pub planning: bool,
    pub checkpoint_every_wave: bool,
    pub capability_probe: bool,
    pub probe_failure_strategy: ProbeFailureStrategy,
    pub rate_limit_backoff_ms: u64,
    pub max_rate_limit_backoff_ms: u64,
    /// Maximum characters of a dependency's output carried into a dependent's context.
    pub dependency_context_chars: usize,
    /// Where file checkpoints go; defaults to `~/.swarm/sessions`.
    pub checkpoint_dir: Option<String>,
    pub workers: Vec<WorkerDefinition>,
    pub task_types: HashMap<String, TaskTypeConfig>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            total_token_budget: 2_000_000,
            max_cost_usd: 25.0,
            worker_timeout_secs: 300,
            partial_dependency_threshold: 0.5,
            max_dispatch_attempts: 5,
            consecutive_timeout_limit: 3,
            hollow_output_threshold: 120,
            hollow_failure_phrases: default_failure_phrases(),
            quality_gate: true,
            quality_threshold: 3,
            quality_breaker_threshold: 8,
            wave_review: false,
            verification: false,
            max_verification_rounds: 1,
            planning: false,
            checkpoint_every_wave: true,
            capability_probe: false,
            probe_failure_strategy: ProbeFailureStrategy::default(),
            rate_limit_backoff_ms: 1_000,
            max_rate_limit_backoff_ms: 30_000,
            dependency_context_chars: 2_000,
            checkpoint_dir: None,
            workers: Vec::new(),
            task_types: HashMap::new(),
        }
    }
}

fn default_failure_phrases() -> Vec<String> {
    [
        "budget exhausted",
        "unable to complete",
        "could not complete",
        "failed to complete",
        "ran out of budget",
        "ran out of tokens",
        "i was unable to",
        "task incomplete",
        "not able to finish",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl SwarmConfig {
    pub fn swarm_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".swarm"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::swarm_dir()?.join("swarm.toml"))
    }

    pub fn sessions_dir(&self) -> Result<PathBuf> {
        match &self.checkpoint_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::swarm_dir()?.join("sessions")),
        }
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading swarm config");
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "swarm config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.partial_dependency_threshold) {
            return Err(Error::Config(format!(
                "partial_dependency_threshold must be within 0.0..=1.0, got {}",
                self.partial_dependency_threshold
            )));
        }
        if self.max_dispatch_attempts == 0 {
            return Err(Error::Config(
                "max_dispatch_attempts must be at least 1".into(),
            ));
        }
        if !(1..=5).contains(&self.quality_threshold) {
            return Err(Error::Config(format!(
                "quality_threshold must be within 1..=5, got {}",
                self.quality_threshold
            )));
        }
        for (name, tier) in &self.task_types {
            if let (Some(min), Some(max)) = (tier.min_tokens, tier.max_tokens) {
                if min > max {
                    return Err(Error::Config(format!(
                        "task type {}: min_tokens {} exceeds max_tokens {}",
                        name, min, max
                    )));
                }
            }
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
