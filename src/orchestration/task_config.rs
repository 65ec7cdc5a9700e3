//! Resolution of the configuration a task runs with.
//!
//! Four tiers are layered, first match wins per field: the task's own
//! overrides, the user's per-type config, the built-in per-type defaults, and
//! the built-in `implement` defaults as the global fallback. Timeout is the
//! exception: when no type tier sets it, the global worker timeout applies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::TaskTypeConfig;
use crate::core::task::{Task, TaskType};

/// Dependents beyond this count do not raise a task's token allocation.
const DEPENDENT_SCALE: u64 = 3;

/// Token range for a task and the amount allocated within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudgetRange {
    pub min: u64,
    pub max: u64,
    pub allocated: u64,
}

/// Fully resolved settings for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveTaskConfig {
    pub timeout_secs: u64,
    pub max_iterations: u32,
    pub idle_timeout_secs: u64,
    pub tools: Vec<String>,
    pub prompt_template: Option<String>,
    pub policy_profile: Option<String>,
    pub retries: u32,
    pub token_budget: TokenBudgetRange,
}

impl EffectiveTaskConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn tools(names: &[&str]) -> Option<Vec<String>> {
    Some(names.iter().map(|s| s.to_string()).collect())
}

/// Built-in defaults for a task type, `None` for custom types.
pub fn builtin_type_config(task_type: &TaskType) -> Option<TaskTypeConfig> {
    let read_only = ["read_file", "list_files", "search"];
    let editing = ["read_file", "list_files", "search", "write_file", "edit_file"];
    let shell = [
        "read_file",
        "list_files",
        "search",
        "write_file",
        "edit_file",
        "shell",
    ];

    let config = match task_type {
        TaskType::Research => TaskTypeConfig {
            timeout_secs: Some(300),
            max_iterations: Some(30),
            idle_timeout_secs: Some(120),
            tools: tools(&["read_file", "list_files", "search", "web_search"]),
            policy_profile: Some("read_only".to_string()),
            retries: Some(2),
            min_tokens: Some(20_000),
            max_tokens: Some(80_000),
            ..Default::default()
        },
        TaskType::Analysis => TaskTypeConfig {
            timeout_secs: Some(300),
            max_iterations: Some(30),
            idle_timeout_secs: Some(120),
            tools: tools(&read_only),
            policy_profile: Some("read_only".to_string()),
            retries: Some(2),
            min_tokens: Some(20_000),
            max_tokens: Some(60_000),
            ..Default::default()
        },
        TaskType::Design => TaskTypeConfig {
            timeout_secs: Some(300),
            max_iterations: Some(30),
            idle_timeout_secs: Some(120),
            tools: tools(&editing),
            policy_profile: Some("workspace_write".to_string()),
            retries: Some(2),
            min_tokens: Some(20_000),
            max_tokens: Some(60_000),
            ..Default::default()
        },
        TaskType::Implement | TaskType::Refactor => TaskTypeConfig {
            timeout_secs: Some(600),
            max_iterations: Some(50),
            idle_timeout_secs: Some(180),
            tools: tools(&shell),
            policy_profile: Some("workspace_write".to_string()),
            retries: Some(2),
            min_tokens: Some(40_000),
            max_tokens: Some(150_000),
            ..Default::default()
        },
        TaskType::Test => TaskTypeConfig {
            timeout_secs: Some(600),
            max_iterations: Some(40),
            idle_timeout_secs: Some(240),
            tools: tools(&shell),
            policy_profile: Some("workspace_write".to_string()),
            retries: Some(2),
            min_tokens: Some(30_000),
            max_tokens: Some(100_000),
            ..Default::default()
        },
        TaskType::Review => TaskTypeConfig {
            timeout_secs: Some(300),
            max_iterations: Some(20),
            idle_timeout_secs: Some(120),
            tools: tools(&read_only),
            policy_profile: Some("read_only".to_string()),
            retries: Some(1),
            min_tokens: Some(15_000),
            max_tokens: Some(50_000),
            ..Default::default()
        },
        TaskType::Document => TaskTypeConfig {
            timeout_secs: Some(300),
            max_iterations: Some(25),
            idle_timeout_secs: Some(120),
            tools: tools(&editing),
            policy_profile: Some("workspace_write".to_string()),
            retries: Some(1),
            min_tokens: Some(15_000),
            max_tokens: Some(50_000),
            ..Default::default()
        },
        TaskType::Integrate | TaskType::Deploy | TaskType::Merge => TaskTypeConfig {
            timeout_secs: Some(600),
            max_iterations: Some(40),
            idle_timeout_secs: Some(180),
            tools: tools(&shell),
            policy_profile: Some("workspace_write".to_string()),
            retries: Some(1),
            min_tokens: Some(30_000),
            max_tokens: Some(120_000),
            ..Default::default()
        },
        TaskType::Custom(_) => return None,
    };
    Some(config)
}

/// Layer `upper` over `lower`: each field takes the first one that is set.
fn layer(upper: &TaskTypeConfig, lower: &TaskTypeConfig) -> TaskTypeConfig {
    TaskTypeConfig {
        timeout_secs: upper.timeout_secs.or(lower.timeout_secs),
        max_iterations: upper.max_iterations.or(lower.max_iterations),
        idle_timeout_secs: upper.idle_timeout_secs.or(lower.idle_timeout_secs),
        tools: upper.tools.clone().or_else(|| lower.tools.clone()),
        prompt_template: upper
            .prompt_template
            .clone()
            .or_else(|| lower.prompt_template.clone()),
        policy_profile: upper
            .policy_profile
            .clone()
            .or_else(|| lower.policy_profile.clone()),
        retries: upper.retries.or(lower.retries),
        min_tokens: upper.min_tokens.or(lower.min_tokens),
        max_tokens: upper.max_tokens.or(lower.max_tokens),
    }
}

/// Resolve the settings a task is dispatched with.
///
/// `dependents` is the number of tasks waiting on this one; more dependents
/// earn a larger share of the token range.
pub fn resolve_task_config(
    task: &Task,
    user_types: &HashMap<String, TaskTypeConfig>,
    worker_timeout: Duration,
    dependents: usize,
) -> EffectiveTaskConfig {
    let empty = TaskTypeConfig::default();
    let user = user_types.get(task.task_type.as_str()).unwrap_or(&empty);
    let builtin = builtin_type_config(&task.task_type).unwrap_or_default();
    let fallback = builtin_type_config(&TaskType::Implement).unwrap_or_default();

    let typed = layer(&layer(&task.overrides, user), &builtin);
    let timeout_secs = typed.timeout_secs.unwrap_or(worker_timeout.as_secs());
    let merged = layer(&typed, &fallback);

    let mut retries = merged.retries.unwrap_or(0);
    let min = merged.min_tokens.unwrap_or(0);
    let max = merged.max_tokens.unwrap_or(min).max(min);

    let allocated = if task.is_foundation {
        retries += 1;
        max
    } else {
        let scale = (dependents as u64).min(DEPENDENT_SCALE);
        min + (max - min) * scale / DEPENDENT_SCALE
    };

    EffectiveTaskConfig {
        timeout_secs,
        max_iterations: merged.max_iterations.unwrap_or(1),
        idle_timeout_secs: merged.idle_timeout_secs.unwrap_or(timeout_secs),
        tools: merged.tools.unwrap_or_default(),
        prompt_template: merged.prompt_template,
        policy_profile: merged.policy_profile,
        retries,
        token_budget: TokenBudgetRange {
            min,
            max,
            allocated,
        },
    }
}
