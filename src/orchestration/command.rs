//! Process-backed collaborators.
//!
//! `CommandWorker` runs each dispatch as a shell command: the
//! [`WorkerRequest`] goes in as JSON on stdin and a [`WorkerOutput`] is read
//! back from stdout. `TaskFileDecomposer` loads a pre-made task list from a
//! JSON file instead of asking a model to decompose the goal.

use async_trait::async_trait;
use regex::RegexBuilder;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::core::task::Task;
use crate::error::{Error, Result};
use crate::orchestration::contracts::{Decomposer, WorkerOutput, WorkerRequest, WorkerSpawner};

/// Exit status a worker command uses to report provider throttling (EX_TEMPFAIL).
pub const RATE_LIMIT_EXIT_CODE: i32 = 75;

/// Runs a shell command per dispatch.
///
/// The command sees `SWARM_MODEL`, `SWARM_TASK_ID` and `SWARM_TOKEN_BUDGET`
/// in its environment.
///
/// # Example
///
/// ```ignore
/// use swarm::orchestration::CommandWorker;
///
/// let worker = CommandWorker::new("my-agent --json").with_cwd("/work/repo");
/// let output = worker.spawn(request).await?;
/// ```
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: String,
    cwd: Option<PathBuf>,
}

impl CommandWorker {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Interpret a finished command.
    ///
    /// # Arguments
    ///
    /// * `model` - Model the attempt ran on, used in rate-limit errors.
    /// * `code` - Exit code, `None` when killed by a signal.
    /// * `stdout` / `stderr` - Captured output.
    pub fn parse_output(
        model: &str,
        code: Option<i32>,
        stdout: &str,
        stderr: &str,
    ) -> Result<WorkerOutput> {
        if code == Some(RATE_LIMIT_EXIT_CODE) || is_throttled(stderr)? {
            return Err(Error::RateLimited {
                model: model.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        if let Ok(output) = serde_json::from_str::<WorkerOutput>(stdout.trim()) {
            return Ok(output);
        }

        match code {
            Some(0) => Ok(WorkerOutput {
                success: true,
                output: stdout.trim().to_string(),
                ..Default::default()
            }),
            Some(code) => {
                let message = if stderr.trim().is_empty() {
                    format!("worker command exited with code {}", code)
                } else {
                    stderr.trim().to_string()
                };
                Ok(WorkerOutput {
                    success: false,
                    output: message,
                    ..Default::default()
                })
            }
            None => Err(Error::Worker("worker command killed by signal".to_string())),
        }
    }
}

/// Provider throttling as it shows up in stderr. A bare `429` is not
/// enough: it has to read as an HTTP status.
const THROTTLE_PATTERN: &str =
    r"rate[ _-]?limit|too many requests|\b(?:http|status|code)\b[^0-9\n]{0,12}\b429\b";

fn is_throttled(stderr: &str) -> Result<bool> {
    let pattern = RegexBuilder::new(THROTTLE_PATTERN)
        .case_insensitive(true)
        .build()?;
    Ok(pattern.is_match(stderr))
}

#[async_trait]
impl WorkerSpawner for CommandWorker {
    async fn spawn(&self, request: WorkerRequest) -> Result<WorkerOutput> {
        let payload = serde_json::to_vec(&request)?;

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.command)
            .env("SWARM_MODEL", &request.model)
            .env("SWARM_TASK_ID", request.task.id.as_str())
            .env("SWARM_TOKEN_BUDGET", request.token_budget.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        debug!(task_id = %request.task.id, model = %request.model, "spawning worker command");
        let mut child = command.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                // Commands that ignore stdin may exit before reading it.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Self::parse_output(&request.model, output.status.code(), &stdout, &stderr)
    }
}

/// Reads the initial task list from a JSON file holding an array of tasks.
#[derive(Debug, Clone)]
pub struct TaskFileDecomposer {
    path: PathBuf,
}

impl TaskFileDecomposer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Decomposer for TaskFileDecomposer {
    async fn decompose(&self, goal: &str) -> Result<Vec<Task>> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        let tasks: Vec<Task> = serde_json::from_str(&json)?;
        debug!(path = %self.path.display(), goal, tasks = tasks.len(), "loaded task file");
        Ok(tasks)
    }
}
