use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use swarm::config::{SwarmConfig, WorkerCapability, WorkerDefinition};
use swarm::orchestration::{
    CheckpointStore, CommandWorker, EventSink, FileCheckpointStore, SwarmEvent, SwarmOrchestrator,
    SwarmOutcome, TaskFileDecomposer,
};
use swarm::workflow::{SessionId, SwarmStatus};
use swarm::{Error, Result};

/// Swarm - wave-based multi-model task orchestrator
#[derive(Parser, Debug)]
#[command(name = "swarm")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    SWARM_DEBUG=1   Enable debug logging (alternative to --debug)\n    RUST_LOG        Override the log filter")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.swarm/swarm.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (defaults to ~/.swarm/swarm.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute a task list toward a goal
    Run {
        /// The goal in natural language
        goal: String,

        /// JSON file holding the task list
        #[arg(long, short = 't')]
        tasks: PathBuf,

        /// Shell command that runs one dispatch (request JSON on stdin)
        #[arg(long, short = 'w')]
        worker: String,

        /// Model name used when the config defines no workers
        #[arg(long, default_value = "default")]
        model: String,

        /// Print the outcome as JSON only
        #[arg(long)]
        headless: bool,
    },

    /// Continue a checkpointed run
    Resume {
        /// Session ID (full or short prefix)
        session_id: String,

        /// Shell command that runs one dispatch
        #[arg(long, short = 'w')]
        worker: String,

        /// Model name used when the config defines no workers
        #[arg(long, default_value = "default")]
        model: String,

        /// Print the outcome as JSON only
        #[arg(long)]
        headless: bool,
    },

    /// List checkpointed sessions, newest first
    List,

    /// Show the state of a checkpointed session
    Status {
        /// Session ID (full or short prefix)
        session_id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    swarm::log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => SwarmConfig::load_from(path)?,
        None => SwarmConfig::load()?,
    };

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Run {
            goal,
            tasks,
            worker,
            model,
            headless,
        } => rt.block_on(run_swarm(config, goal, tasks, worker, model, headless)),
        Command::Resume {
            session_id,
            worker,
            model,
            headless,
        } => rt.block_on(resume_swarm(config, session_id, worker, model, headless)),
        Command::List => rt.block_on(list_sessions(&config)),
        Command::Status { session_id } => rt.block_on(show_status(&config, &session_id)),
    }
}

/// Give a config without workers a single all-round worker.
fn ensure_workers(config: &mut SwarmConfig, model: &str) {
    if config.workers.is_empty() {
        warn!(model, "no workers configured, using a single default worker");
        config.workers.push(WorkerDefinition::new(
            "default",
            model,
            vec![
                WorkerCapability::Code,
                WorkerCapability::Research,
                WorkerCapability::Review,
                WorkerCapability::Test,
                WorkerCapability::Document,
            ],
        ));
    }
}

fn build_orchestrator(
    mut config: SwarmConfig,
    worker: &str,
    model: &str,
    headless: bool,
) -> Result<(SwarmOrchestrator, Option<JoinHandle<()>>)> {
    ensure_workers(&mut config, model);
    let store = FileCheckpointStore::new(config.sessions_dir()?);
    let cwd = std::env::current_dir()?;

    let (events, printer) = if headless {
        (EventSink::disabled(), None)
    } else {
        let (events, mut rx) = EventSink::channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Some(line) = describe_event(&event) {
                    println!("{}", line);
                }
            }
        });
        (events, Some(printer))
    };

    let orchestrator = SwarmOrchestrator::new(
        config,
        Arc::new(CommandWorker::new(worker).with_cwd(cwd)),
        events,
    )?
    .with_checkpoint_store(Arc::new(store));
    Ok((orchestrator, printer))
}

/// Drain remaining progress lines once the orchestrator (and its sink) is gone.
async fn finish(orchestrator: SwarmOrchestrator, printer: Option<JoinHandle<()>>) {
    drop(orchestrator);
    if let Some(printer) = printer {
        printer.await.ok();
    }
}

async fn run_swarm(
    config: SwarmConfig,
    goal: String,
    tasks: PathBuf,
    worker: String,
    model: String,
    headless: bool,
) -> Result<()> {
    info!(goal = %goal, tasks = %tasks.display(), "run command");
    let (orchestrator, printer) = build_orchestrator(config, &worker, &model, headless)?;
    let mut orchestrator =
        orchestrator.with_decomposer(Arc::new(TaskFileDecomposer::new(tasks)));
    let outcome = orchestrator.run(&goal).await;
    finish(orchestrator, printer).await;
    report(&outcome?, headless)
}

async fn resume_swarm(
    config: SwarmConfig,
    session_id: String,
    worker: String,
    model: String,
    headless: bool,
) -> Result<()> {
    let id = resolve_session(&config, &session_id).await?;
    info!(session_id = %id, "resume command");
    let (mut orchestrator, printer) = build_orchestrator(config, &worker, &model, headless)?;
    let outcome = orchestrator.resume(id).await;
    finish(orchestrator, printer).await;
    report(&outcome?, headless)
}

async fn list_sessions(config: &SwarmConfig) -> Result<()> {
    let store = FileCheckpointStore::new(config.sessions_dir()?);
    let sessions = store.list_sessions().await?;
    if sessions.is_empty() {
        println!("No sessions found in {}", store.dir().display());
        return Ok(());
    }
    for id in sessions {
        if let Some(checkpoint) = store.load(&id).await? {
            println!(
                "{}  {:<12}  wave {:<3}  {}",
                id.short(),
                checkpoint.phase,
                checkpoint.wave,
                truncate_string(&checkpoint.goal, 50)
            );
        }
    }
    Ok(())
}

async fn show_status(config: &SwarmConfig, session_id: &str) -> Result<()> {
    let id = resolve_session(config, session_id).await?;
    let store = FileCheckpointStore::new(config.sessions_dir()?);
    let checkpoint = store
        .load(&id)
        .await?
        .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

    println!("  Session:     {}", checkpoint.session_id);
    println!("  Goal:        {}", checkpoint.goal);
    println!("  Phase:       {}", checkpoint.phase);
    println!("  Wave:        {}", checkpoint.wave);
    println!(
        "  Saved:       {}",
        checkpoint.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  Tokens:      {} used, {} remaining",
        checkpoint.budget.tokens_used,
        checkpoint.budget.tokens_remaining()
    );
    println!();
    for task in &checkpoint.tasks {
        println!(
            "  {:<12} {:<10} attempts {:<2} {}",
            task.id.as_str(),
            task.status,
            task.attempts,
            truncate_string(&task.description, 50)
        );
    }
    Ok(())
}

/// Accept a full session id or a unique prefix of one.
async fn resolve_session(config: &SwarmConfig, input: &str) -> Result<SessionId> {
    if let Ok(id) = input.parse::<SessionId>() {
        return Ok(id);
    }
    let store = FileCheckpointStore::new(config.sessions_dir()?);
    let matches: Vec<SessionId> = store
        .list_sessions()
        .await?
        .into_iter()
        .filter(|id| id.to_string().starts_with(input))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(Error::SessionNotFound(input.to_string())),
        _ => Err(Error::Config(format!(
            "session prefix {} is ambiguous ({} matches)",
            input,
            matches.len()
        ))),
    }
}

fn report(outcome: &SwarmOutcome, headless: bool) -> Result<()> {
    if headless {
        let json_output = serde_json::json!({
            "session_id": outcome.session_id.to_string(),
            "status": format!("{}", outcome.status),
            "success": outcome.success,
            "summary": outcome.summary,
            "abort_reason": outcome.abort_reason,
            "budget_exhausted": outcome.budget_exhausted,
            "stats": outcome.stats,
        });
        println!("{}", serde_json::to_string_pretty(&json_output)?);
        return Ok(());
    }

    println!();
    println!("  Session:     {}", outcome.session_id.short());
    println!("  Status:      {}", format_status(outcome.status));
    println!("  Summary:     {}", outcome.summary);
    if let Some(reason) = &outcome.abort_reason {
        println!("  Stopped:     {}", reason);
    }
    println!();
    if outcome.status != SwarmStatus::Completed {
        println!(
            "Resume with: swarm resume {} --worker <command>",
            outcome.session_id.short()
        );
    }
    Ok(())
}

fn describe_event(event: &SwarmEvent) -> Option<String> {
    match event {
        SwarmEvent::WaveStarted { wave, tasks } => {
            Some(format!("wave {} started ({} tasks)", wave, tasks.len()))
        }
        SwarmEvent::WaveCompleted {
            wave,
            completed,
            failed,
            skipped,
        } => Some(format!(
            "wave {} done: {} completed, {} failed, {} skipped",
            wave, completed, failed, skipped
        )),
        SwarmEvent::TaskFailed {
            task_id,
            mode,
            will_retry: true,
            ..
        } => Some(format!("  {} failed ({}), retrying", task_id, mode)),
        SwarmEvent::TaskFailed { task_id, mode, .. } => {
            Some(format!("  {} failed ({})", task_id, mode))
        }
        SwarmEvent::TaskSkipped { task_id, reason } => {
            Some(format!("  {} skipped: {}", task_id, reason))
        }
        SwarmEvent::ModelFailover { task_id, from, to } => {
            Some(format!("  {} moved from {} to {}", task_id, from, to))
        }
        SwarmEvent::ModelHealthChanged { model, healthy } => Some(format!(
            "  model {} is {}",
            model,
            if *healthy { "healthy" } else { "unhealthy" }
        )),
        SwarmEvent::QualityCircuitBreakerTripped { wave, .. } => {
            Some(format!("  quality gate disabled for wave {}", wave))
        }
        _ => None,
    }
}

/// Format run status with color codes for terminal.
fn format_status(status: SwarmStatus) -> String {
    match status {
        SwarmStatus::Completed => format!("\x1b[32m{}\x1b[0m", status), // Green
        SwarmStatus::Failed => format!("\x1b[31m{}\x1b[0m", status),    // Red
        SwarmStatus::Partial => format!("\x1b[33m{}\x1b[0m", status),   // Yellow
        SwarmStatus::Running => format!("\x1b[90m{}\x1b[0m", status),   // Gray
    }
}

fn truncate_string(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
