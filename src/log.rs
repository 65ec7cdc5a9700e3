//! Structured logging for debugging swarm runs.
//!
//! Log levels:
//! - ERROR: Critical failures that prevent a run from completing
//! - WARN: Unexpected conditions that are recoverable (timeouts, unhealthy models)
//! - INFO: Run-level notifications (waves, decisions, failovers)
//! - DEBUG: Per-dispatch traces
//!
//! Debug mode can be enabled with `--debug` flag or `SWARM_DEBUG=1` env var.
//! `RUST_LOG` overrides the level filter entirely.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging to ~/.swarm/swarm.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("SWARM_DEBUG")
        .map(|v| parse_debug_flag(&v))
        .unwrap_or(false);

    let debug_enabled = debug || env_debug;
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    match open_log_file() {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
            .ok(),
        None => builder.with_writer(std::io::stderr).try_init().ok(),
    };
}

/// Where the log file lives.
pub fn log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".swarm").join("swarm.log"))
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "swarm=debug,info"
    } else {
        "swarm=info,warn"
    }
}

fn parse_debug_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

// Truncated on startup.
fn open_log_file() -> Option<File> {
    let path = log_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok()?;
    }
    File::create(path).ok()
}
