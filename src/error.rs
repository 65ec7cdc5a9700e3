use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task transition for {id}: {from} -> {to}")]
    InvalidTaskTransition { id: String, from: String, to: String },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Rate limited by {model}: {message}")]
    RateLimited { model: String, message: String },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
