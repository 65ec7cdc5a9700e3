//! Checkpoints and the persistence contract used to save and resume runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::task::Task;
use crate::orchestration::budget::BudgetSnapshot;
use crate::orchestration::events::DecisionRecord;
use crate::orchestration::health::ModelHealthRecord;
use crate::orchestration::orchestrator::SwarmStats;
use crate::workflow::{SessionId, SwarmPhase};
use crate::Result;

/// Everything needed to resume a run without re-decomposing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: SessionId,
    pub goal: String,
    pub phase: SwarmPhase,
    /// Last wave that finished.
    pub wave: u32,
    pub tasks: Vec<Task>,
    pub stats: SwarmStats,
    pub health: Vec<ModelHealthRecord>,
    pub decisions: Vec<DecisionRecord>,
    pub budget: BudgetSnapshot,
    pub saved_at: DateTime<Utc>,
}

/// Save/load contract for checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
    /// `Ok(None)` when no checkpoint exists for the session.
    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint>>;
}

/// In-process store, mainly for tests and short-lived runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<SessionId, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.lock().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .lock()
            .insert(checkpoint.session_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.lock().get(session_id).cloned())
    }
}

/// One pretty-printed JSON file per session.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    /// Session ids with a checkpoint on disk, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }
        let mut found: Vec<(std::time::SystemTime, SessionId)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<SessionId>().ok())
            else {
                continue;
            };
            let modified = entry.metadata().await?.modified()?;
            found.push((modified, id));
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&checkpoint.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(checkpoint)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), wave = checkpoint.wave, "checkpoint written");
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint>> {
        let path = self.path_for(session_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}
