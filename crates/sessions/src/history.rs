//! Append-only JSONL chat history.
//!
//! Each task gets a `<task_id>.jsonl` file under the history directory; every
//! message is one JSON line. An in-memory write-through cache keeps reads off
//! disk after the first load, and file I/O runs on `spawn_blocking`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use cm_domain::check_task_id;
use cm_domain::error::{Error, Result};
use cm_domain::trace::TraceEvent;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single history line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryLine {
    pub timestamp: String,
    pub role: Role,
    pub owner_id: String,
    pub content: String,
}

impl HistoryLine {
    pub fn now(role: Role, owner_id: &str, content: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            role,
            owner_id: owner_id.to_owned(),
            content: content.to_owned(),
        }
    }
}

/// Durable conversation log keyed by task.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    async fn append(&self, task_id: &str, owner_id: &str, role: Role, content: &str)
        -> Result<()>;

    async fn read(&self, task_id: &str) -> Result<Vec<HistoryLine>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File-backed store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HistoryStore {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, Vec<HistoryLine>>>,
}

impl HistoryStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, task_id: &str) -> PathBuf {
        self.base_dir.join(format!("{task_id}.jsonl"))
    }

    /// Drop the cached copy of a task's history.
    pub fn invalidate_cache(&self, task_id: &str) {
        self.cache.write().remove(task_id);
    }
}

#[async_trait]
impl ChatHistory for HistoryStore {
    async fn append(
        &self,
        task_id: &str,
        owner_id: &str,
        role: Role,
        content: &str,
    ) -> Result<()> {
        check_task_id(task_id)?;
        let line = HistoryLine::now(role, owner_id, content);
        let mut buf = serde_json::to_string(&line)?;
        buf.push('\n');

        let dir = self.base_dir.clone();
        let path = self.path_for(task_id);
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            std::fs::create_dir_all(&dir)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(buf.as_bytes())?;
            Ok::<(), Error>(())
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        // Only extend a cache that was fully loaded; otherwise the next read
        // would see just the tail.
        if let Some(lines) = self.cache.write().get_mut(task_id) {
            lines.push(line);
        }

        TraceEvent::HistoryAppended {
            task_id: task_id.to_owned(),
            role: role.as_str().to_owned(),
            chars: content.chars().count(),
        }
        .emit();

        Ok(())
    }

    async fn read(&self, task_id: &str) -> Result<Vec<HistoryLine>> {
        check_task_id(task_id)?;
        if let Some(lines) = self.cache.read().get(task_id) {
            return Ok(lines.clone());
        }

        let path = self.path_for(task_id);
        let tid = task_id.to_owned();
        let lines = tokio::task::spawn_blocking(move || read_jsonl_file(&path, &tid))
            .await
            .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        self.cache.write().insert(task_id.to_owned(), lines.clone());
        Ok(lines)
    }
}

fn read_jsonl_file(path: &Path, task_id: &str) -> Result<Vec<HistoryLine>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path)?;
    let mut lines = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<HistoryLine>(line) {
            Ok(hl) => lines.push(hl),
            Err(e) => {
                tracing::warn!(task_id, error = %e, "skipping malformed history line");
            }
        }
    }
    Ok(lines)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Non-durable history, for tests and dry runs.
#[derive(Default)]
pub struct MemoryHistory {
    lines: RwLock<HashMap<String, Vec<HistoryLine>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines recorded across all tasks.
    pub fn total(&self) -> usize {
        self.lines.read().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ChatHistory for MemoryHistory {
    async fn append(
        &self,
        task_id: &str,
        owner_id: &str,
        role: Role,
        content: &str,
    ) -> Result<()> {
        check_task_id(task_id)?;
        self.lines
            .write()
            .entry(task_id.to_owned())
            .or_default()
            .push(HistoryLine::now(role, owner_id, content));
        Ok(())
    }

    async fn read(&self, task_id: &str) -> Result<Vec<HistoryLine>> {
        check_task_id(task_id)?;
        Ok(self.lines.read().get(task_id).cloned().unwrap_or_default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
