use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::mode::OutputMode;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root under which every task gets a `{mode}_{task_id}` directory.
    #[serde(default = "d_ws_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { root: d_ws_root() }
    }
}

impl WorkspaceConfig {
    /// Workspace directory for one task.
    pub fn task_dir(&self, mode: OutputMode, task_id: &str) -> PathBuf {
        task_dir(&self.root, mode, task_id)
    }
}

/// Resolve `{root}/{mode}_{task_id}`.
pub fn task_dir(root: &Path, mode: OutputMode, task_id: &str) -> PathBuf {
    root.join(mode.workspace_dir_name(task_id))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding one `<task_id>.jsonl` file per task.
    #[serde(default = "d_history_path")]
    pub path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: d_history_path(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ws_root() -> PathBuf {
    PathBuf::from("./tmp/code_output")
}
fn d_history_path() -> PathBuf {
    PathBuf::from("./data/history")
}
