use serde::Serialize;

/// Structured trace events emitted across all codemill crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RunRegistered {
        run_id: String,
        owner_id: String,
        task_id: String,
    },
    RunCancelled {
        run_id: String,
    },
    RunFinished {
        run_id: String,
        task_id: String,
        mode: String,
        outcome: String,
        fragments: usize,
        transcript_chars: usize,
    },
    FilePersisted {
        path: String,
        bytes: usize,
        changed: bool,
    },
    HistoryAppended {
        task_id: String,
        role: String,
        chars: usize,
    },
    UsageSettled {
        owner_id: String,
        task_id: String,
        model: Option<String>,
        total_tokens: u64,
        points: u64,
    },
    BuildFinished {
        workspace: String,
        success: bool,
        exit_code: i32,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cm_event");
    }
}
