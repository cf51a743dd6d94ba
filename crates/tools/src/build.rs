//! Build pipeline for tool-protocol projects: validate the workspace, run
//! the install step, run the build step, and check for the artifact
//! directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cm_domain::config::BuildConfig;
use cm_domain::trace::TraceEvent;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::process::{run_captured, CapturedOutput, FAILED_EXIT_CODE};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one build. `exit_code` is `-1` for timeouts, spawn failures
/// and pre-flight failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    /// The first few stderr lines, newline-joined.
    pub error_summary: String,
}

impl BuildResult {
    fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            success: false,
            exit_code: FAILED_EXIT_CODE,
            stdout_lines: Vec::new(),
            stderr_lines: vec![reason.clone()],
            error_summary: reason,
        }
    }

    fn from_step(out: CapturedOutput, success: bool, summary_lines: usize) -> Self {
        let error_summary = out
            .stderr_lines
            .iter()
            .take(summary_lines)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            success,
            exit_code: out.exit_code,
            stdout_lines: out.stdout_lines,
            stderr_lines: out.stderr_lines,
            error_summary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
struct BuildRecord {
    status: BuildStatus,
    started_at: DateTime<Utc>,
    result: Option<BuildResult>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BuildPipeline {
    config: BuildConfig,
    records: RwLock<HashMap<PathBuf, BuildRecord>>,
}

impl BuildPipeline {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run the full pipeline in `workspace` and wait for the result.
    pub async fn build(&self, workspace: &Path) -> BuildResult {
        let started = Instant::now();
        let result = self.run_steps(workspace).await;

        if result.success {
            tracing::info!(workspace = %workspace.display(), "build succeeded");
        } else {
            tracing::warn!(
                workspace = %workspace.display(),
                exit_code = result.exit_code,
                summary = %result.error_summary,
                "build failed"
            );
        }
        TraceEvent::BuildFinished {
            workspace: workspace.display().to_string(),
            success: result.success,
            exit_code: result.exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        result
    }

    async fn run_steps(&self, workspace: &Path) -> BuildResult {
        let cfg = &self.config;

        if !workspace.is_dir() {
            return BuildResult::failed(format!(
                "workspace directory does not exist: {}",
                workspace.display()
            ));
        }
        if !workspace.join(&cfg.manifest).is_file() {
            return BuildResult::failed(format!(
                "{} not found in {}",
                cfg.manifest,
                workspace.display()
            ));
        }

        let install = run_captured(
            &cfg.program,
            &cfg.install_args,
            workspace,
            Duration::from_secs(cfg.install_timeout_sec),
        )
        .await;
        if !install.succeeded() {
            return BuildResult::from_step(install, false, cfg.error_summary_lines);
        }

        let build = run_captured(
            &cfg.program,
            &cfg.build_args,
            workspace,
            Duration::from_secs(cfg.build_timeout_sec),
        )
        .await;
        if !build.succeeded() {
            return BuildResult::from_step(build, false, cfg.error_summary_lines);
        }

        if !workspace.join(&cfg.artifact_dir).is_dir() {
            let mut result = BuildResult::from_step(build, false, cfg.error_summary_lines);
            let reason = format!(
                "build finished but '{}' was not produced",
                cfg.artifact_dir
            );
            result.stderr_lines.push(reason.clone());
            if result.error_summary.is_empty() {
                result.error_summary = reason;
            }
            return result;
        }

        BuildResult::from_step(build, true, cfg.error_summary_lines)
    }

    /// Run the pipeline on a detached task, tracking its status per workspace.
    pub fn spawn(self: &Arc<Self>, workspace: PathBuf) -> JoinHandle<BuildResult> {
        self.records.write().insert(
            workspace.clone(),
            BuildRecord {
                status: BuildStatus::Running,
                started_at: Utc::now(),
                result: None,
            },
        );

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let result = pipeline.build(&workspace).await;
            let status = if result.success {
                BuildStatus::Succeeded
            } else {
                BuildStatus::Failed
            };
            if let Some(record) = pipeline.records.write().get_mut(&workspace) {
                record.status = status;
                record.result = Some(result.clone());
                tracing::debug!(
                    workspace = %workspace.display(),
                    elapsed_ms = (Utc::now() - record.started_at).num_milliseconds(),
                    "build record updated"
                );
            }
            result
        })
    }

    pub fn status(&self, workspace: &Path) -> Option<BuildStatus> {
        self.records.read().get(workspace).map(|r| r.status)
    }

    pub fn last_result(&self, workspace: &Path) -> Option<BuildResult> {
        self.records
            .read()
            .get(workspace)
            .and_then(|r| r.result.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
