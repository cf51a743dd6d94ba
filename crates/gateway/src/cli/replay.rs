//! `codemill replay`: drive the pipeline from a recorded model stream.
//!
//! Stands in for the model client: tool-protocol `TOOL_EXECUTED` messages
//! have their tool run against the task workspace before the message is
//! handed to the pipeline, the way a live client executes tools before
//! reporting them.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cm_domain::stream::{ModelEvent, ModelStream};
use cm_domain::{check_task_id, OutputMode};
use cm_tools::ToolContext;

use crate::runtime::decode::StreamMessage;
use crate::runtime::{start_generation, GenerationEvent, GenerationRequest};
use crate::state::AppState;

/// Parse a JSONL recording. Blank lines are ignored.
pub fn parse_recording(raw: &str) -> anyhow::Result<Vec<ModelEvent>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}: not a model event", i + 1))
        })
        .collect()
}

/// Turn recorded events into a model stream, executing tool calls as they
/// go past.
pub fn replay_stream(
    state: Arc<AppState>,
    mode: OutputMode,
    task_id: &str,
    events: Vec<ModelEvent>,
    delay: Duration,
) -> ModelStream {
    let ctx = ToolContext::new(state.config.workspace.task_dir(mode, task_id));
    Box::pin(async_stream::stream! {
        for event in events {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let ModelEvent::Chunk { data } = &event {
                if let Ok(StreamMessage::ToolExecuted { name, arguments, .. }) =
                    serde_json::from_str::<StreamMessage>(data)
                {
                    match state.tools.execute(&name, &ctx, &arguments).await {
                        Ok(result) => tracing::debug!(tool = %name, %result, "tool executed"),
                        Err(e) => tracing::warn!(tool = %name, error = %e, "tool failed"),
                    }
                }
            }
            yield Ok(event);
        }
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    state: Arc<AppState>,
    events_path: &Path,
    task_id: String,
    mode: OutputMode,
    owner_id: String,
    run_id: Option<String>,
    model: Option<String>,
    prompt: Option<String>,
    cancel_after: Option<usize>,
    delay_ms: u64,
) -> anyhow::Result<bool> {
    check_task_id(&task_id)?;
    let raw = tokio::fs::read_to_string(events_path)
        .await
        .with_context(|| format!("reading {}", events_path.display()))?;
    let events = parse_recording(&raw)?;

    let mut req = GenerationRequest::new(&owner_id, &task_id, mode);
    if let Some(id) = run_id {
        req.run_id = id;
    }
    req.model = model;
    req.prompt = prompt;

    let stream = replay_stream(
        Arc::clone(&state),
        mode,
        &task_id,
        events,
        Duration::from_millis(delay_ms),
    );
    let (control, mut rx) = start_generation(Arc::clone(&state), req, stream)?;

    let mut deltas = 0usize;
    let mut ok = true;
    let stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        {
            let mut out = stdout.lock();
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
            out.flush().ok();
        }
        match &event {
            GenerationEvent::Delta { text } if !text.is_empty() => {
                deltas += 1;
                if cancel_after == Some(deltas) {
                    state.runs.cancel_owned(control.run_id(), &owner_id)?;
                }
            }
            GenerationEvent::Error { message } => {
                eprintln!("error: {message}");
                ok = false;
            }
            _ => {}
        }
    }

    // The build runs detached; wait for it so the CLI reports the outcome.
    if mode.triggers_build() {
        let workspace = state.config.workspace.task_dir(mode, &task_id);
        while state.builds.status(&workspace) == Some(cm_tools::BuildStatus::Running) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        if let Some(result) = state.builds.last_result(&workspace) {
            eprintln!(
                "build {} (exit code {})",
                if result.success { "succeeded" } else { "failed" },
                result.exit_code
            );
            if !result.success {
                eprintln!("{}", result.error_summary);
                ok = false;
            }
        }
    }

    Ok(ok)
}
