//! The generation loop.
//!
//! One spawned task per run fuses the model stream with the run's
//! cancellation token, decodes chunks for the client, and on completion
//! fans the result out to the workspace, chat history and build pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use cm_domain::error::Result;
use cm_domain::stream::{ModelEvent, ModelStream};
use cm_domain::trace::TraceEvent;
use cm_domain::{check_task_id, OutputMode};
use cm_sessions::Role;
use cm_tools::persist_file;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::runtime::cancel::RunControl;
use crate::runtime::decode::decoder_for;
use crate::runtime::extract::extract;
use crate::runtime::usage::{self, UsageReport};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GenerationEvent: what the client sees
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// Decoded markup. The first event of every run is an empty delta so
    /// the client sees the stream open right away.
    Delta { text: String },

    /// Usage settled for the run, sent just before the terminal event.
    Usage { report: UsageReport },

    Done,

    /// The run was stopped before the model finished.
    Interrupted,

    /// The model stream failed.
    Error { message: String },
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Interrupted | Self::Error { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub run_id: String,
    pub owner_id: String,
    pub task_id: String,
    pub mode: OutputMode,
    pub model: Option<String>,
    /// User message that started the run, recorded in history first.
    pub prompt: Option<String>,
}

impl GenerationRequest {
    pub fn new(owner_id: &str, task_id: &str, mode: OutputMode) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_owned(),
            task_id: task_id.to_owned(),
            mode,
            model: None,
            prompt: None,
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// start_generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Register the run and spawn its generation task.
///
/// The task id is validated before anything touches the registry or the
/// filesystem. Returns the run's control block (for stop requests) and the client event
/// receiver. Dropping the receiver cancels the run.
pub fn start_generation(
    state: Arc<AppState>,
    req: GenerationRequest,
    stream: ModelStream,
) -> Result<(Arc<RunControl>, mpsc::Receiver<GenerationEvent>)> {
    check_task_id(&req.task_id)?;
    let control = state
        .runs
        .register(&req.run_id, &req.owner_id, &req.task_id)?;
    let usage_ctx = state
        .usage
        .begin(&req.owner_id, &req.task_id, req.model.as_deref());

    let (tx, rx) = mpsc::channel::<GenerationEvent>(64);
    let span = tracing::info_span!(
        "generation",
        run_id = %req.run_id,
        task_id = %req.task_id,
        mode = %req.mode
    );

    let task_control = Arc::clone(&control);
    tokio::spawn(
        async move {
            let _run_guard = state.runs.guard(&req.run_id);
            let _usage_guard = state.usage.guard(&req.owner_id, &req.task_id);
            usage::scope(usage_ctx, run_generation(&state, &req, &task_control, stream, tx)).await;
        }
        .instrument(span),
    );

    Ok((control, rx))
}

async fn run_generation(
    state: &AppState,
    req: &GenerationRequest,
    control: &RunControl,
    mut stream: ModelStream,
    tx: mpsc::Sender<GenerationEvent>,
) {
    if let Some(prompt) = &req.prompt {
        if let Err(e) = state
            .history
            .append(&req.task_id, &req.owner_id, Role::User, prompt)
            .await
        {
            tracing::warn!(error = %e, "failed to record prompt");
        }
    }

    let mut decoder = decoder_for(
        req.mode,
        Arc::clone(&state.tools),
        state.config.decoder.preview_chars,
    );
    let mut fragments = 0usize;

    let keepalive = GenerationEvent::Delta {
        text: String::new(),
    };
    let outcome = if tx.send(keepalive).await.is_err() {
        state.runs.cancel(control.run_id());
        Outcome::Cancelled
    } else {
        loop {
            tokio::select! {
                biased;
                _ = control.token().cancelled() => break Outcome::Cancelled,
                next = stream.next() => match next {
                    None => break Outcome::Completed,
                    Some(Err(e)) => break Outcome::Failed(e.to_string()),
                    Some(Ok(ModelEvent::Usage { usage })) => {
                        usage::record(&usage);
                    }
                    Some(Ok(ModelEvent::Chunk { data })) => {
                        if control.is_cancelled() {
                            break Outcome::Cancelled;
                        }
                        let Some(text) = decoder.decode(&data) else {
                            continue;
                        };
                        if text.is_empty() {
                            continue;
                        }
                        fragments += 1;
                        if tx.send(GenerationEvent::Delta { text }).await.is_err() {
                            tracing::info!("client went away, cancelling run");
                            state.runs.cancel(control.run_id());
                            break Outcome::Cancelled;
                        }
                    }
                },
            }
        }
    };

    // A stop that raced with the last chunk still wins.
    let outcome = if control.is_cancelled() {
        Outcome::Cancelled
    } else {
        outcome
    };

    match &outcome {
        Outcome::Completed => finish_completed(state, req, control, decoder.transcript()).await,
        Outcome::Failed(message) => {
            tracing::warn!(error = %message, "model stream failed");
            let entry = format!("AI reply failed: {message}");
            if let Err(e) = state
                .history
                .append(&req.task_id, &req.owner_id, Role::Ai, &entry)
                .await
            {
                tracing::warn!(error = %e, "failed to record error in history");
            }
        }
        Outcome::Cancelled => {
            tracing::info!("run interrupted, skipping history and build");
        }
    }

    if let Some(report) = state.usage.settle(&req.owner_id, &req.task_id) {
        let _ = tx.send(GenerationEvent::Usage { report }).await;
    }

    TraceEvent::RunFinished {
        run_id: req.run_id.clone(),
        task_id: req.task_id.clone(),
        mode: req.mode.to_string(),
        outcome: outcome.as_str().to_owned(),
        fragments,
        transcript_chars: decoder.transcript().chars().count(),
    }
    .emit();

    let terminal = match outcome {
        Outcome::Completed => GenerationEvent::Done,
        Outcome::Cancelled => GenerationEvent::Interrupted,
        Outcome::Failed(message) => GenerationEvent::Error { message },
    };
    let _ = tx.send(terminal).await;
}

/// Side effects of a run that finished normally. Each step re-checks the
/// cancellation flag first.
async fn finish_completed(
    state: &AppState,
    req: &GenerationRequest,
    control: &RunControl,
    transcript: &str,
) {
    let workspace: PathBuf = state.config.workspace.task_dir(req.mode, &req.task_id);

    if req.mode.extracts_code() {
        for file in extract(req.mode, transcript) {
            if control.is_cancelled() {
                return;
            }
            if file.content.is_empty() {
                tracing::debug!(path = %file.path, "skipping empty extracted file");
                continue;
            }
            match persist_file(&workspace, &file.path, &file.content).await {
                Ok(persisted) => {
                    tracing::debug!(path = %persisted.path, status = ?persisted.status, "file persisted");
                }
                Err(e) => tracing::warn!(path = %file.path, error = %e, "failed to persist file"),
            }
        }
    }

    if control.is_cancelled() {
        return;
    }
    if let Err(e) = state
        .history
        .append(&req.task_id, &req.owner_id, Role::Ai, transcript)
        .await
    {
        tracing::warn!(error = %e, "failed to record reply in history");
    }

    if req.mode.triggers_build() && !control.is_cancelled() {
        tracing::info!(workspace = %workspace.display(), "starting build");
        drop(state.builds.spawn(workspace));
    }
}
