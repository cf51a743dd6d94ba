//! Captured process runner: spawn a command, drain both pipes concurrently,
//! and enforce a hard timeout.
//!
//! The child is spawned as the leader of its own process group, so on timeout
//! the whole group (e.g. `npm` and the `node` it forks) is killed through the
//! group handle and a `command timed out after N s` line is appended to
//! stderr. Reader tasks get
//! a short grace period after exit so an orphaned grandchild that inherited a
//! pipe cannot hold the result hostage.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long reader tasks may keep draining after the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Exit code reported for timeouts and spawn failures.
pub const FAILED_EXIT_CODE: i32 = -1;

/// Output of one captured command.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CapturedOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    fn spawn_failure(program: &str, err: std::io::Error) -> Self {
        Self {
            exit_code: FAILED_EXIT_CODE,
            stderr_lines: vec![format!("failed to spawn '{program}': {err}")],
            ..Self::default()
        }
    }
}

type LineSink = Arc<Mutex<Vec<String>>>;

fn spawn_reader<R>(pipe: Option<R>, sink: LineSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(pipe) = pipe else {
            return;
        };
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink.lock().push(line);
        }
    })
}

/// Run `program args…` in `cwd`, capturing stdout and stderr line by line.
///
/// Never fails: spawn errors and timeouts are folded into the returned
/// [`CapturedOutput`] with exit code [`FAILED_EXIT_CODE`].
pub async fn run_captured(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> CapturedOutput {
    let started = Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.group_spawn() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(program, error = %e, cwd = %cwd.display(), "spawn failed");
            let mut out = CapturedOutput::spawn_failure(program, e);
            out.duration = started.elapsed();
            return out;
        }
    };
    let stdout_sink = LineSink::default();
    let stderr_sink = LineSink::default();
    let stdout_task = spawn_reader(child.inner().stdout.take(), stdout_sink.clone());
    let stderr_task = spawn_reader(child.inner().stderr.take(), stderr_sink.clone());

    let mut timed_out = false;
    let exit_code = tokio::select! {
        result = child.wait() => match result {
            Ok(status) => status.code().unwrap_or(FAILED_EXIT_CODE),
            Err(e) => {
                stderr_sink.lock().push(format!("failed to wait for process: {e}"));
                FAILED_EXIT_CODE
            }
        },
        _ = tokio::time::sleep(timeout) => {
            timed_out = true;
            if let Err(e) = kill_process_group(&mut child).await {
                tracing::warn!(program, error = %e, "failed to kill process group");
                stderr_sink.lock().push(format!("failed to kill process group: {e}"));
            }
            FAILED_EXIT_CODE
        }
    };

    for task in [stdout_task, stderr_task] {
        let abort = task.abort_handle();
        if tokio::time::timeout(READER_GRACE, task).await.is_err() {
            abort.abort();
        }
    }

    let stdout_lines = std::mem::take(&mut *stdout_sink.lock());
    let mut stderr_lines = std::mem::take(&mut *stderr_sink.lock());
    if timed_out {
        stderr_lines.push(format!(
            "command timed out after {} s",
            timeout.as_secs_f64().ceil() as u64
        ));
    }

    let duration = started.elapsed();
    tracing::debug!(
        program,
        exit_code,
        timed_out,
        duration_ms = duration.as_millis() as u64,
        "captured process finished"
    );

    CapturedOutput {
        exit_code,
        stdout_lines,
        stderr_lines,
        timed_out,
        duration,
    }
}

/// SIGKILL the child's whole process group and reap the leader.
async fn kill_process_group(child: &mut AsyncGroupChild) -> std::io::Result<()> {
    child.start_kill()?;
    child.wait().await?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
