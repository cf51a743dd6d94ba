//! Per-run cancellation registry.
//!
//! Every accepted generation gets a [`RunControl`]. A stop request fires the
//! run's token; the generation loop watches the token alongside the model
//! stream and re-checks the flag before every side effect. The entry is
//! removed by a [`RunGuard`] when the generation task ends, however it ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use cm_domain::error::{Error, Result};
use cm_domain::trace::TraceEvent;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Control block for one run.
#[derive(Debug)]
pub struct RunControl {
    run_id: String,
    owner_id: OnceLock<String>,
    task_id: OnceLock<String>,
    cancelled: AtomicBool,
    token: CancellationToken,
}

impl RunControl {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_owned(),
            owner_id: OnceLock::new(),
            task_id: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.get().map(String::as_str)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.get().map(String::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Token that resolves once the run is cancelled. Listeners that
    /// subscribe after cancellation see it immediately.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Flip the flag and fire the token. Returns `true` only for the call
    /// that actually cancelled.
    pub fn cancel(&self) -> bool {
        let first = self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.token.cancel();
        }
        first
    }
}

/// Live runs keyed by run id.
#[derive(Default)]
pub struct RunControlRegistry {
    runs: RwLock<HashMap<String, Arc<RunControl>>>,
}

impl RunControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run, or return the existing entry with owner and task
    /// filled in if they were still unset.
    pub fn register(&self, run_id: &str, owner_id: &str, task_id: &str) -> Result<Arc<RunControl>> {
        if run_id.trim().is_empty() {
            return Err(Error::InvalidInput("run id must not be empty".into()));
        }

        let (control, fresh) = {
            let mut runs = self.runs.write();
            match runs.get(run_id) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let control = Arc::new(RunControl::new(run_id));
                    runs.insert(run_id.to_owned(), Arc::clone(&control));
                    (control, true)
                }
            }
        };
        if !owner_id.is_empty() {
            let _ = control.owner_id.set(owner_id.to_owned());
        }
        if !task_id.is_empty() {
            let _ = control.task_id.set(task_id.to_owned());
        }

        if fresh {
            TraceEvent::RunRegistered {
                run_id: run_id.to_owned(),
                owner_id: owner_id.to_owned(),
                task_id: task_id.to_owned(),
            }
            .emit();
        }
        Ok(control)
    }

    pub fn get(&self, run_id: &str) -> Option<Arc<RunControl>> {
        self.runs.read().get(run_id).cloned()
    }

    /// Cancel a run. Returns `false` for unknown ids.
    pub fn cancel(&self, run_id: &str) -> bool {
        let Some(control) = self.get(run_id) else {
            return false;
        };
        if control.cancel() {
            tracing::info!(run_id, "run cancelled");
            TraceEvent::RunCancelled {
                run_id: run_id.to_owned(),
            }
            .emit();
        }
        true
    }

    /// Cancel on behalf of `requester`, who must own the run.
    pub fn cancel_owned(&self, run_id: &str, requester: &str) -> Result<()> {
        let control = self
            .get(run_id)
            .ok_or_else(|| Error::NotFound(format!("run '{run_id}' is not active")))?;
        match control.owner_id() {
            Some(owner) if owner == requester => {
                self.cancel(run_id);
                Ok(())
            }
            _ => Err(Error::Forbidden(format!(
                "run '{run_id}' belongs to another user"
            ))),
        }
    }

    pub fn is_cancelled(&self, run_id: &str) -> bool {
        self.get(run_id).is_some_and(|c| c.is_cancelled())
    }

    pub fn remove(&self, run_id: &str) {
        self.runs.write().remove(run_id);
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }

    /// Guard that removes `run_id` from the registry when dropped.
    pub fn guard(self: &Arc<Self>, run_id: &str) -> RunGuard {
        RunGuard {
            registry: Arc::clone(self),
            run_id: run_id.to_owned(),
        }
    }
}

pub struct RunGuard {
    registry: Arc<RunControlRegistry>,
    run_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.run_id);
        tracing::debug!(run_id = %self.run_id, "run removed from registry");
    }
}
