//! Token accounting across the calls a single run fans out into.
//!
//! A run's [`UsageContext`] is reachable three ways:
//! - the explicit `Arc` handle (preferred),
//! - the task-local bound with [`scope`] for code running inside the
//!   generation task,
//! - the [`UsageLedger`] keyed by (owner, task) for nested calls on other
//!   tasks that only know those ids.
//!
//! All three point at the same atomic counter, so the settled total is the
//! sum of every report no matter where it came from.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cm_domain::config::UsageConfig;
use cm_domain::stream::Usage;
use cm_domain::trace::TraceEvent;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct UsageContext {
    owner_id: String,
    task_id: String,
    model: Option<String>,
    total: AtomicU64,
}

impl UsageContext {
    pub fn new(owner_id: &str, task_id: &str, model: Option<&str>) -> Self {
        Self {
            owner_id: owner_id.to_owned(),
            task_id: task_id.to_owned(),
            model: model.map(str::to_owned),
            total: AtomicU64::new(0),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Add `delta` units and return the new total.
    pub fn add(&self, delta: u64) -> u64 {
        self.total.fetch_add(delta, Ordering::AcqRel) + delta
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }
}

/// Final usage of a run, converted to billing points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub owner_id: String,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub total_tokens: u64,
    pub points: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type LedgerKey = (String, String);

pub struct UsageLedger {
    config: UsageConfig,
    contexts: RwLock<HashMap<LedgerKey, Arc<UsageContext>>>,
}

impl UsageLedger {
    pub fn new(config: UsageConfig) -> Self {
        Self {
            config,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    fn key(owner_id: &str, task_id: &str) -> LedgerKey {
        (owner_id.to_owned(), task_id.to_owned())
    }

    /// Fresh context for a run that is starting. A context left over from an
    /// earlier run on the same (owner, task) is replaced, never reused.
    pub fn begin(&self, owner_id: &str, task_id: &str, model: Option<&str>) -> Arc<UsageContext> {
        let ctx = Arc::new(UsageContext::new(owner_id, task_id, model));
        let previous = self
            .contexts
            .write()
            .insert(Self::key(owner_id, task_id), Arc::clone(&ctx));
        if let Some(previous) = previous {
            tracing::warn!(
                owner_id,
                task_id,
                stale_total = previous.total(),
                "replacing leftover usage context"
            );
        }
        ctx
    }

    pub fn shared(&self, owner_id: &str, task_id: &str) -> Option<Arc<UsageContext>> {
        self.contexts
            .read()
            .get(&Self::key(owner_id, task_id))
            .cloned()
    }

    /// Add usage from any task to a live run. Reports for (owner, task)
    /// with no live run are dropped; returns the new total otherwise.
    pub fn accumulate(&self, owner_id: &str, task_id: &str, delta: u64) -> Option<u64> {
        match self.shared(owner_id, task_id) {
            Some(ctx) => Some(ctx.add(delta)),
            None => {
                tracing::warn!(owner_id, task_id, delta, "usage report for no live run, dropped");
                None
            }
        }
    }

    pub fn clear(&self, owner_id: &str, task_id: &str) {
        self.contexts.write().remove(&Self::key(owner_id, task_id));
    }

    /// Read the final total once and convert it to points.
    pub fn settle(&self, owner_id: &str, task_id: &str) -> Option<UsageReport> {
        let ctx = self.shared(owner_id, task_id)?;
        let total_tokens = ctx.total();
        let report = UsageReport {
            owner_id: ctx.owner_id().to_owned(),
            task_id: ctx.task_id().to_owned(),
            model: ctx.model().map(str::to_owned),
            total_tokens,
            points: self.config.points_for(total_tokens),
        };

        tracing::info!(
            owner_id,
            task_id,
            total_tokens,
            points = report.points,
            "usage settled"
        );
        TraceEvent::UsageSettled {
            owner_id: report.owner_id.clone(),
            task_id: report.task_id.clone(),
            model: report.model.clone(),
            total_tokens,
            points: report.points,
        }
        .emit();

        Some(report)
    }

    /// Guard that clears (owner, task) from the ledger when dropped.
    pub fn guard(self: &Arc<Self>, owner_id: &str, task_id: &str) -> UsageGuard {
        UsageGuard {
            ledger: Arc::clone(self),
            owner_id: owner_id.to_owned(),
            task_id: task_id.to_owned(),
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }
}

pub struct UsageGuard {
    ledger: Arc<UsageLedger>,
    owner_id: String,
    task_id: String,
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        self.ledger.clear(&self.owner_id, &self.task_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task-local binding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

tokio::task_local! {
    static CURRENT: Arc<UsageContext>;
}

/// Run `fut` with `ctx` as the ambient usage context.
pub async fn scope<F: Future>(ctx: Arc<UsageContext>, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}

/// The ambient usage context, if the caller runs inside [`scope`].
pub fn current() -> Option<Arc<UsageContext>> {
    CURRENT.try_with(Arc::clone).ok()
}

/// Record a usage report against the ambient context. Reports with no
/// context are dropped; returns the new total when one was found.
pub fn record(usage: &Usage) -> Option<u64> {
    let units = usage.units();
    match current() {
        Some(ctx) => Some(ctx.add(units)),
        None => {
            tracing::debug!(units, "usage report outside any run, dropped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> Arc<UsageLedger> {
        Arc::new(UsageLedger::new(UsageConfig::default()))
    }

    #[tokio::test]
    async fn reports_from_other_tasks_sum_up() {
        let ledger = ledger();
        let ctx = ledger.begin("u1", "t1", Some("fast-model"));

        let outer = {
            let ctx = Arc::clone(&ctx);
            scope(ctx, async {
                record(&Usage {
                    total_tokens: 500,
                    ..Usage::default()
                })
            })
            .await
        };
        assert_eq!(outer, Some(500));
        assert_eq!(ctx.total(), 500);

        // Nested calls run on other tasks and do not inherit the task-local.
        let via_ledger = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                assert!(current().is_none());
                ledger.accumulate("u1", "t1", 120)
            })
        };
        let via_handle = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.add(80) })
        };
        via_ledger.await.unwrap();
        via_handle.await.unwrap();

        let report = ledger.settle("u1", "t1").unwrap();
        assert_eq!(report.total_tokens, 700);
        assert_eq!(report.points, 1);
        assert_eq!(report.model.as_deref(), Some("fast-model"));
    }

    #[tokio::test]
    async fn concurrent_accumulation_is_lossless() {
        let ledger = ledger();
        ledger.begin("u", "t", None);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        ledger.accumulate("u", "t", 3);
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(ledger.shared("u", "t").unwrap().total(), 4800);
    }

    #[test]
    fn record_without_context_is_dropped() {
        assert_eq!(record(&Usage::default()), None);
    }

    #[test]
    fn clear_discards_context() {
        let ledger = ledger();
        ledger.begin("u", "t", None);
        ledger.accumulate("u", "t", 2500);
        assert_eq!(ledger.settle("u", "t").unwrap().points, 3);
        ledger.clear("u", "t");
        assert!(ledger.is_empty());
        assert!(ledger.settle("u", "t").is_none());
    }

    #[test]
    fn late_report_after_clear_is_not_billed_to_next_run() {
        let ledger = ledger();
        let first = ledger.begin("u1", "t1", None);
        first.add(100);
        assert_eq!(ledger.settle("u1", "t1").unwrap().total_tokens, 100);
        ledger.clear("u1", "t1");

        // A nested call finishing after its run ended.
        assert_eq!(ledger.accumulate("u1", "t1", 120), None);
        assert!(ledger.is_empty());

        let second = ledger.begin("u1", "t1", None);
        second.add(10);
        assert_eq!(ledger.settle("u1", "t1").unwrap().total_tokens, 10);
    }

    #[test]
    fn begin_replaces_leftover_context() {
        let ledger = ledger();
        let stale = ledger.begin("u", "t", None);
        stale.add(42);
        let fresh = ledger.begin("u", "t", Some("m"));
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(ledger.settle("u", "t").unwrap().total_tokens, 0);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn each_run_carries_its_own_model() {
        let ledger = ledger();
        ledger.begin("u", "t", Some("a"));
        let again = ledger.begin("u", "t", Some("b"));
        assert_eq!(again.model(), Some("b"));
        assert_eq!(ledger.shared("u", "t").unwrap().model(), Some("b"));
        assert_eq!(ledger.len(), 1);
    }
}
