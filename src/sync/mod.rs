//! Reconciliation of the flattened map against a remote key-value store.
//!
//! This module provides:
//! - `reconcile`, which classifies every key into create, update, delete or
//!   unchanged against a point-in-time remote snapshot
//! - `apply`, which issues the puts and then the deletes, counting successes
//!   and failures per category instead of stopping at the first error

pub mod consul;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::flatten::FlatMap;
pub use store::{KvStore, MemoryStore, RemoteSnapshot};

/// Default number of store requests kept in flight.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// The mutations needed to make the remote match the local map.
///
/// The four key sets are disjoint and together cover every local and
/// remote key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    /// Local keys absent from the remote.
    pub to_create: BTreeMap<String, Vec<u8>>,
    /// Keys on both sides whose bytes differ; holds the local value.
    pub to_update: BTreeMap<String, Vec<u8>>,
    /// Remote keys with no local counterpart.
    pub to_delete: BTreeSet<String>,
    /// Keys whose bytes already match.
    pub unchanged: BTreeSet<String>,
}

impl SyncPlan {
    /// Whether applying the plan would change nothing.
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Number of store operations the plan needs.
    pub fn operation_count(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            writeln!(f, "No differences found ({} keys unchanged).", self.unchanged.len())?;
            return Ok(());
        }

        for key in self.to_create.keys() {
            writeln!(f, "+ {}", key)?;
        }
        for key in self.to_update.keys() {
            writeln!(f, "~ {}", key)?;
        }
        for key in &self.to_delete {
            writeln!(f, "- {}", key)?;
        }
        writeln!(
            f,
            "Summary: +{} ~{} -{} ({} unchanged)",
            self.to_create.len(),
            self.to_update.len(),
            self.to_delete.len(),
            self.unchanged.len()
        )
    }
}

/// Classify every local and remote key.
pub fn reconcile(local: &FlatMap, remote: &RemoteSnapshot) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for (key, value) in local.iter() {
        match remote.get(key) {
            None => {
                plan.to_create.insert(key.to_string(), value.to_vec());
            }
            Some(existing) if existing.as_slice() != value => {
                plan.to_update.insert(key.to_string(), value.to_vec());
            }
            Some(_) => {
                plan.unchanged.insert(key.to_string());
            }
        }
    }

    for key in remote.keys() {
        if !local.contains_key(key) {
            plan.to_delete.insert(key.clone());
        }
    }

    plan
}

/// Kind of store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOp {
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOp::Create => write!(f, "create"),
            SyncOp::Update => write!(f, "update"),
            SyncOp::Delete => write!(f, "delete"),
        }
    }
}

/// A single operation that the store rejected.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub op: SyncOp,
    pub key: String,
    pub error: StoreError,
}

/// Success and failure counts for one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpCounts {
    pub succeeded: usize,
    pub failed: usize,
}

impl OpCounts {
    fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Outcome of applying a plan. Nothing is rolled back on failure.
#[derive(Debug, Clone, Default)]
pub struct AppliedResult {
    pub created: OpCounts,
    pub updated: OpCounts,
    pub deleted: OpCounts,
    pub failures: Vec<SyncFailure>,
}

impl AppliedResult {
    pub fn attempted(&self) -> usize {
        [self.created, self.updated, self.deleted]
            .iter()
            .map(|c| c.succeeded + c.failed)
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, op: SyncOp, key: String, outcome: Result<(), StoreError>) {
        let counts = match op {
            SyncOp::Create => &mut self.created,
            SyncOp::Update => &mut self.updated,
            SyncOp::Delete => &mut self.deleted,
        };
        counts.record(outcome.is_ok());
        if let Err(error) = outcome {
            warn!(op = %op, key = %key, error = %error, "Sync operation failed");
            self.failures.push(SyncFailure { op, key, error });
        }
    }
}

impl fmt::Display for AppliedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created {}/{}, updated {}/{}, deleted {}/{}",
            self.created.succeeded,
            self.created.succeeded + self.created.failed,
            self.updated.succeeded,
            self.updated.succeeded + self.updated.failed,
            self.deleted.succeeded,
            self.deleted.succeeded + self.deleted.failed,
        )
    }
}

/// Fetch the remote snapshot under `prefix`.
pub async fn fetch_snapshot(store: &dyn KvStore, prefix: &str) -> Result<RemoteSnapshot, StoreError> {
    let snapshot = store.list(prefix).await?;
    debug!(prefix = %prefix, keys = snapshot.len(), "Fetched remote snapshot");
    Ok(snapshot)
}

/// Apply `plan` to `store`, keeping up to `concurrency` requests in flight.
///
/// Every put settles before the first delete is sent.
pub async fn apply(plan: &SyncPlan, store: &dyn KvStore, concurrency: usize) -> AppliedResult {
    let concurrency = concurrency.max(1);
    let mut result = AppliedResult::default();

    let puts = plan
        .to_create
        .iter()
        .map(|(k, v)| (SyncOp::Create, k, v))
        .chain(plan.to_update.iter().map(|(k, v)| (SyncOp::Update, k, v)));

    let put_outcomes: Vec<_> = stream::iter(puts)
        .map(|(op, key, value)| async move { (op, key.clone(), store.put(key, value).await) })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    for (op, key, outcome) in put_outcomes {
        result.record(op, key, outcome);
    }

    let delete_outcomes: Vec<_> = stream::iter(plan.to_delete.iter())
        .map(|key| async move { (key.clone(), store.delete(key).await) })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    for (key, outcome) in delete_outcomes {
        result.record(SyncOp::Delete, key, outcome);
    }

    info!(
        created = result.created.succeeded,
        updated = result.updated.succeeded,
        deleted = result.deleted.succeeded,
        failed = result.failed(),
        "Sync applied"
    );
    result
}

/// Fetch, reconcile and apply in one pass.
pub async fn sync(
    local: &FlatMap,
    store: &dyn KvStore,
    prefix: &str,
    concurrency: usize,
) -> Result<(SyncPlan, AppliedResult), StoreError> {
    let remote = fetch_snapshot(store, prefix).await?;
    let plan = reconcile(local, &remote);
    info!(
        create = plan.to_create.len(),
        update = plan.to_update.len(),
        delete = plan.to_delete.len(),
        unchanged = plan.unchanged.len(),
        "Computed sync plan"
    );
    let applied = apply(&plan, store, concurrency).await;
    Ok((plan, applied))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(pairs: &[(&str, &str)]) -> FlatMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    fn remote(pairs: &[(&str, &str)]) -> RemoteSnapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_reconcile_classifies_keys() {
        let plan = reconcile(
            &local(&[("p/new", "1"), ("p/changed", "2"), ("p/same", "3")]),
            &remote(&[("p/changed", "old"), ("p/same", "3"), ("p/gone", "x")]),
        );
        assert_eq!(plan.to_create.keys().collect::<Vec<_>>(), vec!["p/new"]);
        assert_eq!(plan.to_update.get("p/changed"), Some(&b"2".to_vec()));
        assert_eq!(plan.to_delete.iter().collect::<Vec<_>>(), vec!["p/gone"]);
        assert_eq!(plan.unchanged.iter().collect::<Vec<_>>(), vec!["p/same"]);
        assert_eq!(plan.operation_count(), 3);
    }

    #[test]
    fn test_reconcile_partitions_union() {
        let l = local(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let r = remote(&[("b", "2"), ("c", "x"), ("d", "4")]);
        let plan = reconcile(&l, &r);

        let mut seen: Vec<&String> = plan
            .to_create
            .keys()
            .chain(plan.to_update.keys())
            .chain(plan.to_delete.iter())
            .chain(plan.unchanged.iter())
            .collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total, "key sets overlap");

        let mut union: Vec<String> = l.entries().keys().chain(r.keys()).cloned().collect();
        union.sort();
        union.dedup();
        assert_eq!(seen.into_iter().cloned().collect::<Vec<_>>(), union);
    }

    #[test]
    fn test_values_compared_byte_for_byte() {
        let plan = reconcile(&local(&[("a", "1.0")]), &remote(&[("a", "1")]));
        assert!(plan.to_update.contains_key("a"));
    }

    #[test]
    fn test_empty_plan_display() {
        let plan = reconcile(&local(&[("a", "1")]), &remote(&[("a", "1")]));
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "No differences found (1 keys unchanged).\n");
    }

    #[test]
    fn test_plan_display() {
        let plan = reconcile(&local(&[("a", "1"), ("b", "2")]), &remote(&[("b", "0"), ("c", "3")]));
        let text = plan.to_string();
        assert!(text.contains("+ a\n"));
        assert!(text.contains("~ b\n"));
        assert!(text.contains("- c\n"));
        assert!(text.ends_with("Summary: +1 ~1 -1 (0 unchanged)\n"));
    }

    #[tokio::test]
    async fn test_apply_converges_store() {
        let store = MemoryStore::with_entries(remote(&[("p/b", "old"), ("p/c", "x"), ("p/d", "4")]));
        let l = local(&[("p/a", "1"), ("p/b", "2"), ("p/d", "4")]);

        let (plan, applied) = sync(&l, &store, "p/", 2).await.unwrap();
        assert_eq!(plan.operation_count(), 3);
        assert!(applied.is_success());
        assert_eq!(applied.created.succeeded, 1);
        assert_eq!(applied.updated.succeeded, 1);
        assert_eq!(applied.deleted.succeeded, 1);
        assert_eq!(&store.snapshot(), l.entries());
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let start = remote(&[("p/b", "old"), ("p/c", "x")]);
        let l = local(&[("p/a", "1"), ("p/b", "2")]);
        let plan = reconcile(&l, &start);

        let store = MemoryStore::with_entries(start.clone());
        apply(&plan, &store, 4).await;
        let once = store.snapshot();
        let again = apply(&plan, &store, 4).await;
        assert!(again.is_success());
        assert_eq!(store.snapshot(), once);

        let fresh = MemoryStore::with_entries(start);
        apply(&plan, &fresh, 1).await;
        assert_eq!(fresh.snapshot(), once);
    }

    #[tokio::test]
    async fn test_apply_reports_partial_failure() {
        let store = MemoryStore::with_entries(remote(&[("p/gone", "x"), ("p/stuck", "y")]));
        store.fail_on("p/bad");
        store.fail_on("p/stuck");
        let l = local(&[("p/bad", "1"), ("p/good", "2")]);

        let (_, applied) = sync(&l, &store, "p/", 8).await.unwrap();
        assert_eq!(applied.created, OpCounts { succeeded: 1, failed: 1 });
        assert_eq!(applied.deleted, OpCounts { succeeded: 1, failed: 1 });
        assert_eq!(applied.attempted(), 4);
        assert_eq!(applied.failed(), 2);
        let mut failed: Vec<_> = applied.failures.iter().map(|f| (f.op, f.key.as_str())).collect();
        failed.sort_by_key(|(_, k)| *k);
        assert_eq!(failed, vec![(SyncOp::Create, "p/bad"), (SyncOp::Delete, "p/stuck")]);

        let after = store.snapshot();
        assert!(after.contains_key("p/good"));
        assert!(!after.contains_key("p/gone"));
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let store = MemoryStore::new();
        let plan = reconcile(&local(&[("a", "1")]), &RemoteSnapshot::new());
        let applied = apply(&plan, &store, 0).await;
        assert_eq!(applied.created.succeeded, 1);
    }

    #[test]
    fn test_applied_result_display() {
        let result = AppliedResult {
            created: OpCounts { succeeded: 2, failed: 1 },
            updated: OpCounts { succeeded: 1, failed: 0 },
            deleted: OpCounts::default(),
            failures: Vec::new(),
        };
        assert_eq!(result.to_string(), "created 2/3, updated 1/1, deleted 0/0");
    }
}
