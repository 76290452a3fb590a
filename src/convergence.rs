// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Convergence: drive each target partition to the source's desired state.
//!
//! For one source object and one action, every target is handled by its own
//! task in a [`JoinSet`], bounded by the shared [`Bulkhead`]. The fan-out is
//! joined before [`ConvergenceEngine::converge`] returns, so the caller gets
//! one [`TargetOutcome`] per target in a [`ConvergenceReport`].
//!
//! # Paths
//!
//! ```text
//! Create   create ──ok──► Created
//!            └─AlreadyExists─► get ──owned──► overwrite (Updated | Unchanged)
//!                               ├─foreign──► Conflict
//!                               └─gone─────► create again
//!
//! Update   get ──absent──► create
//!            ├──owned───► overwrite (Updated | Unchanged)
//!            └──foreign─► Conflict
//!
//! Delete   get ──absent──► Absent
//!            ├──owned───► delete (Deleted, or Absent if it vanished)
//!            └──foreign─► Conflict
//! ```
//!
//! "Owned" means the target's provenance annotation names this source.
//! Objects without provenance are never owned, so unrelated same-named
//! objects are never overwritten or deleted.
//!
//! # Failures
//!
//! A store error on one target becomes `Failed` for that target only; its
//! siblings proceed. Nothing is retried here: the next resync re-applies the
//! create path. A panicking target task is caught and reported as `Failed`.

use crate::error::ReplicatorError;
use crate::metrics;
use crate::object::{ConfigObject, ObjectKey, REPLICATED_FROM};
use crate::resilience::{Bulkhead, WriteThrottle};
use crate::store::{PartitionStore, StoreError, StoreResult};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// What the source's replicas should become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Source added, or re-applied by resync.
    Create,
    /// Source changed.
    Update,
    /// Source removed.
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of converging a single target partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// A new replica was written.
    Created,
    /// An owned replica's data was replaced.
    Updated,
    /// The owned replica already matched; no write was issued.
    Unchanged,
    /// The owned replica was removed.
    Deleted,
    /// Delete path found nothing to remove.
    Absent,
    /// A same-named object not owned by this source occupies the target.
    Conflict { found: Option<String> },
    /// A store call failed; left for the next resync.
    Failed(StoreError),
}

impl TargetOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOutcome::Created => "created",
            TargetOutcome::Updated => "updated",
            TargetOutcome::Unchanged => "unchanged",
            TargetOutcome::Deleted => "deleted",
            TargetOutcome::Absent => "absent",
            TargetOutcome::Conflict { .. } => "conflict",
            TargetOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TargetOutcome::Failed(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, TargetOutcome::Conflict { .. })
    }
}

/// Aggregated per-target results of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub source: ObjectKey,
    pub action: Action,
    /// Outcome per target partition.
    pub outcomes: BTreeMap<String, TargetOutcome>,
}

impl ConvergenceReport {
    pub fn new(source: ObjectKey, action: Action) -> Self {
        Self {
            source,
            action,
            outcomes: BTreeMap::new(),
        }
    }

    /// True when no target failed. Conflicts are refusals, not failures.
    pub fn is_success(&self) -> bool {
        !self.outcomes.values().any(TargetOutcome::is_failed)
    }

    pub fn outcome(&self, target: &str) -> Option<&TargetOutcome> {
        self.outcomes.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.outcomes.keys().map(String::as_str)
    }

    pub fn failures(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_failed()).count()
    }

    pub fn conflicts(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_conflict()).count()
    }

    /// Number of targets that received a write.
    pub fn writes(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| {
                matches!(
                    o,
                    TargetOutcome::Created | TargetOutcome::Updated | TargetOutcome::Deleted
                )
            })
            .count()
    }

    /// Conflicts and failures as errors, keyed by target.
    pub fn errors(&self) -> Vec<ReplicatorError> {
        self.outcomes
            .iter()
            .filter_map(|(target, outcome)| match outcome {
                TargetOutcome::Conflict { found } => Some(ReplicatorError::OwnershipConflict {
                    target: target.clone(),
                    name: self.source.name.clone(),
                    found: found.clone(),
                }),
                TargetOutcome::Failed(e) => Some(ReplicatorError::Store(e.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Per-target fan-out over a partition store.
pub struct ConvergenceEngine<S: PartitionStore> {
    store: Arc<S>,
    bulkhead: Arc<Bulkhead>,
    rate_limiter: Option<Arc<WriteThrottle>>,
}

impl<S: PartitionStore> Clone for ConvergenceEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            bulkhead: Arc::clone(&self.bulkhead),
            rate_limiter: self.rate_limiter.clone(),
        }
    }
}

impl<S: PartitionStore> ConvergenceEngine<S> {
    pub fn new(
        store: Arc<S>,
        bulkhead: Arc<Bulkhead>,
        rate_limiter: Option<Arc<WriteThrottle>>,
    ) -> Self {
        Self {
            store,
            bulkhead,
            rate_limiter,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Apply `action` for `source` to every partition in `targets`.
    ///
    /// Returns once every target task has finished.
    pub async fn converge(
        &self,
        source: &ConfigObject,
        targets: BTreeSet<String>,
        action: Action,
    ) -> ConvergenceReport {
        let start = Instant::now();
        let mut report = ConvergenceReport::new(source.key(), action);
        let target_count = targets.len();
        let mut join_set: JoinSet<(String, TargetOutcome)> = JoinSet::new();
        let mut pending = targets.clone();

        for target in targets {
            // Hold the slot for the whole task; waits here when saturated
            let permit = match self.bulkhead.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    report.outcomes.insert(
                        target,
                        TargetOutcome::Failed(StoreError::transient("fan-out", e.to_string())),
                    );
                    continue;
                }
            };

            let store = Arc::clone(&self.store);
            let limiter = self.rate_limiter.clone();
            let source = source.clone();

            join_set.spawn(async move {
                let _permit = permit;
                let work = converge_target(store.as_ref(), limiter.as_deref(), &source, &target, action);
                let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(source = %source.key(), target = %target, "Target task panicked");
                        TargetOutcome::Failed(StoreError::transient(action.as_str(), "target task panicked"))
                    }
                };
                (target, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((target, outcome)) => {
                    metrics::record_target_outcome(action.as_str(), outcome.as_str());
                    pending.remove(&target);
                    report.outcomes.insert(target, outcome);
                }
                Err(e) => {
                    // Only reachable if the runtime cancels the task
                    warn!(error = %e, "Target task did not complete");
                }
            }
        }
        record_unfinished(&mut report, pending);

        let failures = report.failures();
        metrics::record_convergence(action.as_str(), target_count, failures, start.elapsed());

        if failures > 0 || report.conflicts() > 0 {
            warn!(
                source = %report.source,
                action = %action,
                targets = target_count,
                failures,
                conflicts = report.conflicts(),
                "Convergence incomplete"
            );
        } else {
            debug!(
                source = %report.source,
                action = %action,
                targets = target_count,
                writes = report.writes(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Convergence complete"
            );
        }

        report
    }
}

/// Mark every target without an outcome as failed.
///
/// Targets skipped at the bulkhead already carry `Failed`; anything else left
/// here had its task cancelled before it reported.
fn record_unfinished(report: &mut ConvergenceReport, pending: BTreeSet<String>) {
    for target in pending {
        if report.outcomes.contains_key(&target) {
            continue;
        }
        metrics::record_target_outcome(report.action.as_str(), "failed");
        warn!(source = %report.source, target = %target, "Target finished without an outcome");
        report.outcomes.insert(
            target,
            TargetOutcome::Failed(StoreError::transient(report.action.as_str(), "target task cancelled")),
        );
    }
}

#[instrument(skip_all, fields(source = %source.key(), target = %target, action = action.as_str()))]
async fn converge_target<S: PartitionStore + ?Sized>(
    store: &S,
    limiter: Option<&WriteThrottle>,
    source: &ConfigObject,
    target: &str,
    action: Action,
) -> TargetOutcome {
    let result = match action {
        Action::Create => create_replica(store, limiter, source, target).await,
        Action::Update => update_replica(store, limiter, source, target).await,
        Action::Delete => delete_replica(store, limiter, source, target).await,
    };

    let outcome = result.unwrap_or_else(TargetOutcome::Failed);
    match &outcome {
        TargetOutcome::Created | TargetOutcome::Updated | TargetOutcome::Deleted => {
            info!(outcome = outcome.as_str(), "Replica converged");
        }
        TargetOutcome::Unchanged | TargetOutcome::Absent => {
            debug!(outcome = outcome.as_str(), "Replica already converged");
        }
        TargetOutcome::Conflict { found } => {
            warn!(found = ?found, "Target holds an object this source does not own, skipping");
        }
        TargetOutcome::Failed(e) => {
            warn!(error = %e, "Replica write failed, leaving for resync");
        }
    }
    outcome
}

async fn throttle(limiter: Option<&WriteThrottle>) {
    if let Some(limiter) = limiter {
        limiter.wait().await;
    }
}

fn conflict(existing: &ConfigObject) -> TargetOutcome {
    TargetOutcome::Conflict {
        found: existing.provenance().map(str::to_string),
    }
}

async fn create_replica<S: PartitionStore + ?Sized>(
    store: &S,
    limiter: Option<&WriteThrottle>,
    source: &ConfigObject,
    target: &str,
) -> StoreResult<TargetOutcome> {
    throttle(limiter).await;
    match store.create_object(source.replica_for(target)).await {
        Ok(_) => Ok(TargetOutcome::Created),
        Err(e) if e.is_already_exists() => match store.get_object(target, &source.name).await? {
            Some(existing) if existing.is_replica_of(&source.key()) => {
                overwrite(store, limiter, source, existing).await
            }
            Some(existing) => Ok(conflict(&existing)),
            None => {
                // Deleted between the create and the get
                throttle(limiter).await;
                store.create_object(source.replica_for(target)).await?;
                Ok(TargetOutcome::Created)
            }
        },
        Err(e) => Err(e),
    }
}

async fn update_replica<S: PartitionStore + ?Sized>(
    store: &S,
    limiter: Option<&WriteThrottle>,
    source: &ConfigObject,
    target: &str,
) -> StoreResult<TargetOutcome> {
    match store.get_object(target, &source.name).await? {
        None => {
            throttle(limiter).await;
            store.create_object(source.replica_for(target)).await?;
            Ok(TargetOutcome::Created)
        }
        Some(existing) if existing.is_replica_of(&source.key()) => {
            overwrite(store, limiter, source, existing).await
        }
        Some(existing) => Ok(conflict(&existing)),
    }
}

/// Replace an owned replica's data in place, keeping its other annotations.
async fn overwrite<S: PartitionStore + ?Sized>(
    store: &S,
    limiter: Option<&WriteThrottle>,
    source: &ConfigObject,
    mut existing: ConfigObject,
) -> StoreResult<TargetOutcome> {
    if existing.data == source.data {
        return Ok(TargetOutcome::Unchanged);
    }

    existing.data = source.data.clone();
    existing
        .annotations
        .insert(REPLICATED_FROM.to_string(), source.key().provenance());

    throttle(limiter).await;
    store.update_object(existing).await?;
    Ok(TargetOutcome::Updated)
}

async fn delete_replica<S: PartitionStore + ?Sized>(
    store: &S,
    limiter: Option<&WriteThrottle>,
    source: &ConfigObject,
    target: &str,
) -> StoreResult<TargetOutcome> {
    match store.get_object(target, &source.name).await? {
        None => Ok(TargetOutcome::Absent),
        Some(existing) if existing.is_replica_of(&source.key()) => {
            throttle(limiter).await;
            match store.delete_object(target, &source.name).await {
                Ok(()) => Ok(TargetOutcome::Deleted),
                Err(e) if e.is_not_found() => Ok(TargetOutcome::Absent),
                Err(e) => Err(e),
            }
        }
        Some(existing) => Ok(conflict(&existing)),
    }
}
