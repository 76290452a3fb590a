// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-object command handling.
//!
//! A [`Reconciler`] carries everything a handler needs (store handle, policy
//! defaults, convergence engine) and turns one [`Command`] into one
//! [`ConvergenceReport`]:
//!
//! ```text
//! Command ──► resolve policy ──► enabled? ──► targets ──► converge
//!                  │                 │
//!                  └─ invalid: Err   └─ disabled: Ok(None), zero writes
//! ```
//!
//! Watch events are resolved from the snapshot they carry, so a delete uses
//! the last known annotations of the removed object. Resync commands re-read
//! the object first: a listing can be older than a delete already handled
//! on the same lane, and replaying it would recreate orphaned replicas.

use crate::convergence::{Action, ConvergenceEngine, ConvergenceReport};
use crate::dispatcher::Command;
use crate::error::{ReplicatorError, Result};
use crate::event::WatchEvent;
use crate::metrics;
use crate::object::ConfigObject;
use crate::policy::{PolicyDefaults, ReplicationPolicy};
use crate::store::PartitionStore;
use crate::target::{resolve_targets, TargetMode};
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub struct Reconciler<S: PartitionStore> {
    defaults: PolicyDefaults,
    convergence: ConvergenceEngine<S>,
}

impl<S: PartitionStore> Reconciler<S> {
    pub fn new(defaults: PolicyDefaults, convergence: ConvergenceEngine<S>) -> Self {
        Self {
            defaults,
            convergence,
        }
    }

    pub fn defaults(&self) -> &PolicyDefaults {
        &self.defaults
    }

    /// Handle one command for one source object.
    ///
    /// Returns `Ok(None)` when replication is not enabled on the source.
    /// An invalid policy is an error and no target is touched.
    pub async fn handle(&self, command: Command) -> Result<Option<ConvergenceReport>> {
        let (source, action) = match command {
            Command::Event(WatchEvent::Added(object)) => (object, Action::Create),
            Command::Event(WatchEvent::Updated { before, after }) => {
                debug!(
                    object = %after.key(),
                    data_changed = before.data != after.data,
                    "Source updated"
                );
                (after, Action::Update)
            }
            Command::Event(WatchEvent::Deleted(object)) => (object, Action::Delete),
            Command::Resync(listed) => match self.current(&listed).await? {
                Some(object) => (object, Action::Create),
                None => {
                    debug!(object = %listed.key(), "Object gone since listing, skipping resync");
                    return Ok(None);
                }
            },
        };

        self.reconcile(&source, action).await
    }

    /// Re-read a listed object. A resync snapshot may be older than events
    /// already handled on the same lane, so only the live object is applied.
    async fn current(&self, listed: &ConfigObject) -> Result<Option<ConfigObject>> {
        let object = self
            .convergence
            .store()
            .get_object(&listed.partition, &listed.name)
            .await?;
        Ok(object)
    }

    /// Resolve policy and targets for `source`, then converge.
    pub async fn reconcile(
        &self,
        source: &ConfigObject,
        action: Action,
    ) -> Result<Option<ConvergenceReport>> {
        let policy = match ReplicationPolicy::resolve(source, &self.defaults) {
            Ok(policy) => policy,
            Err(e) => {
                metrics::record_policy_error();
                warn!(object = %source.key(), error = %e, "Invalid replication policy, skipping");
                return Err(ReplicatorError::policy(source.key().to_string(), e));
            }
        };

        if !policy.enabled {
            metrics::record_policy_skipped();
            debug!(object = %source.key(), "Replication not enabled");
            return Ok(None);
        }

        let mode = TargetMode::of(&policy);
        let partitions = if mode.needs_partition_list() {
            self.convergence.store().list_partitions().await?
        } else {
            BTreeSet::new()
        };
        let targets = resolve_targets(&policy, &source.partition, &partitions);

        debug!(
            object = %source.key(),
            action = %action,
            mode = mode.as_str(),
            targets = targets.len(),
            "Resolved targets"
        );

        Ok(Some(self.convergence.converge(source, targets, action).await))
    }
}
