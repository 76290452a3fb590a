// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-object ordered execution.
//!
//! Each source object identity gets a lane: a FIFO of pending commands
//! drained by a single task. Commands for the same `(partition, name)` run in
//! arrival order; different objects run concurrently.
//!
//! ```text
//! dispatch(cmd) ──► queues[key] exists? ──yes──► push_back
//!                          │
//!                          no ──► insert empty queue, spawn drain(key, cmd)
//!
//! drain: run(cmd) ──► pop_front ──Some──► run ...
//!                        └─None──► remove queue (under the same entry lock)
//! ```
//!
//! The pop-or-remove step holds the map entry, so a concurrent dispatch
//! either lands in the queue before it is removed or finds no queue and
//! starts a fresh lane. A handler error or panic is logged and the lane
//! moves on to the next command.

use super::types::Command;
use crate::convergence::ConvergenceReport;
use crate::error::ReplicatorError;
use crate::metrics;
use crate::object::ObjectKey;
use crate::reconciler::Reconciler;
use crate::store::PartitionStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info_span, warn, Instrument};

/// Buffer for report subscribers. Slow subscribers lose old reports.
const REPORT_BUFFER: usize = 1024;

pub(crate) struct Lanes<S: PartitionStore> {
    queues: DashMap<ObjectKey, VecDeque<Command>>,
    reconciler: Reconciler<S>,
    idle: Notify,
    reports: broadcast::Sender<ConvergenceReport>,
}

impl<S: PartitionStore> Lanes<S> {
    pub(crate) fn new(reconciler: Reconciler<S>) -> Self {
        let (reports, _) = broadcast::channel(REPORT_BUFFER);
        Self {
            queues: DashMap::new(),
            reconciler,
            idle: Notify::new(),
            reports,
        }
    }

    /// Queue a command on its object's lane, starting the lane if idle.
    pub(crate) fn dispatch(self: &Arc<Self>, command: Command) {
        metrics::record_event_received(command.kind());
        let key = command.key();

        let start_with = match self.queues.entry(key.clone()) {
            Entry::Occupied(mut queue) => {
                queue.get_mut().push_back(command);
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::new());
                Some(command)
            }
        };

        if let Some(first) = start_with {
            metrics::set_active_lanes(self.queues.len());
            let lanes = Arc::clone(self);
            tokio::spawn(async move { lanes.drain(key, first).await });
        }
    }

    /// Number of lanes with work in flight.
    pub(crate) fn active(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConvergenceReport> {
        self.reports.subscribe()
    }

    /// Resolve once no lane is active.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a wake-up in between is not lost
            notified.as_mut().enable();
            if self.queues.is_empty() {
                return;
            }
            notified.await;
        }
    }

    async fn drain(&self, key: ObjectKey, first: Command) {
        let mut next = Some(first);
        while let Some(command) = next {
            self.run(command).await;
            next = self.pop(&key);
        }

        metrics::set_active_lanes(self.queues.len());
        if self.queues.is_empty() {
            self.idle.notify_waiters();
        }
    }

    fn pop(&self, key: &ObjectKey) -> Option<Command> {
        match self.queues.entry(key.clone()) {
            Entry::Occupied(mut queue) => {
                let next = queue.get_mut().pop_front();
                if next.is_none() {
                    queue.remove();
                }
                next
            }
            Entry::Vacant(_) => None,
        }
    }

    async fn run(&self, command: Command) {
        let key = command.key();
        let kind = command.kind();
        let span = info_span!("reconcile", object = %key, kind);

        let handled = AssertUnwindSafe(self.reconciler.handle(command).instrument(span))
            .catch_unwind()
            .await;

        match handled {
            Ok(Ok(Some(report))) => {
                let _ = self.reports.send(report);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e @ ReplicatorError::Policy { .. })) => {
                // Already logged with the offending lists
                metrics::record_handler_failure("policy");
                debug!(object = %key, kind, error = %e, "Event skipped");
            }
            Ok(Err(e)) => {
                metrics::record_handler_failure("error");
                warn!(
                    object = %key,
                    kind,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Handler failed"
                );
            }
            Err(_) => {
                metrics::record_handler_failure("panic");
                error!(object = %key, kind, "Handler panicked, continuing with next event");
            }
        }
    }
}
