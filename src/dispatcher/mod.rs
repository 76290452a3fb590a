// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicator engine: the event dispatcher.
//!
//! Ties together:
//! - the watch loop (incremental path) in [`watch`]
//! - the resync loop (periodic self-heal) in [`resync`]
//! - per-object ordered lanes feeding the [`Reconciler`]
//!
//! # Architecture
//!
//! ```text
//!  watch_objects() ──► watch loop ──┐
//!                                   ├──► Lanes ──► Reconciler ──► ConvergenceEngine ──► store
//!  timer ──► list_objects() ────────┘   (FIFO per object)          (bounded fan-out)
//! ```
//!
//! Both loops only enqueue. Handlers run on lane tasks, so a failing or
//! panicking handler never stops either loop.

mod lanes;
mod resync;
mod types;
mod watch;

pub use types::{Command, EngineState};

use crate::config::ReplicatorConfig;
use crate::convergence::{ConvergenceEngine, ConvergenceReport};
use crate::error::{ReplicatorError, Result};
use crate::event::WatchEvent;
use crate::metrics;
use crate::reconciler::Reconciler;
use crate::resilience::{Bulkhead, WriteThrottle};
use crate::store::PartitionStore;
use lanes::Lanes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch as watch_channel};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The replicator engine.
///
/// Generic over the [`PartitionStore`] it watches and writes through. The
/// engine never writes to a source object; it only creates, updates and
/// deletes replicas carrying its provenance annotation.
pub struct ReplicatorEngine<S: PartitionStore> {
    config: ReplicatorConfig,
    interval: Duration,
    shutdown_timeout: Duration,

    store: Arc<S>,
    lanes: Arc<Lanes<S>>,

    state_tx: watch_channel::Sender<EngineState>,
    state_rx: watch_channel::Receiver<EngineState>,

    shutdown_tx: watch_channel::Sender<bool>,
    shutdown_rx: watch_channel::Receiver<bool>,

    handles: Vec<JoinHandle<()>>,
}

impl<S: PartitionStore> ReplicatorEngine<S> {
    /// Create an engine. Fails with a configuration error if `config` is
    /// invalid; nothing is started.
    pub fn new(config: ReplicatorConfig, store: Arc<S>) -> Result<Self> {
        config.validate()?;
        let interval = config.reconciliation_interval()?;
        let shutdown_timeout = config.shutdown_timeout()?;

        let rate_limiter = config.throttle_config().map(|cfg| {
            info!(
                rate_per_sec = cfg.per_sec,
                burst = cfg.burst,
                "Rate limiting enabled for replica writes"
            );
            Arc::new(WriteThrottle::new(cfg))
        });
        let bulkhead = Arc::new(Bulkhead::new(config.max_concurrent_targets));
        let convergence = ConvergenceEngine::new(Arc::clone(&store), bulkhead, rate_limiter);
        let reconciler = Reconciler::new(config.policy_defaults(), convergence);

        let (state_tx, state_rx) = watch_channel::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch_channel::channel(false);
        metrics::set_engine_state("Created");

        Ok(Self {
            config,
            interval,
            shutdown_timeout,
            store,
            lanes: Arc::new(Lanes::new(reconciler)),
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            handles: Vec::new(),
        })
    }

    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch_channel::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// Subscribe to the convergence report of every handled event.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<ConvergenceReport> {
        self.lanes.subscribe()
    }

    /// Number of objects with commands in flight.
    pub fn active_lanes(&self) -> usize {
        self.lanes.active()
    }

    /// Start the watch and resync loops.
    pub fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ReplicatorError::InvalidState {
                expected: EngineState::Created.to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            interval_ms = self.interval.as_millis() as u64,
            max_concurrent_targets = self.config.max_concurrent_targets,
            default_excluded = ?self.config.default_excluded_partitions,
            default_allowed = ?self.config.default_allowed_partitions,
            "Starting replicator engine"
        );

        let watch_handle = tokio::spawn(watch::run_watch(
            Arc::clone(&self.store),
            Arc::clone(&self.lanes),
            self.config.watch_backoff(),
            self.shutdown_rx.clone(),
        ));
        let resync_handle = tokio::spawn(resync::run_resync(
            Arc::clone(&self.store),
            Arc::clone(&self.lanes),
            self.interval,
            self.shutdown_rx.clone(),
        ));
        self.handles.push(watch_handle);
        self.handles.push(resync_handle);

        self.set_state(EngineState::Running);
        info!("Replicator engine running");
        Ok(())
    }

    /// Inject one event through the ordered lanes.
    ///
    /// Works before `start()` as well, which lets embedders drive the engine
    /// from their own watch. Rejected once shutdown has begun.
    pub fn handle_event(&self, event: WatchEvent) -> Result<()> {
        self.ensure_accepting()?;
        self.lanes.dispatch(Command::Event(event));
        Ok(())
    }

    /// Run one full resync pass now. Returns the number of objects queued.
    pub async fn resync_now(&self) -> Result<usize> {
        self.ensure_accepting()?;
        resync::resync_pass(self.store.as_ref(), &self.lanes).await
    }

    /// Resolve once no object has commands in flight.
    pub async fn wait_idle(&self) {
        self.lanes.wait_idle().await
    }

    /// Shut down gracefully.
    ///
    /// 1. Signal both loops and wait for them to exit
    /// 2. Wait for in-flight lanes to drain, up to `shutdown_timeout`
    ///
    /// Ends in `Stopped`, or `Failed` if lanes were still busy at the deadline.
    pub async fn shutdown(&mut self) {
        if matches!(self.state(), EngineState::Stopped | EngineState::Failed) {
            return;
        }

        info!("Shutting down replicator engine");
        self.set_state(EngineState::ShuttingDown);
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;

        for (i, handle) in std::mem::take(&mut self.handles).into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => debug!(task = i + 1, "Loop exited"),
                Ok(Err(e)) => warn!(task = i + 1, error = %e, "Loop panicked during shutdown"),
                Err(_) => warn!(task = i + 1, "Loop did not exit before shutdown timeout"),
            }
        }

        let active = self.lanes.active();
        if active > 0 {
            info!(active, "Waiting for in-flight lanes to drain");
        }

        match tokio::time::timeout_at(deadline, self.lanes.wait_idle()).await {
            Ok(()) => {
                self.set_state(EngineState::Stopped);
                info!("Replicator engine stopped");
            }
            Err(_) => {
                self.set_state(EngineState::Failed);
                warn!(
                    active = self.lanes.active(),
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Shutdown timed out with lanes still in flight"
                );
            }
        }
    }

    fn ensure_accepting(&self) -> Result<()> {
        match self.state() {
            EngineState::Created | EngineState::Running => Ok(()),
            _ => Err(ReplicatorError::Shutdown),
        }
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }
}
