//! # ConfigMap Replicator
//!
//! Keeps a named configuration object duplicated across the partitions
//! (namespaces) of a cluster, driven entirely by annotations on the source
//! object.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           configmap-replicator                           │
//! │                                                                          │
//! │  ┌─────────────┐    ┌───────────────┐    ┌──────────────────────────┐    │
//! │  │ watch loop  │───►│ Lanes         │───►│ Reconciler               │    │
//! │  │ (changes)   │    │ (FIFO/object) │    │ policy ─► targets        │    │
//! │  └─────────────┘    └───────────────┘    └────────────┬─────────────┘    │
//! │         ▲                   ▲                         ▼                  │
//! │         │           ┌───────┴───────┐    ┌──────────────────────────┐    │
//! │         │           │ resync loop   │    │ ConvergenceEngine        │    │
//! │         │           │ (timer)       │    │ (bounded fan-out)        │    │
//! │         │           └───────────────┘    └────────────┬─────────────┘    │
//! └─────────┼─────────────────────────────────────────────┼──────────────────┘
//!           │                                             ▼
//!   ┌───────┴─────────────────────────────────────────────────────────┐
//!   │ PartitionStore: list / watch / get / create / update / delete   │
//!   └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Paths
//!
//! 1. **Watch**: every Added / Updated / Deleted notification is handled in
//!    arrival order per object.
//! 2. **Resync**: every `reconciliation_interval` all objects are re-applied,
//!    healing anything the watch dropped.
//!
//! ## Ownership
//!
//! Replicas carry `configmap-replicator/replicated-from = "<partition>_<name>"`.
//! The engine only overwrites or deletes objects whose provenance names the
//! source; unrelated same-named objects are reported as conflicts and left
//! alone.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use configmap_replicator::{MemoryStore, ReplicatorConfig, ReplicatorEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> configmap_replicator::Result<()> {
//!     let config = ReplicatorConfig::from_env()?;
//!     let store = Arc::new(MemoryStore::with_partitions(["team1", "team2"]));
//!
//!     let mut engine = ReplicatorEngine::new(config, store)?;
//!     engine.start()?;
//!
//!     // Engine runs until shutdown
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod convergence;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod metrics;
pub mod object;
pub mod policy;
pub mod reconciler;
pub mod resilience;
pub mod store;
pub mod target;

// Re-exports for convenience
pub use config::ReplicatorConfig;
pub use convergence::{Action, ConvergenceEngine, ConvergenceReport, TargetOutcome};
pub use dispatcher::{Command, EngineState, ReplicatorEngine};
pub use error::{ReplicatorError, Result};
pub use event::WatchEvent;
pub use object::{ConfigObject, ObjectKey};
pub use policy::{PolicyDefaults, PolicyError, ReplicationPolicy};
pub use reconciler::Reconciler;
pub use store::{MemoryStore, PartitionStore, StoreError};
pub use target::{resolve_targets, TargetMode};
