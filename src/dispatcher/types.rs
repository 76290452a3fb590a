//! Engine state and dispatcher command types.
//!
//! # State Transitions
//!
//! ```text
//!              start()
//! Created ──────────────→ Running
//!    │                       │
//!    │                       │ shutdown()
//!    │                       ↓
//!    │                  ShuttingDown ──(lanes drained)──→ Stopped
//!    │                       │
//!    │                       └──(drain timed out)──────→ Failed
//!    │ shutdown()
//!    └──────────────────────────────────────────────────→ Stopped
//! ```
//!
//! - **Created**: After `ReplicatorEngine::new()`. Events may already be
//!   injected with `handle_event()`, but no loop is running.
//! - **Running**: Watch loop and resync loop are active.
//! - **ShuttingDown**: Loops signalled; in-flight lanes draining.
//! - **Stopped**: Clean shutdown. Safe to drop.
//! - **Failed**: Shutdown could not drain in time. Some handlers may have
//!   been abandoned mid-flight; the next process start resyncs them.

use crate::event::WatchEvent;
use crate::object::{ConfigObject, ObjectKey};

/// State of the replicator engine.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not started.
    ///
    /// Call [`start()`](super::ReplicatorEngine::start) to begin watching.
    Created,

    /// Watching and resyncing.
    Running,

    /// Shutting down gracefully.
    ShuttingDown,

    /// Shut down cleanly.
    Stopped,

    /// Shutdown timed out with work still in flight.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Unit of work for a per-object lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A change observed on the watch.
    Event(WatchEvent),
    /// Re-apply the create path from a resync listing.
    Resync(ConfigObject),
}

impl Command {
    /// Lane key: commands with the same key run in arrival order.
    pub fn key(&self) -> ObjectKey {
        match self {
            Command::Event(event) => event.key(),
            Command::Resync(object) => object.key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::Event(event) => event.kind(),
            Command::Resync(_) => "resync",
        }
    }
}
