// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replicator.
//!
//! Errors are categorized by the scope they affect: the whole process, a
//! single source object, or a single (source, target) pair.
//!
//! # Error Categories
//!
//! | Error Type | Scope | Retryable | Description |
//! |------------|-------|-----------|-------------|
//! | `Config` | process | No | Invalid duration or setting, aborts startup |
//! | `Policy` | object | No | Allow/deny overlap, event skipped until fixed |
//! | `OwnershipConflict` | target | No | Target exists without matching provenance |
//! | `Store` | target | Yes | Store call failed, healed by the next resync |
//! | `InvalidState` | engine | No | Lifecycle call in the wrong state |
//! | `Shutdown` | engine | No | Engine is shutting down |
//! | `Internal` | engine | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Nothing is retried inline. [`ReplicatorError::is_retryable()`] tells
//! whether the periodic resync can be expected to fix the condition.

use crate::policy::PolicyError;
use crate::store::StoreError;
use thiserror::Error;

/// Result type alias for replicator operations.
pub type Result<T> = std::result::Result<T, ReplicatorError>;

/// Errors that can occur while replicating.
#[derive(Error, Debug)]
pub enum ReplicatorError {
    /// Invalid configuration.
    ///
    /// Returned from config validation and engine construction.
    /// Fatal: fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source object's replication policy is invalid.
    ///
    /// The triggering event is skipped entirely; no target is touched.
    #[error("Policy error for {object}: {source}")]
    Policy {
        object: String,
        #[source]
        source: PolicyError,
    },

    /// A same-named object in the target partition is not ours.
    #[error("Ownership conflict at {target}/{name}: found provenance {found:?}")]
    OwnershipConflict {
        target: String,
        name: String,
        found: Option<String>,
    },

    /// Partition store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicatorError {
    /// Create a policy error for the given object identity.
    pub fn policy(object: impl Into<String>, source: PolicyError) -> Self {
        Self::Policy {
            object: object.into(),
            source,
        }
    }

    /// Check if the next resync may resolve this error without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Config(_) => false,
            Self::Policy { .. } => false, // Needs annotation fix
            Self::OwnershipConflict { .. } => false, // Needs the foreign object removed
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}
