// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Partition store integration trait.
//!
//! Defines the interface the replicator needs from the cluster's object
//! store: partition enumeration, list/watch over configuration objects, and
//! CRUD scoped to `(partition, name)`.
//!
//! # Example
//!
//! ```rust,no_run
//! use configmap_replicator::store::{BoxFuture, PartitionStore, WatchStream};
//! use configmap_replicator::ConfigObject;
//! use futures::StreamExt;
//! use std::collections::BTreeSet;
//!
//! struct MyBackend { /* ... */ }
//!
//! impl PartitionStore for MyBackend {
//!     fn list_partitions(&self) -> BoxFuture<'_, BTreeSet<String>> {
//!         Box::pin(async move { Ok(BTreeSet::new()) })
//!     }
//!
//!     fn list_objects(&self, _partition: Option<&str>) -> BoxFuture<'_, Vec<ConfigObject>> {
//!         Box::pin(async move { Ok(Vec::new()) })
//!     }
//!
//!     fn watch_objects(&self) -> BoxFuture<'_, WatchStream> {
//!         Box::pin(async move { Ok(futures::stream::empty().boxed()) })
//!     }
//!
//!     fn get_object(&self, _partition: &str, _name: &str) -> BoxFuture<'_, Option<ConfigObject>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!
//!     fn create_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject> {
//!         Box::pin(async move { Ok(object) })
//!     }
//!
//!     fn update_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject> {
//!         Box::pin(async move { Ok(object) })
//!     }
//!
//!     fn delete_object(&self, _partition: &str, _name: &str) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```

mod memory;

pub use memory::MemoryStore;

use crate::event::WatchEvent;
use crate::object::ConfigObject;
use futures::stream::BoxStream;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Result type for partition store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Stream of watch notifications. Errors are reported in-band; the stream
/// ending means the subscription must be re-established.
pub type WatchStream = BoxStream<'static, StoreResult<WatchEvent>>;

/// Errors reported by a partition store.
///
/// `NotFound` and `AlreadyExists` are signals the convergence paths branch
/// on; everything else is `Transient`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object {partition}/{name} not found")]
    NotFound { partition: String, name: String },

    #[error("object {partition}/{name} already exists")]
    AlreadyExists { partition: String, name: String },

    #[error("partition {0} not found")]
    PartitionNotFound(String),

    /// Network, rate limiting, or any other API failure.
    #[error("{operation} failed: {message}")]
    Transient { operation: String, message: String },
}

impl StoreError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Whether a later attempt may succeed without anything else changing.
    ///
    /// A missing partition counts: it may be created before the next resync.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::PartitionNotFound(_))
    }
}

/// Trait defining what the replicator needs from the object store.
///
/// Implementations must be cheap to share across tasks; the engine holds
/// them behind an `Arc` and calls them concurrently for disjoint keys.
pub trait PartitionStore: Send + Sync + 'static {
    /// Enumerate all partitions.
    fn list_partitions(&self) -> BoxFuture<'_, BTreeSet<String>>;

    /// List objects in one partition, or in every partition for `None`.
    fn list_objects(&self, partition: Option<&str>) -> BoxFuture<'_, Vec<ConfigObject>>;

    /// Subscribe to changes across all partitions.
    fn watch_objects(&self) -> BoxFuture<'_, WatchStream>;

    /// Fetch a single object.
    fn get_object(&self, partition: &str, name: &str) -> BoxFuture<'_, Option<ConfigObject>>;

    /// Create an object. Fails with `AlreadyExists` if the key is taken.
    fn create_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject>;

    /// Replace an existing object. Fails with `NotFound` if it is absent.
    fn update_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject>;

    /// Delete an object. Fails with `NotFound` if it is absent.
    fn delete_object(&self, partition: &str, name: &str) -> BoxFuture<'_, ()>;
}

impl<S: PartitionStore + ?Sized> PartitionStore for Arc<S> {
    fn list_partitions(&self) -> BoxFuture<'_, BTreeSet<String>> {
        (**self).list_partitions()
    }

    fn list_objects(&self, partition: Option<&str>) -> BoxFuture<'_, Vec<ConfigObject>> {
        (**self).list_objects(partition)
    }

    fn watch_objects(&self) -> BoxFuture<'_, WatchStream> {
        (**self).watch_objects()
    }

    fn get_object(&self, partition: &str, name: &str) -> BoxFuture<'_, Option<ConfigObject>> {
        (**self).get_object(partition, name)
    }

    fn create_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject> {
        (**self).create_object(object)
    }

    fn update_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject> {
        (**self).update_object(object)
    }

    fn delete_object(&self, partition: &str, name: &str) -> BoxFuture<'_, ()> {
        (**self).delete_object(partition, name)
    }
}
