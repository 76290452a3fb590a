// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration objects and the annotation vocabulary.
//!
//! A [`ConfigObject`] is the single resource kind the replicator handles: a
//! named key/value data mapping living in one partition, plus free-form
//! annotations. Sources and replicas share the same shape; a replica is told
//! apart by its provenance annotation.
//!
//! # Annotations
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `configmap-replicator/replication-allowed` | `"true"` enables replication |
//! | `configmap-replicator/allowed-namespaces` | comma-separated allow-list |
//! | `configmap-replicator/excluded-namespaces` | comma-separated deny-list |
//! | `configmap-replicator/replicated-from` | provenance, `<partition>_<name>` |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix shared by every annotation the replicator reads or writes.
pub const ANNOTATION_PREFIX: &str = "configmap-replicator";

/// Boolean flag enabling replication for a source object.
pub const REPLICATION_ALLOWED: &str = "configmap-replicator/replication-allowed";

/// Comma-separated allow-list of target partitions.
pub const ALLOWED_NAMESPACES: &str = "configmap-replicator/allowed-namespaces";

/// Comma-separated deny-list of target partitions.
pub const EXCLUDED_NAMESPACES: &str = "configmap-replicator/excluded-namespaces";

/// Provenance marker written on every replica.
pub const REPLICATED_FROM: &str = "configmap-replicator/replicated-from";

/// Identity of an object: the partition it lives in and its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub partition: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(partition: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            name: name.into(),
        }
    }

    /// Provenance value identifying this object as the source of a replica.
    pub fn provenance(&self) -> String {
        format!("{}_{}", self.partition, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.name)
    }
}

/// A configuration object snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigObject {
    /// Partition (namespace) the object lives in.
    pub partition: String,

    /// Object name, unique within its partition.
    pub name: String,

    /// The replicated payload.
    #[serde(default)]
    pub data: BTreeMap<String, String>,

    /// Metadata annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ConfigObject {
    /// Create an empty object.
    pub fn new(partition: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            name: name.into(),
            data: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Builder: add a data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Builder: add an annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.partition.clone(), self.name.clone())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// The provenance annotation, if this object is a replica.
    pub fn provenance(&self) -> Option<&str> {
        self.annotation(REPLICATED_FROM)
    }

    /// Whether this object is a replica owned by `source`.
    ///
    /// Objects without provenance are never owned by anyone.
    pub fn is_replica_of(&self, source: &ObjectKey) -> bool {
        self.name == source.name && self.provenance() == Some(source.provenance().as_str())
    }

    /// Build the fresh replica of this object for `target`.
    ///
    /// Only the data is copied; the replica's sole annotation is provenance,
    /// so replicas never carry the replication flag themselves.
    pub fn replica_for(&self, target: &str) -> ConfigObject {
        let mut annotations = BTreeMap::new();
        annotations.insert(REPLICATED_FROM.to_string(), self.key().provenance());
        ConfigObject {
            partition: target.to_string(),
            name: self.name.clone(),
            data: self.data.clone(),
            annotations,
        }
    }
}
