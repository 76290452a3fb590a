// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication policy resolution.
//!
//! A [`ReplicationPolicy`] is derived from a source object's annotations on
//! every event and never cached. Resolution is a pure function of the object
//! and the startup [`PolicyDefaults`].
//!
//! # Precedence
//!
//! ```text
//! annotation present ──► annotation value (no trimming, empty segments dropped)
//! annotation absent  ──► startup default, minus anything the object's other
//!                        list names explicitly
//! ```
//!
//! The flag is fail-closed: absent or unparsable means disabled. Overlapping
//! allow/deny lists make the policy invalid.

use crate::object::{ConfigObject, ALLOWED_NAMESPACES, EXCLUDED_NAMESPACES, REPLICATION_ALLOWED};
use std::collections::BTreeSet;
use thiserror::Error;

/// Partition excluded by default when nothing else is configured.
pub const DEFAULT_EXCLUDED_PARTITION: &str = "kube-system";

/// Invalid policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The same partitions appear in both the allow-list and the deny-list.
    #[error("allowed and excluded partitions overlap: {}", partitions.join(","))]
    Overlap { partitions: Vec<String> },
}

/// Startup-level list defaults, lower precedence than object annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDefaults {
    pub allowed: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            allowed: BTreeSet::new(),
            excluded: BTreeSet::from([DEFAULT_EXCLUDED_PARTITION.to_string()]),
        }
    }
}

impl PolicyDefaults {
    /// No defaults at all: absent annotations mean empty lists.
    pub fn none() -> Self {
        Self {
            allowed: BTreeSet::new(),
            excluded: BTreeSet::new(),
        }
    }
}

/// Replication policy of one source object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplicationPolicy {
    pub enabled: bool,
    pub allowed: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
}

impl ReplicationPolicy {
    /// Resolve the policy of `object`.
    ///
    /// The disjointness check runs whether or not replication is enabled.
    pub fn resolve(object: &ConfigObject, defaults: &PolicyDefaults) -> Result<Self, PolicyError> {
        let enabled = parse_enabled(object.annotation(REPLICATION_ALLOWED));
        let declared_allowed = object.annotation(ALLOWED_NAMESPACES).map(parse_partition_list);
        let declared_excluded = object.annotation(EXCLUDED_NAMESPACES).map(parse_partition_list);

        let (allowed, excluded) = match (declared_allowed, declared_excluded) {
            (Some(allowed), Some(excluded)) => (allowed, excluded),
            (Some(allowed), None) => {
                let excluded = defaults.excluded.difference(&allowed).cloned().collect();
                (allowed, excluded)
            }
            (None, Some(excluded)) => {
                let allowed = defaults.allowed.difference(&excluded).cloned().collect();
                (allowed, excluded)
            }
            (None, None) => (defaults.allowed.clone(), defaults.excluded.clone()),
        };

        check_disjoint(&allowed, &excluded)?;

        Ok(Self {
            enabled,
            allowed,
            excluded,
        })
    }
}

/// Fail with `Overlap` when the two sets share any partition.
pub fn check_disjoint(
    allowed: &BTreeSet<String>,
    excluded: &BTreeSet<String>,
) -> Result<(), PolicyError> {
    let overlap: Vec<String> = allowed.intersection(excluded).cloned().collect();
    if overlap.is_empty() {
        Ok(())
    } else {
        Err(PolicyError::Overlap { partitions: overlap })
    }
}

/// Parse the enablement flag.
///
/// Accepts the usual boolean spellings (`1`, `t`, `T`, `TRUE`, `true`,
/// `True` and their false counterparts). Anything else, or no value, is
/// disabled.
pub fn parse_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "t" | "T" | "TRUE" | "true" | "True"))
}

/// Split a comma-separated partition list.
///
/// Entries are taken verbatim; only empty segments are dropped.
pub fn parse_partition_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}
