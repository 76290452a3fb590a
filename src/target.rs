// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Target partition resolution.
//!
//! Two modes, chosen by whether the allow-list is empty:
//!
//! ```text
//! Explicit   (allow-list non-empty)  targets = allowed − {source}
//! AllExcept  (allow-list empty)      targets = all − {source} − excluded
//! ```
//!
//! Explicit mode does not consult the partition list at all, so allow-listed
//! partitions that do not exist still become targets (their writes fail and
//! are retried by resync). The source partition is never a target.

use crate::policy::ReplicationPolicy;
use std::collections::BTreeSet;

/// How the target set is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Exactly the allow-listed partitions.
    Explicit,
    /// Every existing partition minus the deny-list.
    AllExcept,
}

impl TargetMode {
    pub fn of(policy: &ReplicationPolicy) -> Self {
        if policy.allowed.is_empty() {
            TargetMode::AllExcept
        } else {
            TargetMode::Explicit
        }
    }

    /// Whether resolution needs the current partition list.
    pub fn needs_partition_list(self) -> bool {
        matches!(self, TargetMode::AllExcept)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetMode::Explicit => "explicit",
            TargetMode::AllExcept => "all_except",
        }
    }
}

/// Compute the target partitions for a source living in `source_partition`.
///
/// `all_partitions` is ignored in explicit mode.
pub fn resolve_targets(
    policy: &ReplicationPolicy,
    source_partition: &str,
    all_partitions: &BTreeSet<String>,
) -> BTreeSet<String> {
    match TargetMode::of(policy) {
        TargetMode::Explicit => policy
            .allowed
            .iter()
            .filter(|p| p.as_str() != source_partition)
            .cloned()
            .collect(),
        TargetMode::AllExcept => all_partitions
            .iter()
            .filter(|p| p.as_str() != source_partition && !policy.excluded.contains(p.as_str()))
            .cloned()
            .collect(),
    }
}
