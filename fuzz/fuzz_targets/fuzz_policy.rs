//! Fuzz target for policy resolution and target selection.
//!
//! Arbitrary annotation values must resolve to either an overlap error or
//! a policy whose targets never include the source partition or a
//! deny-listed partition.

#![no_main]

use configmap_replicator::object::{ALLOWED_NAMESPACES, EXCLUDED_NAMESPACES, REPLICATION_ALLOWED};
use configmap_replicator::policy::parse_partition_list;
use configmap_replicator::{resolve_targets, ConfigObject, PolicyDefaults, ReplicationPolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, Option<&str>, Option<&str>, &str, &str)| {
    let (flag, allowed, excluded, source_partition, partitions) = data;

    let mut object = ConfigObject::new(source_partition, "fuzz")
        .with_annotation(REPLICATION_ALLOWED, flag);
    if let Some(allowed) = allowed {
        object = object.with_annotation(ALLOWED_NAMESPACES, allowed);
    }
    if let Some(excluded) = excluded {
        object = object.with_annotation(EXCLUDED_NAMESPACES, excluded);
    }

    let policy = match ReplicationPolicy::resolve(&object, &PolicyDefaults::default()) {
        Ok(policy) => policy,
        Err(_) => return,
    };
    assert!(policy.allowed.is_disjoint(&policy.excluded));

    let all = parse_partition_list(partitions);
    let targets = resolve_targets(&policy, source_partition, &all);
    assert!(!targets.contains(source_partition));
    assert!(targets.is_disjoint(&policy.excluded));
});
