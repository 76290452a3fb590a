//! Fuzz target for annotation parsing.
//!
//! Partition lists and the enablement flag come straight from user-edited
//! annotations, so parsing must never panic and must never produce empty
//! partition names.

#![no_main]

use configmap_replicator::policy::{parse_enabled, parse_partition_list};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let parsed = parse_partition_list(data);
    for entry in &parsed {
        assert!(!entry.is_empty());
        assert!(!entry.contains(','));
    }

    // Re-joining is stable
    let joined = parsed.iter().cloned().collect::<Vec<_>>().join(",");
    assert_eq!(parse_partition_list(&joined), parsed);

    let _ = parse_enabled(Some(data));
});
