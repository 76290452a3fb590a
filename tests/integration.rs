// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests for the replicator engine.
//!
//! Everything runs against the in-process store, so no cluster is needed.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! RUST_LOG=configmap_replicator=debug cargo test --test integration -- --nocapture
//! ```
//!
//! # Test Organization
//! - `scenario_*` - end-to-end replication scenarios through injected events
//! - `policy_*` - enablement flag and allow/deny validation
//! - `ownership_*` - provenance checks on create, update and delete
//! - `engine_*` - running engine with live watch and resync loops

mod common;

use common::{eventually, init_tracing, source, with_allowed, with_excluded, ChaosStore};
use configmap_replicator::object::REPLICATION_ALLOWED;
use configmap_replicator::{
    ConfigObject, ReplicatorConfig, ReplicatorEngine, TargetOutcome, WatchEvent,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(3);

fn engine_with(config: ReplicatorConfig, partitions: &[&str]) -> ReplicatorEngine<ChaosStore> {
    init_tracing();
    let store = Arc::new(ChaosStore::with_partitions(partitions));
    ReplicatorEngine::new(config, store).unwrap()
}

fn engine(partitions: &[&str]) -> ReplicatorEngine<ChaosStore> {
    engine_with(ReplicatorConfig::for_testing(), partitions)
}

/// Inject one event and wait for it to be fully handled.
async fn apply(engine: &ReplicatorEngine<ChaosStore>, event: WatchEvent) {
    engine.handle_event(event).unwrap();
    engine.wait_idle().await;
}

async fn partitions_holding(engine: &ReplicatorEngine<ChaosStore>, name: &str) -> BTreeSet<String> {
    engine.store().inner().copies_of(name).await.into_keys().collect()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_default_exclusion_skips_kube_system() {
    let config = ReplicatorConfig {
        default_excluded_partitions: vec!["kube-system".to_string()],
        ..ReplicatorConfig::for_testing()
    };
    let engine = engine_with(config, &["team1", "team2", "kube-system"]);
    let source = source("team1", "app-config");
    engine.store().inner().apply(source.clone()).await;

    apply(&engine, WatchEvent::Added(source.clone())).await;

    assert_eq!(partitions_holding(&engine, "app-config").await, set(&["team1", "team2"]));
    let replica = engine.store().inner().snapshot("team2", "app-config").await.unwrap();
    assert_eq!(replica.data, source.data);
    assert_eq!(replica.provenance(), Some("team1_app-config"));
}

#[tokio::test]
async fn scenario_update_propagates_data_and_keeps_annotations() {
    let engine = engine(&["team1", "team2", "team3"]);
    let before = source("team1", "app-config");
    apply(&engine, WatchEvent::Added(before.clone())).await;

    // Someone annotates a replica; the annotation must survive the update
    let mut annotated = engine.store().inner().snapshot("team3", "app-config").await.unwrap();
    annotated
        .annotations
        .insert("team3/last-audit".to_string(), "2026-01-01".to_string());
    engine.store().inner().apply(annotated).await;

    let after = before.clone().with_data("log_level", "warn").with_data("timeout", "30s");
    apply(&engine, WatchEvent::Updated { before, after: after.clone() }).await;

    for target in ["team2", "team3"] {
        let replica = engine.store().inner().snapshot(target, "app-config").await.unwrap();
        assert_eq!(replica.partition, target);
        assert_eq!(replica.data, after.data);
        assert_eq!(replica.provenance(), Some("team1_app-config"));
    }
    let team3 = engine.store().inner().snapshot("team3", "app-config").await.unwrap();
    assert_eq!(team3.annotation("team3/last-audit"), Some("2026-01-01"));
}

#[tokio::test]
async fn scenario_allow_list_from_unlisted_source_partition() {
    let engine = engine(&["team1", "team2", "team3", "team4"]);
    let source = with_allowed(source("teamX", "app-config"), "team1,team2");

    apply(&engine, WatchEvent::Added(source)).await;

    assert_eq!(partitions_holding(&engine, "app-config").await, set(&["team1", "team2"]));
}

#[tokio::test]
async fn scenario_allow_list_independent_of_partition_count() {
    let partitions: Vec<String> = (0..40).map(|i| format!("team{}", i)).collect();
    let refs: Vec<&str> = partitions.iter().map(String::as_str).collect();
    let engine = engine(&refs);

    let source = with_allowed(source("team0", "app-config"), "team7,team21");
    apply(&engine, WatchEvent::Added(source)).await;

    assert_eq!(partitions_holding(&engine, "app-config").await, set(&["team21", "team7"]));
}

#[tokio::test]
async fn scenario_deny_list_excludes_targets() {
    let engine = engine(&["team1", "team2", "team3", "team4"]);
    let source = with_excluded(source("team1", "app-config"), "team3");

    apply(&engine, WatchEvent::Added(source)).await;

    assert_eq!(partitions_holding(&engine, "app-config").await, set(&["team2", "team4"]));
}

#[tokio::test]
async fn scenario_reports_are_published() {
    let engine = engine(&["team1", "team2"]);
    let mut reports = engine.subscribe_reports();

    apply(&engine, WatchEvent::Added(source("team1", "app-config"))).await;

    let report = reports.recv().await.unwrap();
    assert_eq!(report.source.to_string(), "team1/app-config");
    assert_eq!(report.outcome("team2"), Some(&TargetOutcome::Created));
    assert!(report.is_success());
}

// =============================================================================
// Policy
// =============================================================================

#[tokio::test]
async fn policy_disabled_flag_never_mutates() {
    let engine = engine(&["team1", "team2", "team3"]);

    for flag in [None, Some("false"), Some("0"), Some("yes"), Some("enabled")] {
        let mut object = ConfigObject::new("team1", "app-config").with_data("k", "v");
        if let Some(flag) = flag {
            object = object.with_annotation(REPLICATION_ALLOWED, flag);
        }
        let changed = object.clone().with_data("k", "v2");

        apply(&engine, WatchEvent::Added(object.clone())).await;
        apply(&engine, WatchEvent::Updated { before: object.clone(), after: changed.clone() }).await;
        apply(&engine, WatchEvent::Deleted(changed)).await;
    }

    assert_eq!(engine.store().writes().total(), 0);
    assert_eq!(engine.store().inner().object_count().await, 0);
}

#[tokio::test]
async fn policy_overlap_blocks_all_mutations() {
    let engine = engine(&["team1", "team2", "team3"]);
    let valid = source("team1", "app-config");
    apply(&engine, WatchEvent::Added(valid.clone())).await;
    let before = engine.store().writes();

    let invalid = with_excluded(with_allowed(valid.clone(), "team2,team3"), "team2");
    apply(&engine, WatchEvent::Updated { before: valid, after: invalid.clone().with_data("k", "new") }).await;
    apply(&engine, WatchEvent::Deleted(invalid)).await;

    assert_eq!(engine.store().writes(), before);
    assert_eq!(partitions_holding(&engine, "app-config").await, set(&["team2", "team3"]));
}

#[tokio::test]
async fn policy_disabling_leaves_existing_replicas() {
    let engine = engine(&["team1", "team2"]);
    let enabled = source("team1", "app-config");
    apply(&engine, WatchEvent::Added(enabled.clone())).await;

    let disabled = enabled.clone().with_annotation(REPLICATION_ALLOWED, "false");
    apply(&engine, WatchEvent::Updated { before: enabled, after: disabled.clone() }).await;
    apply(&engine, WatchEvent::Deleted(disabled)).await;

    assert!(engine.store().inner().snapshot("team2", "app-config").await.is_some());
}

// =============================================================================
// Ownership
// =============================================================================

#[tokio::test]
async fn ownership_delete_removes_only_owned_replicas() {
    let engine = engine(&["team1", "team2", "team3", "team4"]);
    let unrelated = ConfigObject::new("team3", "app-config").with_data("mine", "yes");
    engine.store().inner().apply(unrelated.clone()).await;

    let source = source("team1", "app-config");
    apply(&engine, WatchEvent::Added(source.clone())).await;
    assert_eq!(
        engine.store().inner().snapshot("team3", "app-config").await,
        Some(unrelated.clone())
    );

    apply(&engine, WatchEvent::Deleted(source)).await;

    assert!(engine.store().inner().snapshot("team2", "app-config").await.is_none());
    assert!(engine.store().inner().snapshot("team4", "app-config").await.is_none());
    assert_eq!(engine.store().inner().snapshot("team3", "app-config").await, Some(unrelated));
}

#[tokio::test]
async fn ownership_two_sources_same_name_do_not_clobber() {
    let engine = engine(&["team1", "team2", "team3"]);
    let first = with_allowed(source("team1", "shared"), "team3");
    let second = with_allowed(source("team2", "shared").with_data("log_level", "trace"), "team3");

    apply(&engine, WatchEvent::Added(first.clone())).await;
    apply(&engine, WatchEvent::Added(second.clone())).await;
    let replica = engine.store().inner().snapshot("team3", "shared").await.unwrap();
    assert_eq!(replica.provenance(), Some("team1_shared"));

    apply(&engine, WatchEvent::Deleted(second)).await;
    assert!(engine.store().inner().snapshot("team3", "shared").await.is_some());

    apply(&engine, WatchEvent::Deleted(first)).await;
    assert!(engine.store().inner().snapshot("team3", "shared").await.is_none());
}

#[tokio::test]
async fn ownership_create_twice_is_idempotent() {
    let engine = engine(&["team1", "team2", "team3"]);
    let source = source("team1", "app-config");
    engine.store().inner().apply(source.clone()).await;

    apply(&engine, WatchEvent::Added(source.clone())).await;
    let after_first = engine.store().writes();
    apply(&engine, WatchEvent::Added(source.clone())).await;

    assert_eq!(after_first.creates, 2);
    assert_eq!(engine.store().writes(), after_first);
    let copies = engine.store().inner().copies_of("app-config").await;
    assert_eq!(copies.len(), 3);
    for (partition, copy) in copies {
        if partition != "team1" {
            assert_eq!(copy, source.replica_for(&partition));
        }
    }
}

// =============================================================================
// Running engine
// =============================================================================

#[tokio::test]
async fn engine_watch_drives_full_lifecycle() {
    // Long interval: only the watch path is exercised after the first pass
    let config = ReplicatorConfig {
        reconciliation_interval: "1h".to_string(),
        ..ReplicatorConfig::for_testing()
    };
    let mut engine = engine_with(config, &["team1", "team2", "team3"]);
    engine.start().unwrap();
    let store = Arc::clone(engine.store());
    assert!(eventually(CONVERGE_TIMEOUT, || async { store.inner().watcher_count() > 0 }).await);

    let v1 = source("team1", "app-config");
    store.inner().apply(v1.clone()).await;
    assert!(
        eventually(CONVERGE_TIMEOUT, || async {
            partitions_holding(&engine, "app-config").await == set(&["team1", "team2", "team3"])
        })
        .await
    );

    let v2 = v1.clone().with_data("log_level", "error");
    store.inner().apply(v2.clone()).await;
    assert!(
        eventually(CONVERGE_TIMEOUT, || async {
            store.inner().snapshot("team3", "app-config").await.map(|o| o.data) == Some(v2.data.clone())
        })
        .await
    );

    store.inner().remove("team1", "app-config").await;
    assert!(
        eventually(CONVERGE_TIMEOUT, || async { store.inner().object_count().await == 0 }).await
    );

    engine.shutdown().await;
    assert!(!engine.is_running());
}

#[tokio::test]
async fn engine_resync_converges_preexisting_objects() {
    let mut engine = engine(&["team1", "team2"]);
    engine.store().inner().apply(source("team1", "app-config")).await;

    engine.start().unwrap();

    assert!(
        eventually(CONVERGE_TIMEOUT, || async {
            engine.store().inner().snapshot("team2", "app-config").await.is_some()
        })
        .await
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn engine_resync_restores_deleted_replica() {
    let mut engine = engine(&["team1", "team2"]);
    engine.start().unwrap();
    let store = Arc::clone(engine.store());

    store.inner().apply(source("team1", "app-config")).await;
    assert!(
        eventually(CONVERGE_TIMEOUT, || async {
            store.inner().snapshot("team2", "app-config").await.is_some()
        })
        .await
    );

    store.inner().remove("team2", "app-config").await;
    assert!(
        eventually(CONVERGE_TIMEOUT, || async {
            store.inner().snapshot("team2", "app-config").await.is_some()
        })
        .await,
        "resync should recreate the replica"
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn engine_resync_reaches_new_partitions() {
    let mut engine = engine(&["team1", "team2"]);
    engine.start().unwrap();
    let store = Arc::clone(engine.store());

    store.inner().apply(source("team1", "app-config")).await;
    assert!(
        eventually(CONVERGE_TIMEOUT, || async {
            store.inner().snapshot("team2", "app-config").await.is_some()
        })
        .await
    );

    store.inner().add_partition("team5").await;
    assert!(
        eventually(CONVERGE_TIMEOUT, || async {
            store.inner().snapshot("team5", "app-config").await.is_some()
        })
        .await
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn engine_resync_now_is_write_free_when_converged() {
    let engine = engine(&["team1", "team2", "team3"]);
    engine.store().inner().apply(source("team1", "app-config")).await;

    assert_eq!(engine.resync_now().await.unwrap(), 1);
    engine.wait_idle().await;
    let converged = engine.store().writes();
    assert_eq!(converged.creates, 2);

    // Replicas are listed too; they carry no flag and are skipped
    assert_eq!(engine.resync_now().await.unwrap(), 3);
    engine.wait_idle().await;
    assert_eq!(engine.store().writes(), converged);
}
