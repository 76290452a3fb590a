//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - [`ChaosStore`], a failure-injecting, write-counting store wrapper
//! - Object builders for sources with replication annotations
//! - Polling helpers for asserting eventual convergence

#![allow(dead_code)]

pub mod stores;

pub use stores::*;

use configmap_replicator::object::{
    ALLOWED_NAMESPACES, EXCLUDED_NAMESPACES, REPLICATION_ALLOWED,
};
use configmap_replicator::ConfigObject;
use std::future::Future;
use std::time::Duration;

/// Install a test subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A source object with replication enabled and one data entry.
pub fn source(partition: &str, name: &str) -> ConfigObject {
    ConfigObject::new(partition, name)
        .with_data("log_level", "debug")
        .with_annotation(REPLICATION_ALLOWED, "true")
}

pub fn with_allowed(object: ConfigObject, list: &str) -> ConfigObject {
    object.with_annotation(ALLOWED_NAMESPACES, list)
}

pub fn with_excluded(object: ConfigObject, list: &str) -> ConfigObject {
    object.with_annotation(EXCLUDED_NAMESPACES, list)
}

/// Poll `check` every 10ms until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
