//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Watch events received and watch restarts
//! - Policy evaluation (invalid, disabled)
//! - Per-target convergence outcomes
//! - Resync passes
//! - Lane activity and engine state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `configmap_replicator_`:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track durations in seconds
//!
//! The crate only emits through the `metrics` facade; installing an exporter
//! is up to the embedding binary.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Watch
// =============================================================================

/// Record a watch (or resync) event entering the dispatcher.
pub fn record_event_received(kind: &str) {
    counter!("configmap_replicator_events_received_total", "kind" => kind.to_string()).increment(1);
}

/// Record the watch being re-established.
pub fn record_watch_restart(reason: &str) {
    counter!("configmap_replicator_watch_restarts_total", "reason" => reason.to_string()).increment(1);
}

/// Record an in-band error from the watch stream.
pub fn record_watch_error() {
    counter!("configmap_replicator_watch_errors_total").increment(1);
}

// =============================================================================
// Policy
// =============================================================================

/// Record an event skipped because the source's allow/deny lists overlap.
pub fn record_policy_error() {
    counter!("configmap_replicator_policy_errors_total").increment(1);
}

/// Record an event skipped because replication is not enabled on the source.
pub fn record_policy_skipped() {
    counter!("configmap_replicator_policy_skipped_total").increment(1);
}

// =============================================================================
// Convergence
// =============================================================================

/// Record one per-target outcome.
pub fn record_target_outcome(action: &str, outcome: &str) {
    counter!(
        "configmap_replicator_target_outcomes_total",
        "action" => action.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a completed fan-out for one source object.
pub fn record_convergence(action: &str, targets: usize, failures: usize, duration: Duration) {
    histogram!("configmap_replicator_convergence_duration_seconds", "action" => action.to_string())
        .record(duration.as_secs_f64());
    histogram!("configmap_replicator_convergence_targets", "action" => action.to_string())
        .record(targets as f64);
    if failures > 0 {
        counter!("configmap_replicator_convergence_failures_total", "action" => action.to_string())
            .increment(failures as u64);
    }
}

/// Record a handler that returned an error or panicked.
pub fn record_handler_failure(reason: &str) {
    counter!("configmap_replicator_handler_failures_total", "reason" => reason.to_string()).increment(1);
}

// =============================================================================
// Resync
// =============================================================================

/// Record a completed resync pass.
pub fn record_resync_pass(objects: usize, duration: Duration) {
    counter!("configmap_replicator_resync_passes_total").increment(1);
    gauge!("configmap_replicator_resync_last_objects").set(objects as f64);
    histogram!("configmap_replicator_resync_duration_seconds").record(duration.as_secs_f64());
}

/// Record a resync pass that could not list objects.
pub fn record_resync_failure() {
    counter!("configmap_replicator_resync_failures_total").increment(1);
}

// =============================================================================
// Engine
// =============================================================================

/// Number of per-object lanes currently draining.
pub fn set_active_lanes(count: usize) {
    gauge!("configmap_replicator_active_lanes").set(count as f64);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Numeric encoding for alerting
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        "Failed" => 4.0,
        _ => -1.0,
    };
    gauge!("configmap_replicator_engine_state").set(value);
}
