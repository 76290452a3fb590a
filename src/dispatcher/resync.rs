// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resync loop: the periodic self-heal path.
//!
//! Every `reconciliation_interval` the loop lists every object in every
//! partition and re-issues the create path for each through the ordered
//! lanes, whether or not anything changed. This compensates for events the
//! watch silently dropped.
//!
//! The first tick fires immediately, so a freshly started engine converges
//! everything that already exists. Missed ticks are skipped rather than
//! burst. A failed listing is logged and retried on the next tick.

use super::lanes::Lanes;
use super::types::Command;
use super::watch::shutdown_signalled;
use crate::error::Result;
use crate::metrics;
use crate::store::PartitionStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn, Instrument};

/// Run the resync loop until shutdown is signalled.
pub(crate) async fn run_resync<S: PartitionStore>(
    store: Arc<S>,
    lanes: Arc<Lanes<S>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("resync");

    async move {
        let _ = shutdown_rx.borrow_and_update();

        info!(interval_ms = interval.as_millis() as u64, "Starting resync loop");

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => {
                    info!("Shutdown signal received, stopping resync loop");
                    break;
                }
                _ = timer.tick() => {}
            }

            if let Err(e) = resync_pass(store.as_ref(), &lanes).await {
                metrics::record_resync_failure();
                warn!(error = %e, "Resync pass failed, retrying next interval");
            }
        }
    }
    .instrument(span)
    .await
}

/// List every object and queue a create-path pass for each.
///
/// Returns the number of objects queued. Does not wait for them to finish.
#[instrument(skip_all)]
pub(crate) async fn resync_pass<S: PartitionStore>(store: &S, lanes: &Arc<Lanes<S>>) -> Result<usize> {
    let start = Instant::now();
    let objects = store.list_objects(None).await?;
    let count = objects.len();

    for object in objects {
        lanes.dispatch(Command::Resync(object));
    }

    metrics::record_resync_pass(count, start.elapsed());
    debug!(objects = count, duration_ms = start.elapsed().as_millis() as u64, "Resync pass queued");
    Ok(count)
}
