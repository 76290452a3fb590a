//! Watch loop: the incremental path.
//!
//! Subscribes to object changes across all partitions and hands every
//! notification to the per-object lanes. The loop itself never runs a
//! handler, so a slow or failing object cannot stall the watch.
//!
//! # Broken watches
//!
//! - An in-band error (e.g. the subscriber lagged) is logged and the stream
//!   is kept; whatever was missed is healed by the next resync.
//! - The stream ending, or the subscription failing, re-establishes the
//!   watch with exponential backoff. Backoff resets after a subscription
//!   delivers an event.
//!
//! # Graceful Shutdown
//!
//! `tokio::select!` with `biased` checks the shutdown signal first, so a
//! blocked `next()` or a backoff sleep is abandoned immediately.

use super::lanes::Lanes;
use super::types::Command;
use crate::metrics;
use crate::resilience::WatchBackoff;
use crate::store::PartitionStore;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Run the watch loop until shutdown is signalled.
pub(crate) async fn run_watch<S: PartitionStore>(
    store: Arc<S>,
    lanes: Arc<Lanes<S>>,
    backoff: WatchBackoff,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("watch");

    async move {
        let _ = shutdown_rx.borrow_and_update();
        info!("Starting watch loop");

        let mut attempt: usize = 0;

        'outer: loop {
            if attempt > 0 {
                let delay = backoff.delay_after(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before re-watching");
                tokio::select! {
                    biased;
                    _ = shutdown_signalled(&mut shutdown_rx) => break 'outer,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let subscribed = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => break 'outer,
                result = store.watch_objects() => result,
            };

            let mut stream = match subscribed {
                Ok(stream) => stream,
                Err(e) => {
                    attempt += 1;
                    metrics::record_watch_restart("subscribe_failed");
                    warn!(error = %e, attempt, "Failed to establish watch");
                    continue;
                }
            };

            debug!("Watch established");
            let mut delivered = false;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown_signalled(&mut shutdown_rx) => break 'outer,
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(event)) => {
                        if !delivered {
                            delivered = true;
                            attempt = 0;
                        }
                        lanes.dispatch(Command::Event(event));
                    }
                    Some(Err(e)) => {
                        metrics::record_watch_error();
                        warn!(error = %e, "Watch reported an error, continuing");
                    }
                    None => {
                        attempt += 1;
                        metrics::record_watch_restart("stream_ended");
                        info!(attempt, "Watch stream ended, re-establishing");
                        break;
                    }
                }
            }
        }

        info!("Watch loop stopped");
    }
    .instrument(span)
    .await
}

/// Resolve when shutdown is requested or the sender is gone.
pub(crate) async fn shutdown_signalled(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
