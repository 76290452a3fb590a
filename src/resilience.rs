//! Flow control for talking to the partition store.
//!
//! - [`WatchBackoff`]: how long to wait before re-subscribing a broken watch
//! - [`WriteThrottle`]: optional client-side QPS/burst limit on replica writes
//! - [`Bulkhead`]: cap on per-target operations in flight across all objects
//!
//! A resync over a few hundred partitions can fan out into thousands of
//! store calls at once; the bulkhead and throttle keep that bounded.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), configmap_replicator::resilience::BulkheadClosed> {
//! use configmap_replicator::resilience::{Bulkhead, ThrottleConfig, WriteThrottle};
//!
//! let throttle = WriteThrottle::new(ThrottleConfig { per_sec: 20, burst: 40 });
//! let bulkhead = Bulkhead::new(32);
//!
//! let _slot = bulkhead.acquire().await?;
//! throttle.wait().await;
//! // ... one create/update/delete against a target partition
//! # Ok(())
//! # }
//! ```

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// =============================================================================
// Watch backoff
// =============================================================================

/// Exponential delay between watch subscription attempts.
///
/// There is no attempt limit. A watch that cannot be re-established keeps
/// retrying at `ceiling` while resync carries convergence.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchBackoff {
    pub initial: Duration,
    pub ceiling: Duration,
    pub factor: f64,
}

impl Default for WatchBackoff {
    fn default() -> Self {
        Self::standard()
    }
}

impl WatchBackoff {
    /// 1s, 2s, 4s ... capped at 60s.
    pub fn standard() -> Self {
        Self {
            initial: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
            factor: 2.0,
        }
    }

    /// Delay after `failures` consecutive failed or ended subscriptions.
    ///
    /// Zero and one failure both wait `initial`.
    pub fn delay_after(&self, failures: usize) -> Duration {
        let steps = failures.saturating_sub(1).min(64) as i32;
        let secs = self.initial.as_secs_f64() * self.factor.powi(steps);

        if !secs.is_finite() || secs >= self.ceiling.as_secs_f64() {
            self.ceiling
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

// =============================================================================
// Write throttle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Sustained writes per second.
    pub per_sec: u32,
    /// Writes allowed back to back after an idle period.
    pub burst: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            per_sec: 50,
            burst: 100,
        }
    }
}

/// Token bucket shared by every target task.
///
/// Zero in either setting is treated as one rather than rejected.
pub struct WriteThrottle {
    bucket: DefaultDirectRateLimiter,
    config: ThrottleConfig,
}

impl WriteThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let quota = Quota::per_second(at_least_one(config.per_sec)).allow_burst(at_least_one(config.burst));
        Self {
            bucket: RateLimiter::direct(quota),
            config,
        }
    }

    /// Wait until a write may be issued.
    pub async fn wait(&self) {
        self.bucket.until_ready().await;
    }

    /// Consume a token if one is available now.
    pub fn try_take(&self) -> bool {
        self.bucket.check().is_ok()
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }
}

fn at_least_one(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

// =============================================================================
// Bulkhead
// =============================================================================

/// The bulkhead's semaphore was closed; no further slots will be handed out.
#[derive(Debug, Clone, thiserror::Error)]
#[error("fan-out bulkhead closed ({capacity} slots)")]
pub struct BulkheadClosed {
    pub capacity: usize,
}

/// Fixed pool of slots for per-target operations.
///
/// A slot is an owned permit so it can travel into a spawned task and is
/// released when that task drops it.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl Bulkhead {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadClosed> {
        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| BulkheadClosed {
                capacity: self.capacity,
            })
    }

    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).try_acquire_owned().ok()
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.slots.available_permits())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
