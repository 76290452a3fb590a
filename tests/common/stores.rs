//! Failure-injecting partition store for tests.
//!
//! Wraps a [`MemoryStore`] and forwards every call, with switches to:
//! - fail every call that targets selected partitions (transient error)
//! - panic on writes into a selected partition, or on partition listing
//! - drop watch notifications for selected object names
//! - fail watch subscriptions, or end every open watch stream
//! - hold object listings back after their snapshot is taken
//! - slow per-object calls down, tracking how many overlap
//!
//! Successful writes are counted for idempotence assertions.

use configmap_replicator::store::{BoxFuture, PartitionStore, StoreError, WatchStream};
use configmap_replicator::{ConfigObject, MemoryStore};
use futures::StreamExt;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Snapshot of write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl WriteCounts {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

pub struct ChaosStore {
    inner: Arc<MemoryStore>,
    failing_partitions: Mutex<HashSet<String>>,
    panic_partition: Mutex<Option<String>>,
    panic_on_list: AtomicBool,
    dropped_names: Arc<Mutex<HashSet<String>>>,
    failing_subscriptions: AtomicUsize,
    subscriptions: AtomicUsize,
    /// Bumped to end every open watch stream.
    watch_generation: watch::Sender<u64>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    list_delay: Mutex<Option<Duration>>,
    call_latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Counts one per-object call as in flight until dropped.
struct InFlight<'a> {
    count: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ChaosStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        let (watch_generation, _) = watch::channel(0);
        Self {
            inner,
            failing_partitions: Mutex::new(HashSet::new()),
            panic_partition: Mutex::new(None),
            panic_on_list: AtomicBool::new(false),
            dropped_names: Arc::new(Mutex::new(HashSet::new())),
            failing_subscriptions: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            watch_generation,
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            list_delay: Mutex::new(None),
            call_latency: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_partitions(partitions: &[&str]) -> Self {
        Self::new(Arc::new(MemoryStore::with_partitions(partitions.iter().copied())))
    }

    /// The wrapped store, for external-actor changes and snapshots.
    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    pub fn fail_partition(&self, partition: &str) {
        self.failing_partitions.lock().unwrap().insert(partition.to_string());
    }

    pub fn heal_partition(&self, partition: &str) {
        self.failing_partitions.lock().unwrap().remove(partition);
    }

    pub fn panic_on_writes_to(&self, partition: Option<&str>) {
        *self.panic_partition.lock().unwrap() = partition.map(str::to_string);
    }

    pub fn panic_on_list_partitions(&self, enabled: bool) {
        self.panic_on_list.store(enabled, Ordering::SeqCst);
    }

    /// Hide watch notifications about objects with this name.
    pub fn drop_events_for(&self, name: &str) {
        self.dropped_names.lock().unwrap().insert(name.to_string());
    }

    /// Make the next `n` watch subscriptions fail.
    pub fn fail_next_subscriptions(&self, n: usize) {
        self.failing_subscriptions.store(n, Ordering::SeqCst);
    }

    /// End every open watch stream.
    pub fn end_watches(&self) {
        self.watch_generation.send_modify(|g| *g += 1);
    }

    /// Number of watch subscriptions established so far.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Return object listings only after `delay`, with the snapshot taken
    /// before waiting.
    pub fn delay_listing(&self, delay: Option<Duration>) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Make every get/create/update/delete take at least `latency`.
    pub fn set_call_latency(&self, latency: Duration) {
        *self.call_latency.lock().unwrap() = Some(latency);
    }

    /// Most get/create/update/delete calls seen running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> WriteCounts {
        WriteCounts {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    fn check_partition(&self, operation: &str, partition: &str) -> Result<(), StoreError> {
        if self.failing_partitions.lock().unwrap().contains(partition) {
            return Err(StoreError::transient(
                operation,
                format!("injected failure for partition {}", partition),
            ));
        }
        Ok(())
    }

    async fn track(&self) -> InFlight<'_> {
        let guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        let latency = *self.call_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn maybe_panic(&self, partition: &str) {
        let panic_partition = self.panic_partition.lock().unwrap().clone();
        if panic_partition.as_deref() == Some(partition) {
            panic!("injected panic writing to {}", partition);
        }
    }
}

impl PartitionStore for ChaosStore {
    fn list_partitions(&self) -> BoxFuture<'_, BTreeSet<String>> {
        Box::pin(async move {
            if self.panic_on_list.load(Ordering::SeqCst) {
                panic!("injected panic listing partitions");
            }
            self.inner.list_partitions().await
        })
    }

    fn list_objects(&self, partition: Option<&str>) -> BoxFuture<'_, Vec<ConfigObject>> {
        let partition = partition.map(str::to_string);
        Box::pin(async move {
            let listed = self.inner.list_objects(partition.as_deref()).await?;
            let delay = *self.list_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(listed)
        })
    }

    fn watch_objects(&self) -> BoxFuture<'_, WatchStream> {
        Box::pin(async move {
            let remaining = self.failing_subscriptions.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_subscriptions.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::transient("watch", "injected subscription failure"));
            }

            let inner = self.inner.watch_objects().await?;
            self.subscriptions.fetch_add(1, Ordering::SeqCst);

            let dropped = Arc::clone(&self.dropped_names);
            let mut generation = self.watch_generation.subscribe();
            let ended = async move {
                let _ = generation.changed().await;
            };

            let stream = inner
                .filter(move |item| {
                    let keep = match item {
                        Ok(event) => !dropped.lock().unwrap().contains(&event.object().name),
                        Err(_) => true,
                    };
                    futures::future::ready(keep)
                })
                .take_until(ended);
            Ok(stream.boxed())
        })
    }

    fn get_object(&self, partition: &str, name: &str) -> BoxFuture<'_, Option<ConfigObject>> {
        let partition = partition.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let _call = self.track().await;
            self.check_partition("get", &partition)?;
            self.inner.get_object(&partition, &name).await
        })
    }

    fn create_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject> {
        Box::pin(async move {
            let _call = self.track().await;
            self.maybe_panic(&object.partition);
            self.check_partition("create", &object.partition)?;
            let created = self.inner.create_object(object).await?;
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(created)
        })
    }

    fn update_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject> {
        Box::pin(async move {
            let _call = self.track().await;
            self.maybe_panic(&object.partition);
            self.check_partition("update", &object.partition)?;
            let updated = self.inner.update_object(object).await?;
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(updated)
        })
    }

    fn delete_object(&self, partition: &str, name: &str) -> BoxFuture<'_, ()> {
        let partition = partition.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let _call = self.track().await;
            self.maybe_panic(&partition);
            self.check_partition("delete", &partition)?;
            self.inner.delete_object(&partition, &name).await?;
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
