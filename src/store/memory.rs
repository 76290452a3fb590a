// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process partition store.
//!
//! Holds partitions and objects in memory and fans every mutation out to
//! watch subscribers through a broadcast channel. Used for standalone mode
//! and as the backing store in tests.
//!
//! Writes made through [`PartitionStore`] (the replicator's own writes) and
//! through the external-actor helpers ([`MemoryStore::apply`],
//! [`MemoryStore::remove`]) both produce watch events, the same way a real
//! cluster reports every change to the watched kind.

use super::{BoxFuture, PartitionStore, StoreError, WatchStream};
use crate::event::WatchEvent;
use crate::object::{ConfigObject, ObjectKey};
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

/// Capacity of the watch broadcast buffer. Slow subscribers beyond this
/// see a lag error and rely on resync.
const WATCH_BUFFER: usize = 1024;

#[derive(Default)]
struct State {
    partitions: BTreeSet<String>,
    objects: BTreeMap<ObjectKey, ConfigObject>,
}

/// In-memory implementation of [`PartitionStore`].
pub struct MemoryStore {
    state: RwLock<State>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with no partitions.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: RwLock::new(State::default()),
            events,
        }
    }

    /// Create a store with the given partitions.
    pub fn with_partitions<I, P>(partitions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        let state = State {
            partitions: partitions.into_iter().map(Into::into).collect(),
            objects: BTreeMap::new(),
        };
        Self {
            state: RwLock::new(state),
            events,
        }
    }

    /// Add a partition.
    pub async fn add_partition(&self, partition: impl Into<String>) {
        self.state.write().await.partitions.insert(partition.into());
    }

    /// Remove a partition and every object in it (emits `Deleted` for each).
    pub async fn remove_partition(&self, partition: &str) {
        let removed: Vec<ConfigObject> = {
            let mut state = self.state.write().await;
            state.partitions.remove(partition);
            let keys: Vec<ObjectKey> = state
                .objects
                .keys()
                .filter(|k| k.partition == partition)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| state.objects.remove(k)).collect()
        };
        for object in removed {
            self.emit(WatchEvent::Deleted(object));
        }
    }

    /// Create or replace an object as an external actor would.
    ///
    /// The partition is created on demand. Emits `Added` or `Updated`.
    pub async fn apply(&self, object: ConfigObject) {
        let event = {
            let mut state = self.state.write().await;
            state.partitions.insert(object.partition.clone());
            match state.objects.insert(object.key(), object.clone()) {
                Some(before) => WatchEvent::Updated {
                    before,
                    after: object,
                },
                None => WatchEvent::Added(object),
            }
        };
        self.emit(event);
    }

    /// Delete an object as an external actor would. Emits `Deleted`.
    pub async fn remove(&self, partition: &str, name: &str) -> Option<ConfigObject> {
        let removed = self
            .state
            .write()
            .await
            .objects
            .remove(&ObjectKey::new(partition, name));
        if let Some(ref object) = removed {
            self.emit(WatchEvent::Deleted(object.clone()));
        }
        removed
    }

    /// Snapshot of a single object.
    pub async fn snapshot(&self, partition: &str, name: &str) -> Option<ConfigObject> {
        self.state
            .read()
            .await
            .objects
            .get(&ObjectKey::new(partition, name))
            .cloned()
    }

    /// All objects named `name`, keyed by partition.
    pub async fn copies_of(&self, name: &str) -> BTreeMap<String, ConfigObject> {
        self.state
            .read()
            .await
            .objects
            .values()
            .filter(|o| o.name == name)
            .map(|o| (o.partition.clone(), o.clone()))
            .collect()
    }

    /// Total number of objects across all partitions.
    pub async fn object_count(&self) -> usize {
        self.state.read().await.objects.len()
    }

    /// Number of live watch subscriptions.
    pub fn watcher_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn emit(&self, event: WatchEvent) {
        trace!(object = %event.key(), kind = event.kind(), "Emitting watch event");
        // No subscribers is fine: nothing is watching yet
        let _ = self.events.send(event);
    }
}

impl PartitionStore for MemoryStore {
    fn list_partitions(&self) -> BoxFuture<'_, BTreeSet<String>> {
        Box::pin(async move { Ok(self.state.read().await.partitions.clone()) })
    }

    fn list_objects(&self, partition: Option<&str>) -> BoxFuture<'_, Vec<ConfigObject>> {
        let partition = partition.map(str::to_string);
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .objects
                .values()
                .filter(|o| partition.as_deref().map_or(true, |p| o.partition == p))
                .cloned()
                .collect())
        })
    }

    fn watch_objects(&self) -> BoxFuture<'_, WatchStream> {
        let rx = self.events.subscribe();
        Box::pin(async move {
            debug!("New watch subscription");
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                match rx.recv().await {
                    Ok(event) => Some((Ok(event), rx)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => Some((
                        Err(StoreError::transient(
                            "watch",
                            format!("subscriber lagged, {} events dropped", missed),
                        )),
                        rx,
                    )),
                    Err(broadcast::error::RecvError::Closed) => None,
                }
            });
            Ok(stream.boxed())
        })
    }

    fn get_object(&self, partition: &str, name: &str) -> BoxFuture<'_, Option<ConfigObject>> {
        let key = ObjectKey::new(partition, name);
        Box::pin(async move { Ok(self.state.read().await.objects.get(&key).cloned()) })
    }

    fn create_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject> {
        Box::pin(async move {
            {
                let mut state = self.state.write().await;
                if !state.partitions.contains(&object.partition) {
                    return Err(StoreError::PartitionNotFound(object.partition.clone()));
                }
                let key = object.key();
                if state.objects.contains_key(&key) {
                    return Err(StoreError::AlreadyExists {
                        partition: key.partition,
                        name: key.name,
                    });
                }
                state.objects.insert(key, object.clone());
            }
            self.emit(WatchEvent::Added(object.clone()));
            Ok(object)
        })
    }

    fn update_object(&self, object: ConfigObject) -> BoxFuture<'_, ConfigObject> {
        Box::pin(async move {
            let before = {
                let mut state = self.state.write().await;
                let key = object.key();
                match state.objects.get_mut(&key) {
                    Some(existing) => std::mem::replace(existing, object.clone()),
                    None => {
                        return Err(StoreError::NotFound {
                            partition: key.partition,
                            name: key.name,
                        })
                    }
                }
            };
            self.emit(WatchEvent::Updated {
                before,
                after: object.clone(),
            });
            Ok(object)
        })
    }

    fn delete_object(&self, partition: &str, name: &str) -> BoxFuture<'_, ()> {
        let key = ObjectKey::new(partition, name);
        Box::pin(async move {
            let removed = self.state.write().await.objects.remove(&key);
            match removed {
                Some(object) => {
                    self.emit(WatchEvent::Deleted(object));
                    Ok(())
                }
                None => Err(StoreError::NotFound {
                    partition: key.partition,
                    name: key.name,
                }),
            }
        })
    }
}
