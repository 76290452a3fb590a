// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Watch notifications for configuration objects.

use crate::object::{ConfigObject, ObjectKey};

/// A change observed on the watch channel.
///
/// `Updated` carries two owned snapshots, so the previous and new state can
/// never be the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(ConfigObject),
    Updated {
        before: ConfigObject,
        after: ConfigObject,
    },
    Deleted(ConfigObject),
}

impl WatchEvent {
    /// Identity of the object the event is about (the new snapshot for updates).
    pub fn key(&self) -> ObjectKey {
        self.object().key()
    }

    /// The current snapshot carried by the event.
    pub fn object(&self) -> &ConfigObject {
        match self {
            WatchEvent::Added(object) => object,
            WatchEvent::Updated { after, .. } => after,
            WatchEvent::Deleted(object) => object,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Updated { .. } => "updated",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}
