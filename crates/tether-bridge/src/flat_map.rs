//! Shared flat string map with last-write-wins semantics

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_model::{SubscriptionId, Subscribers};

/// One observed key change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapChange {
    pub key: String,
    pub old: Option<String>,
    pub new: String,
}

#[derive(Default)]
struct MapInner {
    entries: Mutex<HashMap<String, String>>,
    watchers: Subscribers<MapChange>,
}

/// Cloneable handle; clones share the same entries
#[derive(Clone, Default)]
pub struct FlatMap {
    inner: Arc<MapInner>,
}

impl FlatMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.entries.lock().get(key).cloned()
    }

    /// Upsert `key`. Watchers run only when the stored value changed; the
    /// return value says whether it did.
    pub fn set(&self, key: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        let old = {
            let mut entries = self.inner.entries.lock();
            if entries.get(key) == Some(&value) {
                return false;
            }
            entries.insert(key.to_string(), value.clone())
        };

        tracing::trace!(key, value = %value, "flat map upsert");
        self.inner.watchers.notify(&MapChange {
            key: key.to_string(),
            old,
            new: value,
        });
        true
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.inner.entries.lock().remove(key)
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn watch(&self, callback: impl Fn(&MapChange) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.watchers.subscribe(callback)
    }

    pub fn unwatch(&self, id: SubscriptionId) -> bool {
        self.inner.watchers.unsubscribe(id)
    }
}

impl std::fmt::Debug for FlatMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}
