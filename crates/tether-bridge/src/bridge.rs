//! Data bridge between model entities and the flat map
//!
//! Outbound: a watched entity change upserts its key with the string form of
//! the new value. Inbound: an external change of a mapped key applies the
//! matching reactive operation.
//!
//! The bridge remembers the last value it saw or wrote per key. An inbound
//! change equal to that value is the bridge's own write coming back and is
//! dropped, which breaks the model -> map -> model cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tether_model::{Property, Signal, SubscriptionId};

use crate::flat_map::FlatMap;
use crate::value::{is_truthy, FlatValue};

type InboundAction = Arc<dyn Fn(&str) + Send + Sync>;
type Detach = Box<dyn FnOnce() + Send>;

/// Bridge traffic counters
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub published: AtomicU64,
    pub applied: AtomicU64,
    pub suppressed: AtomicU64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.published.load(Ordering::Relaxed),
            self.applied.load(Ordering::Relaxed),
            self.suppressed.load(Ordering::Relaxed),
        )
    }
}

struct BridgeInner {
    map: FlatMap,
    map_watch: Mutex<Option<SubscriptionId>>,
    last_seen: Mutex<HashMap<String, String>>,
    inbound: Mutex<HashMap<String, InboundAction>>,
    detach: Mutex<HashMap<String, Vec<Detach>>>,
    stats: BridgeStats,
}

impl BridgeInner {
    fn publish(&self, key: &str, value: String) {
        self.last_seen
            .lock()
            .insert(key.to_string(), value.clone());
        if self.map.set(key, value) {
            self.stats.published.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_external_change(&self, key: &str, value: &str) -> bool {
        {
            let mut last_seen = self.last_seen.lock();
            if last_seen.get(key).map(String::as_str) == Some(value) {
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            last_seen.insert(key.to_string(), value.to_string());
        }

        let action = self.inbound.lock().get(key).cloned();
        match action {
            Some(action) => {
                tracing::info!(key, value, "flat map change came from frontend");
                action(value);
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Some(id) = self.map_watch.lock().take() {
            self.map.unwatch(id);
        }
        for (_, detach) in self.detach.lock().drain() {
            detach.into_iter().for_each(|d| d());
        }
    }
}

/// Keeps model entities and flat-map keys in step
///
/// Mutations should reach the bridge from the runtime's serialization point
/// so inbound and outbound changes never interleave for the same key.
#[derive(Clone)]
pub struct DataBridge {
    inner: Arc<BridgeInner>,
}

impl DataBridge {
    /// Attach to `map` and start watching its changes
    pub fn new(map: FlatMap) -> Self {
        let inner = Arc::new(BridgeInner {
            map: map.clone(),
            map_watch: Mutex::new(None),
            last_seen: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
            detach: Mutex::new(HashMap::new()),
            stats: BridgeStats::default(),
        });

        let weak = Arc::downgrade(&inner);
        let id = map.watch(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.on_external_change(&change.key, &change.new);
            }
        });
        *inner.map_watch.lock() = Some(id);

        DataBridge { inner }
    }

    pub fn map(&self) -> &FlatMap {
        &self.inner.map
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.inner.stats
    }

    /// Upsert `key` as the bridge's own write
    pub fn publish(&self, key: &str, value: impl Into<String>) {
        self.inner.publish(key, value.into());
    }

    /// Feed one external change; returns whether an action ran
    pub fn on_external_change(&self, key: &str, value: &str) -> bool {
        self.inner.on_external_change(key, value)
    }

    /// Map `key` to `property` in both directions
    pub fn bind_property<T: FlatValue>(&self, key: &str, property: &Property<T>) {
        let weak = Arc::downgrade(&self.inner);
        let out_key = key.to_string();
        let sub = property.advise_changes(move |value: &T| {
            if let Some(inner) = weak.upgrade() {
                inner.publish(&out_key, value.to_flat());
            }
        });

        let target = property.clone();
        let in_key = key.to_string();
        self.set_inbound(key, move |raw| match T::from_flat(raw) {
            Some(value) => {
                if let Err(e) = target.set(value) {
                    tracing::debug!(key = %in_key, "bridged property not sent: {}", e);
                }
            }
            None => tracing::warn!(key = %in_key, raw, "unparseable bridged value"),
        });

        let property = property.clone();
        self.add_detach(key, Box::new(move || {
            property.unadvise(sub);
        }));
    }

    /// Run `action` whenever `key` is externally set to true
    pub fn bind_trigger(&self, key: &str, action: impl Fn() + Send + Sync + 'static) {
        self.set_inbound(key, move |raw| {
            if is_truthy(raw) {
                action();
            }
        });
    }

    /// Publish every fired value of `signal` under `key`
    pub fn bind_signal<T: tether_core::WireValue>(
        &self,
        key: &str,
        signal: &Signal<T>,
        encode: impl Fn(&T) -> Option<String> + Send + Sync + 'static,
    ) {
        let weak = Arc::downgrade(&self.inner);
        let out_key = key.to_string();
        let sub = signal.advise(move |value: &T| {
            if let (Some(inner), Some(text)) = (weak.upgrade(), encode(value)) {
                inner.publish(&out_key, text);
            }
        });

        let signal = signal.clone();
        self.add_detach(key, Box::new(move || {
            signal.unadvise(sub);
        }));
    }

    /// Remove every mapping for `key`
    pub fn detach(&self, key: &str) -> bool {
        let had_inbound = self.inner.inbound.lock().remove(key).is_some();
        let detach = self.inner.detach.lock().remove(key);
        let had_outbound = detach.is_some();
        for d in detach.into_iter().flatten() {
            d();
        }
        had_inbound || had_outbound
    }

    /// Keys with an inbound mapping
    pub fn bound_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.inbound.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn set_inbound(&self, key: &str, action: impl Fn(&str) + Send + Sync + 'static) {
        self.inner
            .inbound
            .lock()
            .insert(key.to_string(), Arc::new(action));
    }

    fn add_detach(&self, key: &str, detach: Detach) {
        self.inner
            .detach
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(detach);
    }

    /// Weak handle for callbacks that must not keep the bridge alive
    pub fn downgrade(&self) -> WeakBridge {
        WeakBridge {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for DataBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBridge")
            .field("keys", &self.bound_keys())
            .field("stats", &self.inner.stats.snapshot())
            .finish()
    }
}

#[derive(Clone)]
pub struct WeakBridge {
    inner: Weak<BridgeInner>,
}

impl WeakBridge {
    pub fn upgrade(&self) -> Option<DataBridge> {
        self.inner.upgrade().map(|inner| DataBridge { inner })
    }
}
