//! Property: a replicated last-write-wins value
//!
//! Both peers may write. A local write is applied immediately, notifies local
//! subscribers and is sent to the peer when bound. A remote write is applied
//! and notifies subscribers but is never echoed back. Writing the value a
//! property already holds does nothing, which is what keeps two peers from
//! ping-ponging the same update forever.
//!
//! Writers on different threads are ordered by one reentrant lock per
//! property, held from the store through notification and the outbound send,
//! so subscribers and the peer see the writes in the order they were stored.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, ReentrantMutex};
use tether_core::{EntityId, TetherResult, WireValue};
use tether_wire::Operation;

use crate::entity::{mismatch, BindingSlot, Entity, EntityKind, WireLink};
use crate::subscribers::{SubscriptionId, Subscribers};

/// Who produced the value a property currently holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Construction default, never sent
    Initial,
    Local,
    Remote,
}

#[derive(Debug)]
struct PropertyState<T> {
    value: Option<T>,
    version: u64,
    origin: Origin,
}

struct PropertyCell<T> {
    order: ReentrantMutex<()>,
    state: Mutex<PropertyState<T>>,
    binding: BindingSlot,
    changes: Subscribers<T>,
}

impl<T: WireValue> PropertyCell<T> {
    /// Store `value` and notify; returns the version it was stored under,
    /// or `None` when it equals the current value. Callers hold `order`.
    fn apply(&self, value: &T, origin: Origin) -> Option<u64> {
        let version = {
            let mut state = self.state.lock();
            if state.value.as_ref() == Some(value) {
                return None;
            }
            state.value = Some(value.clone());
            state.version += 1;
            state.origin = origin;
            state.version
        };
        self.changes.notify(value);
        Some(version)
    }
}

impl<T: WireValue> Entity for PropertyCell<T> {
    fn kind(&self) -> EntityKind {
        EntityKind::Property
    }

    fn bind(&self, id: EntityId, link: &Arc<dyn WireLink>) -> TetherResult<()> {
        self.binding.bind(id, link)
    }

    fn unbind(&self) {
        self.binding.unbind();
    }

    fn bound_id(&self) -> Option<EntityId> {
        self.binding.id()
    }

    fn receive(&self, op: Operation, payload: Bytes) -> TetherResult<()> {
        match op {
            Operation::PropertySet => {
                let value = T::decode(&payload)?;
                let _order = self.order.lock();
                self.apply(&value, Origin::Remote);
                Ok(())
            }
            other => Err(mismatch(self.binding.id(), other)),
        }
    }

    fn sync_bound(&self) -> TetherResult<()> {
        let _order = self.order.lock();
        let pending = {
            let state = self.state.lock();
            match (&state.value, state.origin) {
                (Some(value), Origin::Local) => Some(value.encode()),
                _ => None,
            }
        };
        match (pending, self.binding.current()) {
            (Some(payload), Some(binding)) => binding.send(Operation::PropertySet, payload),
            _ => Ok(()),
        }
    }
}

/// Shared handle to a property; clones observe the same value
pub struct Property<T: WireValue> {
    inner: Arc<PropertyCell<T>>,
}

impl<T: WireValue> Property<T> {
    /// An empty property
    pub fn new() -> Self {
        Self::from_state(None)
    }

    /// A property holding a default that is not sent on bind
    pub fn with_value(value: T) -> Self {
        Self::from_state(Some(value))
    }

    fn from_state(value: Option<T>) -> Self {
        Property {
            inner: Arc::new(PropertyCell {
                order: ReentrantMutex::new(()),
                state: Mutex::new(PropertyState {
                    value,
                    version: 0,
                    origin: Origin::Initial,
                }),
                binding: BindingSlot::new(),
                changes: Subscribers::new(),
            }),
        }
    }

    pub fn get(&self) -> Option<T> {
        self.inner.state.lock().value.clone()
    }

    /// Number of applied changes
    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    pub fn origin(&self) -> Origin {
        self.inner.state.lock().origin
    }

    /// Write locally. Subscribers see the new value before this returns; the
    /// error reports a failed send only, the local value is kept either way.
    pub fn set(&self, value: T) -> TetherResult<()> {
        let _order = self.inner.order.lock();
        let Some(version) = self.inner.apply(&value, Origin::Local) else {
            return Ok(());
        };
        // A subscriber wrote again from inside the notification and that
        // newer value has already gone out
        if self.inner.state.lock().version != version {
            return Ok(());
        }
        match self.inner.binding.current() {
            Some(binding) => binding.send(Operation::PropertySet, value.encode()),
            None => Ok(()),
        }
    }

    /// Subscribe and receive the current value immediately, if there is one
    pub fn advise(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let _order = self.inner.order.lock();
        let id = self.inner.changes.subscribe(callback);
        if let Some(current) = self.get() {
            self.inner.changes.notify_one(id, &current);
        }
        id
    }

    /// Subscribe to future changes only
    pub fn advise_changes(
        &self,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.changes.subscribe(callback)
    }

    pub fn unadvise(&self, id: SubscriptionId) -> bool {
        self.inner.changes.unsubscribe(id)
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.current().is_some()
    }

    pub fn entity(&self) -> Arc<dyn Entity> {
        self.inner.clone()
    }
}

impl<T: WireValue> Clone for Property<T> {
    fn clone(&self) -> Self {
        Property {
            inner: self.inner.clone(),
        }
    }
}

impl<T: WireValue> Default for Property<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WireValue> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Property")
            .field("value", &state.value)
            .field("version", &state.version)
            .field("origin", &state.origin)
            .field("bound", &self.inner.binding.id())
            .finish()
    }
}
