//! Signal: fire-and-forget events
//!
//! Firing delivers to local subscribers and, when bound, to the peer. Inbound
//! fires are delivered locally only. Nothing is stored or replayed.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tether_core::{EntityId, TetherResult, WireValue};
use tether_wire::Operation;

use crate::entity::{mismatch, BindingSlot, Entity, EntityKind, WireLink};
use crate::subscribers::{SubscriptionId, Subscribers};

struct SignalCell<T> {
    binding: BindingSlot,
    subscribers: Subscribers<T>,
}

impl<T: WireValue> Entity for SignalCell<T> {
    fn kind(&self) -> EntityKind {
        EntityKind::Signal
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
            Operation::SignalFire => {
                let value = T::decode(&payload)?;
                self.subscribers.notify(&value);
                Ok(())
            }
            other => Err(mismatch(self.binding.id(), other)),
        }
    }
}

pub struct Signal<T: WireValue> {
    inner: Arc<SignalCell<T>>,
}

impl<T: WireValue> Signal<T> {
    pub fn new() -> Self {
        Signal {
            inner: Arc::new(SignalCell {
                binding: BindingSlot::new(),
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// Deliver locally, then send when bound. A failed send is reported but
    /// local delivery has already happened.
    pub fn fire(&self, value: T) -> TetherResult<()> {
        self.inner.subscribers.notify(&value);
        match self.inner.binding.current() {
            Some(binding) => binding.send(Operation::SignalFire, value.encode()),
            None => Ok(()),
        }
    }

    pub fn advise(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.subscribers.subscribe(callback)
    }

    pub fn unadvise(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.current().is_some()
    }

    pub fn entity(&self) -> Arc<dyn Entity> {
        self.inner.clone()
    }
}

impl<T: WireValue> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Signal {
            inner: self.inner.clone(),
        }
    }
}

impl<T: WireValue> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WireValue> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.inner.subscribers.len())
            .field("bound", &self.inner.binding.id())
            .finish()
    }
}
