//! Entity contract and session binding
//!
//! An entity is any reactive primitive that can be addressed on the wire. It
//! holds at most one binding at a time; the binding references the session's
//! link weakly so a dropped session never keeps its transport alive.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tether_core::{EntityId, RequestId, TetherError, TetherResult};
use tether_wire::{Frame, Operation};

/// Kind of a reactive entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Property,
    Signal,
    Call,
}

impl EntityKind {
    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Property => "property",
            EntityKind::Signal => "signal",
            EntityKind::Call => "call",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outbound side of a session as seen by bound entities
pub trait WireLink: Send + Sync {
    /// Queue one frame on the session's transport
    fn send_frame(&self, frame: Frame) -> TetherResult<()>;

    /// Allocate a request id unique within the session
    fn next_request_id(&self) -> RequestId;
}

/// An entity's association with one session
#[derive(Clone)]
pub struct Binding {
    pub id: EntityId,
    link: Weak<dyn WireLink>,
}

impl Binding {
    pub fn new(id: EntityId, link: &Arc<dyn WireLink>) -> Self {
        Binding {
            id,
            link: Arc::downgrade(link),
        }
    }

    /// Whether the session behind this binding still exists
    pub fn is_live(&self) -> bool {
        self.link.strong_count() > 0
    }

    /// Send one operation addressed to this entity
    pub fn send(&self, op: Operation, payload: Bytes) -> TetherResult<()> {
        let link = self.link.upgrade().ok_or(TetherError::TransportClosed)?;
        link.send_frame(Frame::new(self.id, op, payload))
    }

    pub fn next_request_id(&self) -> TetherResult<RequestId> {
        let link = self.link.upgrade().ok_or(TetherError::TransportClosed)?;
        Ok(link.next_request_id())
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Holder for an entity's current binding
#[derive(Debug, Default)]
pub struct BindingSlot {
    current: Mutex<Option<Binding>>,
}

impl BindingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to a session. A binding whose session is already gone is
    /// replaced silently.
    pub fn bind(&self, id: EntityId, link: &Arc<dyn WireLink>) -> TetherResult<()> {
        let mut current = self.current.lock();
        if let Some(existing) = current.as_ref() {
            if existing.is_live() {
                return Err(TetherError::AlreadyBound(existing.id));
            }
        }
        *current = Some(Binding::new(id, link));
        Ok(())
    }

    pub fn unbind(&self) -> Option<Binding> {
        self.current.lock().take()
    }

    pub fn current(&self) -> Option<Binding> {
        self.current.lock().clone()
    }

    pub fn id(&self) -> Option<EntityId> {
        self.current.lock().as_ref().map(|b| b.id)
    }
}

/// Common contract of every bindable primitive
pub trait Entity: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Attach to a session under `id`
    fn bind(&self, id: EntityId, link: &Arc<dyn WireLink>) -> TetherResult<()>;

    /// Detach from the current session; pending work tied to it is failed
    fn unbind(&self);

    fn bound_id(&self) -> Option<EntityId>;

    /// Apply one inbound operation
    fn receive(&self, op: Operation, payload: Bytes) -> TetherResult<()>;

    /// Push locally owned state after every entity of the session is bound
    fn sync_bound(&self) -> TetherResult<()> {
        Ok(())
    }
}

pub(crate) fn mismatch(id: Option<EntityId>, op: Operation) -> TetherError {
    TetherError::KindMismatch {
        entity: id.unwrap_or_default(),
        op: op.kind().name(),
    }
}
