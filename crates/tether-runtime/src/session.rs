//! Protocol session - one transport and the entities bound to it
//!
//! Outbound, bound entities write frames through the session's link. Inbound,
//! a reader task hands every received frame to the dispatcher, which routes
//! it by entity id. Frames for ids this session does not own are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tether_core::{EntityId, RequestId, TetherError, TetherResult};
use tether_model::{collect, Entity, Model, WireLink};
use tether_transport::{FrameReceiver, FrameSender, Transport, TransportGuard};
use tether_wire::Frame;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;

/// Per-session traffic counters
#[derive(Debug, Default)]
pub struct SessionStats {
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub unrouted: AtomicU64,
    pub decode_failures: AtomicU64,
    /// Well-formed frames the target entity refused
    pub rejected: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_in: u64,
    pub frames_out: u64,
    pub unrouted: u64,
    pub decode_failures: u64,
    pub rejected: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

struct SessionLink {
    outbound: FrameSender,
    next_request: AtomicU64,
    stats: Arc<SessionStats>,
}

impl WireLink for SessionLink {
    fn send_frame(&self, frame: Frame) -> TetherResult<()> {
        let bytes = frame.serialize()?;
        tracing::trace!(entity = %frame.entity(), op = %frame.op(), len = bytes.len(), "frame out");
        self.outbound.send(bytes)?;
        self.stats.frames_out.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Something that reacts to sessions coming and going
///
/// Both hooks run on the dispatcher.
pub trait SessionObserver: Send + Sync {
    /// The session is bound and about to start reading
    fn session_started(&self, session: &Arc<Session>);

    fn session_ended(&self, _generation: u64) {}
}

pub struct Session {
    generation: u64,
    peer: String,
    link: Arc<SessionLink>,
    entities: Mutex<HashMap<EntityId, Arc<dyn Entity>>>,
    terminated: AtomicBool,
    receiver: Mutex<Option<FrameReceiver>>,
    guard: Mutex<Option<TransportGuard>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: watch::Sender<bool>,
    stats: Arc<SessionStats>,
}

impl Session {
    /// Take ownership of a connected transport
    pub fn new(generation: u64, transport: Transport) -> Arc<Self> {
        let peer = transport.peer().to_string();
        let (outbound, receiver, guard) = transport.split();
        let stats = Arc::new(SessionStats::default());
        let (closed, _) = watch::channel(false);

        Arc::new(Session {
            generation,
            peer,
            link: Arc::new(SessionLink {
                outbound,
                next_request: AtomicU64::new(0),
                stats: stats.clone(),
            }),
            entities: Mutex::new(HashMap::new()),
            terminated: AtomicBool::new(false),
            receiver: Mutex::new(Some(receiver)),
            guard: Mutex::new(Some(guard)),
            reader: Mutex::new(None),
            closed,
            stats,
        })
    }

    /// Connect-to-bound in one step: bind `model`, push local state, notify
    /// observers, then start reading. Runs the binding on the dispatcher.
    pub async fn establish(
        generation: u64,
        transport: Transport,
        dispatcher: &Dispatcher,
        root_name: &str,
        model: Arc<dyn Model>,
        observers: Vec<Arc<dyn SessionObserver>>,
    ) -> TetherResult<Arc<Session>> {
        let session = Session::new(generation, transport);

        let s = session.clone();
        let root = root_name.to_string();
        let bound = dispatcher
            .invoke(move || {
                let count = s.bind_model(&root, model.as_ref())?;
                s.sync_all();
                for observer in &observers {
                    observer.session_started(&s);
                }
                Ok::<usize, TetherError>(count)
            })
            .await
            .and_then(|r| r);

        match bound {
            Ok(count) => {
                session.start_reading(dispatcher);
                tracing::info!(
                    generation,
                    peer = %session.peer,
                    entities = count,
                    "session established"
                );
                Ok(session)
            }
            Err(e) => {
                session.unregister_all();
                session.close();
                Err(e)
            }
        }
    }

    /// Unbind everything on the dispatcher, then release the transport.
    /// Returns once both are done.
    pub async fn teardown(
        self: &Arc<Self>,
        dispatcher: &Dispatcher,
        observers: Vec<Arc<dyn SessionObserver>>,
    ) {
        let s = self.clone();
        let generation = self.generation;
        let result = dispatcher
            .invoke(move || {
                let count = s.unregister_all();
                for observer in &observers {
                    observer.session_ended(generation);
                }
                count
            })
            .await;

        let count = match result {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(generation, "teardown off the dispatcher: {}", e);
                self.unregister_all()
            }
        };
        self.close();
        tracing::info!(generation, entities = count, "session torn down");
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().len()
    }

    pub fn is_bound(&self, id: EntityId) -> bool {
        self.entities.lock().contains_key(&id)
    }

    /// Bind `entity` under `id`
    pub fn register(&self, id: EntityId, entity: Arc<dyn Entity>) -> TetherResult<()> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(TetherError::TransportClosed);
        }

        let mut entities = self.entities.lock();
        if entities.contains_key(&id) {
            tracing::error!(entity = %id, generation = self.generation, "duplicate entity id");
            return Err(TetherError::DuplicateId(id));
        }

        let link: Arc<dyn WireLink> = self.link.clone();
        entity.bind(id, &link)?;
        entities.insert(id, entity);
        Ok(())
    }

    /// Bind every entity of `model` under its structural id
    pub fn bind_model(&self, root_name: &str, model: &dyn Model) -> TetherResult<usize> {
        let targets = collect(root_name, model)?;
        let mut bound = 0;
        for target in targets {
            match self.register(target.id, target.entity) {
                Ok(()) => bound += 1,
                Err(e) => {
                    tracing::error!(path = %target.path, "entity not bound: {}", e);
                }
            }
        }
        Ok(bound)
    }

    /// Push locally owned state of every bound entity to the peer
    pub fn sync_all(&self) {
        let entities: Vec<(EntityId, Arc<dyn Entity>)> = self
            .entities
            .lock()
            .iter()
            .map(|(id, e)| (*id, e.clone()))
            .collect();
        for (id, entity) in entities {
            if let Err(e) = entity.sync_bound() {
                tracing::debug!(entity = %id, "initial sync failed: {}", e);
            }
        }
    }

    /// Route one received frame to its entity
    pub fn handle_frame(&self, bytes: Bytes) -> TetherResult<()> {
        if self.terminated.load(Ordering::Acquire) {
            self.stats.unrouted.fetch_add(1, Ordering::Relaxed);
            return Err(TetherError::TransportClosed);
        }
        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);

        let frame = Frame::parse(bytes).map_err(|e| {
            self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(generation = self.generation, "dropping malformed frame: {}", e);
            e
        })?;
        let id = frame.entity();
        tracing::trace!(entity = %id, op = %frame.op(), "frame in");

        let entity = self.entities.lock().get(&id).cloned();
        let Some(entity) = entity else {
            self.stats.unrouted.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(entity = %id, op = %frame.op(), "unrouted frame dropped");
            return Err(TetherError::UnroutedFrame(id));
        };

        entity.receive(frame.op(), frame.payload).map_err(|e| {
            if e.is_wire() {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(entity = %id, "undecodable payload: {}", e);
            } else {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(entity = %id, "frame not applied: {}", e);
            }
            e
        })
    }

    /// Start the reader task feeding frames to the dispatcher
    pub fn start_reading(self: &Arc<Self>, dispatcher: &Dispatcher) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };

        let session = Arc::downgrade(self);
        let dispatcher = dispatcher.clone();
        let generation = self.generation;
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(bytes) => {
                        let Some(s) = session.upgrade() else { break };
                        let queued = dispatcher
                            .submit(move || {
                                let _ = s.handle_frame(bytes);
                            })
                            .await;
                        if queued.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            tracing::debug!(generation, "session reader finished");
            if let Some(s) = session.upgrade() {
                s.closed.send_replace(true);
            }
        });
        *self.reader.lock() = Some(task);
    }

    /// Unbind every entity; frames arriving afterwards are dropped
    pub fn unregister_all(&self) -> usize {
        self.terminated.store(true, Ordering::Release);
        let drained: Vec<Arc<dyn Entity>> =
            self.entities.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entity in drained {
            entity.unbind();
        }
        count
    }

    /// Release the transport
    pub fn close(&self) {
        if let Some(mut guard) = self.guard.lock().take() {
            guard.close();
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.receiver.lock().take();
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves to true once the transport is gone
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .field("peer", &self.peer)
            .field("entities", &self.entity_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_core::WireValue;
    use tether_model::{Member, Property, Signal};
    use tether_wire::Operation;

    struct Pair {
        flag: Property<bool>,
        note: Signal<String>,
    }

    impl Model for Pair {
        fn members(&self) -> Vec<(&'static str, Member<'_>)> {
            vec![
                ("flag", Member::Entity(self.flag.entity())),
                ("note", Member::Entity(self.note.entity())),
            ]
        }
    }

    fn pair_model() -> Arc<Pair> {
        Arc::new(Pair {
            flag: Property::new(),
            note: Signal::new(),
        })
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let (a, _b) = tether_transport::pair();
        let session = Session::new(1, a);
        let first = Property::<i32>::new();
        let second = Property::<i32>::new();

        session.register(EntityId(5), first.entity()).unwrap();
        assert_eq!(
            session.register(EntityId(5), second.entity()),
            Err(TetherError::DuplicateId(EntityId(5)))
        );
        // The session keeps the first binding intact
        assert_eq!(session.entity_count(), 1);
        assert!(first.is_bound());
        assert!(!second.is_bound());
    }

    #[tokio::test]
    async fn test_inbound_frame_routed_by_id() {
        let (dispatcher, _task) = Dispatcher::spawn();
        let (a, mut b) = tether_transport::pair();
        let model = pair_model();
        let session = Session::establish(1, a, &dispatcher, "root", model.clone(), vec![])
            .await
            .unwrap();

        let id = tether_model::root_id("root").child("flag");
        let frame = Frame::property_set(id, true.encode());
        b.send(frame.serialize().unwrap()).unwrap();

        for _ in 0..100 {
            if model.flag.get() == Some(true) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(model.flag.get(), Some(true));
        assert_eq!(session.stats().frames_in, 1);

        // Remote values are not echoed back
        dispatcher.flush().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(30), b.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_id_is_unrouted() {
        let (a, _b) = tether_transport::pair();
        let session = Session::new(1, a);
        let bytes = Frame::signal_fire(EntityId(77), Bytes::new())
            .serialize()
            .unwrap();

        assert_eq!(
            session.handle_frame(bytes),
            Err(TetherError::UnroutedFrame(EntityId(77)))
        );
        assert_eq!(session.stats().unrouted, 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_counted() {
        let (a, _b) = tether_transport::pair();
        let session = Session::new(1, a);
        assert!(session
            .handle_frame(Bytes::from_static(&[9, 9, 9]))
            .is_err());
        assert_eq!(session.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_refused_frame_is_not_a_decode_failure() {
        let (a, _b) = tether_transport::pair();
        let session = Session::new(1, a);
        let flag = Property::<bool>::new();
        session.register(EntityId(5), flag.entity()).unwrap();

        // Right shape, wrong operation for a property
        let wrong_kind = Frame::signal_fire(EntityId(5), Bytes::new());
        assert!(matches!(
            session.handle_frame(wrong_kind.serialize().unwrap()),
            Err(TetherError::KindMismatch { .. })
        ));
        // Right operation, payload that is not a bool
        let garbage = Frame::property_set(EntityId(5), Bytes::from_static(&[7]));
        assert!(session.handle_frame(garbage.serialize().unwrap()).is_err());

        let stats = session.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(flag.get(), None);
    }

    #[tokio::test]
    async fn test_teardown_unbinds_and_closes() {
        let (dispatcher, _task) = Dispatcher::spawn();
        let (a, mut b) = tether_transport::pair();
        let model = pair_model();
        let session = Session::establish(3, a, &dispatcher, "root", model.clone(), vec![])
            .await
            .unwrap();
        assert!(model.flag.is_bound());

        session.teardown(&dispatcher, vec![]).await;

        assert!(!model.flag.is_bound());
        assert!(!model.note.is_bound());
        assert!(session.is_closed());
        assert_eq!(b.recv().await, Err(TetherError::TransportClosed));

        // Anything still in flight for this session is dropped
        let stale = Frame::property_set(tether_model::root_id("root").child("flag"), true.encode());
        assert!(session.handle_frame(stale.serialize().unwrap()).is_err());
        assert_eq!(model.flag.get(), None);
    }

    #[tokio::test]
    async fn test_local_state_pushed_on_establish() {
        let (dispatcher, _task) = Dispatcher::spawn();
        let (a, mut b) = tether_transport::pair();
        let model = pair_model();
        model.flag.set(true).unwrap();

        let _session = Session::establish(1, a, &dispatcher, "root", model.clone(), vec![])
            .await
            .unwrap();

        let frame = Frame::parse(b.recv().await.unwrap()).unwrap();
        assert_eq!(frame.entity(), tether_model::root_id("root").child("flag"));
        assert_eq!(frame.op(), Operation::PropertySet);
        assert!(bool::decode(&frame.payload).unwrap());
    }

    #[tokio::test]
    async fn test_peer_close_flags_session() {
        let (dispatcher, _task) = Dispatcher::spawn();
        let (a, mut b) = tether_transport::pair();
        let session = Session::establish(1, a, &dispatcher, "root", pair_model(), vec![])
            .await
            .unwrap();

        let mut closed = session.closed();
        b.close();
        tokio::time::timeout(Duration::from_secs(2), closed.wait_for(|c| *c))
            .await
            .unwrap()
            .unwrap();
    }
}
