//! Call: request/response across the session
//!
//! Every request gets a session-unique id; the response carries it back. The
//! response payload starts with a status byte:
//!
//! ```text
//! 0x00 || encoded result
//! 0x01 || encoded failure message
//! ```
//!
//! Each pending request owns its own deadline, so a slow call never delays
//! another. Unbinding fails every pending request with `TransportClosed`.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tether_core::{EntityId, RequestId, TetherError, TetherResult, WireValue, WireWriter};
use tether_wire::Operation;
use tokio::sync::oneshot;

use crate::entity::{mismatch, BindingSlot, Entity, EntityKind, WireLink};

const STATUS_OK: u8 = 0;
const STATUS_FAILED: u8 = 1;

type Handler<Req, Res> = Arc<dyn Fn(Req) -> Result<Res, String> + Send + Sync>;

/// Where a response goes once it arrives
enum Responder {
    Async(oneshot::Sender<TetherResult<Bytes>>),
    Blocking(std_mpsc::SyncSender<TetherResult<Bytes>>),
}

impl Responder {
    fn resolve(self, outcome: TetherResult<Bytes>) {
        // The waiter may have timed out and gone away
        match self {
            Responder::Async(tx) => {
                let _ = tx.send(outcome);
            }
            Responder::Blocking(tx) => {
                let _ = tx.try_send(outcome);
            }
        }
    }
}

fn encode_reply<Res: WireValue>(outcome: &Result<Res, String>) -> Bytes {
    let mut w = WireWriter::new();
    match outcome {
        Ok(value) => {
            w.write_u8(STATUS_OK);
            value.write(&mut w);
        }
        Err(message) => {
            w.write_u8(STATUS_FAILED);
            w.write_str(message);
        }
    }
    w.finish()
}

fn decode_reply(payload: Bytes) -> TetherResult<Bytes> {
    match payload.first() {
        Some(&STATUS_OK) => Ok(payload.slice(1..)),
        Some(&STATUS_FAILED) => Err(TetherError::RemoteFailure(String::decode(&payload[1..])?)),
        Some(other) => Err(TetherError::InvalidWireFormat(format!(
            "unknown call status {other}"
        ))),
        None => Err(TetherError::InvalidWireFormat("empty call response".into())),
    }
}

struct CallCell<Req, Res> {
    binding: BindingSlot,
    handler: Mutex<Option<Handler<Req, Res>>>,
    pending: Mutex<HashMap<RequestId, Responder>>,
    _types: PhantomData<fn(Req) -> Res>,
}

impl<Req: WireValue, Res: WireValue> CallCell<Req, Res> {
    fn answer(&self, request: RequestId, payload: &[u8]) -> TetherResult<()> {
        let outcome = match Req::decode(payload) {
            Ok(req) => {
                let handler = self.handler.lock().clone();
                match handler {
                    Some(handler) => handler(req),
                    None => Err("no handler registered".to_string()),
                }
            }
            Err(e) => Err(format!("malformed request: {e}")),
        };

        if let Err(message) = &outcome {
            tracing::debug!(%request, "answering call with failure: {}", message);
        }

        let binding = self.binding.current().ok_or(TetherError::NotBound)?;
        binding.send(Operation::CallResponse(request), encode_reply(&outcome))
    }

    fn complete(&self, request: RequestId, payload: Bytes) {
        let responder = self.pending.lock().remove(&request);
        match responder {
            Some(responder) => responder.resolve(decode_reply(payload)),
            None => tracing::debug!(%request, "dropping response for unknown request"),
        }
    }

    fn fail_pending(&self) {
        let drained: Vec<Responder> = self.pending.lock().drain().map(|(_, r)| r).collect();
        for responder in drained {
            responder.resolve(Err(TetherError::TransportClosed));
        }
    }
}

impl<Req: WireValue, Res: WireValue> Entity for CallCell<Req, Res> {
    fn kind(&self) -> EntityKind {
        EntityKind::Call
    }

    fn bind(&self, id: EntityId, link: &Arc<dyn WireLink>) -> TetherResult<()> {
        self.binding.bind(id, link)
    }

    fn unbind(&self) {
        self.binding.unbind();
        self.fail_pending();
    }

    fn bound_id(&self) -> Option<EntityId> {
        self.binding.id()
    }

    fn receive(&self, op: Operation, payload: Bytes) -> TetherResult<()> {
        match op {
            Operation::CallRequest(request) => self.answer(request, &payload),
            Operation::CallResponse(request) => {
                self.complete(request, payload);
                Ok(())
            }
            other => Err(mismatch(self.binding.id(), other)),
        }
    }
}

/// Shared handle to a call endpoint
///
/// The same endpoint can both issue requests and answer the peer's requests
/// through its handler.
pub struct Call<Req: WireValue, Res: WireValue> {
    inner: Arc<CallCell<Req, Res>>,
}

impl<Req: WireValue, Res: WireValue> Call<Req, Res> {
    pub fn new() -> Self {
        Call {
            inner: Arc::new(CallCell {
                binding: BindingSlot::new(),
                handler: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                _types: PhantomData,
            }),
        }
    }

    /// Answer inbound requests with `handler`, replacing any previous one
    pub fn set_handler(&self, handler: impl Fn(Req) -> Res + Send + Sync + 'static) {
        self.set_fallible_handler(move |req| Ok(handler(req)));
    }

    /// Like [`set_handler`](Self::set_handler) but the handler may fail; the
    /// message reaches the caller as `RemoteFailure`
    pub fn set_fallible_handler(
        &self,
        handler: impl Fn(Req) -> Result<Res, String> + Send + Sync + 'static,
    ) {
        *self.inner.handler.lock() = Some(Arc::new(handler));
    }

    pub fn clear_handler(&self) {
        *self.inner.handler.lock() = None;
    }

    /// Issue a request and await its response
    pub async fn start(&self, request: Req, timeout: Duration) -> TetherResult<Res> {
        let (tx, rx) = oneshot::channel();
        let (entity, id) = self.issue(&request, Responder::Async(tx))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Res::decode(&reply?),
            Ok(Err(_)) => Err(TetherError::TransportClosed),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                Err(TetherError::Timeout {
                    entity,
                    request: id,
                    after: timeout,
                })
            }
        }
    }

    /// Issue a request and block the calling thread until the response
    /// arrives. Must not be called from the thread that delivers frames.
    pub fn sync(&self, request: Req, timeout: Duration) -> TetherResult<Res> {
        let (tx, rx) = std_mpsc::sync_channel(1);
        let (entity, id) = self.issue(&request, Responder::Blocking(tx))?;

        match rx.recv_timeout(timeout) {
            Ok(reply) => Res::decode(&reply?),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                self.inner.pending.lock().remove(&id);
                Err(TetherError::Timeout {
                    entity,
                    request: id,
                    after: timeout,
                })
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(TetherError::TransportClosed),
        }
    }

    fn issue(&self, request: &Req, responder: Responder) -> TetherResult<(EntityId, RequestId)> {
        let binding = self.inner.binding.current().ok_or(TetherError::NotBound)?;
        let id = binding.next_request_id()?;

        self.inner.pending.lock().insert(id, responder);
        if let Err(e) = binding.send(Operation::CallRequest(id), request.encode()) {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }
        Ok((binding.id, id))
    }

    /// Requests still waiting for a response
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.current().is_some()
    }

    pub fn entity(&self) -> Arc<dyn Entity> {
        self.inner.clone()
    }
}

impl<Req: WireValue, Res: WireValue> Clone for Call<Req, Res> {
    fn clone(&self) -> Self {
        Call {
            inner: self.inner.clone(),
        }
    }
}

impl<Req: WireValue, Res: WireValue> Default for Call<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req: WireValue, Res: WireValue> fmt::Debug for Call<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("pending", &self.pending())
            .field("bound", &self.inner.binding.id())
            .finish()
    }
}
