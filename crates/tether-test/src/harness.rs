//! Two-party harness
//!
//! Sessions here run over the in-memory transport, each side with its own
//! dispatcher, so ordering between the two processes is as loose as it is in
//! production.

use std::sync::Arc;
use std::time::Duration;

use tether_core::{EntityId, TetherResult};
use tether_model::{root_id, Model};
use tether_runtime::{Dispatcher, Session};
use tether_transport::Transport;
use tether_wire::{Frame, OperationKind};

// ============================================================================
// LINKED PAIR
// ============================================================================

/// Two sessions bound to the same model shape over one in-memory transport
pub struct LinkedPair {
    pub left: Arc<Session>,
    pub right: Arc<Session>,
    pub left_dispatcher: Dispatcher,
    pub right_dispatcher: Dispatcher,
}

impl LinkedPair {
    /// Bind `left` and `right` under `root_name`, one per side
    pub async fn establish(
        root_name: &str,
        left: Arc<dyn Model>,
        right: Arc<dyn Model>,
    ) -> TetherResult<Self> {
        Self::establish_generation(1, root_name, left, right).await
    }

    pub async fn establish_generation(
        generation: u64,
        root_name: &str,
        left: Arc<dyn Model>,
        right: Arc<dyn Model>,
    ) -> TetherResult<Self> {
        let (a, b) = tether_transport::pair();
        let (left_dispatcher, _) = Dispatcher::spawn();
        let (right_dispatcher, _) = Dispatcher::spawn();

        let left = Session::establish(generation, a, &left_dispatcher, root_name, left, Vec::new())
            .await?;
        let right =
            Session::establish(generation, b, &right_dispatcher, root_name, right, Vec::new())
                .await?;

        Ok(LinkedPair {
            left,
            right,
            left_dispatcher,
            right_dispatcher,
        })
    }

    /// Tear both sides down in order, left first
    pub async fn teardown(self) {
        self.left.teardown(&self.left_dispatcher, Vec::new()).await;
        self.right.teardown(&self.right_dispatcher, Vec::new()).await;
    }
}

// ============================================================================
// RAW PEER
// ============================================================================

/// The far end of a session, driven frame by frame
pub struct RawPeer {
    transport: Transport,
}

impl RawPeer {
    pub fn new(transport: Transport) -> Self {
        RawPeer { transport }
    }

    /// Bind `model` on a fresh session and hand back the peer facing it
    pub async fn attach(
        root_name: &str,
        model: Arc<dyn Model>,
    ) -> TetherResult<(Arc<Session>, Dispatcher, RawPeer)> {
        let (a, b) = tether_transport::pair();
        let (dispatcher, _) = Dispatcher::spawn();
        let session = Session::establish(1, a, &dispatcher, root_name, model, Vec::new()).await?;
        Ok((session, dispatcher, RawPeer::new(b)))
    }

    pub fn send(&self, frame: &Frame) -> TetherResult<()> {
        self.transport.send(frame.serialize()?)
    }

    /// Next frame, or `None` when nothing arrives within `within`
    pub async fn recv(&mut self, within: Duration) -> TetherResult<Option<Frame>> {
        match tokio::time::timeout(within, self.transport.recv()).await {
            Ok(bytes) => Frame::parse(bytes?).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Next frame of `kind`, skipping any other traffic
    pub async fn recv_kind(
        &mut self,
        kind: OperationKind,
        within: Duration,
    ) -> TetherResult<Option<Frame>> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv(left).await? {
                Some(frame) if frame.op().kind() == kind => return Ok(Some(frame)),
                Some(frame) => {
                    tracing::trace!(entity = %frame.entity(), op = %frame.op(), "skipped");
                }
                None => return Ok(None),
            }
        }
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Structural id of `path` below the model root `root_name`
pub fn entity_id(root_name: &str, path: &[&str]) -> EntityId {
    path.iter()
        .fold(root_id(root_name), |id, name| id.child(name))
}

/// Poll `check` until it holds or `within` elapses
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
