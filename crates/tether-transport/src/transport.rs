//! Transport handle shared by every concrete transport

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_core::{TetherError, TetherResult};

/// Inbound frame buffer per transport
pub const INBOUND_BUFFER: usize = 1024;

/// One connected transport
///
/// Frames (without the stream length prefix) are handed to background pump
/// tasks; received frames come back in the order the peer sent them. Dropping
/// or closing the transport aborts the pumps.
pub struct Transport {
    peer: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: mpsc::Receiver<Bytes>,
    guard: TransportGuard,
}

impl Transport {
    /// Assemble a transport from its channels and the pump tasks feeding them
    pub fn from_parts(
        peer: impl Into<String>,
        outbound: mpsc::UnboundedSender<Bytes>,
        inbound: mpsc::Receiver<Bytes>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Transport {
            peer: peer.into(),
            outbound,
            inbound,
            guard: TransportGuard { tasks },
        }
    }

    /// Human readable peer description
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue a frame for sending; fails once the transport is closed
    pub fn send(&self, frame: Bytes) -> TetherResult<()> {
        self.outbound
            .send(frame)
            .map_err(|_| TetherError::TransportClosed)
    }

    /// Receive the next frame
    pub async fn recv(&mut self) -> TetherResult<Bytes> {
        self.inbound.recv().await.ok_or(TetherError::TransportClosed)
    }

    /// Release the connection; pending and future reads fail with `TransportClosed`
    pub fn close(&mut self) {
        self.guard.close();
        self.inbound.close();
    }

    /// Split into independently owned halves
    pub fn split(self) -> (FrameSender, FrameReceiver, TransportGuard) {
        (
            FrameSender {
                outbound: self.outbound,
            },
            FrameReceiver {
                inbound: self.inbound,
            },
            self.guard,
        )
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Sending half
#[derive(Clone, Debug)]
pub struct FrameSender {
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl FrameSender {
    pub fn send(&self, frame: Bytes) -> TetherResult<()> {
        self.outbound
            .send(frame)
            .map_err(|_| TetherError::TransportClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Receiving half
#[derive(Debug)]
pub struct FrameReceiver {
    inbound: mpsc::Receiver<Bytes>,
}

impl FrameReceiver {
    pub async fn recv(&mut self) -> TetherResult<Bytes> {
        self.inbound.recv().await.ok_or(TetherError::TransportClosed)
    }
}

/// Owns the pump tasks; closing aborts them
#[derive(Debug)]
pub struct TransportGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl TransportGuard {
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens transports to a discovered port
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, port: u16) -> TetherResult<Transport>;
}
