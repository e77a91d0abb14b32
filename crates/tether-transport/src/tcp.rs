//! TCP transport implementation
//!
//! Each frame travels as `u32 LE length || frame bytes`. A reader task and a
//! writer task pump frames between the socket and the transport channels.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use tether_core::{TetherError, TetherResult};
use tether_wire::{decode_length, encode_prefixed, LENGTH_PREFIX_SIZE};

use crate::{Connector, Transport, INBOUND_BUFFER};

/// Connect to `addr`, giving up after `timeout`
pub async fn connect(addr: SocketAddr, timeout: Duration) -> TetherResult<Transport> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TetherError::ConnectFailed {
            addr: addr.to_string(),
            reason: format!("timed out after {timeout:?}"),
        })?
        .map_err(|e| TetherError::ConnectFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

    tracing::debug!(%addr, "tcp transport connected");
    Ok(from_stream(stream, addr.to_string()))
}

/// Wrap a connected stream into a [`Transport`]
pub fn from_stream(stream: TcpStream, peer: String) -> Transport {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, "set_nodelay failed: {}", e);
    }

    let (reader, writer) = stream.into_split();
    let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER);
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let read_task = tokio::spawn(read_loop(reader, in_tx, peer.clone()));
    let write_task = tokio::spawn(write_loop(writer, out_rx, peer.clone()));

    Transport::from_parts(peer, out_tx, in_rx, vec![read_task, write_task])
}

async fn read_loop(mut reader: OwnedReadHalf, tx: mpsc::Sender<Bytes>, peer: String) {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    loop {
        if let Err(e) = reader.read_exact(&mut prefix).await {
            tracing::debug!(%peer, "tcp read ended: {}", e);
            break;
        }

        // A bad length desynchronizes the stream; the connection is unusable
        let len = match decode_length(prefix) {
            Ok(len) => len,
            Err(e) => {
                tracing::warn!(%peer, "invalid frame length: {}", e);
                break;
            }
        };

        let mut body = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut body).await {
            tracing::debug!(%peer, "tcp read ended mid-frame: {}", e);
            break;
        }

        if tx.send(Bytes::from(body)).await.is_err() {
            break; // Receiver dropped
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    peer: String,
) {
    while let Some(frame) = rx.recv().await {
        let bytes = match encode_prefixed(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%peer, "dropping unsendable frame: {}", e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            tracing::debug!(%peer, "tcp write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Listening side: accepts peers one connection at a time
pub struct TcpFrameListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpFrameListener {
    /// Bind to a local address (port 0 picks an ephemeral port)
    pub async fn bind(addr: SocketAddr) -> TetherResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TetherError::ConnectFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| TetherError::ConnectFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        Ok(TcpFrameListener {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next peer
    pub async fn accept(&self) -> TetherResult<Transport> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TetherError::ConnectFailed {
                addr: self.local_addr.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(%peer, "tcp transport accepted");
        Ok(from_stream(stream, peer.to_string()))
    }
}

/// Connects to a port on a fixed host (loopback by default)
#[derive(Clone, Debug)]
pub struct TcpConnector {
    pub host: IpAddr,
    pub timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        TcpConnector {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, port: u16) -> TetherResult<Transport> {
        connect(SocketAddr::new(self.host, port), self.timeout).await
    }
}
