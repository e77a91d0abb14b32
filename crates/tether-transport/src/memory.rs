//! In-process transport pair
//!
//! Two transports cross-wired through forwarding tasks. Closing either end
//! aborts its forwarder, which ends the reads on the other end just like a
//! socket shutdown would.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{Transport, INBOUND_BUFFER};

/// Create a connected pair; must be called inside a tokio runtime
pub fn pair() -> (Transport, Transport) {
    let (a_out_tx, a_out_rx) = mpsc::unbounded_channel();
    let (b_out_tx, b_out_rx) = mpsc::unbounded_channel();
    let (a_in_tx, a_in_rx) = mpsc::channel(INBOUND_BUFFER);
    let (b_in_tx, b_in_rx) = mpsc::channel(INBOUND_BUFFER);

    let a_to_b = tokio::spawn(forward(a_out_rx, b_in_tx));
    let b_to_a = tokio::spawn(forward(b_out_rx, a_in_tx));

    (
        Transport::from_parts("memory:a", a_out_tx, a_in_rx, vec![a_to_b]),
        Transport::from_parts("memory:b", b_out_tx, b_in_rx, vec![b_to_a]),
    )
}

async fn forward(mut rx: mpsc::UnboundedReceiver<Bytes>, tx: mpsc::Sender<Bytes>) {
    while let Some(frame) = rx.recv().await {
        if tx.send(frame).await.is_err() {
            break;
        }
    }
}
