//! tether Transport Layer - frame delivery between two peers
//!
//! This crate provides:
//! - The [`Transport`] handle: ordered frame send/receive plus close
//! - TCP client and listener with length-prefixed framing
//! - An in-process transport pair for tests and embedding
//! - The [`Connector`] seam used by the session lifetime manager

pub mod memory;
pub mod tcp;
pub mod transport;

pub use memory::pair;
pub use tcp::{TcpConnector, TcpFrameListener};
pub use transport::*;
