//! Error types for the tether protocol

use std::time::Duration;

use thiserror::Error;

use crate::{EntityId, RequestId};

/// Core tether errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TetherError {
    // Discovery / connection errors
    #[error("Discovery record unreadable at {path}: {reason}")]
    DiscoveryUnreadable { path: String, reason: String },

    #[error("Connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("Transport closed")]
    TransportClosed,

    #[error("Dispatcher unavailable")]
    DispatcherUnavailable,

    #[error("Dispatcher queue full")]
    DispatcherBusy,

    // Binding errors
    #[error("Duplicate entity id {0} in session")]
    DuplicateId(EntityId),

    #[error("Entity {0} is still bound to a live session")]
    AlreadyBound(EntityId),

    #[error("Entity is not bound to a session")]
    NotBound,

    // Routing errors
    #[error("No entity bound for id {0}")]
    UnroutedFrame(EntityId),

    #[error("Operation {op} not applicable to {entity}")]
    KindMismatch { entity: EntityId, op: &'static str },

    // Call errors
    #[error("Call {request} on {entity} timed out after {after:?}")]
    Timeout {
        entity: EntityId,
        request: RequestId,
        after: Duration,
    },

    #[error("Remote failure: {0}")]
    RemoteFailure(String),

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Unknown operation kind: {0}")]
    UnknownOperation(u8),

    #[error("Unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TetherError {
    /// Whether the failure is expected at runtime and should be logged and
    /// absorbed rather than treated as a programming error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TetherError::DuplicateId(_) | TetherError::AlreadyBound(_)
        )
    }

    /// Whether the bytes themselves were malformed
    pub fn is_wire(&self) -> bool {
        matches!(
            self,
            TetherError::InvalidWireFormat(_)
                | TetherError::BufferTooShort { .. }
                | TetherError::FrameTooLarge { .. }
                | TetherError::UnknownOperation(_)
                | TetherError::UnsupportedVersion(_)
        )
    }
}

/// Result type for tether operations
pub type TetherResult<T> = Result<T, TetherError>;
