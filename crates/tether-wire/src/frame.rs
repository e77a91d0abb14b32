//! Complete frame structure for the tether wire protocol
//!
//! Frame = Fixed Header + Payload. Each logical operation maps to exactly one
//! frame; frames are never batched or split.

use bytes::{Bytes, BytesMut};
use tether_core::{EntityId, RequestId, TetherError, TetherResult};

use crate::{FixedHeader, Operation, FIXED_HEADER_SIZE};

/// Maximum frame size, header included
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Complete tether frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: FixedHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(entity: EntityId, op: Operation, payload: Bytes) -> Self {
        Frame {
            header: FixedHeader::new(entity, op),
            payload,
        }
    }

    pub fn property_set(entity: EntityId, payload: Bytes) -> Self {
        Frame::new(entity, Operation::PropertySet, payload)
    }

    pub fn signal_fire(entity: EntityId, payload: Bytes) -> Self {
        Frame::new(entity, Operation::SignalFire, payload)
    }

    pub fn call_request(entity: EntityId, request: RequestId, payload: Bytes) -> Self {
        Frame::new(entity, Operation::CallRequest(request), payload)
    }

    pub fn call_response(entity: EntityId, request: RequestId, payload: Bytes) -> Self {
        Frame::new(entity, Operation::CallResponse(request), payload)
    }

    #[inline]
    pub fn entity(&self) -> EntityId {
        self.header.entity
    }

    #[inline]
    pub fn op(&self) -> Operation {
        self.header.op
    }

    /// Parse a frame; the payload shares the input buffer
    pub fn parse(buf: Bytes) -> TetherResult<Self> {
        if buf.len() > MAX_FRAME_SIZE {
            return Err(TetherError::FrameTooLarge {
                size: buf.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let header = FixedHeader::parse(&buf)?;
        let payload = buf.slice(FIXED_HEADER_SIZE..);
        Ok(Frame { header, payload })
    }

    /// Serialize frame to bytes
    pub fn serialize(&self) -> TetherResult<Bytes> {
        let total_size = self.size();
        if total_size > MAX_FRAME_SIZE {
            return Err(TetherError::FrameTooLarge {
                size: total_size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(total_size);
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Calculate total frame size
    pub fn size(&self) -> usize {
        FIXED_HEADER_SIZE + self.payload.len()
    }
}
