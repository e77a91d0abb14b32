//! Fixed header for the tether wire protocol
//!
//! Fixed header is 18 bytes:
//! - Byte 0: Wire version
//! - Byte 1: Operation kind
//! - Bytes 2-9: Entity ID (LE)
//! - Bytes 10-17: Request ID (LE, zero unless the operation is a call)

use tether_core::{EntityId, RequestId, TetherError, TetherResult};

use crate::{Operation, OperationKind};

/// Fixed header size in bytes
pub const FIXED_HEADER_SIZE: usize = 18;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Fixed header structure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedHeader {
    /// Wire protocol version
    pub version: u8,
    /// Target entity
    pub entity: EntityId,
    /// Operation applied to the entity
    pub op: Operation,
}

impl FixedHeader {
    pub fn new(entity: EntityId, op: Operation) -> Self {
        FixedHeader {
            version: WIRE_VERSION,
            entity,
            op,
        }
    }

    /// Parse header from bytes
    pub fn parse(buf: &[u8]) -> TetherResult<Self> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Err(TetherError::BufferTooShort {
                expected: FIXED_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let version = buf[0];
        if version != WIRE_VERSION {
            return Err(TetherError::UnsupportedVersion(version));
        }

        let kind = OperationKind::from_byte(buf[1]).ok_or(TetherError::UnknownOperation(buf[1]))?;

        let mut entity = [0u8; 8];
        entity.copy_from_slice(&buf[2..10]);
        let mut request = [0u8; 8];
        request.copy_from_slice(&buf[10..18]);

        Ok(FixedHeader {
            version,
            entity: EntityId::from_bytes(entity),
            op: Operation::from_parts(kind, RequestId(u64::from_le_bytes(request))),
        })
    }

    /// Serialize header into the front of `buf`
    pub fn serialize(&self, buf: &mut [u8]) -> TetherResult<()> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Err(TetherError::BufferTooShort {
                expected: FIXED_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        self.write_fixed(&mut buf[..FIXED_HEADER_SIZE]);
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; FIXED_HEADER_SIZE] {
        let mut buf = [0u8; FIXED_HEADER_SIZE];
        self.write_fixed(&mut buf);
        buf
    }

    fn write_fixed(&self, buf: &mut [u8]) {
        buf[0] = self.version;
        buf[1] = self.op.kind().to_byte();
        buf[2..10].copy_from_slice(&self.entity.to_bytes());
        buf[10..18].copy_from_slice(&self.op.request_id().0.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::any_operation;
    use proptest::prelude::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FixedHeader::new(
            EntityId::new(0x12345678_9ABCDEF0),
            Operation::CallResponse(RequestId(77)),
        );
        let bytes = header.to_bytes();
        assert_eq!(FixedHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_too_short() {
        let buf = [WIRE_VERSION; 10];
        assert!(matches!(
            FixedHeader::parse(&buf),
            Err(TetherError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_unknown_operation() {
        let mut bytes = FixedHeader::new(EntityId(1), Operation::SignalFire).to_bytes();
        bytes[1] = 0x7f;
        assert_eq!(
            FixedHeader::parse(&bytes),
            Err(TetherError::UnknownOperation(0x7f))
        );
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = FixedHeader::new(EntityId(1), Operation::SignalFire).to_bytes();
        bytes[0] = 9;
        assert_eq!(
            FixedHeader::parse(&bytes),
            Err(TetherError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_serialize_into_short_buffer() {
        let header = FixedHeader::new(EntityId(1), Operation::PropertySet);
        let mut buf = [0u8; 4];
        assert!(header.serialize(&mut buf).is_err());
    }

    proptest! {
        #[test]
        fn header_survives_serialize_parse(entity in any::<u64>(), op in any_operation()) {
            let header = FixedHeader::new(EntityId(entity), op);
            let mut buf = [0u8; FIXED_HEADER_SIZE + 4];
            header.serialize(&mut buf).unwrap();
            prop_assert_eq!(FixedHeader::parse(&buf).unwrap(), header);
        }

        #[test]
        fn parsing_arbitrary_bytes_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..40)) {
            let _ = FixedHeader::parse(&bytes);
        }
    }
}
