//! Length prefix used when frames travel over a byte stream

use bytes::{BufMut, Bytes, BytesMut};
use tether_core::{TetherError, TetherResult};

use crate::{Frame, FIXED_HEADER_SIZE, MAX_FRAME_SIZE};

/// Size of the u32 LE length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Prepend the length prefix to an already serialized frame
pub fn encode_prefixed(frame: &[u8]) -> TetherResult<Bytes> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(TetherError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + frame.len());
    buf.put_u32_le(frame.len() as u32);
    buf.extend_from_slice(frame);
    Ok(buf.freeze())
}

/// Serialize a frame together with its length prefix
pub fn encode_frame(frame: &Frame) -> TetherResult<Bytes> {
    encode_prefixed(&frame.serialize()?)
}

/// Validate a received length prefix and return the body length
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> TetherResult<usize> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TetherError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if len < FIXED_HEADER_SIZE {
        return Err(TetherError::BufferTooShort {
            expected: FIXED_HEADER_SIZE,
            actual: len,
        });
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::any_operation;
    use crate::Operation;
    use proptest::prelude::*;
    use tether_core::EntityId;

    #[test]
    fn test_prefix_matches_body() {
        let frame = Frame::new(EntityId(3), Operation::PropertySet, Bytes::from_static(b"abc"));
        let bytes = encode_frame(&frame).unwrap();

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&bytes[..LENGTH_PREFIX_SIZE]);
        let len = decode_length(prefix).unwrap();

        assert_eq!(len, bytes.len() - LENGTH_PREFIX_SIZE);
        let parsed = Frame::parse(bytes.slice(LENGTH_PREFIX_SIZE..)).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let prefix = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes();
        assert!(matches!(
            decode_length(prefix),
            Err(TetherError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_undersized_prefix_rejected() {
        let prefix = 3u32.to_le_bytes();
        assert!(decode_length(prefix).is_err());
    }

    proptest! {
        #[test]
        fn prefix_always_names_body_length(
            op in any_operation(),
            payload in proptest::collection::vec(any::<u8>(), 0..128),
        ) {
            let frame = Frame::new(EntityId(1), op, Bytes::from(payload));
            let bytes = encode_frame(&frame).unwrap();
            let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
            prefix.copy_from_slice(&bytes[..LENGTH_PREFIX_SIZE]);
            prop_assert_eq!(decode_length(prefix).unwrap(), frame.size());
        }
    }
}
