//! Identity types for the reactive protocol
//!
//! Entity identifiers are 64-bit and derived from structural position in the
//! model tree, so both peers compute the same id for the same entity without
//! any negotiation.

use std::fmt;

use sha2::{Digest, Sha256};

/// Entity identity - derived from (parent id, child name)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityId(pub u64);

impl EntityId {
    /// The distinguished root; it has no parent and is never bound itself.
    pub const ROOT: EntityId = EntityId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }

    /// Derive the id of a named child of this entity.
    #[inline]
    pub fn child(self, name: &str) -> Self {
        identifier_of(self, name)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        EntityId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({:016x})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Compute the identifier of child `name` under `parent`.
///
/// Pure and deterministic: SHA-256 over the parent id (LE) followed by the
/// UTF-8 name bytes, truncated to 64 bits. A result of zero would collide with
/// [`EntityId::ROOT`] and is remapped to one.
pub fn identifier_of(parent: EntityId, name: &str) -> EntityId {
    let mut hasher = Sha256::new();
    hasher.update(parent.to_bytes());
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();

    let mut wide = [0u8; 8];
    wide.copy_from_slice(&digest[..8]);
    match u64::from_le_bytes(wide) {
        0 => EntityId(1),
        id => EntityId(id),
    }
}

/// Request identity - correlates a call response with its request
///
/// Unique within one session; allocated from a monotonically increasing counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestId(pub u64);

impl RequestId {
    pub const NONE: RequestId = RequestId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        RequestId(id)
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new(0xDEADBEEF_CAFEBABE);
        assert_eq!(EntityId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn test_child_matches_identifier_of() {
        let model = EntityId::ROOT.child("EditorModel");
        assert_eq!(model.child("play"), identifier_of(model, "play"));
        assert_ne!(model.child("play"), model.child("pause"));
    }

    #[test]
    fn test_same_name_under_different_parents() {
        let a = EntityId::ROOT.child("a");
        let b = EntityId::ROOT.child("b");
        assert_ne!(a.child("log"), b.child("log"));
    }

    #[test]
    fn test_request_none() {
        assert!(RequestId::NONE.is_none());
        assert!(!RequestId::new(7).is_none());
    }

    proptest! {
        #[test]
        fn identifier_is_deterministic(parent in any::<u64>(), name in ".{0,32}") {
            let first = identifier_of(EntityId(parent), &name);
            let second = identifier_of(EntityId(parent), &name);
            prop_assert_eq!(first, second);
            prop_assert_ne!(first, EntityId::ROOT);
        }

        #[test]
        fn distinct_names_rarely_collide(parent in any::<u64>(), a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
            prop_assume!(a != b);
            prop_assert_ne!(identifier_of(EntityId(parent), &a), identifier_of(EntityId(parent), &b));
        }
    }
}
