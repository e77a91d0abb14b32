//! Operation tags carried by every frame

use std::fmt;

use tether_core::RequestId;

/// Wire byte for each operation kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationKind {
    PropertySet = 0x01,
    SignalFire = 0x02,
    CallRequest = 0x03,
    CallResponse = 0x04,
}

impl OperationKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(OperationKind::PropertySet),
            0x02 => Some(OperationKind::SignalFire),
            0x03 => Some(OperationKind::CallRequest),
            0x04 => Some(OperationKind::CallResponse),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            OperationKind::PropertySet => "property-set",
            OperationKind::SignalFire => "signal-fire",
            OperationKind::CallRequest => "call-request",
            OperationKind::CallResponse => "call-response",
        }
    }
}

/// One entity operation
///
/// Call operations carry the request id used for correlation; the other
/// kinds have none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    PropertySet,
    SignalFire,
    CallRequest(RequestId),
    CallResponse(RequestId),
}

impl Operation {
    pub fn kind(self) -> OperationKind {
        match self {
            Operation::PropertySet => OperationKind::PropertySet,
            Operation::SignalFire => OperationKind::SignalFire,
            Operation::CallRequest(_) => OperationKind::CallRequest,
            Operation::CallResponse(_) => OperationKind::CallResponse,
        }
    }

    pub fn request_id(self) -> RequestId {
        match self {
            Operation::CallRequest(id) | Operation::CallResponse(id) => id,
            Operation::PropertySet | Operation::SignalFire => RequestId::NONE,
        }
    }

    /// Rebuild an operation from its wire kind and request id field.
    pub fn from_parts(kind: OperationKind, request: RequestId) -> Self {
        match kind {
            OperationKind::PropertySet => Operation::PropertySet,
            OperationKind::SignalFire => Operation::SignalFire,
            OperationKind::CallRequest => Operation::CallRequest(request),
            OperationKind::CallResponse => Operation::CallResponse(request),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CallRequest(id) | Operation::CallResponse(id) => {
                write!(f, "{}#{}", self.kind().name(), id)
            }
            _ => f.write_str(self.kind().name()),
        }
    }
}

/// Strategy over every operation shape, for property tests in this crate
#[cfg(test)]
pub(crate) fn any_operation() -> impl proptest::strategy::Strategy<Value = Operation> {
    use proptest::prelude::*;
    prop_oneof![
        Just(Operation::PropertySet),
        Just(Operation::SignalFire),
        (1u64..).prop_map(|id| Operation::CallRequest(RequestId(id))),
        (1u64..).prop_map(|id| Operation::CallResponse(RequestId(id))),
    ]
}
