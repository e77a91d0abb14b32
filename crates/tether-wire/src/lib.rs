//! tether wire protocol - binary frame format
//!
//! One frame carries exactly one entity operation:
//! - Fixed header (18 bytes): version, operation kind, entity id, request id
//! - Payload encoded by the entity's typed codec
//!
//! On a byte stream every frame is preceded by a u32 length prefix.

pub mod frame;
pub mod header;
pub mod op;
pub mod stream;

pub use frame::*;
pub use header::*;
pub use op::*;
pub use stream::*;
