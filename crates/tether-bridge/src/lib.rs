//! tether Bridge - flat key/value compatibility layer
//!
//! Legacy consumers poll a flat string map instead of speaking the reactive
//! protocol. [`FlatMap`] is that map; [`DataBridge`] keeps selected entities
//! of the model and keys of the map in step, in both directions, without
//! echoing its own writes back.

pub mod bridge;
pub mod flat_map;
pub mod value;

pub use bridge::*;
pub use flat_map::*;
pub use value::*;
