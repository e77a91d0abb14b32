//! tether Model - reactive primitives shared across the session boundary
//!
//! This crate implements the typed object graph application code binds to:
//! - [`Property`]: last-write-wins value with change notification
//! - [`Signal`]: fire-and-forget events
//! - [`Call`]: request/response with per-request timeouts
//! - [`Model`]: named composition of entities and nested models
//!
//! Entities are usable before any session exists and are rebound to each new
//! session in turn; the session itself lives in `tether-runtime`.

pub mod call;
pub mod entity;
pub mod property;
pub mod signal;
pub mod subscribers;
pub mod tree;

pub use call::*;
pub use entity::*;
pub use property::*;
pub use signal::*;
pub use subscribers::*;
pub use tree::*;
