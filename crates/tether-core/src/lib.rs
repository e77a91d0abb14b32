//! tether core - fundamental types shared by both peers
//!
//! This crate defines the pieces every other layer agrees on:
//! - Entity and request identifiers, and the structural identity allocator
//! - The error taxonomy surfaced at every boundary
//! - The typed value codec used for entity payloads

pub mod error;
pub mod id;
pub mod value;

pub use error::*;
pub use id::*;
pub use value::*;
