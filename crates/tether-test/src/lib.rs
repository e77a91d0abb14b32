//! tether Test Harness - two-party protocol validation
//!
//! This crate provides:
//! - [`LinkedPair`]: two sessions joined by an in-memory transport
//! - [`RawPeer`]: a hand-driven peer for ordering and correlation checks
//! - End-to-end scenarios over TCP and a real discovery file

pub mod harness;

#[cfg(test)]
mod scenarios;

pub use harness::*;
