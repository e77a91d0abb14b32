//! tether Runtime - sessions, reconnection and the two process roles
//!
//! This crate ties the lower layers into a running link:
//! - [`Dispatcher`]: the single serialization point for model mutations
//! - [`Session`]: routes frames between one transport and the bound entities
//! - [`LifetimeManager`]: keeps at most one session alive, reconnecting on
//!   every discovery event
//! - [`DiscoveryWatcher`]: turns discovery file changes into events
//! - [`ToolController`] and [`EditorEndpoint`]: the two ends of the shared
//!   [`EditorModel`]

pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod editor;
pub mod editor_endpoint;
pub mod lifetime;
pub mod session;
pub mod telemetry;
pub mod tool;

pub use config::*;
pub use discovery::*;
pub use dispatcher::*;
pub use editor::*;
pub use editor_endpoint::*;
pub use lifetime::*;
pub use session::*;
pub use telemetry::*;
pub use tool::*;
