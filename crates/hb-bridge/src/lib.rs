//! Async engine for the switch/load controller bridge.
//!
//! [`bridge::Bridge`] is the entry point: it owns the single TCP session,
//! the read-coalescing caches, the awaiter registry, the priority send
//! queue, and the push-event pipeline. The `bridge` service binary wires
//! this crate to HTTP and to a loaded configuration file.

pub mod awaiter;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod push_pipeline;
pub mod queue;
pub mod session;
pub mod supervisor;
pub mod whitelist;

pub use bridge::{Bridge, BridgeStatus, ConnectionState};
pub use config::{Config, LineEnding, ServerTarget};
pub use dispatcher::{LoadReadResult, SwitchReadResult};
pub use error::{BridgeError, StatusCode};
