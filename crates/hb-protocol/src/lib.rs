//! Wire types and line parser for the switch/load controller protocol.
//!
//! This crate is pure: no I/O, no async, so the framer and parser can be
//! exercised with plain unit tests. The async session and dispatcher that
//! drive this protocol over a real socket live in `hb-bridge`.

pub mod address;
pub mod command;
pub mod framer;
pub mod reply;

pub use address::{LoadAddr, SwitchAddr};
pub use framer::LineFramer;
pub use reply::{parse_line, ParseError, Reply};
