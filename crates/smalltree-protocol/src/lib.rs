//! SmallTree Protocol: Shared JSON-RPC 2.0 types and generation outcomes.
//!
//! This crate contains no I/O or async code. It defines the message types
//! exchanged between the hosting application, the CLI and the daemon.

mod error;
mod generation;
mod jsonrpc;

pub use error::*;
pub use generation::*;
pub use jsonrpc::*;
