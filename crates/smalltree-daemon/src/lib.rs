//! SmallTree Daemon: Serves AI generation requests over a Unix socket.

pub mod cache;
pub mod config;
pub mod handler;
pub mod server;
