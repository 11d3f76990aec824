//! SSH session pooling, interactive terminals, SFTP file operations and
//! remote resource monitoring.
//!
//! The server crate wires these components to HTTP and WebSocket routes;
//! everything here is transport-agnostic behind the traits in
//! [`transport`] and [`channel`].

pub mod channel;
pub mod config;
pub mod connection;
pub mod errors;
pub mod files;
pub mod monitoring;
pub mod pool;
pub mod terminal;
pub mod transport;
