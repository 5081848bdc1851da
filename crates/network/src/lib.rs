//! # Replica Networking Layer
//!
//! Tokio-driven transport and the authoritative replication engine.
//!
//! ## Modules
//!
//! - [`config`] - Network configuration
//! - [`transport`] - Framed, transactional TCP transport
//! - [`connection`] - Connection state and the authority's per-client record
//! - [`server`] - Dedicated authority server
//! - [`client`] - Connection to a dedicated server
//! - [`handlers`] - Interpretation of received messages
//! - [`replication`] - Frame capture, culling and application
//! - [`rpc`] - RPC routing rules
//! - [`network`] - Public entry point

pub mod authority;
pub mod client;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod network;
pub mod replication;
pub mod rpc;
pub mod server;
pub mod transport;

#[cfg(test)]
mod scenarios;

// Re-export commonly used items
pub use client::ClientConnection;
pub use config::{ExecutionMode, NetworkConfig, Verbosity};
pub use connection::{ConnectionState, ServerConnection};
pub use network::Network;
pub use server::{DedicatedServer, ServerStats};
pub use transport::{Transport, TransportOptions};
