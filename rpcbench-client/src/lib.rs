//! # rpcbench-client
//!
//! Blocking JSON-RPC client used by the rpcbench driver.
//!
//! This crate provides:
//! - A single-owner TCP connection that detects peer-close and reconnects lazily
//! - Raw and HTTP/1.1 framing with bounded reads
//! - Calls, notifications and batches with id and envelope validation
//! - Base64 substitution of byte, array and image parameters
//! - Optional TLS (HTTP framing only)

pub mod client;
pub mod connection;
pub mod error;
pub mod stream;
pub mod tls;

pub use client::{Args, BatchCall, Client, Reply};
pub use connection::{Connection, ConnectionConfig, ConnectionState, TlsClientConfig};
pub use error::ClientError;
