//! # rpcbench-mock
//!
//! Loopback JSON-RPC 2.0 peer used by rpcbench tests and benches.
//!
//! This crate provides:
//! - A tokio accept loop serving raw and HTTP framing on one port
//! - Batches, notifications and the standard error codes
//! - `sum`, `echo`, `validate_session`, `sleep` and a key-value store
//! - Fault injection: close after N responses, per-response delay
//!
//! The server owns its runtime, so blocking clients can drive it from plain
//! test threads.

pub mod error;
pub mod handler;
pub mod server;
pub mod store;

pub use error::MockError;
pub use handler::Handler;
pub use server::{MockConfig, MockServer, MockStats};
pub use store::{KvStore, MemoryStore};
