//! # rpcbench-protocol
//!
//! Wire protocol implementation for JSON-RPC 2.0 as spoken by rpcbench.
//!
//! This crate provides:
//! - Call/Response envelope types with batch and notification support
//! - Two framings: bare JSON on the stream, or HTTP/1.1 with `Content-Length`
//! - Incremental frame decoders that tolerate split and long reads
//! - The binary payload sub-envelope (bytes, NPY arrays, images as base64)
//! - Error codes and protocol constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod payload;

pub use codec::{Decoder, Encoder};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{FrameDecoder, FrameEncoder, Framing, HttpHead};
pub use message::{Call, ErrorObject, Id, Incoming, Response};
pub use payload::{ImagePayload, NdArray, Param, Payload};

/// JSON-RPC protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Default port of the RPC server.
pub const DEFAULT_PORT: u16 = 8545;

/// Maximum accepted frame body size (64 MiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;
