//! Mock server error types.

use thiserror::Error;

/// Mock server errors.
#[derive(Debug, Error)]
pub enum MockError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] rpcbench_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server shutting down")]
    ShuttingDown,
}
