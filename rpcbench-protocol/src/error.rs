//! Protocol error types and JSON-RPC error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest excerpt of offending bytes kept in a [`ProtocolError::MalformedFrame`].
pub const EXCERPT_LIMIT: usize = 256;

/// Protocol-level errors that can occur during framing, envelope or payload handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {reason} (raw: {excerpt:?})")]
    MalformedFrame { reason: String, excerpt: String },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid HTTP head: {0}")]
    InvalidHeader(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in HTTP head")]
    InvalidUtf8,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid NPY array: {0}")]
    InvalidArray(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl ProtocolError {
    /// Builds a [`ProtocolError::MalformedFrame`] carrying a lossy excerpt of `raw`.
    pub fn malformed(reason: impl Into<String>, raw: &[u8]) -> Self {
        let end = raw.len().min(EXCERPT_LIMIT);
        let mut excerpt = String::from_utf8_lossy(&raw[..end]).into_owned();
        if raw.len() > EXCERPT_LIMIT {
            excerpt.push_str("...");
        }
        ProtocolError::MalformedFrame {
            reason: reason.into(),
            excerpt,
        }
    }

    /// Returns whether the received bytes could not be parsed under the active framing.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedFrame { .. }
                | ProtocolError::InvalidHeader(_)
                | ProtocolError::InvalidUtf8
                | ProtocolError::Json(_)
        )
    }
}

/// JSON-RPC error codes.
///
/// The reserved range is `-32768..=-32000`; codes outside the predefined set
/// are kept verbatim in [`ErrorCode::Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    OutOfMemory,
    Server(i64),
}

impl ErrorCode {
    /// Returns the numeric code as sent on the wire.
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::OutOfMemory => -32000,
            ErrorCode::Server(code) => *code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32000 => ErrorCode::OutOfMemory,
            other => ErrorCode::Server(other),
        }
    }

    /// JSON-RPC errors are terminal for the call that produced them.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode::from_code(code)
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::ParseError => write!(f, "-32700 PARSE_ERROR"),
            ErrorCode::InvalidRequest => write!(f, "-32600 INVALID_REQUEST"),
            ErrorCode::MethodNotFound => write!(f, "-32601 METHOD_NOT_FOUND"),
            ErrorCode::InvalidParams => write!(f, "-32602 INVALID_PARAMS"),
            ErrorCode::InternalError => write!(f, "-32603 INTERNAL_ERROR"),
            ErrorCode::OutOfMemory => write!(f, "-32000 OUT_OF_MEMORY"),
            ErrorCode::Server(code) => write!(f, "{} SERVER_ERROR", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() {
        for code in [-32700, -32600, -32601, -32602, -32603, -32000, -32099, 42] {
            assert_eq!(ErrorCode::from_code(code).code(), code);
        }
        assert_eq!(ErrorCode::from_code(-32601), ErrorCode::MethodNotFound);
        assert_eq!(ErrorCode::from_code(7), ErrorCode::Server(7));
    }

    #[test]
    fn test_error_code_never_retryable() {
        assert!(!ErrorCode::MethodNotFound.is_retryable());
        assert!(!ErrorCode::InvalidParams.is_retryable());
        assert!(!ErrorCode::InternalError.is_retryable());
        assert!(!ErrorCode::Server(-32050).is_retryable());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(
            format!("{}", ErrorCode::MethodNotFound),
            "-32601 METHOD_NOT_FOUND"
        );
        assert_eq!(format!("{}", ErrorCode::InvalidParams), "-32602 INVALID_PARAMS");
        assert_eq!(format!("{}", ErrorCode::Server(-32001)), "-32001 SERVER_ERROR");
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::InvalidParams).unwrap();
        assert_eq!(json, "-32602");

        let parsed: ErrorCode = serde_json::from_str("-32601").unwrap();
        assert_eq!(parsed, ErrorCode::MethodNotFound);
    }

    #[test]
    fn test_malformed_excerpt_is_truncated() {
        let raw = vec![b'x'; EXCERPT_LIMIT * 2];
        match ProtocolError::malformed("bad json", &raw) {
            ProtocolError::MalformedFrame { reason, excerpt } => {
                assert_eq!(reason, "bad json");
                assert_eq!(excerpt.len(), EXCERPT_LIMIT + 3);
                assert!(excerpt.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::malformed("truncated", b"{\"id\":");
        let msg = err.to_string();
        assert!(msg.contains("truncated"));
        assert!(msg.contains("id"));
        assert!(err.is_malformed());

        let err = ProtocolError::MissingField("jsonrpc");
        assert!(err.to_string().contains("jsonrpc"));
        assert!(!err.is_malformed());

        let err = ProtocolError::InvalidUtf8;
        assert!(err.to_string().contains("UTF-8"));
    }
}
