//! Client error types.

use rpcbench_protocol::{ErrorCode, ErrorObject, ProtocolError};
use serde_json::Value;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not connected")]
    NotConnected,

    #[error("no response within the read budget")]
    ResponseTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("remote error: {code} - {message}")]
    Remote {
        code: ErrorCode,
        message: String,
        data: Option<Value>,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ClientError {
    /// Returns whether this error is retryable within the same call.
    ///
    /// Nothing is: connection failures reconnect on the next call instead.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns whether the response arrived but its contents were wrong.
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }

    /// Returns whether the connection could not be established or maintained.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Connect { .. }
                | ClientError::NotConnected
                | ClientError::TlsHandshake(_)
        )
    }

    /// Returns whether the received bytes could not be parsed.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ClientError::Protocol(e) if e.is_malformed())
    }

    /// Short name of the failure kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Io(_) | ClientError::Connect { .. } | ClientError::NotConnected => {
                "connection"
            }
            ClientError::ResponseTimeout => "timeout",
            ClientError::Protocol(e) if e.is_malformed() => "malformed",
            ClientError::Protocol(_) | ClientError::Json(_) => "protocol",
            ClientError::Remote { .. } => "remote",
            ClientError::Validation(_) => "validation",
            ClientError::InvalidArguments(_) => "arguments",
            ClientError::TlsConfig(_) | ClientError::TlsHandshake(_) => "tls",
        }
    }
}

impl From<ErrorObject> for ClientError {
    fn from(error: ErrorObject) -> Self {
        ClientError::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = ClientError::from(ErrorObject::new(
            ErrorCode::MethodNotFound,
            "Method not found.",
        ));
        assert_eq!(
            err.to_string(),
            "remote error: -32601 METHOD_NOT_FOUND - Method not found."
        );
        assert_eq!(err.kind(), "remote");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classification_helpers() {
        assert!(ClientError::Validation("wrong sum".into()).is_validation());
        assert!(!ClientError::ResponseTimeout.is_validation());
        assert!(ClientError::NotConnected.is_connection());

        let malformed = ClientError::from(ProtocolError::malformed("bad", b"xx"));
        assert!(malformed.is_malformed());
        assert_eq!(malformed.kind(), "malformed");

        let io = ClientError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(io.is_connection());
        assert!(!io.is_retryable());
    }
}
