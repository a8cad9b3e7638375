//! JSON-RPC 2.0 envelope types.

use crate::error::{ErrorCode, ProtocolError};
use crate::JSONRPC_VERSION;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Request identifier.
///
/// Numbers are what rpcbench generates; strings are accepted from peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl From<i64> for Id {
    fn from(id: i64) -> Self {
        Id::Number(id)
    }
}

impl From<u32> for Id {
    fn from(id: u32) -> Self {
        Id::Number(id as i64)
    }
}

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Id::String(id.to_string())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// Request envelope. A call without `id` is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Protocol version, "2.0" for everything rpcbench sends.
    pub jsonrpc: String,

    /// Remote method name.
    pub method: String,

    /// Positional (array) or named (object) parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Correlation id, absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

impl Call {
    pub fn new(method: impl Into<String>, id: impl Into<Id>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
            id: Some(id.into()),
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
            id: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: ErrorCode,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Response envelope.
///
/// `jsonrpc` is kept as a raw value because peers are only required to send a
/// truthy version, and validation happens in the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<Value>,

    #[serde(default)]
    pub id: Option<Id>,

    /// `Some(Value::Null)` when the peer sent `"result": null`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Response {
    pub fn ok(id: Option<Id>, result: Value) -> Self {
        Self {
            jsonrpc: Some(Value::String(JSONRPC_VERSION.to_string())),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Id>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: Some(Value::String(JSONRPC_VERSION.to_string())),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns whether the version field is present and truthy.
    pub fn has_version(&self) -> bool {
        self.jsonrpc.as_ref().is_some_and(is_truthy)
    }

    /// Splits the envelope into its outcome. A missing result is `null`.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON truthiness: `null`, `false`, zero, and empty strings/arrays/objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Empty body, the acknowledgment of a notification (or an all-notification batch).
    Empty,
    Single(Response),
    Batch(Vec<Response>),
}

impl Incoming {
    /// Parses a frame body that has already been stripped of its framing.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let trimmed = body.trim_ascii();
        match trimmed.first() {
            None => Ok(Incoming::Empty),
            Some(b'{') => serde_json::from_slice(trimmed)
                .map(Incoming::Single)
                .map_err(|e| ProtocolError::malformed(format!("invalid response: {}", e), body)),
            Some(b'[') => serde_json::from_slice(trimmed)
                .map(Incoming::Batch)
                .map_err(|e| {
                    ProtocolError::malformed(format!("invalid batch response: {}", e), body)
                }),
            Some(_) => Err(ProtocolError::malformed(
                "response is neither an object nor an array",
                body,
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Incoming::Empty)
    }

    /// Number of response envelopes carried.
    pub fn len(&self) -> usize {
        match self {
            Incoming::Empty => 0,
            Incoming::Single(_) => 1,
            Incoming::Batch(items) => items.len(),
        }
    }
}
