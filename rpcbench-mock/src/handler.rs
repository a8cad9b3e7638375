//! Request dispatch.

use crate::store::KvStore;
use rpcbench_protocol::{ErrorCode, ErrorObject, Id, ProtocolError, Response, JSONRPC_VERSION};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Longest accepted `sleep`.
const MAX_SLEEP_MS: u64 = 10_000;

type MethodResult = Result<Value, ErrorObject>;

/// Turns request bodies into response bodies.
pub struct Handler {
    store: Arc<dyn KvStore>,
}

impl Handler {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Handles one request body. `None` means nothing is sent back.
    pub async fn handle_body(&self, body: Result<Value, ProtocolError>) -> Option<Value> {
        let value = match body {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Unparseable request: {}", e);
                return Some(error_response(
                    None,
                    ErrorCode::ParseError,
                    "Failed to parse the request.",
                ));
            }
        };

        match value {
            Value::Array(entries) if entries.is_empty() => Some(error_response(
                None,
                ErrorCode::InvalidRequest,
                "Empty batch.",
            )),
            Value::Array(entries) => {
                let mut replies = Vec::with_capacity(entries.len());
                for entry in entries {
                    if let Some(reply) = self.handle_entry(entry).await {
                        replies.push(reply);
                    }
                }
                if replies.is_empty() {
                    None
                } else {
                    Some(Value::Array(replies))
                }
            }
            entry => self.handle_entry(entry).await,
        }
    }

    async fn handle_entry(&self, entry: Value) -> Option<Value> {
        let Value::Object(object) = entry else {
            return Some(error_response(
                None,
                ErrorCode::InvalidRequest,
                "Request must be an object.",
            ));
        };

        let method = object.get("method").and_then(Value::as_str);
        let raw_id = object.get("id");

        // Notifications are executed but never answered.
        if raw_id.is_none() {
            if let Some(method) = method {
                if object.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION) {
                    let params = object.get("params").cloned().unwrap_or(Value::Null);
                    let _ = self.dispatch(method, params).await;
                }
                return None;
            }
        }

        let id = match raw_id {
            None | Some(Value::Null) => None,
            Some(id) => match serde_json::from_value::<Id>(id.clone()) {
                Ok(id) => Some(id),
                Err(_) => {
                    return Some(error_response(
                        None,
                        ErrorCode::InvalidRequest,
                        "Invalid id.",
                    ))
                }
            },
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Some(error_response(
                id,
                ErrorCode::InvalidRequest,
                "Only JSON-RPC 2.0 is supported.",
            ));
        }
        let Some(method) = method else {
            return Some(error_response(
                id,
                ErrorCode::InvalidRequest,
                "Missing method name.",
            ));
        };

        let params = object.get("params").cloned().unwrap_or(Value::Null);
        let result = match params {
            Value::Null | Value::Object(_) | Value::Array(_) => self.dispatch(method, params).await,
            _ => Err(ErrorObject::new(
                ErrorCode::InvalidParams,
                "Params must be an object or an array.",
            )),
        };

        let response = match result {
            Ok(value) => Response::ok(id, value),
            Err(error) => Response::error(id, error),
        };
        serde_json::to_value(response).ok()
    }

    async fn dispatch(&self, method: &str, params: Value) -> MethodResult {
        let params = Params::new(params);
        match method {
            "sum" => sum(&params),
            "echo" => params.get("x", 0).cloned(),
            "validate_session" => {
                let user_id = params.int("user_id", 0)?;
                let session_id = params.int("session_id", 1)?;
                Ok(Value::Bool((user_id ^ session_id).rem_euclid(23) == 0))
            }
            "sleep" => {
                let ms = params.int("ms", 0)?;
                let ms = u64::try_from(ms)
                    .ok()
                    .filter(|ms| *ms <= MAX_SLEEP_MS)
                    .ok_or_else(|| invalid_params("ms out of range"))?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Value::Bool(true))
            }
            "set" => {
                let key = params.string("key", 0)?;
                let value = params.get("value", 1)?.clone();
                Ok(self.store.set(&key, value).unwrap_or(Value::Null))
            }
            "get" => {
                let key = params.string("key", 0)?;
                Ok(self.store.get(&key).unwrap_or(Value::Null))
            }
            "del" => {
                let key = params.string("key", 0)?;
                Ok(Value::Bool(self.store.del(&key)))
            }
            _ => Err(ErrorObject::new(
                ErrorCode::MethodNotFound,
                "Method not found.",
            )),
        }
    }
}

fn sum(params: &Params) -> MethodResult {
    let a = params.get("a", 0)?;
    let b = params.get("b", 1)?;
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a
            .checked_add(b)
            .map(Value::from)
            .ok_or_else(|| invalid_params("sum overflows")),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Ok(json!(a + b)),
            _ => Err(invalid_params("a and b must be numbers")),
        },
    }
}

/// Named or positional parameters.
struct Params {
    named: Map<String, Value>,
    positional: Vec<Value>,
}

impl Params {
    fn new(params: Value) -> Self {
        match params {
            Value::Object(named) => Self {
                named,
                positional: Vec::new(),
            },
            Value::Array(positional) => Self {
                named: Map::new(),
                positional,
            },
            _ => Self {
                named: Map::new(),
                positional: Vec::new(),
            },
        }
    }

    fn get(&self, name: &str, index: usize) -> Result<&Value, ErrorObject> {
        self.named
            .get(name)
            .or_else(|| self.positional.get(index))
            .ok_or_else(|| invalid_params(format!("missing parameter {}", name)))
    }

    fn int(&self, name: &str, index: usize) -> Result<i64, ErrorObject> {
        self.get(name, index)?
            .as_i64()
            .ok_or_else(|| invalid_params(format!("{} must be an integer", name)))
    }

    fn string(&self, name: &str, index: usize) -> Result<String, ErrorObject> {
        self.get(name, index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| invalid_params(format!("{} must be a string", name)))
    }
}

fn invalid_params(message: impl Into<String>) -> ErrorObject {
    ErrorObject::new(ErrorCode::InvalidParams, message)
}

fn error_response(id: Option<Id>, code: ErrorCode, message: &str) -> Value {
    let response = Response::error(id, ErrorObject::new(code, message));
    serde_json::to_value(response).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn handler() -> Handler {
        Handler::new(Arc::new(MemoryStore::new()))
    }

    async fn handle(handler: &Handler, body: Value) -> Option<Value> {
        handler.handle_body(Ok(body)).await
    }

    #[tokio::test]
    async fn test_sum_named_and_positional() {
        let handler = handler();
        let reply = handle(
            &handler,
            json!({"jsonrpc": "2.0", "method": "sum", "params": {"a": 2, "b": 2}, "id": 100}),
        )
        .await
        .unwrap();
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 100, "result": 4}));

        let reply = handle(
            &handler,
            json!({"jsonrpc": "2.0", "method": "sum", "params": [1.5, 2], "id": 1}),
        )
        .await
        .unwrap();
        assert_eq!(reply["result"], json!(3.5));
    }

    #[tokio::test]
    async fn test_notification_is_silent() {
        let handler = handler();
        let reply = handle(
            &handler,
            json!({"jsonrpc": "2.0", "method": "set", "params": {"key": "k", "value": 1}}),
        )
        .await;
        assert!(reply.is_none());

        // Side effects still apply
        let reply = handle(
            &handler,
            json!({"jsonrpc": "2.0", "method": "get", "params": ["k"], "id": 2}),
        )
        .await
        .unwrap();
        assert_eq!(reply["result"], json!(1));
    }

    #[tokio::test]
    async fn test_error_codes() {
        let handler = handler();

        let reply = handler
            .handle_body(Err(ProtocolError::malformed("bad", b"{")))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], json!(-32700));
        assert_eq!(reply["id"], Value::Null);

        let reply = handle(&handler, json!({"jsonrpc": "2.0", "method": "sumsum", "id": 0}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], json!(-32601));
        assert_eq!(reply["id"], json!(0));

        let reply = handle(
            &handler,
            json!({"jsonrpc": "2.0", "method": "sum", "params": {"a": 2}, "id": 0}),
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], json!(-32602));

        let reply = handle(
            &handler,
            json!({"jsonrpc": "1.0", "method": "sum", "params": [1, 2], "id": 3}),
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], json!(-32600));

        let reply = handle(&handler, json!({"id": 3})).await.unwrap();
        assert_eq!(reply["error"]["code"], json!(-32600));
        assert_eq!(reply["id"], json!(3));

        let reply = handle(&handler, json!([])).await.unwrap();
        assert_eq!(reply["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn test_batch_skips_notifications() {
        let handler = handler();
        let reply = handle(
            &handler,
            json!([
                {"jsonrpc": "2.0", "method": "sum", "params": [1, 2], "id": 1},
                {"jsonrpc": "2.0", "method": "sum", "params": [1, 2]},
                {"jsonrpc": "2.0", "method": "echo", "params": {"x": "y"}, "id": 2},
            ]),
        )
        .await
        .unwrap();
        let items = reply.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["result"], json!(3));
        assert_eq!(items[1]["result"], json!("y"));

        let reply = handle(
            &handler,
            json!([{"jsonrpc": "2.0", "method": "sum", "params": [1, 2]}]),
        )
        .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_validate_session() {
        let handler = handler();
        let reply = handle(
            &handler,
            json!({"jsonrpc": "2.0", "method": "validate_session", "params": {"user_id": 23, "session_id": 0}, "id": 1}),
        )
        .await
        .unwrap();
        assert_eq!(reply["result"], json!(true));

        let reply = handle(
            &handler,
            json!({"jsonrpc": "2.0", "method": "validate_session", "params": [1, 2], "id": 1}),
        )
        .await
        .unwrap();
        assert_eq!(reply["result"], json!(false));
    }

    #[tokio::test]
    async fn test_store_methods() {
        let handler = handler();
        let call = |method: &str, params: Value| {
            json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1})
        };

        let reply = handle(&handler, call("set", json!({"key": "a", "value": [1, 2]})))
            .await
            .unwrap();
        assert_eq!(reply["result"], Value::Null);
        let reply = handle(&handler, call("get", json!({"key": "a"}))).await.unwrap();
        assert_eq!(reply["result"], json!([1, 2]));
        let reply = handle(&handler, call("del", json!(["a"]))).await.unwrap();
        assert_eq!(reply["result"], json!(true));
        let reply = handle(&handler, call("get", json!(["a"]))).await.unwrap();
        assert_eq!(reply["result"], Value::Null);
    }
}
