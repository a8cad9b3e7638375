//! High-level client API.

use crate::connection::{Connection, ConnectionConfig, ConnectionState};
use crate::error::ClientError;
use rand::Rng;
use rpcbench_protocol::payload::{self, pack_named, pack_positional};
use rpcbench_protocol::{
    Call, Encoder, FrameEncoder, Framing, Id, ImagePayload, Incoming, NdArray, Param, Payload,
    Response,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Largest randomly generated request id.
pub const MAX_RANDOM_ID: i64 = 1 << 16;

/// Call parameters. Positional and named parameters cannot be mixed.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Args {
    /// Sent as an empty object.
    #[default]
    None,
    Positional(Vec<Param>),
    Named(Vec<(String, Param)>),
}

impl Args {
    pub fn positional<I, P>(params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Param>,
    {
        Args::Positional(params.into_iter().map(Into::into).collect())
    }

    pub fn named<I, K, P>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<Param>,
    {
        Args::Named(
            params
                .into_iter()
                .map(|(name, param)| (name.into(), param.into()))
                .collect(),
        )
    }

    /// Combines separately collected parameters, rejecting a mix of both kinds.
    pub fn from_parts(
        positional: Vec<Param>,
        named: Vec<(String, Param)>,
    ) -> Result<Self, ClientError> {
        match (positional.is_empty(), named.is_empty()) {
            (true, true) => Ok(Args::None),
            (false, true) => Ok(Args::Positional(positional)),
            (true, false) => Ok(Args::Named(named)),
            (false, false) => Err(ClientError::InvalidArguments(
                "can't mix positional and keyword parameters".to_string(),
            )),
        }
    }

    /// Substitutes binary parameters and builds the `params` value.
    pub fn pack(self) -> Result<Value, ClientError> {
        match self {
            Args::None => Ok(Value::Object(Map::new())),
            Args::Positional(params) => Ok(pack_positional(params)?),
            Args::Named(params) => Ok(pack_named(params)?),
        }
    }
}

/// Successful result of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    id: Option<Id>,
    jsonrpc: Option<Value>,
    result: Value,
}

impl Reply {
    fn from_response(response: Response) -> Self {
        Self {
            id: response.id,
            jsonrpc: response.jsonrpc,
            result: response.result.unwrap_or(Value::Null),
        }
    }

    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    /// The result exactly as received.
    pub fn value(&self) -> &Value {
        &self.result
    }

    pub fn into_value(self) -> Value {
        self.result
    }

    /// Deserializes the result.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_value(self.result.clone())?)
    }

    /// Decodes a base64 result.
    pub fn bytes(&self) -> Result<Vec<u8>, ClientError> {
        Ok(payload::decode_bytes(&self.result)?)
    }

    /// Decodes a base64 NPY result.
    pub fn array(&self) -> Result<NdArray, ClientError> {
        Ok(payload::decode_array(&self.result)?)
    }

    /// Decodes a base64 image result.
    pub fn image(&self) -> Result<ImagePayload, ClientError> {
        Ok(payload::decode_image(&self.result)?)
    }

    /// Best-effort identification of the result, see [`Payload::sniff`].
    pub fn payload(&self) -> Payload {
        Payload::sniff(&self.result)
    }

    pub fn into_response(self) -> Response {
        Response {
            jsonrpc: self.jsonrpc,
            id: self.id,
            result: Some(self.result),
            error: None,
        }
    }
}

/// Ordered batch of calls sent as one JSON array.
///
/// Entries may be notifications or deliberately invalid envelopes. Replies are
/// correlated by position with the entries that expect one.
#[derive(Debug, Clone, Default)]
pub struct BatchCall {
    entries: Vec<Value>,
    expected: Vec<Option<Id>>,
}

impl BatchCall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call; calls without an id are notifications.
    pub fn push(&mut self, call: Call) -> Result<&mut Self, ClientError> {
        let value = serde_json::to_value(&call)?;
        Ok(self.push_raw(value))
    }

    /// Appends an arbitrary entry.
    pub fn push_raw(&mut self, entry: Value) -> &mut Self {
        if expects_reply(&entry) {
            let id = entry
                .get("id")
                .and_then(|id| serde_json::from_value(id.clone()).ok());
            self.expected.push(id);
        }
        self.entries.push(entry);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries the server answers.
    pub fn expected_replies(&self) -> usize {
        self.expected.len()
    }

    pub fn entries(&self) -> &[Value] {
        &self.entries
    }
}

/// Valid notifications are the only entries a server leaves unanswered.
pub fn expects_reply(entry: &Value) -> bool {
    match entry.as_object() {
        Some(object) => {
            object.contains_key("id") || !object.get("method").is_some_and(Value::is_string)
        }
        None => true,
    }
}

/// Blocking JSON-RPC client owning one connection.
pub struct Client {
    conn: Connection,
    encoder: Encoder,
    identity: Option<i64>,
}

impl Client {
    /// Creates a new client; the connection opens on the first call.
    pub fn new(config: ConnectionConfig) -> Self {
        let encoder = Encoder::new(FrameEncoder::new(config.framing, config.addr()));
        Self {
            conn: Connection::new(config),
            encoder,
            identity: None,
        }
    }

    /// Uses a fixed request id instead of random ones.
    pub fn with_identity(mut self, identity: i64) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.conn.config()
    }

    pub fn framing(&self) -> Framing {
        self.encoder.framing()
    }

    /// Connects eagerly, replacing any existing socket.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        self.conn.connect()
    }

    pub fn state(&mut self) -> Result<ConnectionState, ClientError> {
        self.conn.state()
    }

    /// Returns whether the connection is open and the peer has not closed it.
    pub fn is_connected(&mut self) -> bool {
        matches!(self.conn.state(), Ok(ConnectionState::Open))
    }

    /// Closes the connection.
    pub fn close(&mut self) {
        self.conn.close();
    }

    /// Id for the next call: the configured identity, else random in `[1, 2^16]`.
    pub fn next_id(&self) -> Id {
        match self.identity {
            Some(identity) => Id::Number(identity),
            None => Id::Number(rand::thread_rng().gen_range(1..=MAX_RANDOM_ID)),
        }
    }

    /// Calls `method` and validates the response.
    pub fn invoke(&mut self, method: &str, args: Args) -> Result<Reply, ClientError> {
        let call = Call::new(method, self.next_id()).with_params(args.pack()?);
        self.call(&call)
    }

    /// Sends a prepared call and validates the response against its id.
    pub fn call(&mut self, call: &Call) -> Result<Reply, ClientError> {
        let Some(expected) = call.id.as_ref() else {
            return Err(ClientError::InvalidArguments(
                "call has no id; use notify for notifications".to_string(),
            ));
        };
        tracing::debug!("Calling {} id={}", call.method, expected);

        let frame = self.encoder.encode_call(call)?;
        match self.exchange(&frame)? {
            None => Err(self.abandon()),
            Some(Incoming::Single(response)) => check_response(response, Some(expected)),
            Some(Incoming::Empty) => Err(ClientError::Validation(format!(
                "empty response to call id={}",
                expected
            ))),
            Some(Incoming::Batch(items)) => Err(ClientError::Validation(format!(
                "expected one response, got a batch of {}",
                items.len()
            ))),
        }
    }

    /// Sends a notification. Success means the peer acknowledged with an empty body.
    pub fn notify(&mut self, method: &str, args: Args) -> Result<(), ClientError> {
        let call = Call::notification(method).with_params(args.pack()?);
        tracing::debug!("Notifying {}", call.method);

        let frame = self.encoder.encode_call(&call)?;
        match self.exchange(&frame)? {
            Some(Incoming::Empty) => Ok(()),
            // Raw framing has no empty body: silence within the read budget is the ack.
            None if self.framing() == Framing::Raw => Ok(()),
            None => Err(self.abandon()),
            Some(Incoming::Single(response)) => match response.error {
                Some(error) => Err(error.into()),
                None => Err(ClientError::Validation(
                    "notification received a response".to_string(),
                )),
            },
            Some(Incoming::Batch(_)) => Err(ClientError::Validation(
                "notification received a batch response".to_string(),
            )),
        }
    }

    /// Sends a batch and validates each reply independently.
    ///
    /// The outer `Err` covers transport failures and a reply array whose shape
    /// does not match the batch; per-entry failures are in the inner results.
    pub fn batch(
        &mut self,
        batch: &BatchCall,
    ) -> Result<Vec<Result<Reply, ClientError>>, ClientError> {
        if batch.is_empty() {
            return Err(ClientError::InvalidArguments("empty batch".to_string()));
        }
        tracing::debug!(
            "Sending batch of {} ({} replies expected)",
            batch.len(),
            batch.expected_replies()
        );

        let frame = self.encoder.encode_value(&Value::Array(batch.entries.clone()))?;
        let items = match self.exchange(&frame)? {
            Some(Incoming::Batch(items)) => items,
            Some(Incoming::Empty) | None if batch.expected_replies() == 0 => Vec::new(),
            None => return Err(self.abandon()),
            Some(Incoming::Empty) => {
                return Err(ClientError::Validation(
                    "empty response to a batch".to_string(),
                ))
            }
            Some(Incoming::Single(_)) => {
                return Err(ClientError::Validation(
                    "batch response is not an array".to_string(),
                ))
            }
        };

        if items.len() != batch.expected_replies() {
            return Err(ClientError::Validation(format!(
                "batch response has {} entries, expected {}",
                items.len(),
                batch.expected_replies()
            )));
        }

        Ok(items
            .into_iter()
            .zip(batch.expected.iter())
            .map(|(response, expected)| check_response(response, expected.as_ref()))
            .collect())
    }

    /// Sends any JSON body and returns whatever came back, unvalidated.
    pub fn call_raw(&mut self, body: &Value) -> Result<Option<Incoming>, ClientError> {
        let frame = self.encoder.encode_value(body)?;
        self.exchange(&frame)
    }

    fn exchange(&mut self, frame: &[u8]) -> Result<Option<Incoming>, ClientError> {
        if self.conn.ensure_open()? {
            tracing::debug!("Opened connection to {}", self.conn.config().addr());
        }
        self.conn.send(frame)?;
        self.conn.receive()
    }

    /// Drops the connection after a timed-out request. The late reply would
    /// otherwise be read as the answer to the next call.
    fn abandon(&mut self) -> ClientError {
        tracing::debug!("No response within the read budget, dropping connection");
        self.conn.close();
        ClientError::ResponseTimeout
    }
}

/// Validates one response envelope against the id it answers.
fn check_response(response: Response, expected: Option<&Id>) -> Result<Reply, ClientError> {
    if !response.has_version() {
        return Err(ClientError::Validation(
            "response has no protocol version".to_string(),
        ));
    }

    let id_matches = response.id.as_ref() == expected;
    if let Some(error) = response.error {
        // Errors for unparseable requests carry a null id.
        if response.id.is_some() && !id_matches {
            return Err(ClientError::Validation(format!(
                "error response id {:?} does not match request",
                response.id
            )));
        }
        return Err(error.into());
    }

    if !id_matches {
        return Err(ClientError::Validation(format!(
            "response id {} does not match request id {}",
            display_id(response.id.as_ref()),
            display_id(expected)
        )));
    }
    if response.result.is_none() {
        return Err(ClientError::Validation(
            "response has neither result nor error".to_string(),
        ));
    }
    Ok(Reply::from_response(response))
}

fn display_id(id: Option<&Id>) -> String {
    id.map_or_else(|| "null".to_string(), Id::to_string)
}
