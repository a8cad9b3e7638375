//! Encoder and decoder for JSON-RPC calls and responses.

use crate::error::ProtocolError;
use crate::frame::{encode_response, FrameDecoder, FrameEncoder, Framing, HttpHead};
use crate::message::{Call, Incoming};
use bytes::{Bytes, BytesMut};
use serde_json::Value;

/// Initial capacity of decoder buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8192;

/// Encodes calls into frames of one framing.
#[derive(Debug, Clone)]
pub struct Encoder {
    frame: FrameEncoder,
}

impl Encoder {
    pub fn new(frame: FrameEncoder) -> Self {
        Self { frame }
    }

    pub fn framing(&self) -> Framing {
        self.frame.framing()
    }

    /// Encodes a single call.
    pub fn encode_call(&self, call: &Call) -> Result<BytesMut, ProtocolError> {
        self.frame.encode_json(call)
    }

    /// Encodes calls as one JSON array.
    pub fn encode_batch(&self, calls: &[Call]) -> Result<BytesMut, ProtocolError> {
        self.frame.encode_json(&calls)
    }

    /// Encodes an arbitrary JSON body, including deliberately invalid envelopes.
    pub fn encode_value(&self, value: &Value) -> Result<BytesMut, ProtocolError> {
        self.frame.encode_json(value)
    }

    /// Encodes a server-side reply. `None` produces an empty body.
    pub fn encode_reply(framing: Framing, reply: Option<&Value>) -> Result<BytesMut, ProtocolError> {
        let body = match reply {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };
        Ok(encode_response(framing, &body))
    }
}

/// Decodes frames into responses (client side) or raw request bodies (server side).
#[derive(Debug)]
pub struct Decoder {
    frames: FrameDecoder,
}

impl Decoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            frames: FrameDecoder::new(framing),
        }
    }

    pub fn framing(&self) -> Framing {
        self.frames.framing()
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.frames.extend(data);
    }

    /// Attempts to decode the next frame body.
    pub fn decode_body(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        self.frames.decode()
    }

    /// Attempts to decode the next response or batch of responses.
    pub fn decode_incoming(&mut self) -> Result<Option<Incoming>, ProtocolError> {
        match self.frames.decode()? {
            Some(body) => {
                self.check_status(&body)?;
                Incoming::parse(&body).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Attempts to decode the next request body as loose JSON.
    ///
    /// Bodies that are not JSON come back as `Err`, so the caller can answer
    /// with a parse error and keep the connection.
    pub fn decode_request(&mut self) -> Result<Option<Result<Value, ProtocolError>>, ProtocolError> {
        match self.frames.decode() {
            Ok(Some(body)) => Ok(Some(serde_json::from_slice(&body).map_err(|e| {
                ProtocolError::malformed(format!("invalid request: {}", e), &body)
            }))),
            Ok(None) => Ok(None),
            Err(e @ ProtocolError::MalformedFrame { .. }) if self.framing() == Framing::Raw => {
                self.clear();
                Ok(Some(Err(e)))
            }
            Err(e) => Err(e),
        }
    }

    /// Flushes the buffer once the read budget is spent.
    ///
    /// `Ok(None)` means no bytes arrived at all.
    pub fn finish(&mut self) -> Result<Option<Incoming>, ProtocolError> {
        match self.frames.finish()? {
            Some(body) => {
                self.check_status(&body)?;
                Incoming::parse(&body).map(Some)
            }
            None => Ok(None),
        }
    }

    /// HTTP head of the last decoded frame.
    pub fn head(&self) -> Option<&HttpHead> {
        self.frames.head()
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.frames.buffered()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    // Non-2xx HTTP statuses with a non-JSON body are reported with the status.
    fn check_status(&self, body: &[u8]) -> Result<(), ProtocolError> {
        if let Some(head) = self.frames.head() {
            let trimmed = body.trim_ascii_start();
            let is_json = matches!(trimmed.first(), None | Some(b'{') | Some(b'['));
            if !head.is_success() && !is_json {
                return Err(ProtocolError::malformed(
                    format!("HTTP status {}", head.status.unwrap_or_default()),
                    body,
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Id, Response};
    use serde_json::json;

    fn sum_call() -> Call {
        Call::new("sum", 100i64).with_params(json!({"a": 2, "b": 2}))
    }

    #[test]
    fn test_call_roundtrip_both_framings() {
        for (encoder, framing) in [
            (FrameEncoder::raw(), Framing::Raw),
            (FrameEncoder::http("127.0.0.1:8545"), Framing::Http),
        ] {
            let encoded = Encoder::new(encoder).encode_call(&sum_call()).unwrap();

            let mut decoder = Decoder::new(framing);
            decoder.extend(&encoded);
            let value = decoder.decode_request().unwrap().unwrap().unwrap();
            let decoded: Call = serde_json::from_value(value).unwrap();
            assert_eq!(decoded, sum_call());
        }
    }

    #[test]
    fn test_batch_encoding_is_array() {
        let calls = vec![sum_call(), Call::notification("sum")];
        let encoded = Encoder::new(FrameEncoder::raw()).encode_batch(&calls).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_decode_http_response() {
        let reply = json!({"jsonrpc": "2.0", "id": 100, "result": 4});
        let encoded = Encoder::encode_reply(Framing::Http, Some(&reply)).unwrap();

        let mut decoder = Decoder::new(Framing::Http);
        decoder.extend(&encoded[..20]);
        assert!(decoder.decode_incoming().unwrap().is_none());
        decoder.extend(&encoded[20..]);

        match decoder.decode_incoming().unwrap().unwrap() {
            Incoming::Single(response) => {
                assert_eq!(response.id, Some(Id::Number(100)));
                assert_eq!(response.result, Some(json!(4)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_notification_ack_is_empty() {
        let encoded = Encoder::encode_reply(Framing::Http, None).unwrap();
        let mut decoder = Decoder::new(Framing::Http);
        decoder.extend(&encoded);
        assert_eq!(decoder.decode_incoming().unwrap(), Some(Incoming::Empty));

        let mut decoder = Decoder::new(Framing::Raw);
        assert_eq!(decoder.finish().unwrap(), None);
    }

    #[test]
    fn test_raw_finish_truncated() {
        let mut decoder = Decoder::new(Framing::Raw);
        decoder.extend(br#"{"jsonrpc":"2.0","id":1,"#);
        assert!(decoder.decode_incoming().unwrap().is_none());
        assert!(decoder.finish().unwrap_err().is_malformed());
    }

    #[test]
    fn test_http_error_status_with_text_body() {
        let mut decoder = Decoder::new(Framing::Http);
        decoder.extend(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\n\r\noops");
        let err = decoder.decode_incoming().unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_decode_request_garbage_keeps_decoder_usable() {
        let mut decoder = Decoder::new(Framing::Raw);
        decoder.extend(b"{oops}");
        assert!(decoder.decode_request().unwrap().unwrap().is_err());
        assert_eq!(decoder.buffered(), 0);

        decoder.extend(br#"{"jsonrpc":"2.0","method":"echo","id":1}"#);
        assert!(decoder.decode_request().unwrap().unwrap().is_ok());
    }

    #[test]
    fn test_http_request_with_invalid_json_body() {
        let encoded = FrameEncoder::http("h").encode(b"{not json").unwrap();
        let mut decoder = Decoder::new(Framing::Http);
        decoder.extend(&encoded);
        let result = decoder.decode_request().unwrap().unwrap();
        assert!(result.unwrap_err().is_malformed());
    }

    #[test]
    fn test_encode_reply_batch() {
        let batch = json!([
            Response::ok(Some(Id::Number(1)), json!(4)),
            Response::ok(Some(Id::Number(1)), json!(5)),
        ]);
        let encoded = Encoder::encode_reply(Framing::Raw, Some(&batch)).unwrap();
        let mut decoder = Decoder::new(Framing::Raw);
        decoder.extend(&encoded);
        assert_eq!(decoder.decode_incoming().unwrap().unwrap().len(), 2);
    }
}
