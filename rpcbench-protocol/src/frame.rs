//! Byte-level framing for JSON-RPC messages.
//!
//! Two framings share one port on the server side:
//!
//! ```text
//! raw:   {"jsonrpc":"2.0","method":"sum","params":{"a":2,"b":2},"id":100}
//!
//! http:  POST / HTTP/1.1\r\n
//!        Host: 127.0.0.1:8545\r\n
//!        Content-Type: application/json\r\n
//!        Content-Length: 61\r\n
//!        \r\n
//!        {"jsonrpc":"2.0","method":"sum","params":{"a":2,"b":2},"id":100}
//! ```
//!
//! Raw frames carry no length, so a raw frame ends where the JSON document
//! ends. HTTP frames end after `Content-Length` body bytes, or at EOF when the
//! head carries no length.

use crate::error::ProtocolError;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Header block terminator.
pub const HEAD_TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// Longest accepted HTTP head (request or status line plus headers).
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

const USER_AGENT: &str = concat!("rpcbench/", env!("CARGO_PKG_VERSION"));

/// Transport framing mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Bare JSON document on the TCP stream.
    Raw,
    /// HTTP/1.1 POST with a `Content-Length` delimited body.
    #[default]
    Http,
}

impl Framing {
    /// Identifies the framing of an inbound request from its first bytes.
    ///
    /// Returns `None` while the prefix is too short to tell.
    pub fn detect(prefix: &[u8]) -> Option<Framing> {
        const METHODS: [&[u8]; 3] = [b"POST ", b"GET ", b"PUT "];

        let trimmed = prefix.trim_ascii_start();
        if trimmed.is_empty() {
            return None;
        }
        if matches!(trimmed[0], b'{' | b'[') {
            return Some(Framing::Raw);
        }
        for method in METHODS {
            if trimmed.starts_with(method) {
                return Some(Framing::Http);
            }
            if method.starts_with(trimmed) {
                return None;
            }
        }
        Some(Framing::Raw)
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Raw => write!(f, "raw"),
            Framing::Http => write!(f, "http"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "tcp" => Ok(Framing::Raw),
            "http" => Ok(Framing::Http),
            other => Err(format!("unknown framing: {}", other)),
        }
    }
}

/// Wraps serialized JSON bodies into frames.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    framing: Framing,
    host: String,
}

impl FrameEncoder {
    pub fn new(framing: Framing, host: impl Into<String>) -> Self {
        Self {
            framing,
            host: host.into(),
        }
    }

    pub fn raw() -> Self {
        Self::new(Framing::Raw, "")
    }

    /// HTTP encoder; `host` is sent verbatim as the `Host` header.
    pub fn http(host: impl Into<String>) -> Self {
        Self::new(Framing::Http, host)
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Frames an already serialized JSON body.
    pub fn encode(&self, body: &[u8]) -> Result<BytesMut, ProtocolError> {
        if body.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        match self.framing {
            Framing::Raw => Ok(BytesMut::from(body)),
            Framing::Http => {
                let head = format!(
                    "POST / HTTP/1.1\r\n\
                     Host: {}\r\n\
                     User-Agent: {}\r\n\
                     Accept: */*\r\n\
                     Connection: keep-alive\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: {}\r\n\r\n",
                    self.host,
                    USER_AGENT,
                    body.len()
                );
                let mut buf = BytesMut::with_capacity(head.len() + body.len());
                buf.put_slice(head.as_bytes());
                buf.put_slice(body);
                Ok(buf)
            }
        }
    }

    /// Serializes `value` and frames it.
    pub fn encode_json<T: Serialize>(&self, value: &T) -> Result<BytesMut, ProtocolError> {
        let body = serde_json::to_vec(value)?;
        self.encode(&body)
    }
}

/// Frames a response body the way the RPC server does for the given framing.
pub fn encode_response(framing: Framing, body: &[u8]) -> BytesMut {
    match framing {
        Framing::Raw => BytesMut::from(body),
        Framing::Http => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            let mut buf = BytesMut::with_capacity(head.len() + body.len());
            buf.put_slice(head.as_bytes());
            buf.put_slice(body);
            buf
        }
    }
}

/// Parsed HTTP head of a request or a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHead {
    /// Request method, for request heads.
    pub method: Option<String>,
    /// Status code, for response heads.
    pub status: Option<u16>,
    /// Header fields in arrival order.
    pub headers: Vec<(String, String)>,
    /// Declared body length.
    pub content_length: Option<usize>,
}

impl HttpHead {
    /// Parses a head without its terminating blank line.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        let mut lines = text.split("\r\n");

        let start = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| ProtocolError::InvalidHeader("empty start line".to_string()))?;
        let mut parts = start.split_whitespace();

        let (method, status) = if start.starts_with("HTTP/") {
            parts.next();
            let code = parts
                .next()
                .and_then(|code| code.parse::<u16>().ok())
                .ok_or_else(|| ProtocolError::InvalidHeader(format!("bad status line: {}", start)))?;
            (None, Some(code))
        } else {
            match (parts.next(), parts.next(), parts.next()) {
                (Some(method), Some(_path), Some(version)) if version.starts_with("HTTP/") => {
                    (Some(method.to_string()), None)
                }
                _ => {
                    return Err(ProtocolError::InvalidHeader(format!(
                        "bad request line: {}",
                        start
                    )))
                }
            }
        };

        let mut headers = Vec::new();
        let mut content_length = None;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::InvalidHeader(format!("bad header: {}", line)))?;
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                let len = value.parse::<usize>().map_err(|_| {
                    ProtocolError::InvalidHeader(format!("bad Content-Length: {}", value))
                })?;
                content_length = Some(len);
            }
            headers.push((name.to_string(), value.to_string()));
        }

        Ok(Self {
            method,
            status,
            headers,
            content_length,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.status.map_or(true, |code| (200..300).contains(&code))
    }
}

/// Incremental decoder for bare JSON frames.
#[derive(Debug, Default)]
pub struct RawDecoder {
    buffer: BytesMut,
}

impl RawDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(crate::codec::DEFAULT_BUFFER_CAPACITY),
        }
    }

    /// Returns the next complete JSON document, `None` while it is incomplete.
    pub fn decode(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        let leading = self.buffer.len() - self.buffer.trim_ascii_start().len();
        self.buffer.advance(leading);
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<IgnoredAny>();
        match stream.next() {
            None => Ok(None),
            Some(Ok(_)) => {
                let end = stream.byte_offset();
                Ok(Some(self.buffer.split_to(end).freeze()))
            }
            Some(Err(e)) if e.is_eof() => {
                if self.buffer.len() > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: self.buffer.len(),
                        max: MAX_FRAME_SIZE,
                    });
                }
                Ok(None)
            }
            Some(Err(e)) => Err(ProtocolError::malformed(
                format!("invalid JSON: {}", e),
                &self.buffer,
            )),
        }
    }

    /// Called once no more bytes will arrive.
    pub fn finish(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if let Some(frame) = self.decode()? {
            return Ok(Some(frame));
        }
        if self.buffer.is_empty() {
            Ok(None)
        } else {
            Err(ProtocolError::malformed(
                "truncated JSON document",
                &self.buffer,
            ))
        }
    }
}

/// Incremental decoder for HTTP/1.1 frames.
#[derive(Debug, Default)]
pub struct HttpDecoder {
    buffer: BytesMut,
    pending: Option<HttpHead>,
    last: Option<HttpHead>,
}

impl HttpDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(crate::codec::DEFAULT_BUFFER_CAPACITY),
            pending: None,
            last: None,
        }
    }

    /// Returns the next complete body, `None` while head or body are incomplete.
    pub fn decode(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.pending.is_none() {
            let Some(pos) = find(&self.buffer, HEAD_TERMINATOR) else {
                if self.buffer.len() > MAX_HEAD_SIZE {
                    return Err(ProtocolError::InvalidHeader(format!(
                        "head exceeds {} bytes",
                        MAX_HEAD_SIZE
                    )));
                }
                return Ok(None);
            };
            let head = HttpHead::parse(&self.buffer[..pos])?;
            if let Some(len) = head.content_length {
                if len > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: len,
                        max: MAX_FRAME_SIZE,
                    });
                }
            }
            self.buffer.advance(pos + HEAD_TERMINATOR.len());
            self.pending = Some(head);
        }

        let Some(len) = self.pending.as_ref().and_then(|head| head.content_length) else {
            // Body runs until EOF.
            return Ok(None);
        };
        if self.buffer.len() < len {
            return Ok(None);
        }

        let body = self.buffer.split_to(len).freeze();
        self.last = self.pending.take();
        Ok(Some(body))
    }

    /// Called once no more bytes will arrive.
    pub fn finish(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if let Some(body) = self.decode()? {
            return Ok(Some(body));
        }
        match self.pending.take() {
            None if self.buffer.is_empty() => Ok(None),
            None => Err(ProtocolError::malformed(
                "incomplete HTTP head",
                &self.buffer,
            )),
            Some(head) => match head.content_length {
                None => {
                    let body = self.buffer.split().freeze();
                    self.last = Some(head);
                    Ok(Some(body))
                }
                Some(len) => Err(ProtocolError::malformed(
                    format!("truncated body: {} of {} bytes", self.buffer.len(), len),
                    &self.buffer,
                )),
            },
        }
    }

    /// Head of the most recently completed frame.
    pub fn head(&self) -> Option<&HttpHead> {
        self.last.as_ref()
    }
}

/// Incremental frame decoder for either framing.
#[derive(Debug)]
pub enum FrameDecoder {
    Raw(RawDecoder),
    Http(HttpDecoder),
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        match framing {
            Framing::Raw => FrameDecoder::Raw(RawDecoder::new()),
            Framing::Http => FrameDecoder::Http(HttpDecoder::new()),
        }
    }

    pub fn framing(&self) -> Framing {
        match self {
            FrameDecoder::Raw(_) => Framing::Raw,
            FrameDecoder::Http(_) => Framing::Http,
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        match self {
            FrameDecoder::Raw(d) => d.buffer.extend_from_slice(data),
            FrameDecoder::Http(d) => d.buffer.extend_from_slice(data),
        }
    }

    /// Attempts to decode the next frame body.
    pub fn decode(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self {
            FrameDecoder::Raw(d) => d.decode(),
            FrameDecoder::Http(d) => d.decode(),
        }
    }

    /// Flushes whatever is buffered once the stream ended or timed out.
    ///
    /// `Ok(None)` means nothing at all was received.
    pub fn finish(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self {
            FrameDecoder::Raw(d) => d.finish(),
            FrameDecoder::Http(d) => d.finish(),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        match self {
            FrameDecoder::Raw(d) => d.buffer.len(),
            FrameDecoder::Http(d) => d.buffer.len(),
        }
    }

    /// HTTP head of the last decoded frame.
    pub fn head(&self) -> Option<&HttpHead> {
        match self {
            FrameDecoder::Raw(_) => None,
            FrameDecoder::Http(d) => d.head(),
        }
    }

    pub fn clear(&mut self) {
        *self = FrameDecoder::new(self.framing());
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"jsonrpc":"2.0","method":"sum","params":{"a":2,"b":2},"id":100}"#;

    #[test]
    fn test_raw_encode_is_passthrough() {
        let encoded = FrameEncoder::raw().encode(BODY).unwrap();
        assert_eq!(&encoded[..], BODY);
    }

    #[test]
    fn test_http_encode_head() {
        let encoded = FrameEncoder::http("127.0.0.1:8545").encode(BODY).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.starts_with("POST / HTTP/1.1\r\n"));
        assert!(text.contains("Host: 127.0.0.1:8545\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains(&format!("Content-Length: {}\r\n", BODY.len())));
        assert!(text.ends_with(std::str::from_utf8(BODY).unwrap()));
    }

    #[test]
    fn test_http_request_roundtrip() {
        let encoded = FrameEncoder::http("localhost").encode(BODY).unwrap();
        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(&encoded);

        let body = decoder.decode().unwrap().unwrap();
        assert_eq!(&body[..], BODY);
        let head = decoder.head().unwrap();
        assert_eq!(head.method.as_deref(), Some("POST"));
        assert_eq!(head.header("content-type"), Some("application/json"));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_http_response_split_across_reads() {
        let encoded = encode_response(Framing::Http, BODY);
        let mut decoder = FrameDecoder::new(Framing::Http);

        // Head split in the middle of the terminator, body split twice
        let cuts = [10, 69, 75, 90];
        let mut start = 0;
        for cut in cuts {
            decoder.extend(&encoded[start..cut]);
            assert!(decoder.decode().unwrap().is_none());
            start = cut;
        }
        decoder.extend(&encoded[start..]);

        let body = decoder.decode().unwrap().unwrap();
        assert_eq!(&body[..], BODY);
        assert_eq!(decoder.head().unwrap().status, Some(200));
    }

    #[test]
    fn test_http_content_length_zero() {
        let encoded = encode_response(Framing::Http, b"");
        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(&encoded);
        let body = decoder.decode().unwrap().unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_http_lowercase_content_length() {
        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n{}");
        assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"{}");
    }

    #[test]
    fn test_http_without_length_reads_to_eof() {
        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(b"HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{\"id\":");
        assert!(decoder.decode().unwrap().is_none());
        decoder.extend(b"1}");
        let body = decoder.finish().unwrap().unwrap();
        assert_eq!(&body[..], b"{\"id\":1}");
    }

    #[test]
    fn test_http_truncated_body() {
        let encoded = encode_response(Framing::Http, BODY);
        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(&encoded[..encoded.len() - 5]);
        assert!(decoder.decode().unwrap().is_none());
        let err = decoder.finish().unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("truncated body"));
    }

    #[test]
    fn test_http_invalid_heads() {
        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(b"HTTP/1.1 abc OK\r\n\r\n");
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::InvalidHeader(_))
        ));

        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(b"HTTP/1.1 200 OK\r\nContent-Length: many\r\n\r\n");
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::InvalidHeader(_))
        ));

        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(b"HTTP/1.1 200 OK\r\nno colon here\r\n\r\n");
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_http_declared_length_too_large() {
        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", MAX_FRAME_SIZE + 1).as_bytes());
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_http_keep_alive_sequence() {
        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&FrameEncoder::http("h").encode(b"{\"id\":1}").unwrap());
        bytes.extend_from_slice(&FrameEncoder::http("h").encode(b"{\"id\":2}").unwrap());

        let mut decoder = FrameDecoder::new(Framing::Http);
        decoder.extend(&bytes);
        assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"{\"id\":1}");
        assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"{\"id\":2}");
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn test_raw_document_split_across_reads() {
        let mut decoder = FrameDecoder::new(Framing::Raw);
        decoder.extend(&BODY[..20]);
        assert!(decoder.decode().unwrap().is_none());
        decoder.extend(&BODY[20..]);
        assert_eq!(&decoder.decode().unwrap().unwrap()[..], BODY);
    }

    #[test]
    fn test_raw_two_documents_in_one_read() {
        let mut decoder = FrameDecoder::new(Framing::Raw);
        decoder.extend(b"{\"id\":1} [{\"id\":2}]");
        assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"{\"id\":1}");
        assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"[{\"id\":2}]");
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn test_raw_garbage_is_malformed() {
        let mut decoder = FrameDecoder::new(Framing::Raw);
        decoder.extend(b"{\"id\": nope}");
        let err = decoder.decode().unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_raw_finish() {
        let mut decoder = FrameDecoder::new(Framing::Raw);
        assert!(decoder.finish().unwrap().is_none());

        decoder.extend(b"  \n");
        assert!(decoder.finish().unwrap().is_none());

        decoder.extend(b"{\"id\":");
        assert!(decoder.finish().unwrap_err().is_malformed());
    }

    #[test]
    fn test_framing_detect() {
        assert_eq!(Framing::detect(b"POST / HTTP/1.1\r\n"), Some(Framing::Http));
        assert_eq!(Framing::detect(b"GET / HTTP/1.1\r\n"), Some(Framing::Http));
        assert_eq!(Framing::detect(b"{\"id\":1}"), Some(Framing::Raw));
        assert_eq!(Framing::detect(b"  [{}]"), Some(Framing::Raw));
        assert_eq!(Framing::detect(b"PO"), None);
        assert_eq!(Framing::detect(b""), None);
        assert_eq!(Framing::detect(b"hello"), Some(Framing::Raw));
    }

    #[test]
    fn test_framing_parse() {
        assert_eq!("raw".parse::<Framing>().unwrap(), Framing::Raw);
        assert_eq!("TCP".parse::<Framing>().unwrap(), Framing::Raw);
        assert_eq!("http".parse::<Framing>().unwrap(), Framing::Http);
        assert!("grpc".parse::<Framing>().is_err());
        assert_eq!(Framing::default(), Framing::Http);
    }

    #[test]
    fn test_frame_too_large() {
        let huge = vec![b' '; MAX_FRAME_SIZE + 1];
        let result = FrameEncoder::raw().encode(&huge);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }
}
