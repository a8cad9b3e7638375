//! Connection management.
//!
//! A [`Connection`] owns at most one socket. It is opened lazily, checked for
//! peer-close before every exchange, and replaced (after closing the stale
//! handle) when the peer went away. Exchanges are strictly send-then-receive.

use crate::error::ClientError;
use crate::stream::ClientStream;
use crate::tls;
use rpcbench_protocol::{Decoder, Framing, Incoming, DEFAULT_PORT};
use rustls::pki_types::ServerName;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default wait for the first bytes of a raw-framed response.
pub const DEFAULT_RAW_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// TLS configuration for client connections.
#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, the bundled web PKI roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification (INSECURE - development only).
    pub insecure: bool,
    /// Server name for SNI (defaults to the target host).
    pub server_name: Option<String>,
    /// Resume TLS sessions across reconnects.
    pub session_resumption: bool,
}

impl Default for TlsClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            insecure: false,
            server_name: None,
            session_resumption: true,
        }
    }
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self.enabled = true;
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn without_session_resumption(mut self) -> Self {
        self.session_resumption = false;
        self
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Framing used on the wire.
    pub framing: Framing,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Upper bound on one response read.
    pub request_timeout: Duration,
    /// Wait for the first bytes of a raw-framed response.
    pub raw_read_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// TLS configuration (optional, HTTP framing only).
    pub tls: Option<TlsClientConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            framing: Framing::Http,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            raw_read_timeout: DEFAULT_RAW_READ_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            tls: None,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_raw_read_timeout(mut self, timeout: Duration) -> Self {
        self.raw_read_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }

    /// `host:port`, also sent as the HTTP `Host` header.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|tls| tls.enabled)
    }

    /// Checks combinations that cannot work on the wire.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.tls_enabled() && self.framing == Framing::Raw {
            return Err(ClientError::TlsConfig(
                "TLS requires HTTP framing".to_string(),
            ));
        }
        Ok(())
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Absent,
    /// Socket open, peer has not closed.
    Open,
    /// Socket present but the peer performed an orderly close.
    PeerClosed,
}

/// A single blocking connection to a JSON-RPC server.
pub struct Connection {
    config: ConnectionConfig,
    stream: Option<ClientStream>,
    decoder: Decoder,
    buf: Vec<u8>,
    tls: Option<(Arc<rustls::ClientConfig>, ServerName<'static>)>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let decoder = Decoder::new(config.framing);
        let buf = vec![0u8; config.read_buffer_size];
        Self {
            config,
            stream: None,
            decoder,
            buf,
            tls: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns whether the stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        self.stream.as_ref().is_some_and(ClientStream::is_tls)
    }

    /// Probes the socket without blocking.
    ///
    /// Repeated calls without I/O in between report the same state.
    pub fn state(&mut self) -> Result<ConnectionState, ClientError> {
        match self.stream.as_mut() {
            None => Ok(ConnectionState::Absent),
            Some(stream) => {
                if stream.peer_closed()? {
                    Ok(ConnectionState::PeerClosed)
                } else {
                    Ok(ConnectionState::Open)
                }
            }
        }
    }

    /// Returns true if there is no socket or the peer closed it.
    pub fn is_closed(&mut self) -> Result<bool, ClientError> {
        Ok(self.state()? != ConnectionState::Open)
    }

    /// Connects if there is no usable socket. Returns whether a new socket was opened.
    pub fn ensure_open(&mut self) -> Result<bool, ClientError> {
        match self.state()? {
            ConnectionState::Open => Ok(false),
            ConnectionState::PeerClosed => {
                tracing::debug!("Peer closed the connection, reconnecting");
                self.close();
                self.connect()?;
                Ok(true)
            }
            ConnectionState::Absent => {
                self.connect()?;
                Ok(true)
            }
        }
    }

    /// Opens a new socket, replacing (and closing) any existing one.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        self.config.validate()?;
        self.close();

        let addr = self.config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let tcp = self.open_tcp(&addr)?;
        tcp.set_nodelay(true).ok();

        let stream = match self.config.tls.as_ref().filter(|tls| tls.enabled) {
            Some(tls_config) => {
                if self.tls.is_none() {
                    let client_config = tls::build_client_config(tls_config)?;
                    let server_name = tls::server_name(tls_config, &self.config.host)?;
                    self.tls = Some((client_config, server_name));
                }
                let Some((client_config, server_name)) = self.tls.as_ref() else {
                    return Err(ClientError::NotConnected);
                };

                tcp.set_read_timeout(Some(self.config.connect_timeout))?;
                tcp.set_write_timeout(Some(self.config.connect_timeout))?;
                tracing::debug!("Performing TLS handshake...");
                let tls_stream = tls::handshake(client_config.clone(), server_name.clone(), tcp)?;
                tls_stream.sock.set_write_timeout(None)?;
                ClientStream::Tls {
                    stream: Box::new(tls_stream),
                }
            }
            None => ClientStream::Plain { stream: tcp },
        };

        self.stream = Some(stream);
        self.decoder.clear();
        tracing::debug!("Connected to {}", addr);
        Ok(())
    }

    fn open_tcp(&self, addr: &str) -> Result<TcpStream, ClientError> {
        let connect_err = |source: io::Error| ClientError::Connect {
            addr: addr.to_string(),
            source,
        };

        let mut last_err = None;
        for socket_addr in addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&socket_addr, self.config.connect_timeout) {
                Ok(tcp) => return Ok(tcp),
                Err(e) => last_err = Some(e),
            }
        }
        Err(connect_err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
        })))
    }

    /// Writes a complete frame.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        if let Err(e) = stream.write_all(frame).and_then(|_| stream.flush()) {
            tracing::debug!("Send failed: {}", e);
            self.close();
            return Err(ClientError::Io(e));
        }
        tracing::debug!("Sent {} bytes", frame.len());
        Ok(())
    }

    /// Reads one response frame within the framing's read budget.
    ///
    /// Returns `Ok(None)` when no bytes arrived at all.
    pub fn receive(&mut self) -> Result<Option<Incoming>, ClientError> {
        let result = self.read_frame();
        if let Err(ClientError::Protocol(ref e)) = result {
            // The rest of the bad frame may still be on the wire.
            tracing::warn!("Dropping unreadable response: {}", e);
            self.close();
        }
        result
    }

    fn read_frame(&mut self) -> Result<Option<Incoming>, ClientError> {
        let deadline = Instant::now() + self.config.request_timeout;
        let first_wait = match self.config.framing {
            Framing::Raw => self.config.raw_read_timeout,
            Framing::Http => self.config.request_timeout,
        };

        // A previous late response may already be complete in the buffer.
        if let Some(incoming) = self.decoder.decode_incoming()? {
            return Ok(Some(incoming));
        }

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = if self.decoder.buffered() == 0 {
                first_wait.min(deadline - now)
            } else {
                deadline - now
            };

            let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
            stream.tcp().set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;

            match stream.read(&mut self.buf) {
                Ok(0) => {
                    tracing::debug!("Peer closed while reading");
                    break;
                }
                Ok(n) => {
                    tracing::debug!("Received {} bytes", n);
                    self.decoder.extend(&self.buf[..n]);
                    if let Some(incoming) = self.decoder.decode_incoming()? {
                        return Ok(Some(incoming));
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    if self.decoder.buffered() == 0 {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close();
                    return Err(ClientError::Io(e));
                }
            }
        }

        Ok(self.decoder.finish()?)
    }

    /// Closes the socket, if any.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!("Closing connection");
            stream.shutdown();
        }
        self.decoder.clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1", 8545);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.framing, Framing::Http);
        assert_eq!(config.addr(), "127.0.0.1:8545");
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::new("127.0.0.1", 8545).with_read_buffer_size(100); // Below minimum
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new("127.0.0.1", 8545)
            .with_read_buffer_size(10 * 1024 * 1024); // Above maximum
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_tls_requires_http() {
        let config = ConnectionConfig::new("127.0.0.1", 8545)
            .with_framing(Framing::Raw)
            .with_tls(TlsClientConfig::new().with_insecure());
        assert!(matches!(config.validate(), Err(ClientError::TlsConfig(_))));

        let mut conn = Connection::new(config);
        assert!(conn.connect().is_err());
        assert_eq!(conn.state().unwrap(), ConnectionState::Absent);
    }

    #[test]
    fn test_state_transitions() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut conn = Connection::new(ConnectionConfig::new("127.0.0.1", port));
        assert_eq!(conn.state().unwrap(), ConnectionState::Absent);
        assert!(conn.is_closed().unwrap());

        assert!(conn.ensure_open().unwrap());
        let (server, _) = listener.accept().unwrap();
        assert_eq!(conn.state().unwrap(), ConnectionState::Open);
        assert!(!conn.ensure_open().unwrap());

        drop(server);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(conn.state().unwrap(), ConnectionState::PeerClosed);
        assert_eq!(conn.state().unwrap(), ConnectionState::PeerClosed);

        assert!(conn.ensure_open().unwrap());
        let (_server, _) = listener.accept().unwrap();
        assert_eq!(conn.state().unwrap(), ConnectionState::Open);

        conn.close();
        assert_eq!(conn.state().unwrap(), ConnectionState::Absent);
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut conn = Connection::new(ConnectionConfig::new("127.0.0.1", port));
        let err = conn.ensure_open().unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
        assert!(err.is_connection());
    }

    #[test]
    fn test_raw_receive_times_out_without_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ConnectionConfig::new("127.0.0.1", port)
            .with_framing(Framing::Raw)
            .with_raw_read_timeout(Duration::from_millis(20));

        let mut conn = Connection::new(config);
        conn.ensure_open().unwrap();
        let _server = listener.accept().unwrap();

        let started = Instant::now();
        assert!(conn.receive().unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(conn.state().unwrap(), ConnectionState::Open);
    }

    #[test]
    fn test_http_receive_split_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut conn = Connection::new(ConnectionConfig::new("127.0.0.1", port));
        conn.ensure_open().unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let writer = thread::spawn(move || {
            let body = br#"{"jsonrpc":"2.0","id":1,"result":4}"#;
            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
            server.write_all(&head.as_bytes()[..10]).unwrap();
            thread::sleep(Duration::from_millis(10));
            server.write_all(&head.as_bytes()[10..]).unwrap();
            server.write_all(&body[..5]).unwrap();
            thread::sleep(Duration::from_millis(10));
            server.write_all(&body[5..]).unwrap();
            server
        });

        let incoming = conn.receive().unwrap().unwrap();
        assert_eq!(incoming.len(), 1);
        drop(writer.join().unwrap());
    }

    #[test]
    fn test_truncated_http_response_is_malformed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut conn = Connection::new(ConnectionConfig::new("127.0.0.1", port));
        conn.ensure_open().unwrap();
        let (mut server, _) = listener.accept().unwrap();

        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"id\":")
            .unwrap();
        drop(server);

        let err = conn.receive().unwrap_err();
        assert!(err.is_malformed());
        assert_eq!(conn.state().unwrap(), ConnectionState::Absent);
    }
}
